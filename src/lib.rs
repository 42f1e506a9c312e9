//! Mailbox Tasks: connect mailboxes over OAuth, sync their mail, and turn
//! actionable emails into project tasks.

pub mod accounts;
pub mod audit;
pub mod config;
pub mod error;
pub mod extraction;
pub mod llm;
pub mod mail;
pub mod oauth;
pub mod store;
pub mod sync;
pub mod tasks;
