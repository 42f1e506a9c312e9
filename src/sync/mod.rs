//! Mailbox sync: engine, token-refresh wrapper and background poller.

pub mod engine;
pub mod poller;
pub mod refresh;

pub use engine::SyncEngine;
pub use poller::{SyncPass, spawn_sync_poller, sync_all};
pub use refresh::sync_with_refresh;
