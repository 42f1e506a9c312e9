//! Connected mailboxes: account model and registry.

pub mod model;
pub mod registry;

pub use model::{MailboxAccount, Provider};
pub use registry::AccountRegistry;
