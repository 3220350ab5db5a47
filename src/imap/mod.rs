//! IMAP mailbox watching.
//!
//! [`MailboxWatcher`] owns one session per account. It relays connection
//! lifecycle and new-message-count events through a broadcast channel and
//! exposes on-demand UID search and raw message fetch. The protocol itself
//! (framing, IDLE semantics) is entirely `async-imap`'s job.

mod connection;
mod monitor;
#[cfg(test)]
mod testkit;
mod watcher;

pub use monitor::MonitorConfig;
pub use watcher::{MailboxWatcher, WatcherEvent};
