//! Asynchronous IMAP mailbox watcher and MIME message decoder.
//!
//! Two independent pieces:
//!
//! - [`imap::MailboxWatcher`] — one IMAP session per account. Connects over
//!   TLS, monitors a folder for new messages (IDLE, with a polling
//!   fallback), and exposes on-demand UID search and raw message fetch.
//!   Lifecycle and new-message events are broadcast to every subscriber.
//! - [`parser::decode`] — turns raw RFC 2822/MIME bytes into a normalized
//!   [`parser::ParsedEmail`] record.
//!
//! The two compose only at the caller's discretion: the watcher hands out
//! bytes, the decoder consumes them.
//!
//! ```no_run
//! use mailwatch::{AccountConfig, MailboxWatcher, WatcherEvent};
//!
//! # async fn run() -> mailwatch::Result<()> {
//! let account = AccountConfig::new("me@example.com", "secret", "imap.example.com", 993);
//! let mut watcher = MailboxWatcher::new(account);
//! let mut events = watcher.subscribe();
//!
//! watcher.connect().await?;
//!
//! while let Ok(WatcherEvent::NewMessages(count)) = events.recv().await {
//!     tracing::info!(count, "new messages");
//!     for uid in watcher.search("INBOX", 0).await? {
//!         let raw = watcher.fetch_by_id(uid).await?;
//!         let email = mailwatch::parser::decode(&raw, "INBOX")?;
//!         tracing::info!(subject = %email.subject, "decoded");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod imap;
pub mod parser;

pub use config::{AccountConfig, WatchConfig};
pub use error::{MailwatchError, Result};
pub use imap::{MailboxWatcher, MonitorConfig, WatcherEvent};
pub use parser::{decode, ParsedEmail};
