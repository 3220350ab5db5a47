//! One IMAP session per account: connect, watch, search, fetch.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_imap::Session;
use async_native_tls::TlsStream;
use chrono::{DateTime, Duration, Utc};
use futures::TryStreamExt;
use stop_token::StopSource;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection;
use super::monitor::{Monitor, MonitorConfig};
use crate::config::AccountConfig;
use crate::error::{MailwatchError, Result};

const DEFAULT_FOLDER: &str = "INBOX";

/// Capacity of the broadcast channel behind [`MailboxWatcher::subscribe`].
const EVENT_CAPACITY: usize = 64;

/// Events broadcast to every subscriber of a [`MailboxWatcher`].
#[derive(Debug, Clone)]
pub enum WatcherEvent {
    /// The watched folder's total message count increased; the payload is
    /// the increment, not the new total.
    NewMessages(u32),
    /// A session-level failure (transport, auth, protocol).
    Error(String),
    /// The underlying session terminated, by error or by `disconnect`.
    Closed,
}

/// Watches one mailbox over a single IMAP session.
///
/// All folder-scoped operations serialize on an internal session mutex (the
/// mailbox lock); the guard is released exactly once per operation, success
/// or failure. No timeouts are imposed here — callers bring their own.
///
/// The transport defaults to TLS over TCP; it is generic so the session can
/// be driven over an in-memory stream in tests.
pub struct MailboxWatcher<S = TlsStream<TcpStream>>
where
    S: AsyncRead + AsyncWrite + Unpin + fmt::Debug + Send,
{
    account: AccountConfig,
    folder: String,
    monitor_config: MonitorConfig,
    session: Arc<Mutex<Option<Session<S>>>>,
    connected: Arc<AtomicBool>,
    events: broadcast::Sender<WatcherEvent>,
    idle_interrupt: Arc<StdMutex<Option<StopSource>>>,
    interrupt_requested: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    monitor_task: Option<JoinHandle<()>>,
}

impl MailboxWatcher {
    pub fn new(account: AccountConfig) -> Self {
        Self::with_account(account)
    }

    /// Establish the session and start monitoring the watched folder.
    ///
    /// Connect-time failures are returned to the caller *and* emitted as an
    /// [`WatcherEvent::Error`] for passive observers.
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let session = match connection::connect(&self.account).await {
            Ok(session) => session,
            Err(e) => {
                let _ = self.events.send(WatcherEvent::Error(e.to_string()));
                return Err(e);
            }
        };

        *self.session.lock().await = Some(session);
        self.connected.store(true, Ordering::SeqCst);

        let monitor = Monitor {
            folder: self.folder.clone(),
            config: self.monitor_config.clone(),
            session: self.session.clone(),
            connected: self.connected.clone(),
            events: self.events.clone(),
            idle_interrupt: self.idle_interrupt.clone(),
            interrupt_requested: self.interrupt_requested.clone(),
            shutdown: self.shutdown.clone(),
        };
        self.monitor_task = Some(tokio::spawn(monitor.run()));

        info!(email = %self.account.email, folder = %self.folder, "mailbox watcher connected");
        Ok(())
    }
}

impl<S> MailboxWatcher<S>
where
    S: AsyncRead + AsyncWrite + Unpin + fmt::Debug + Send,
{
    fn with_account(account: AccountConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            account,
            folder: DEFAULT_FOLDER.to_string(),
            monitor_config: MonitorConfig::default(),
            session: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            events,
            idle_interrupt: Arc::new(StdMutex::new(None)),
            interrupt_requested: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            monitor_task: None,
        }
    }

    /// Watch a folder other than `INBOX`.
    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = folder.into();
        self
    }

    pub fn with_monitor_config(mut self, config: MonitorConfig) -> Self {
        self.monitor_config = config;
        self
    }

    /// Register an observer. Every subscriber receives its own copy of each
    /// event; subscribing is allowed at any time.
    pub fn subscribe(&self) -> broadcast::Receiver<WatcherEvent> {
        self.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Log out and stop monitoring. A no-op when not connected.
    pub async fn disconnect(&mut self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        self.shutdown.notify_one();
        self.interrupt_idle();
        {
            let mut guard = self.session.lock().await;
            if let Some(mut session) = guard.take() {
                if let Err(e) = session.logout().await {
                    warn!(error = %e, "logout failed");
                }
            }
        }

        if let Some(task) = self.monitor_task.take() {
            let _ = task.await;
        }

        let _ = self.events.send(WatcherEvent::Closed);
        info!(email = %self.account.email, "mailbox watcher disconnected");
        Ok(())
    }

    /// Return the UIDs of all messages in `folder` received within the last
    /// `days_back` days, sorted ascending. `days_back = 0` means today only;
    /// no matches is an empty list, never an error.
    pub async fn search(&self, folder: &str, days_back: u32) -> Result<Vec<u32>> {
        if !self.is_connected() {
            return Err(MailwatchError::NotConnected);
        }

        self.interrupt_idle();
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(MailwatchError::NotConnected)?;

        session
            .examine(folder)
            .await
            .map_err(|e| MailwatchError::Session(format!("EXAMINE failed: {}", e)))?;

        let query = format!("SINCE {}", since_date(Utc::now(), days_back));
        let uid_set = session
            .uid_search(&query)
            .await
            .map_err(|e| MailwatchError::Session(format!("SEARCH failed: {}", e)))?;

        let mut uids: Vec<u32> = uid_set.into_iter().collect();
        uids.sort_unstable();

        debug!(folder = %folder, count = uids.len(), days_back, "search complete");
        Ok(uids)
    }

    /// Fetch the full raw bytes of one message by UID, resolved against the
    /// watched folder.
    pub async fn fetch_by_id(&self, uid: u32) -> Result<Vec<u8>> {
        if !self.is_connected() {
            return Err(MailwatchError::NotConnected);
        }

        self.interrupt_idle();
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(MailwatchError::NotConnected)?;

        session
            .examine(&self.folder)
            .await
            .map_err(|e| MailwatchError::Session(format!("EXAMINE failed: {}", e)))?;

        let fetches: Vec<_> = session
            .uid_fetch(uid.to_string(), "(UID BODY.PEEK[])")
            .await
            .map_err(|e| MailwatchError::Session(format!("FETCH failed: {}", e)))?
            .try_collect()
            .await
            .map_err(|e| MailwatchError::Session(format!("FETCH collect failed: {}", e)))?;

        fetches
            .iter()
            .find(|fetch| fetch.uid == Some(uid))
            .and_then(|fetch| fetch.body())
            .map(|body| body.to_vec())
            .ok_or(MailwatchError::NotFound(uid))
    }

    // Dropping the parked stop source resolves a pending IDLE wait with
    // ManualInterrupt, so the monitor releases the session mutex promptly.
    // When nothing is parked yet (the monitor is mid-handshake, between
    // taking the mutex and parking the handle), leave a request behind; the
    // monitor honors it right after parking.
    fn interrupt_idle(&self) {
        self.interrupt_requested.store(true, Ordering::SeqCst);
        if let Ok(mut slot) = self.idle_interrupt.lock() {
            if slot.take().is_some() {
                self.interrupt_requested.store(false, Ordering::SeqCst);
            }
        }
    }

    #[cfg(test)]
    async fn attach_session(&self, session: Session<S>) {
        *self.session.lock().await = Some(session);
        self.connected.store(true, Ordering::SeqCst);
    }
}

/// IMAP search date for `now - days_back days`, e.g. `08-Feb-2025`.
fn since_date(now: DateTime<Utc>, days_back: u32) -> String {
    (now - Duration::days(i64::from(days_back)))
        .format("%d-%b-%Y")
        .to_string()
}
