//! Folder monitoring: IMAP IDLE with a polling fallback.
//!
//! The monitor shares the watcher's session mutex. Each cycle re-examines the
//! watched folder, compares the total message count against the previous
//! observation and broadcasts the positive delta, then waits for a server
//! push (or the next poll tick) before checking again.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_imap::extensions::idle::IdleResponse;
use async_imap::Session;
use serde::{Deserialize, Serialize};
use stop_token::StopSource;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, Mutex, Notify};
use tracing::{debug, error, info, warn};

use super::watcher::WatcherEvent;
use crate::error::{MailwatchError, Result};

/// IDLE/polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Whether to use IDLE when the server advertises it.
    pub prefer_idle: bool,
    /// How long a single IDLE command is allowed to wait before being
    /// re-issued. Keep below 29 minutes to survive NAT timeouts.
    pub idle_timeout: Duration,
    /// Interval between mailbox checks when IDLE is unavailable or disabled.
    pub poll_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            prefer_idle: true,
            idle_timeout: Duration::from_secs(20 * 60),
            poll_interval: Duration::from_secs(60),
        }
    }
}

/// Payload for a new-message notification: the increase in the folder's
/// total message count, or `None` when nothing should be emitted.
///
/// The first observation only seeds the baseline.
pub(crate) fn new_message_delta(prev: Option<u32>, count: u32) -> Option<u32> {
    match prev {
        Some(prev) if count > prev => Some(count - prev),
        _ => None,
    }
}

pub(crate) struct Monitor<S>
where
    S: AsyncRead + AsyncWrite + Unpin + fmt::Debug + Send,
{
    pub(crate) folder: String,
    pub(crate) config: MonitorConfig,
    pub(crate) session: Arc<Mutex<Option<Session<S>>>>,
    pub(crate) connected: Arc<AtomicBool>,
    pub(crate) events: broadcast::Sender<WatcherEvent>,
    pub(crate) idle_interrupt: Arc<StdMutex<Option<StopSource>>>,
    pub(crate) interrupt_requested: Arc<AtomicBool>,
    pub(crate) shutdown: Arc<Notify>,
}

impl<S> Monitor<S>
where
    S: AsyncRead + AsyncWrite + Unpin + fmt::Debug + Send,
{
    /// Run the monitoring loop until the watcher disconnects or the session
    /// fails. Session failures flip the connection state and are broadcast
    /// as `Error` followed by `Closed`; a clean shutdown exits silently.
    pub(crate) async fn run(self) {
        let use_idle = if self.config.prefer_idle {
            match self.supports_idle().await {
                Ok(supported) => {
                    if !supported {
                        info!(folder = %self.folder, "server lacks IDLE, falling back to polling");
                    }
                    supported
                }
                Err(e) => {
                    self.fail(e).await;
                    return;
                }
            }
        } else {
            false
        };

        let result = if use_idle {
            self.idle_loop().await
        } else {
            self.poll_loop().await
        };

        match result {
            Ok(()) => debug!(folder = %self.folder, "monitor stopped"),
            Err(e) => self.fail(e).await,
        }
    }

    async fn supports_idle(&self) -> Result<bool> {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return Ok(false);
        };

        let caps = session
            .capabilities()
            .await
            .map_err(|e| MailwatchError::Session(format!("CAPABILITY failed: {}", e)))?;
        Ok(caps.has_str("IDLE"))
    }

    async fn idle_loop(&self) -> Result<()> {
        info!(folder = %self.folder, "monitoring folder with IDLE");
        let mut prev_count: Option<u32> = None;

        while self.connected.load(Ordering::SeqCst) {
            let mut guard = self.session.lock().await;
            let Some(mut session) = guard.take() else {
                break;
            };

            // Re-examine to refresh EXISTS; search may have selected another
            // folder while the mutex was released.
            let mailbox = session
                .examine(&self.folder)
                .await
                .map_err(|e| MailwatchError::Session(format!("EXAMINE failed: {}", e)))?;
            self.observe_count(&mut prev_count, mailbox.exists);

            let mut idle = session.idle();
            idle.init()
                .await
                .map_err(|e| MailwatchError::Session(format!("IDLE failed: {}", e)))?;

            // Park the stop handle so on-demand operations can break the wait
            // instead of queuing behind the full timeout.
            let (idle_wait, interrupt) = idle.wait_with_timeout(self.config.idle_timeout);
            if let Ok(mut slot) = self.idle_interrupt.lock() {
                *slot = Some(interrupt);
            }
            self.honor_pending_interrupt();

            let response = idle_wait.await;

            if let Ok(mut slot) = self.idle_interrupt.lock() {
                slot.take();
            }

            let response =
                response.map_err(|e| MailwatchError::Session(format!("IDLE wait failed: {}", e)))?;
            let session = idle
                .done()
                .await
                .map_err(|e| MailwatchError::Session(format!("IDLE DONE failed: {}", e)))?;
            *guard = Some(session);
            drop(guard);

            match response {
                IdleResponse::Timeout => {
                    debug!("idle timeout elapsed, re-issuing");
                }
                IdleResponse::ManualInterrupt => {
                    // The interrupting task is already queued on the session
                    // mutex; the fair lock hands it the session first.
                    debug!("idle interrupted");
                }
                IdleResponse::NewData(_) => {
                    debug!("idle notified of new data");
                }
            }
        }

        Ok(())
    }

    // An interrupt request raised while nothing was parked yet (the monitor
    // was between taking the mutex and parking the stop handle) would
    // otherwise stall the caller behind the full idle timeout. Check for one
    // right after parking and drop the fresh handle so the wait resolves as
    // ManualInterrupt immediately.
    fn honor_pending_interrupt(&self) {
        if self.interrupt_requested.swap(false, Ordering::SeqCst) {
            if let Ok(mut slot) = self.idle_interrupt.lock() {
                slot.take();
            }
        }
    }

    async fn poll_loop(&self) -> Result<()> {
        info!(
            folder = %self.folder,
            interval_secs = self.config.poll_interval.as_secs(),
            "monitoring folder by polling"
        );
        let mut prev_count: Option<u32> = None;

        while self.connected.load(Ordering::SeqCst) {
            {
                let mut guard = self.session.lock().await;
                let Some(session) = guard.as_mut() else {
                    break;
                };

                let mailbox = session
                    .examine(&self.folder)
                    .await
                    .map_err(|e| MailwatchError::Session(format!("EXAMINE failed: {}", e)))?;
                self.observe_count(&mut prev_count, mailbox.exists);
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = self.shutdown.notified() => {}
            }
        }

        Ok(())
    }

    fn observe_count(&self, prev_count: &mut Option<u32>, count: u32) {
        if let Some(delta) = new_message_delta(*prev_count, count) {
            info!(folder = %self.folder, count = delta, "new messages arrived");
            let _ = self.events.send(WatcherEvent::NewMessages(delta));
        } else if prev_count.map_or(false, |prev| count < prev) {
            warn!(folder = %self.folder, count, "message count decreased");
        }
        *prev_count = Some(count);
    }

    // Evicts the dead session as well: a later disconnect() is a no-op once
    // `connected` is false, so nothing else would ever clear the slot.
    async fn fail(&self, err: MailwatchError) {
        error!(folder = %self.folder, error = %err, "monitor session error");
        self.connected.store(false, Ordering::SeqCst);
        self.session.lock().await.take();
        let _ = self.events.send(WatcherEvent::Error(err.to_string()));
        let _ = self.events.send(WatcherEvent::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imap::testkit;
    use tokio::io::DuplexStream;

    #[test]
    fn delta_is_the_increment_not_the_total() {
        assert_eq!(new_message_delta(Some(5), 8), Some(3));
        assert_eq!(new_message_delta(Some(0), 1), Some(1));
    }

    #[test]
    fn no_delta_when_count_does_not_increase() {
        assert_eq!(new_message_delta(Some(8), 8), None);
        assert_eq!(new_message_delta(Some(8), 5), None);
    }

    #[test]
    fn first_observation_only_seeds_the_baseline() {
        assert_eq!(new_message_delta(None, 42), None);
    }

    #[test]
    fn default_config_prefers_idle() {
        let config = MonitorConfig::default();
        assert!(config.prefer_idle);
        assert!(config.idle_timeout < Duration::from_secs(29 * 60));
    }

    fn monitor(session: Option<Session<DuplexStream>>) -> (Monitor<DuplexStream>, broadcast::Receiver<WatcherEvent>) {
        let (events, rx) = broadcast::channel(8);
        let monitor = Monitor {
            folder: "INBOX".to_string(),
            config: MonitorConfig::default(),
            session: Arc::new(Mutex::new(session)),
            connected: Arc::new(AtomicBool::new(true)),
            events,
            idle_interrupt: Arc::new(StdMutex::new(None)),
            interrupt_requested: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
        };
        (monitor, rx)
    }

    #[tokio::test]
    async fn session_failure_evicts_the_session_and_broadcasts() {
        let session = testkit::scripted_session(vec![]).await;
        let (monitor, mut rx) = monitor(Some(session));

        monitor
            .fail(MailwatchError::Session("EXAMINE failed".to_string()))
            .await;

        assert!(!monitor.connected.load(Ordering::SeqCst));
        assert!(monitor.session.lock().await.is_none());
        assert!(matches!(rx.recv().await.unwrap(), WatcherEvent::Error(_)));
        assert!(matches!(rx.recv().await.unwrap(), WatcherEvent::Closed));
    }

    #[tokio::test]
    async fn pending_interrupt_drops_the_freshly_parked_handle() {
        let (monitor, _rx) = monitor(None);
        monitor.interrupt_requested.store(true, Ordering::SeqCst);
        *monitor.idle_interrupt.lock().unwrap() = Some(StopSource::new());

        monitor.honor_pending_interrupt();

        assert!(monitor.idle_interrupt.lock().unwrap().is_none());
        assert!(!monitor.interrupt_requested.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn parked_handle_survives_when_no_interrupt_is_pending() {
        let (monitor, _rx) = monitor(None);
        *monitor.idle_interrupt.lock().unwrap() = Some(StopSource::new());

        monitor.honor_pending_interrupt();

        assert!(monitor.idle_interrupt.lock().unwrap().is_some());
    }
}
