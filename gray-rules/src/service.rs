use crate::index::RuleIndex;
use crate::matcher;
use crate::metrics_defs::SCAN_FAILURES;
use crate::notification::ReleaseMessage;
use crate::refresher::Refresher;
use crate::scanner::{ScanError, ScanSummary, Scanner};
use crate::store::RuleStore;
use crate::types::{Client, ReleaseId};
use parking_lot::Mutex;
use shared::counter;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

#[derive(Clone, Debug, PartialEq)]
pub struct ScanSettings {
    pub interval: Duration,
    // Every n-th tick re-reads the whole store; other ticks only read new rows.
    pub full_scan_every: u32,
    pub notification_buffer: usize,
}

impl Default for ScanSettings {
    fn default() -> Self {
        ScanSettings {
            interval: Duration::from_secs(60),
            full_scan_every: 1,
            notification_buffer: 256,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum RulesError {
    #[error("scan failed: {0}")]
    Scan(#[from] ScanError),
    #[error("the scanner is not running")]
    ScannerStopped,
    #[error("the notification channel is closed")]
    NotificationsClosed,
}

#[derive(Debug)]
pub enum Command {
    // Run a full scan outside of the normal interval.
    // The worker replies once the scan attempt finishes.
    Refresh(oneshot::Sender<Result<ScanSummary, ScanError>>),
    // Stop the scan loop.
    Shutdown,
}

struct RulesInner {
    index: Arc<RuleIndex>,
    // Set once the first full scan has completed.
    ready: Arc<AtomicBool>,
    tx: mpsc::Sender<Command>,
    notifications: mpsc::Sender<ReleaseMessage>,
    scanner_handle: Mutex<Option<JoinHandle<()>>>,
    refresher_handle: Mutex<Option<JoinHandle<()>>>,
}

/// Answers gray release queries from an in-memory index kept in sync with
/// the rule store by a periodic scanner and a notification driven refresher.
///
/// Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct GrayReleaseRules {
    inner: Arc<RulesInner>,
}

impl GrayReleaseRules {
    pub fn new(store: Arc<dyn RuleStore>, settings: ScanSettings) -> Self {
        let index = Arc::new(RuleIndex::new());
        let ready = Arc::new(AtomicBool::new(false));

        let (tx, rx) = mpsc::channel::<Command>(16);
        let (notifications, notification_rx) =
            mpsc::channel::<ReleaseMessage>(settings.notification_buffer.max(1));

        let scanner = Scanner::new(store.clone(), index.clone());
        let scanner_handle = tokio::spawn(run_scanner(scanner, settings, ready.clone(), rx));

        let refresher = Refresher::new(store, index.clone());
        let refresher_handle = tokio::spawn(refresher.run(notification_rx));

        GrayReleaseRules {
            inner: Arc::new(RulesInner {
                index,
                ready,
                tx,
                notifications,
                scanner_handle: Mutex::new(Some(scanner_handle)),
                refresher_handle: Mutex::new(Some(refresher_handle)),
            }),
        }
    }

    pub fn find_release_id(
        &self,
        client: &Client<'_>,
        app_id: &str,
        cluster_name: &str,
        namespace_name: &str,
    ) -> Option<ReleaseId> {
        matcher::find_release_id(
            &self.inner.index,
            client,
            app_id,
            cluster_name,
            namespace_name,
        )
    }

    pub fn has_gray_rule(&self, client: &Client<'_>, namespace_name: &str) -> bool {
        matcher::has_gray_rule(&self.inner.index, client, namespace_name)
    }

    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Relaxed)
    }

    /// Hands a message from the notification transport to the refresher.
    pub async fn notify(&self, message: ReleaseMessage) -> Result<(), RulesError> {
        self.inner
            .notifications
            .send(message)
            .await
            .map_err(|_| RulesError::NotificationsClosed)
    }

    /// Runs a full scan now and waits for it to finish.
    pub async fn refresh(&self) -> Result<ScanSummary, RulesError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.inner
            .tx
            .send(Command::Refresh(reply_tx))
            .await
            .map_err(|_| RulesError::ScannerStopped)?;

        Ok(reply_rx.await.map_err(|_| RulesError::ScannerStopped)??)
    }

    /// Stops the scanner after its current pass and the refresher at its
    /// next await point. The index keeps its last contents.
    pub async fn shutdown(&self) {
        let _ = self.inner.tx.send(Command::Shutdown).await;

        let scanner_handle = self.inner.scanner_handle.lock().take();
        if let Some(handle) = scanner_handle
            && let Err(err) = handle.await
        {
            tracing::error!(error = %err, "Scanner task failed");
        }

        if let Some(handle) = self.inner.refresher_handle.lock().take() {
            handle.abort();
        }
    }
}

async fn run_scanner(
    mut scanner: Scanner,
    settings: ScanSettings,
    ready: Arc<AtomicBool>,
    mut rx: mpsc::Receiver<Command>,
) {
    let full_scan_every = u64::from(settings.full_scan_every.max(1));
    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks: u64 = 0;

    // The first tick completes immediately, so the initial load happens at startup.
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let full = !ready.load(Ordering::Relaxed) || ticks % full_scan_every == 0;
                ticks += 1;

                let result = if full {
                    scanner.full_scan().await
                } else {
                    scanner.incremental_scan().await
                };
                record_scan(&result, full, &ready);
            }
            cmd = rx.recv() => {
                match cmd {
                    Some(Command::Refresh(reply)) => {
                        let result = scanner.full_scan().await;
                        record_scan(&result, true, &ready);
                        let _ = reply.send(result);
                    }
                    Some(Command::Shutdown) | None => break,
                }
            }
        }
    }

    tracing::info!(watermark = scanner.watermark(), "Gray release rule scanner stopped");
}

fn record_scan(result: &Result<ScanSummary, ScanError>, full: bool, ready: &AtomicBool) {
    match result {
        Ok(_) => {
            if full && !ready.swap(true, Ordering::Relaxed) {
                tracing::info!("Gray release rules loaded");
            }
        }
        Err(err) => {
            // Stale rules are served until a later pass succeeds.
            counter!(SCAN_FAILURES).increment(1);
            tracing::error!(full, error = %err, "Gray release rule scan failed");
        }
    }
}
