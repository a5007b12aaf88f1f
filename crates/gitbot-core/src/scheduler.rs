//! Fixed-interval polling loop.
//!
//! Fires a detection cycle, renders the resulting announcements and pushes
//! them through the message sink. Delivery is best-effort: if the session is
//! not ready the notification is dropped and logged, never queued.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{config::SharedConfig, detector::ChangeDetector, format, ports::MessageSink};

pub struct PollScheduler {
    detector: Arc<ChangeDetector>,
    sink: Arc<dyn MessageSink>,
    config: SharedConfig,
    // Concurrent detection cycles must not race on a repository's cursor.
    cycle_lock: Mutex<()>,
    cancel: CancellationToken,
}

impl PollScheduler {
    pub fn new(
        detector: Arc<ChangeDetector>,
        sink: Arc<dyn MessageSink>,
        config: SharedConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            detector,
            sink,
            config,
            cycle_lock: Mutex::new(()),
            cancel,
        }
    }

    /// Run until cancelled. The interval is re-read each iteration so a
    /// rehash takes effect without restarting the loop.
    pub async fn run(&self) {
        info!("poll scheduler started");
        loop {
            let interval = { self.config.read().await.poll_interval() };
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => self.poll_once().await,
            }
        }
        info!("poll scheduler stopped");
    }

    /// One detection cycle. Overlapping invocations (a slow cycle still
    /// running when the next tick fires) skip instead of racing.
    pub async fn poll_once(&self) {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            debug!("previous detection cycle still running, skipping tick");
            return;
        };

        let announcements = self.detector.run_cycle().await;
        if announcements.is_empty() {
            return;
        }

        let channels = { self.config.read().await.irc.channels.clone() };
        for announcement in &announcements {
            let line = format::commit_line(&announcement.repo, &announcement.commit);
            for channel in &channels {
                if let Err(e) = self.sink.send_message(channel, &line).await {
                    warn!(
                        channel = %channel,
                        repo = %announcement.repo,
                        error = %e,
                        "dropping commit notification"
                    );
                }
            }
        }
    }
}
