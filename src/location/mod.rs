//! Periodic location production.
//!
//! [`PositionSource`] is the seam to the platform positioning service;
//! [`LocationProducer`] polls it on a fixed interval and forwards sanitized
//! [`PositionSample`]s into a channel, followed by [`ProducerEvent::Ended`] if
//! the source revokes access mid-stream. The producer's timeline is
//! independent of any network connection.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::types::{PositionSample, RawFix};
use crate::{RelayError, Result};

pub mod scripted;

pub use scripted::ScriptedPositionSource;

/// Requested positioning accuracy, passed through to the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accuracy {
    #[default]
    High,
    Balanced,
    LowPower,
}

/// Whether the positioning capability can be used right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    PermissionDenied,
    Unavailable,
}

/// Platform positioning service.
#[async_trait::async_trait]
pub trait PositionSource: Send + Sync + 'static {
    /// Synchronous permission and capability check.
    fn availability(&self) -> Availability;

    /// Wait for the next fix.
    ///
    /// Returns:
    /// - `Ok(Some(fix))` - a reading, speed/heading possibly NaN
    /// - `Ok(None)` - no reading this round
    /// - `Err(e)` - the source failed; `PermissionDenied` ends production
    async fn next_fix(&self, accuracy: Accuracy) -> Result<Option<RawFix>>;
}

/// What the producer task hands to its sink.
#[derive(Debug)]
pub enum ProducerEvent {
    Sample(PositionSample),
    /// The task stopped on its own. Not sent for `stop` or cancellation.
    Ended(RelayError),
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Start/stop wrapper around a periodic positioning task.
pub struct LocationProducer {
    source: Arc<dyn PositionSource>,
    parent: CancellationToken,
    running: Option<Running>,
}

impl LocationProducer {
    /// The task is cancelled when `parent` is.
    pub fn new(source: Arc<dyn PositionSource>, parent: CancellationToken) -> Self {
        Self { source, parent, running: None }
    }

    /// Begin producing one sample per `interval`.
    ///
    /// Fails with `PermissionDenied` before spawning anything if the source is
    /// unavailable. Calling it while already running is a no-op.
    pub fn start(
        &mut self,
        interval: Duration,
        accuracy: Accuracy,
        sink: mpsc::UnboundedSender<ProducerEvent>,
    ) -> Result<()> {
        if self.is_running() {
            debug!("Location producer already running");
            return Ok(());
        }

        match self.source.availability() {
            Availability::Available => {}
            Availability::PermissionDenied => {
                return Err(RelayError::permission_denied("location"));
            }
            Availability::Unavailable => {
                return Err(RelayError::permission_denied("location services"));
            }
        }

        let cancel = self.parent.child_token();
        let task_cancel = cancel.clone();
        let source = Arc::clone(&self.source);
        let handle = tokio::spawn(async move {
            produce(source, interval, accuracy, sink, task_cancel).await;
        });

        info!(?interval, ?accuracy, "Location producer started");
        self.running = Some(Running { cancel, handle });
        Ok(())
    }

    /// Cancel the positioning task. Safe when not started.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            info!("Location producer stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.as_ref().is_some_and(|r| !r.handle.is_finished())
    }
}

impl Drop for LocationProducer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn produce(
    source: Arc<dyn PositionSource>,
    period: Duration,
    accuracy: Accuracy,
    sink: mpsc::UnboundedSender<ProducerEvent>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut produced = 0u64;

    loop {
        let fix = tokio::select! {
            _ = cancel.cancelled() => break,
            fix = async {
                ticker.tick().await;
                source.next_fix(accuracy).await
            } => fix,
        };

        match fix {
            Ok(Some(fix)) => {
                let sample = match PositionSample::from_fix(fix) {
                    Ok(sample) => sample,
                    Err(e) => {
                        warn!("Discarding fix: {}", e);
                        continue;
                    }
                };
                produced += 1;
                trace!(lat = sample.lat, lng = sample.lng, "Position sample");
                if sink.send(ProducerEvent::Sample(sample)).is_err() {
                    debug!("Sample receiver dropped, stopping producer");
                    break;
                }
            }
            Ok(None) => trace!("No fix this round"),
            Err(e @ RelayError::PermissionDenied { .. }) => {
                warn!("Positioning revoked: {}", e);
                let _ = sink.send(ProducerEvent::Ended(e));
                break;
            }
            Err(e) => warn!("Positioning error: {}", e),
        }
    }

    debug!(produced, "Location producer task ended");
}
