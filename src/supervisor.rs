//! Detector lifecycle: permission, subscription, enable/disable.
//!
//! The pure state machine lives in `detector`; this module owns everything
//! around it. Each enabled detector runs as one tokio task that asks the
//! platform layer for sensor access, subscribes to the shared sample
//! broadcast, and feeds the state machine. Disabling tears the subscription
//! down before the call returns: no trigger callback can begin afterwards.

use crate::activation::Coordinator;
use crate::detector::{DetectorConfig, MotionDetector};
use crate::error::SafetyResult;
use crate::types::{current_timestamp, AccelSample, DetectorKind};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

/// A sensor-access prompt, serviced by the host platform layer. The core
/// never shows OS permission UI itself.
pub struct PermissionRequest {
    pub respond: oneshot::Sender<bool>,
}

/// Where a detector instance currently stands. Surfaced (not thrown) so the
/// host UI can render a toggle that is on but inert.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorStatus {
    /// Constructed or disabled; no subscription held.
    Idle,
    /// Waiting on the platform permission prompt.
    Starting,
    /// Subscribed and feeding the state machine.
    Listening,
    /// Platform declined sensor access. Not retried automatically.
    PermissionDenied,
    /// The sample stream closed underneath us. Fatal to this detector only.
    StreamLost,
    /// Torn down for good.
    Disposed,
}

/// Builds detector handles wired to one sample stream, one permission
/// channel, and one coordinator.
///
/// Holds a `broadcast::Receiver`, not a sender, so a supervisor (or any
/// number of handles) never keeps a dead sample stream artificially open.
pub struct Supervisor {
    samples: broadcast::Receiver<AccelSample>,
    permissions: mpsc::Sender<PermissionRequest>,
    coordinator: Arc<Coordinator>,
}

impl Supervisor {
    pub fn new(
        samples: broadcast::Receiver<AccelSample>,
        permissions: mpsc::Sender<PermissionRequest>,
        coordinator: Arc<Coordinator>,
    ) -> Self {
        Self {
            samples,
            permissions,
            coordinator,
        }
    }

    /// Create a detector. `config` falls back to the kind's default tuning.
    pub fn configure_detector(
        &self,
        kind: DetectorKind,
        enabled: bool,
        config: Option<DetectorConfig>,
    ) -> SafetyResult<DetectorHandle> {
        let config = config.unwrap_or_else(|| DetectorConfig::for_kind(kind));
        config.validate()?;

        let mut handle = DetectorHandle {
            kind,
            config,
            samples: self.samples.resubscribe(),
            permissions: self.permissions.clone(),
            coordinator: self.coordinator.clone(),
            armed: Arc::new(Mutex::new(false)),
            status: Arc::new(Mutex::new(DetectorStatus::Idle)),
            triggers: Arc::new(AtomicU64::new(0)),
            worker: None,
            disposed: false,
        };
        if enabled {
            handle.set_enabled(true);
        }
        Ok(handle)
    }
}

/// One detector instance. Owns at most one live subscription at a time; the
/// subscription (and a fresh state machine) is created on every
/// disabled→enabled transition.
pub struct DetectorHandle {
    kind: DetectorKind,
    config: DetectorConfig,
    samples: broadcast::Receiver<AccelSample>,
    permissions: mpsc::Sender<PermissionRequest>,
    coordinator: Arc<Coordinator>,
    armed: Arc<Mutex<bool>>,
    status: Arc<Mutex<DetectorStatus>>,
    triggers: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
    disposed: bool,
}

impl DetectorHandle {
    pub fn kind(&self) -> DetectorKind {
        self.kind
    }

    pub fn status(&self) -> DetectorStatus {
        self.status
            .lock()
            .map(|status| *status)
            .unwrap_or(DetectorStatus::Idle)
    }

    pub fn is_listening(&self) -> bool {
        self.status() == DetectorStatus::Listening
    }

    /// Triggers this detector has fired across all its subscriptions.
    pub fn triggers(&self) -> u64 {
        self.triggers.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled {
            self.subscribe();
        } else {
            self.teardown(DetectorStatus::Idle);
        }
    }

    /// Final teardown. The handle stays inert afterwards.
    pub fn dispose(&mut self) {
        self.teardown(DetectorStatus::Disposed);
        self.disposed = true;
    }

    fn subscribe(&mut self) {
        if self.disposed {
            log::warn!("{} detector is disposed; enable ignored", self.kind.label());
            return;
        }
        if self.worker.as_ref().map_or(false, |w| !w.is_finished()) {
            return; // already subscribed
        }

        let armed = Arc::new(Mutex::new(true));
        self.armed = armed.clone();
        self.set_status(DetectorStatus::Starting);

        self.worker = Some(tokio::spawn(run_detector(
            self.kind,
            self.config,
            self.samples.resubscribe(),
            self.permissions.clone(),
            self.coordinator.clone(),
            armed,
            self.status.clone(),
            self.triggers.clone(),
        )));
    }

    /// Synchronous: taking the armed lock means any in-flight trigger
    /// callback has finished before this returns, and none can start after.
    fn teardown(&mut self, final_status: DetectorStatus) {
        if let Ok(mut live) = self.armed.lock() {
            *live = false;
        }
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        self.set_status(final_status);
    }

    fn set_status(&self, status: DetectorStatus) {
        if let Ok(mut slot) = self.status.lock() {
            *slot = status;
        }
    }
}

impl Drop for DetectorHandle {
    fn drop(&mut self) {
        self.teardown(DetectorStatus::Disposed);
    }
}

async fn request_permission(permissions: &mpsc::Sender<PermissionRequest>) -> bool {
    let (respond, decision) = oneshot::channel();
    if permissions.send(PermissionRequest { respond }).await.is_err() {
        return false; // platform layer gone, treat as denied
    }
    decision.await.unwrap_or(false)
}

#[allow(clippy::too_many_arguments)]
async fn run_detector(
    kind: DetectorKind,
    config: DetectorConfig,
    proto: broadcast::Receiver<AccelSample>,
    permissions: mpsc::Sender<PermissionRequest>,
    coordinator: Arc<Coordinator>,
    armed: Arc<Mutex<bool>>,
    status: Arc<Mutex<DetectorStatus>>,
    triggers: Arc<AtomicU64>,
) {
    if !request_permission(&permissions).await {
        if let Ok(mut slot) = status.lock() {
            *slot = DetectorStatus::PermissionDenied;
        }
        log::warn!("{} detector disabled: sensor permission denied", kind.label());
        return;
    }

    // Jump to the stream tail only once access is granted.
    let mut rx = proto.resubscribe();
    drop(proto);
    if let Ok(mut slot) = status.lock() {
        *slot = DetectorStatus::Listening;
    }
    log::info!(
        "{} detector listening (threshold {:.1}G, cooldown {}ms)",
        kind.label(),
        config.threshold_g,
        config.cooldown_ms
    );

    let mut detector = MotionDetector::new(kind, config);
    let poll_every = Duration::from_millis(config.debounce_ms.max(20));

    loop {
        let event = tokio::select! {
            received = rx.recv() => match received {
                Ok(sample) => detector.offer(&sample),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("{} detector lagged, {} samples dropped", kind.label(), skipped);
                    None
                }
                Err(broadcast::error::RecvError::Closed) => {
                    if let Ok(mut slot) = status.lock() {
                        *slot = DetectorStatus::StreamLost;
                    }
                    log::error!("{} detector stopped: sample stream closed", kind.label());
                    return;
                }
            },
            // Flush a held sample once its quiet period elapses with no
            // successor to prove it.
            _ = sleep(poll_every) => detector.poll(current_timestamp()),
        };

        if let Some(event) = event {
            if let Ok(live) = armed.lock() {
                if *live {
                    triggers.fetch_add(1, Ordering::Relaxed);
                    log::info!(
                        "{} trigger: {:.2}G at {:.3}",
                        kind.label(),
                        event.magnitude_g,
                        event.timestamp
                    );
                    coordinator.activate_with_magnitude(kind.into(), Some(event.magnitude_g));
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::UserSettings;
    use crate::types::GRAVITY_MS2;

    struct Harness {
        supervisor: Supervisor,
        samples: broadcast::Sender<AccelSample>,
        coordinator: Arc<Coordinator>,
        fired: Arc<AtomicU64>,
    }

    fn harness(grant: bool, suppression_ms: u64) -> Harness {
        let (samples, sample_rx) = broadcast::channel(256);
        let (permissions, mut perm_rx) = mpsc::channel::<PermissionRequest>(8);

        tokio::spawn(async move {
            while let Some(request) = perm_rx.recv().await {
                let _ = request.respond.send(grant);
            }
        });

        let fired = Arc::new(AtomicU64::new(0));
        let fired_in_cb = fired.clone();
        let coordinator = Arc::new(Coordinator::with_suppression(
            move |_reason, _magnitude| {
                fired_in_cb.fetch_add(1, Ordering::SeqCst);
            },
            Duration::from_millis(suppression_ms),
        ));
        coordinator.update_settings(Some(UserSettings::default()));

        Harness {
            supervisor: Supervisor::new(sample_rx, permissions, coordinator.clone()),
            samples,
            coordinator,
            fired,
        }
    }

    fn spike(g: f64) -> AccelSample {
        AccelSample::new(current_timestamp(), 0.0, 0.0, g * GRAVITY_MS2)
    }

    async fn wait_for<F: Fn() -> bool>(what: &str, predicate: F) {
        for _ in 0..100 {
            if predicate() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {}", what);
    }

    #[tokio::test]
    async fn test_permission_denied_reports_status_without_failing() {
        let h = harness(false, 10);
        let handle = h
            .supervisor
            .configure_detector(DetectorKind::Shake, true, None)
            .unwrap();

        wait_for("denied status", || {
            handle.status() == DetectorStatus::PermissionDenied
        })
        .await;

        let _ = h.samples.send(spike(4.0));
        sleep(Duration::from_millis(150)).await;
        assert_eq!(h.fired.load(Ordering::SeqCst), 0);
        assert_eq!(handle.triggers(), 0);
    }

    #[tokio::test]
    async fn test_trigger_and_synchronous_disable() {
        let h = harness(true, 10);
        let mut handle = h
            .supervisor
            .configure_detector(DetectorKind::Shake, true, None)
            .unwrap();

        wait_for("listening", || handle.is_listening()).await;

        let _ = h.samples.send(spike(4.0));
        wait_for("first trigger", || h.fired.load(Ordering::SeqCst) == 1).await;

        handle.set_enabled(false);
        assert_eq!(handle.status(), DetectorStatus::Idle);
        h.coordinator.resolve();
        sleep(Duration::from_millis(30)).await;

        let _ = h.samples.send(spike(4.0));
        sleep(Duration::from_millis(200)).await;
        assert_eq!(
            h.fired.load(Ordering::SeqCst),
            1,
            "no trigger may land after disable returns"
        );
    }

    #[tokio::test]
    async fn test_reenable_creates_fresh_subscription() {
        let h = harness(true, 10);
        let mut handle = h
            .supervisor
            .configure_detector(DetectorKind::Shake, true, None)
            .unwrap();

        // First round.
        wait_for("listening", || handle.is_listening()).await;
        let _ = h.samples.send(spike(4.0));
        wait_for("first trigger", || h.fired.load(Ordering::SeqCst) == 1).await;

        // Toggle off, then on again: a fresh, working subscription.
        handle.set_enabled(false);
        handle.set_enabled(true);
        wait_for("listening again", || handle.is_listening()).await;

        h.coordinator.resolve();
        sleep(Duration::from_millis(30)).await;
        let _ = h.samples.send(spike(4.0));
        wait_for("second trigger", || h.fired.load(Ordering::SeqCst) == 2).await;
        assert_eq!(handle.triggers(), 2);
    }

    #[tokio::test]
    async fn test_repeated_toggling_does_not_leak_or_wedge() {
        let h = harness(true, 10);
        let mut handle = h
            .supervisor
            .configure_detector(DetectorKind::Accident, false, None)
            .unwrap();
        assert_eq!(handle.status(), DetectorStatus::Idle);

        for _ in 0..5 {
            handle.set_enabled(true);
            handle.set_enabled(false);
        }
        handle.set_enabled(true);
        wait_for("listening after churn", || handle.is_listening()).await;

        let _ = h.samples.send(spike(5.0));
        wait_for("trigger after churn", || h.fired.load(Ordering::SeqCst) == 1).await;
    }

    #[tokio::test]
    async fn test_dispose_is_terminal() {
        let h = harness(true, 10);
        let mut handle = h
            .supervisor
            .configure_detector(DetectorKind::Shake, true, None)
            .unwrap();
        wait_for("listening", || handle.is_listening()).await;

        handle.dispose();
        assert_eq!(handle.status(), DetectorStatus::Disposed);

        handle.set_enabled(true);
        sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.status(), DetectorStatus::Disposed);
    }

    #[tokio::test]
    async fn test_closed_stream_is_fatal_to_detector_only() {
        let h = harness(true, 10);
        let mut handle = h
            .supervisor
            .configure_detector(DetectorKind::Shake, true, None)
            .unwrap();
        wait_for("listening", || handle.is_listening()).await;

        // The sample source dies: every sender is gone.
        drop(h.samples);
        wait_for("stream lost", || handle.status() == DetectorStatus::StreamLost).await;

        // The coordinator is unaffected.
        h.coordinator.activate(crate::types::TriggerReason::SosButton);
        assert_eq!(h.fired.load(Ordering::SeqCst), 1);
        handle.set_enabled(false);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let h = harness(true, 10);
        let bad = DetectorConfig {
            threshold_g: 0.0,
            ..DetectorConfig::shake()
        };
        assert!(h
            .supervisor
            .configure_detector(DetectorKind::Shake, true, Some(bad))
            .is_err());
    }
}
