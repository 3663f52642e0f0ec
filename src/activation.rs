//! Emergency activation fan-in.
//!
//! Every trigger source (shake, accident, check-in expiry, the SOS button)
//! funnels into one `Coordinator::activate` call. The coordinator owns the
//! "at most one concurrent emergency session" guarantee; detectors only
//! guarantee their own cooldowns, so a violent motion that trips shake and
//! accident 50ms apart still starts exactly one session.

use crate::settings::UserSettings;
use crate::types::TriggerReason;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default window in which a second activation request is ignored even after
/// the previous session resolved.
pub const SUPPRESSION_WINDOW_MS: u64 = 1000;

struct GateState {
    active: bool,
    last_activation: Option<Instant>,
}

/// Single entry point for starting an emergency session.
///
/// `activate` never fails: unmet preconditions silently absorb the request,
/// since this path must not be able to throw in front of a redundant trigger.
pub struct Coordinator {
    gate: Mutex<GateState>,
    suppression: Duration,
    settings: Mutex<Option<UserSettings>>,
    on_activate: Box<dyn Fn(TriggerReason, Option<f64>) + Send + Sync>,
    activations: AtomicU64,
    suppressed: AtomicU64,
}

impl Coordinator {
    pub fn new(on_activate: impl Fn(TriggerReason, Option<f64>) + Send + Sync + 'static) -> Self {
        Self::with_suppression(on_activate, Duration::from_millis(SUPPRESSION_WINDOW_MS))
    }

    pub fn with_suppression(
        on_activate: impl Fn(TriggerReason, Option<f64>) + Send + Sync + 'static,
        suppression: Duration,
    ) -> Self {
        Self {
            gate: Mutex::new(GateState {
                active: false,
                last_activation: None,
            }),
            suppression,
            settings: Mutex::new(None),
            on_activate: Box::new(on_activate),
            activations: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    /// Replace the settings snapshot the activation flow depends on.
    /// `None` models "not loaded yet" and suppresses activation.
    pub fn update_settings(&self, settings: Option<UserSettings>) {
        if let Ok(mut slot) = self.settings.lock() {
            *slot = settings;
        }
    }

    pub fn settings(&self) -> Option<UserSettings> {
        self.settings.lock().ok().and_then(|slot| slot.clone())
    }

    /// Request an emergency session start.
    pub fn activate(&self, reason: TriggerReason) {
        self.activate_with_magnitude(reason, None);
    }

    /// Request an emergency session start, recording the G-force reading
    /// that tripped a motion detector.
    pub fn activate_with_magnitude(&self, reason: TriggerReason, magnitude_g: Option<f64>) {
        {
            let settings = self.settings.lock();
            match settings {
                Ok(slot) if slot.is_some() => {}
                _ => {
                    log::warn!(
                        "activation via {} dropped: user settings unavailable",
                        reason.label()
                    );
                    return;
                }
            }
        }

        let mut gate = match self.gate.lock() {
            Ok(gate) => gate,
            Err(_) => return,
        };

        if gate.active {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            log::info!(
                "activation via {} suppressed: session already active",
                reason.label()
            );
            return;
        }

        if let Some(last) = gate.last_activation {
            if last.elapsed() < self.suppression {
                self.suppressed.fetch_add(1, Ordering::Relaxed);
                log::info!(
                    "activation via {} suppressed: inside {}ms window",
                    reason.label(),
                    self.suppression.as_millis()
                );
                return;
            }
        }

        gate.active = true;
        gate.last_activation = Some(Instant::now());
        drop(gate);

        self.activations.fetch_add(1, Ordering::Relaxed);
        match magnitude_g {
            Some(g) => log::warn!(
                "emergency session started via {} ({:.2}G)",
                reason.label(),
                g
            ),
            None => log::warn!("emergency session started via {}", reason.label()),
        }
        (self.on_activate)(reason, magnitude_g);
    }

    /// The emergency flow closed; return to normal so detectors' next
    /// trigger can start a new session.
    pub fn resolve(&self) {
        if let Ok(mut gate) = self.gate.lock() {
            if gate.active {
                gate.active = false;
                log::info!("emergency session resolved");
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.gate.lock().map(|gate| gate.active).unwrap_or(false)
    }

    /// Sessions actually started.
    pub fn activations(&self) -> u64 {
        self.activations.load(Ordering::Relaxed)
    }

    /// Requests absorbed by the gate.
    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }
}

// ============================================================================
// TESTS
// ============================================================================
