//! Scheduled check-in countdown.
//!
//! A user arms a countdown before a risky stretch (walk home, taxi ride); if
//! it reaches zero before they cancel, the coordinator is asked to start an
//! emergency session. The state machine is pure and tick-driven so the
//! stale-tick race (an interval firing after cancellation) can be tested
//! without a runtime; `ScheduledCheckIn` adds the tokio scheduling on top.

use crate::activation::Coordinator;
use crate::error::{SafetyError, SafetyResult};
use crate::types::TriggerReason;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

/// Countdown phases. Expiry and cancellation both return to `Idle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerPhase {
    Idle,
    Counting,
}

/// Outcome of delivering one tick to the state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// The tick belonged to a countdown that is no longer live.
    Stale,
    /// Still counting; the contained value is the seconds remaining.
    Counting(u32),
    /// The countdown reached zero. Fired at most once per `start`.
    Expired,
}

/// Countdown state machine with a generation counter.
///
/// Every `start` and every terminal transition bumps the generation, and a
/// tick is only honored when it carries the generation it was scheduled
/// under. A tick scheduled before a cancel can therefore never decrement a
/// later countdown, whatever order the scheduler delivers things in.
pub struct CheckInTimer {
    remaining: Option<u32>,
    generation: u64,
}

impl CheckInTimer {
    pub fn new() -> Self {
        Self {
            remaining: None,
            generation: 0,
        }
    }

    pub fn phase(&self) -> TimerPhase {
        if self.remaining.is_some() {
            TimerPhase::Counting
        } else {
            TimerPhase::Idle
        }
    }

    /// Seconds left, or None when idle.
    pub fn remaining(&self) -> Option<u32> {
        self.remaining
    }

    /// Arm the countdown. Valid only from `Idle`; starting a countdown over
    /// a live one is a caller bug, not a restart.
    ///
    /// Returns the generation the caller must attach to every tick.
    pub fn start(&mut self, duration_secs: u32) -> SafetyResult<u64> {
        if self.remaining.is_some() {
            return Err(SafetyError::InvalidState(
                "check-in timer is already counting".into(),
            ));
        }
        if duration_secs == 0 {
            return Err(SafetyError::InvalidParameters(
                "check-in duration must be at least 1 second".into(),
            ));
        }
        self.generation += 1;
        self.remaining = Some(duration_secs);
        Ok(self.generation)
    }

    /// Disarm without firing. Valid only from `Counting`.
    pub fn cancel(&mut self) -> SafetyResult<()> {
        if self.remaining.is_none() {
            return Err(SafetyError::InvalidState(
                "no check-in countdown to cancel".into(),
            ));
        }
        self.generation += 1;
        self.remaining = None;
        Ok(())
    }

    /// Deliver one 1-second tick for the given generation.
    pub fn tick(&mut self, generation: u64) -> TickOutcome {
        if generation != self.generation {
            return TickOutcome::Stale;
        }
        let Some(left) = self.remaining else {
            return TickOutcome::Stale;
        };
        let left = left.saturating_sub(1);
        if left == 0 {
            self.generation += 1;
            self.remaining = None;
            TickOutcome::Expired
        } else {
            self.remaining = Some(left);
            TickOutcome::Counting(left)
        }
    }
}

impl Default for CheckInTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Zero-padded `HH:MM:SS` for countdown display.
pub fn format_hms(total_seconds: u32) -> String {
    let h = total_seconds / 3600;
    let m = (total_seconds % 3600) / 60;
    let s = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", h, m, s)
}

// ─── Tokio scheduling ────────────────────────────────────────────────────────

/// Owns a `CheckInTimer` plus the task that ticks it once a second.
pub struct ScheduledCheckIn {
    timer: Arc<Mutex<CheckInTimer>>,
    coordinator: Arc<Coordinator>,
    worker: Option<JoinHandle<()>>,
}

impl ScheduledCheckIn {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            timer: Arc::new(Mutex::new(CheckInTimer::new())),
            coordinator,
            worker: None,
        }
    }

    /// Arm the countdown and spawn its ticker.
    pub fn start(&mut self, duration_secs: u32) -> SafetyResult<()> {
        let generation = match self.timer.lock() {
            Ok(mut timer) => timer.start(duration_secs)?,
            Err(_) => {
                return Err(SafetyError::InvalidState(
                    "check-in timer lock poisoned".into(),
                ))
            }
        };

        log::info!(
            "check-in armed for {} ({}s)",
            format_hms(duration_secs),
            duration_secs
        );

        let timer = self.timer.clone();
        let coordinator = self.coordinator.clone();
        self.worker = Some(tokio::spawn(async move {
            loop {
                sleep(Duration::from_secs(1)).await;
                let outcome = match timer.lock() {
                    Ok(mut timer) => timer.tick(generation),
                    Err(_) => break,
                };
                match outcome {
                    TickOutcome::Counting(left) => {
                        log::debug!("check-in {}", format_hms(left));
                    }
                    TickOutcome::Expired => {
                        log::warn!("check-in expired without cancellation");
                        coordinator.activate(TriggerReason::CheckInExpired);
                        break;
                    }
                    TickOutcome::Stale => break,
                }
            }
        }));
        Ok(())
    }

    /// Cancel a live countdown. The generation bump makes any tick already
    /// scheduled a no-op before the worker is even aborted.
    pub fn cancel(&mut self) -> SafetyResult<()> {
        match self.timer.lock() {
            Ok(mut timer) => timer.cancel()?,
            Err(_) => {
                return Err(SafetyError::InvalidState(
                    "check-in timer lock poisoned".into(),
                ))
            }
        }
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
        log::info!("check-in cancelled");
        Ok(())
    }

    pub fn phase(&self) -> TimerPhase {
        self.timer
            .lock()
            .map(|timer| timer.phase())
            .unwrap_or(TimerPhase::Idle)
    }

    pub fn remaining(&self) -> Option<u32> {
        self.timer.lock().ok().and_then(|timer| timer.remaining())
    }
}

impl Drop for ScheduledCheckIn {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
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
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_expiry_fires_exactly_once_and_resets() {
        let mut timer = CheckInTimer::new();
        let generation = timer.start(5).unwrap();

        assert_eq!(timer.tick(generation), TickOutcome::Counting(4));
        assert_eq!(timer.tick(generation), TickOutcome::Counting(3));
        assert_eq!(timer.tick(generation), TickOutcome::Counting(2));
        assert_eq!(timer.tick(generation), TickOutcome::Counting(1));
        assert_eq!(timer.tick(generation), TickOutcome::Expired);

        // Terminal transition resets to Idle and invalidates the generation.
        assert_eq!(timer.phase(), TimerPhase::Idle);
        assert_eq!(timer.tick(generation), TickOutcome::Stale);

        // Immediately startable again.
        assert!(timer.start(10).is_ok());
    }

    #[test]
    fn test_cancel_never_fires_and_kills_stale_ticks() {
        let mut timer = CheckInTimer::new();
        let generation = timer.start(60).unwrap();

        assert_eq!(timer.tick(generation), TickOutcome::Counting(59));
        assert_eq!(timer.tick(generation), TickOutcome::Counting(58));
        timer.cancel().unwrap();

        assert_eq!(timer.phase(), TimerPhase::Idle);
        // A tick that was already scheduled when cancel ran.
        assert_eq!(timer.tick(generation), TickOutcome::Stale);
    }

    #[test]
    fn test_start_while_counting_is_rejected() {
        let mut timer = CheckInTimer::new();
        timer.start(30).unwrap();
        assert!(matches!(
            timer.start(10),
            Err(SafetyError::InvalidState(_))
        ));
        // The live countdown is untouched.
        assert_eq!(timer.remaining(), Some(30));
    }

    #[test]
    fn test_invalid_operations() {
        let mut timer = CheckInTimer::new();
        assert!(matches!(
            timer.cancel(),
            Err(SafetyError::InvalidState(_))
        ));
        assert!(matches!(
            timer.start(0),
            Err(SafetyError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_stale_generation_from_previous_countdown() {
        let mut timer = CheckInTimer::new();
        let old = timer.start(10).unwrap();
        timer.cancel().unwrap();
        let fresh = timer.start(20).unwrap();

        assert_eq!(timer.tick(old), TickOutcome::Stale);
        assert_eq!(timer.remaining(), Some(20), "stale tick must not decrement");
        assert_eq!(timer.tick(fresh), TickOutcome::Counting(19));
    }

    #[test]
    fn test_format_hms() {
        assert_eq!(format_hms(0), "00:00:00");
        assert_eq!(format_hms(59), "00:00:59");
        assert_eq!(format_hms(61), "00:01:01");
        assert_eq!(format_hms(3661), "01:01:01");
        assert_eq!(format_hms(2 * 60 * 60), "02:00:00");
    }

    fn counting_coordinator() -> (Arc<Coordinator>, Arc<AtomicU64>) {
        let fired = Arc::new(AtomicU64::new(0));
        let fired_in_cb = fired.clone();
        let coordinator = Arc::new(Coordinator::new(move |_reason, _magnitude| {
            fired_in_cb.fetch_add(1, Ordering::SeqCst);
        }));
        coordinator.update_settings(Some(UserSettings::default()));
        (coordinator, fired)
    }

    #[tokio::test]
    async fn test_scheduled_expiry_activates_emergency() {
        let (coordinator, fired) = counting_coordinator();
        let mut check_in = ScheduledCheckIn::new(coordinator);

        check_in.start(1).unwrap();
        sleep(Duration::from_millis(1400)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(check_in.phase(), TimerPhase::Idle);
        // Fresh countdown allowed right after expiry.
        assert!(check_in.start(30).is_ok());
        check_in.cancel().unwrap();
    }

    #[tokio::test]
    async fn test_scheduled_cancel_prevents_activation() {
        let (coordinator, fired) = counting_coordinator();
        let mut check_in = ScheduledCheckIn::new(coordinator);

        check_in.start(3).unwrap();
        sleep(Duration::from_millis(1200)).await;
        assert_eq!(check_in.remaining(), Some(2));
        check_in.cancel().unwrap();

        sleep(Duration::from_millis(2500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(check_in.phase(), TimerPhase::Idle);
    }
}
