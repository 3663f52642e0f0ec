use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Standard gravity in m/s², used to convert accelerometer magnitudes to G.
pub const GRAVITY_MS2: f64 = 9.81;

/// One accelerometer reading. Timestamps are epoch seconds and must be
/// non-decreasing within a stream; the detector cooldown logic depends on it.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct AccelSample {
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AccelSample {
    pub fn new(timestamp: f64, x: f64, y: f64, z: f64) -> Self {
        Self { timestamp, x, y, z }
    }

    /// Acceleration magnitude in m/s².
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Acceleration magnitude in G.
    pub fn magnitude_g(&self) -> f64 {
        self.magnitude() / GRAVITY_MS2
    }
}

/// Which accelerometer detector a config or handle belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Shake,
    Accident,
}

impl DetectorKind {
    pub fn label(&self) -> &'static str {
        match self {
            DetectorKind::Shake => "shake",
            DetectorKind::Accident => "accident",
        }
    }
}

impl From<DetectorKind> for TriggerReason {
    fn from(kind: DetectorKind) -> Self {
        match kind {
            DetectorKind::Shake => TriggerReason::Shake,
            DetectorKind::Accident => TriggerReason::Accident,
        }
    }
}

/// Why an emergency activation was requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    SosButton,
    Shake,
    Accident,
    CheckInExpired,
}

impl TriggerReason {
    pub fn label(&self) -> &'static str {
        match self {
            TriggerReason::SosButton => "sos_button",
            TriggerReason::Shake => "shake",
            TriggerReason::Accident => "accident",
            TriggerReason::CheckInExpired => "check_in_expired",
        }
    }
}

/// A recorded emergency-session start. `magnitude_g` is present when a
/// motion detector started the session, absent for the SOS button and
/// check-in expiry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmergencyEvent {
    pub timestamp: f64,
    pub reason: TriggerReason,
    pub magnitude_g: Option<f64>,
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
