use crate::supervisor::DetectorStatus;
use crate::types::current_timestamp;
use serde::{Deserialize, Serialize};
use std::fs;

/// Point-in-time snapshot of the safety core, written to disk so an
/// out-of-process UI (or a curious operator) can watch it.
#[derive(Serialize, Deserialize, Clone)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub uptime_seconds: u64,
    pub accel_samples: u64,
    // Detector state
    pub shake_status: DetectorStatus,
    pub accident_status: DetectorStatus,
    pub shake_triggers: u64,
    pub accident_triggers: u64,
    // Coordinator state
    pub emergency_active: bool,
    pub activations: u64,
    pub suppressed_activations: u64,
    // Check-in state
    pub check_in_remaining: Option<u32>,
    pub check_in_display: Option<String>,
}

impl LiveStatus {
    pub fn new() -> Self {
        Self {
            timestamp: current_timestamp(),
            uptime_seconds: 0,
            accel_samples: 0,
            shake_status: DetectorStatus::Idle,
            accident_status: DetectorStatus::Idle,
            shake_triggers: 0,
            accident_triggers: 0,
            emergency_active: false,
            activations: 0,
            suppressed_activations: 0,
            check_in_remaining: None,
            check_in_display: None,
        }
    }

    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

impl Default for LiveStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_status_is_quiet() {
        let status = LiveStatus::new();
        assert!(!status.emergency_active);
        assert_eq!(status.activations, 0);
        assert_eq!(status.shake_status, DetectorStatus::Idle);
        assert!(status.check_in_remaining.is_none());
    }
}
