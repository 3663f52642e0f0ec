//! Mock accelerometer source for the sentinel binary.
//!
//! Real deployments feed the broadcast channel from platform sensor APIs;
//! this loop stands in for them so the whole activation path can be
//! exercised from the command line. Samples are published at 10 Hz, the
//! update rate the mobile sensor layer delivers at.

use crate::supervisor::PermissionRequest;
use crate::types::{current_timestamp, AccelSample, GRAVITY_MS2};
use clap::ValueEnum;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Duration};

/// What the mock feed simulates on top of ordinary handling noise.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum SpikeProfile {
    /// Ordinary handling only; nothing should ever trigger.
    Quiet,
    /// A deliberate shake burst every 5 seconds.
    Shake,
    /// One crash-magnitude impact a few seconds in.
    Crash,
}

/// Deterministic mock sample for sequence number `seq`.
pub fn mock_sample(profile: SpikeProfile, seq: u64, timestamp: f64) -> AccelSample {
    let t = seq as f64 * 0.1;

    // Baseline: gravity plus pocket-jostle noise, well under 2 G.
    let mut x = (t * 2.0 * std::f64::consts::PI).sin() * 0.4;
    let mut y = (t * 2.0 * std::f64::consts::PI).cos() * 0.3;
    let mut z = GRAVITY_MS2 + (t * std::f64::consts::PI).sin() * 0.2;

    let in_burst = (30..33).contains(&(seq % 50));
    match profile {
        SpikeProfile::Quiet => {}
        SpikeProfile::Shake if in_burst => {
            // Alternating-direction burst around 3.2 G.
            x = if seq % 2 == 0 { 30.0 } else { -30.0 };
            y = 4.0;
        }
        SpikeProfile::Crash if in_burst && seq < 50 => {
            // Single impact around 4.6 G, never repeated.
            z = 45.0;
            x = 8.0;
        }
        _ => {}
    }

    AccelSample::new(timestamp, x, y, z)
}

/// Publish mock samples until every receiver is gone.
pub async fn accel_loop(tx: broadcast::Sender<AccelSample>, profile: SpikeProfile) {
    let mut ticker = interval(Duration::from_millis(100));
    let mut seq = 0u64;

    loop {
        ticker.tick().await;
        let sample = mock_sample(profile, seq, current_timestamp());
        if tx.send(sample).is_err() {
            log::info!("accel loop stopping after {} samples: no receivers", seq);
            break;
        }
        seq += 1;
        if seq % 100 == 0 {
            log::debug!("accel loop published {} samples", seq);
        }
    }
}

/// Permission servicer for environments without a real platform prompt:
/// grants every request.
pub async fn grant_all_permissions(mut requests: mpsc::Receiver<PermissionRequest>) {
    while let Some(request) = requests.recv().await {
        let _ = request.respond.send(true);
    }
}
