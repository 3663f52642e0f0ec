use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, Duration, Instant};

use insafe_rs::activation::Coordinator;
use insafe_rs::check_in::{format_hms, ScheduledCheckIn};
use insafe_rs::live_status::LiveStatus;
use insafe_rs::sensors::{accel_loop, grant_all_permissions, SpikeProfile};
use insafe_rs::settings::UserSettings;
use insafe_rs::supervisor::{PermissionRequest, Supervisor};
use insafe_rs::types::{current_timestamp, DetectorKind, EmergencyEvent, TriggerReason};

#[derive(Parser, Debug)]
#[command(name = "insafe_sentinel")]
#[command(about = "InSafe sensor core - shake/accident/check-in emergency monitor", long_about = None)]
struct Args {
    /// Duration in seconds (0 = continuous)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// Spike profile for the mock accelerometer feed
    #[arg(long, value_enum, default_value_t = SpikeProfile::Quiet)]
    simulate: SpikeProfile,

    /// Path to a user-settings JSON file (defaults apply if omitted)
    #[arg(long)]
    settings: Option<String>,

    /// Arm a check-in countdown of this many seconds at startup
    #[arg(long, value_name = "SECONDS")]
    check_in: Option<u32>,

    /// Press the SOS button this many seconds in
    #[arg(long, value_name = "SECONDS")]
    sos_after: Option<u64>,

    /// Close an emergency session this many seconds after it starts
    #[arg(long, default_value = "5")]
    auto_resolve: u64,

    /// Output directory
    #[arg(long, default_value = "insafe_sessions")]
    output_dir: String,
}

#[derive(Serialize)]
struct SessionOutput {
    events: Vec<EmergencyEvent>,
    stats: Stats,
}

#[derive(Serialize, Clone, Copy)]
struct Stats {
    total_samples: u64,
    activations: u64,
    suppressed_activations: u64,
    shake_triggers: u64,
    accident_triggers: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    println!("[{}] InSafe Sentinel Starting", ts_now());
    println!("  Duration: {} seconds (0=continuous)", args.duration);
    println!("  Simulate: {:?}", args.simulate);
    println!("  Output Dir: {}", args.output_dir);

    std::fs::create_dir_all(&args.output_dir)?;

    let settings = match &args.settings {
        Some(path) => UserSettings::load(Path::new(path))?,
        None => UserSettings::default(),
    };
    println!(
        "  Settings: shake={} accident={} contacts={}",
        settings.security.shake_to_sos_enabled,
        settings.security.accident_detection_enabled,
        settings.trusted_contacts.len()
    );

    // Channels: one broadcast stream of samples, one queue of permission
    // prompts serviced by the (mock) platform layer.
    let (sample_tx, _) = broadcast::channel(512);
    let (perm_tx, perm_rx) = mpsc::channel::<PermissionRequest>(8);

    let events: Arc<Mutex<Vec<EmergencyEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let events_in_cb = events.clone();
    let coordinator = Arc::new(Coordinator::new(move |reason, magnitude_g| {
        if let Ok(mut log) = events_in_cb.lock() {
            log.push(EmergencyEvent {
                timestamp: current_timestamp(),
                reason,
                magnitude_g,
            });
        }
        match magnitude_g {
            Some(g) => println!(
                "[{}] *** EMERGENCY ACTIVATED ({}, {:.2}G) ***",
                ts_now(),
                reason.label(),
                g
            ),
            None => println!("[{}] *** EMERGENCY ACTIVATED ({}) ***", ts_now(), reason.label()),
        }
    }));
    coordinator.update_settings(Some(settings.clone()));

    let supervisor = Supervisor::new(sample_tx.subscribe(), perm_tx, coordinator.clone());
    let mut sample_rx = sample_tx.subscribe();

    let _accel_handle = tokio::spawn(accel_loop(sample_tx, args.simulate));
    let _perm_handle = tokio::spawn(grant_all_permissions(perm_rx));

    let shake = supervisor.configure_detector(
        DetectorKind::Shake,
        settings.security.shake_to_sos_enabled,
        None,
    )?;
    let accident = supervisor.configure_detector(
        DetectorKind::Accident,
        settings.security.accident_detection_enabled,
        None,
    )?;

    let mut check_in = ScheduledCheckIn::new(coordinator.clone());
    if let Some(secs) = args.check_in {
        check_in.start(secs)?;
        println!("[{}] Check-in armed: {}", ts_now(), format_hms(secs));
    }

    let start = Instant::now();
    let mut accel_count = 0u64;
    let mut sos_fired = false;
    let mut active_since: Option<Instant> = None;
    let mut last_status_update = Instant::now();
    let mut last_save = Instant::now();

    println!("[{}] Monitoring...", ts_now());

    loop {
        if args.duration > 0 && start.elapsed().as_secs() >= args.duration {
            println!("[{}] Duration reached, stopping...", ts_now());
            break;
        }

        // Count the stream without stealing it from the detectors.
        loop {
            match sample_rx.try_recv() {
                Ok(_) => accel_count += 1,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => accel_count += skipped,
                Err(_) => break,
            }
        }

        if let Some(after) = args.sos_after {
            if !sos_fired && start.elapsed().as_secs() >= after {
                sos_fired = true;
                println!("[{}] SOS button pressed", ts_now());
                coordinator.activate(TriggerReason::SosButton);
            }
        }

        // Stand in for the emergency UI: close the session after a while so
        // the detectors' next trigger can start a new one.
        if coordinator.is_active() {
            let since = *active_since.get_or_insert_with(Instant::now);
            if since.elapsed().as_secs() >= args.auto_resolve {
                coordinator.resolve();
                active_since = None;
                println!("[{}] Emergency resolved, monitoring resumed", ts_now());
            }
        } else {
            active_since = None;
        }

        if last_status_update.elapsed().as_secs() >= 2 {
            let status = snapshot(
                &start,
                accel_count,
                &shake,
                &accident,
                &coordinator,
                &check_in,
            );
            let status_path = format!("{}/live_status.json", args.output_dir);
            if let Err(e) = status.save(&status_path) {
                log::warn!("live status save failed: {}", e);
            }
            println!(
                "[{}] shake: {:?} | accident: {:?} | samples {} | emergencies {} | check-in {}",
                ts_now(),
                shake.status(),
                accident.status(),
                accel_count,
                coordinator.activations(),
                check_in
                    .remaining()
                    .map(format_hms)
                    .unwrap_or_else(|| "off".into()),
            );
            last_status_update = Instant::now();
        }

        if last_save.elapsed().as_secs() >= 15 {
            save_session(&args.output_dir, &events, accel_count, &coordinator, &shake, &accident)?;
            last_save = Instant::now();
        }

        sleep(Duration::from_millis(200)).await;
    }

    save_session(&args.output_dir, &events, accel_count, &coordinator, &shake, &accident)?;

    println!("\n=== Final Stats ===");
    println!("Samples observed: {}", accel_count);
    println!("Shake triggers: {}", shake.triggers());
    println!("Accident triggers: {}", accident.triggers());
    println!("Emergency sessions: {}", coordinator.activations());
    println!("Suppressed requests: {}", coordinator.suppressed());

    Ok(())
}

fn snapshot(
    start: &Instant,
    accel_count: u64,
    shake: &insafe_rs::supervisor::DetectorHandle,
    accident: &insafe_rs::supervisor::DetectorHandle,
    coordinator: &Coordinator,
    check_in: &ScheduledCheckIn,
) -> LiveStatus {
    let mut status = LiveStatus::new();
    status.uptime_seconds = start.elapsed().as_secs();
    status.accel_samples = accel_count;
    status.shake_status = shake.status();
    status.accident_status = accident.status();
    status.shake_triggers = shake.triggers();
    status.accident_triggers = accident.triggers();
    status.emergency_active = coordinator.is_active();
    status.activations = coordinator.activations();
    status.suppressed_activations = coordinator.suppressed();
    status.check_in_remaining = check_in.remaining();
    status.check_in_display = check_in.remaining().map(format_hms);
    status
}

fn save_session(
    output_dir: &str,
    events: &Arc<Mutex<Vec<EmergencyEvent>>>,
    accel_count: u64,
    coordinator: &Coordinator,
    shake: &insafe_rs::supervisor::DetectorHandle,
    accident: &insafe_rs::supervisor::DetectorHandle,
) -> Result<()> {
    let events_snapshot = events
        .lock()
        .map(|log| log.clone())
        .unwrap_or_default();
    let output = SessionOutput {
        stats: Stats {
            total_samples: accel_count,
            activations: coordinator.activations(),
            suppressed_activations: coordinator.suppressed(),
            shake_triggers: shake.triggers(),
            accident_triggers: accident.triggers(),
        },
        events: events_snapshot,
    };
    let filename = format!("{}/session_{}.json", output_dir, ts_now_clean());
    let json = serde_json::to_string_pretty(&output)?;
    std::fs::write(&filename, json)?;
    println!(
        "[{}] Saved {} events to {}",
        ts_now(),
        output.events.len(),
        filename
    );
    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

fn ts_now_clean() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}
