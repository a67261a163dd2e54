//! Session manager demo
//!
//! Lists devices, then runs one session through its whole lifecycle.
//!
//! Usage: `orchestra [input|output] [device-index] [seconds]`
//!
//! Without a device index the engine's default device for the direction is
//! used.

use anyhow::{bail, Result};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use orchestra_sessions::{
    config::AppConfig, DeviceInfo, Direction, HostLifecycle, Manager, SessionId, StreamParams,
    INVALID_SESSION,
};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let direction = match args.next().as_deref() {
        None | Some("output") => Direction::Output,
        Some("input") => Direction::Input,
        Some(other) => bail!("unknown direction '{}', expected input or output", other),
    };
    let device_index = args.next().map(|s| s.parse::<u32>()).transpose()?;
    let seconds = args.next().map(|s| s.parse::<u64>()).transpose()?.unwrap_or(2);

    let config = AppConfig::load_or_default();
    let manager = Manager::from_config(&config)?;
    manager.on_create();

    println!("\n=== Available Audio Devices ===");
    for index in 0..manager.get_device_count() {
        let info = DeviceInfo::from_property(&manager.get_device_property(index as i32));
        let default_marker = if info.is_default { " [DEFAULT]" } else { "" };
        println!("  {}: {} ({}){}", index, info.name, info.direction(), default_marker);
        println!("    Sample rates: {:?}", info.sample_rates);
        println!("    Channels: {:?}", info.channels);
        println!("    Formats: {:?}", info.native_formats);
    }
    println!();

    let mut params = config.defaults.params();
    params.device_index = device_index
        .or_else(|| manager.default_device(direction))
        .unwrap_or(params.device_index);

    let StreamParams {
        device_index,
        sample_rate,
        channels,
        format,
    } = params;
    let id = match direction {
        Direction::Output => manager.open_output(device_index, sample_rate, channels, format),
        Direction::Input => manager.open_input(device_index, sample_rate, channels, format),
    };
    if id == INVALID_SESSION {
        bail!("could not open {} device {}", direction, device_index);
    }

    if !manager.start(id) {
        manager.close_device(id);
        bail!("could not start session {}", id);
    }
    tracing::info!("Session {} running for {}s", id, seconds);
    std::thread::sleep(Duration::from_secs(seconds));

    manager.stop(id);
    if let Some(summary) = manager.summary(SessionId(id as u32)) {
        tracing::info!(
            "Session {} moved {} frames, {} of {} left buffered",
            summary.id,
            summary.frames_transported,
            summary.buffered_frames,
            summary.buffer_capacity
        );
    }
    manager.close_device(id);
    manager.on_destroy();

    Ok(())
}
