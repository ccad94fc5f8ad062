//! Tone player
//!
//! Drives the output plugin against a local output device: plays a sine
//! tone, pauses, switches the stream format mid-playback and stops.
//!
//! Usage: `pulse-tone [device] [seconds]`

use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::f64::consts::TAU;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pulse_output::{
    audio::CpalConnector,
    config::{CONF_BUFFER_MS, CONF_PAUSE_ON_CORK, CONF_SERVER_ADDR, CONF_VOLUME_CONTROL},
    Host, HostMessage, OutputConfig, OutputEvent, OutputPlugin, TrackMetadata, WaveFormat,
};

const TONE_HZ: f64 = 440.0;
const TONE_AMPLITUDE: f64 = 0.2;

/// Host that synthesizes a sine tone in whatever format was last requested
struct ToneHost {
    config: HashMap<&'static str, String>,
    format: Mutex<WaveFormat>,
    phase: Mutex<f64>,
    volume: Mutex<f32>,
}

impl ToneHost {
    fn new(config: &OutputConfig, format: WaveFormat) -> Self {
        Self {
            config: HashMap::from([
                (CONF_SERVER_ADDR, config.server.clone()),
                (CONF_BUFFER_MS, config.buffer_ms.to_string()),
                (CONF_VOLUME_CONTROL, (config.volume_control as i64).to_string()),
                (CONF_PAUSE_ON_CORK, (config.pause_on_cork as i64).to_string()),
            ]),
            format: Mutex::new(format),
            phase: Mutex::new(0.0),
            volume: Mutex::new(1.0),
        }
    }

    fn set_format(&self, format: WaveFormat) {
        *self.format.lock() = format;
    }
}

impl Host for ToneHost {
    fn read(&self, buf: &mut [u8]) -> isize {
        let format = *self.format.lock();
        let width = (format.bits / 8) as usize;
        let channels = format.channels.max(1) as usize;
        let frame = width * channels;
        if frame == 0 || format.sample_rate == 0 {
            return 0;
        }

        let step = TAU * TONE_HZ / format.sample_rate as f64;
        let mut phase = self.phase.lock();
        let frames = buf.len() / frame;
        for chunk in buf.chunks_exact_mut(frame) {
            let value = phase.sin() * TONE_AMPLITUDE;
            *phase = (*phase + step) % TAU;
            for sample in chunk.chunks_exact_mut(width) {
                match (format.is_float, width) {
                    (true, 4) => sample.copy_from_slice(&(value as f32).to_le_bytes()),
                    (false, 2) => sample.copy_from_slice(&((value * i16::MAX as f64) as i16).to_le_bytes()),
                    (false, 4) => sample.copy_from_slice(&((value * i32::MAX as f64) as i32).to_le_bytes()),
                    _ => sample.fill(0),
                }
            }
        }
        (frames * frame) as isize
    }

    fn ok_to_read(&self) -> bool {
        true
    }

    fn volume(&self) -> f32 {
        *self.volume.lock()
    }

    fn set_volume(&self, amplitude: f32) {
        tracing::info!(amplitude, "volume changed on the device side");
        *self.volume.lock() = amplitude;
    }

    fn config_str(&self, key: &str, default: &str) -> String {
        self.config.get(key).cloned().unwrap_or_else(|| default.to_string())
    }

    fn config_int(&self, key: &str, default: i64) -> i64 {
        self.config.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn notify(&self, event: OutputEvent) {
        tracing::info!(?event, "output event");
    }

    fn current_track(&self) -> Option<TrackMetadata> {
        Some(TrackMetadata {
            artist: Some("pulse-tone".to_string()),
            title: Some(format!("{TONE_HZ} Hz sine")),
            uri: None,
        })
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let mut config = OutputConfig::load_or_default()?;
    if let Some(device) = args.next() {
        config.server = device;
    }
    let seconds: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(4);

    let format = WaveFormat::new(16, 2, 44_100);
    let host = Arc::new(ToneHost::new(&config, format));
    let plugin = OutputPlugin::new(host.clone(), Arc::new(CpalConnector::new()));

    println!("\n=== Available Output Devices ===");
    plugin.enumerate_output_devices(|device| {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}", device.description, default_marker);
        println!("    Name: {}", device.name);
    })?;
    println!();

    plugin.init()?;
    plugin.set_format(format)?;
    plugin.play()?;
    plugin.message(HostMessage::TrackChanged)?;

    let quarter = Duration::from_millis(seconds * 1000 / 4);
    thread::sleep(quarter);

    tracing::info!("pausing");
    plugin.pause()?;
    thread::sleep(Duration::from_millis(500));
    plugin.unpause()?;
    thread::sleep(quarter);

    let float = WaveFormat::float32(2, 48_000);
    tracing::info!(?float, "switching format");
    plugin.set_format(float)?;
    host.set_format(float);
    thread::sleep(quarter * 2);

    plugin.drain()?;
    let stats = plugin.stats();
    tracing::info!(
        requests = stats.requests,
        bytes = stats.bytes_written,
        underruns = stats.underruns,
        "playback finished"
    );
    plugin.stop()?;
    plugin.free()?;
    Ok(())
}
