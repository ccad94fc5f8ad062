//! # Pulse Output
//!
//! Output plugin core for a media player talking to an asynchronous sound
//! server.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────── HOST THREAD ────────────────────────────────┐
//! │  play / pause / unpause / stop / set_format / message / drain / flush   │
//! │                                   │                                      │
//! │                                   ▼                                      │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │        OutputPlugin (output)  ── loop lock + condvar wait ──┐    │    │
//! │  └─────────────────────────────────────────────────────────────┼───┘    │
//! └────────────────────────────────────────────────────────────────┼────────┘
//!                                                                  │
//!          ┌──────────── Session (guarded by the loop lock) ───────┴───┐
//!          │  Connection │ Stream + Reconfigure │ Volume │ Cork │ Pump │
//!          └───────────────────────────▲───────────────────────────────┘
//!                                      │ one event at a time
//! ┌──────────────────────────── EVENT THREAD ───────────────────────────────┐
//! │   Mainloop (server::mainloop): inbox → handler → signal                 │
//! │        ▲                                                                 │
//! │        │ ServerEvent (state changes, write requests, completions,        │
//! │        │              subscriptions, cork requests)                      │
//! │   ServerBackend (server::sim, audio::backend)                            │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The host never touches the stream outside the loop lock, and stream
//! teardown for a format change is driven from the event thread, from the
//! write path or from the stream's own state callbacks.

#[cfg(feature = "cpal-backend")]
pub mod audio;
pub mod config;
pub mod error;
pub mod format;
pub mod host;
pub mod output;
pub mod server;

pub use config::OutputConfig;
pub use error::{AudioError, ConnectionError, Error, FormatError, OperationError, Result};
pub use format::{negotiate, WaveFormat};
pub use host::{Host, HostMessage, OutputEvent, TrackMetadata};
pub use output::{OutputPlugin, PlaybackState, PumpStats};

/// Application-wide constants
pub mod constants {
    /// Highest sample rate the server can represent
    pub const MAX_SAMPLE_RATE: u32 = 192_000;

    /// Maximum number of channels in a stream
    pub const MAX_CHANNELS: usize = 32;

    /// Default target buffer latency in milliseconds
    pub const DEFAULT_BUFFER_MS: u32 = 100;

    /// Lower bound for the configured latency
    pub const MIN_BUFFER_MS: u32 = 10;

    /// Upper bound for the configured latency
    pub const MAX_BUFFER_MS: u32 = 2000;

    /// Queued events beyond which real-time posts are dropped
    pub const EVENT_INBOX_CAPACITY: usize = 1024;

    /// Name announced to the server
    pub const APPLICATION_NAME: &str = "Pulse Output";

    /// Reverse-DNS application id
    pub const APPLICATION_ID: &str = "org.pulse-output.player";

    /// Icon name attached to the context and stream
    pub const ICON_NAME: &str = "audio-x-generic";

    /// Name of the playback stream
    pub const STREAM_NAME: &str = "playback";
}
