//! Host player interface
//!
//! The player that loads this output is an external collaborator. It hands
//! out decoded audio, owns the user-facing volume, stores configuration and
//! reflects output state changes in its UI.

/// Metadata of the track currently playing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackMetadata {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub uri: Option<String>,
}

/// Notifications sent to the host when output state changes on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// The server asked us to cork (e.g. an incoming call)
    PausedByServer,
    /// The server lifted its cork request
    ResumedByServer,
    /// Playback stopped because of a fatal error
    StoppedOnError(String),
}

/// Messages the host forwards to the output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostMessage {
    /// The user changed the volume in the host
    VolumeChanged,
    /// Configuration values may have changed
    ConfigChanged,
    /// A new track started
    TrackChanged,
}

/// Callbacks and queries into the host player.
///
/// `read` and `ok_to_read` are called from the server's event thread and
/// must not block.
pub trait Host: Send + Sync {
    /// Pull decoded audio into `buf`. Returns the number of bytes written,
    /// zero or negative when nothing is available.
    fn read(&self, buf: &mut [u8]) -> isize;

    /// Whether decoded audio is ready to be pulled
    fn ok_to_read(&self) -> bool;

    /// Current output gain as linear amplitude
    fn volume(&self) -> f32;

    /// Store a new output gain (linear amplitude)
    fn set_volume(&self, amplitude: f32);

    /// String configuration value
    fn config_str(&self, key: &str, default: &str) -> String;

    /// Integer configuration value
    fn config_int(&self, key: &str, default: i64) -> i64;

    /// Reflect an output state change
    fn notify(&self, event: OutputEvent);

    /// Metadata of the current track, if any
    fn current_track(&self) -> Option<TrackMetadata>;
}
