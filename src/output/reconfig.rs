//! Deferred stream reconfiguration
//!
//! A format change cannot tear the stream down from the host thread while
//! its callbacks may be running. The host only records the request; the
//! event thread then walks the sequence one step per callback:
//!
//! ```text
//! Idle ──request──▶ TearingDown ──pumped──▶ Building(AwaitTeardown)
//!                                                 │ terminated
//!                                                 ▼
//! Idle ◀──info── SyncingInfo ◀──ready── Building(AwaitReady)
//! ```
//!
//! [`Reconfigure::advance`] is pure: it returns the [`Step`] the caller must
//! carry out and never touches the stream itself.

use crate::format::WaveFormat;

/// Where the sequence is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// A request is waiting for the next write callback
    TearingDown,
    Building(BuildPhase),
    /// Fetching the new stream's server-side volume
    SyncingInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    /// Old stream disconnected, waiting for it to terminate
    AwaitTeardown,
    /// New stream connected, waiting for it to become ready
    AwaitReady,
}

/// Callbacks that can move the sequence forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    WritePumped,
    StreamTerminated,
    StreamReady,
    StreamFailed,
    InfoReceived,
}

/// Work the caller has to do after a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Nothing,
    /// Disconnect the live stream
    TearDown,
    /// Create and connect a stream for this format
    Build(WaveFormat),
    /// Query the new stream's volume
    SyncInfo,
    /// Sequence complete; another may already be queued
    Finished,
    /// Sequence failed; stop playback
    Abort,
}

#[derive(Debug)]
pub struct Reconfigure {
    phase: Phase,
    pending: Option<WaveFormat>,
}

impl Default for Reconfigure {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconfigure {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            pending: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// A sequence is running or queued
    pub fn is_pending(&self) -> bool {
        self.phase != Phase::Idle
    }

    /// Format waiting to be built, if any
    pub fn pending_format(&self) -> Option<WaveFormat> {
        self.pending
    }

    /// Record a format change. The latest request wins: it replaces any
    /// format not yet consumed by a build. Returns true when this starts a
    /// new sequence.
    pub fn request(&mut self, format: WaveFormat) -> bool {
        self.pending = Some(format);
        if self.phase == Phase::Idle {
            self.phase = Phase::TearingDown;
            true
        } else {
            false
        }
    }

    /// Move one step
    pub fn advance(&mut self, trigger: Trigger) -> Step {
        use BuildPhase::*;
        use Trigger::*;

        if trigger == StreamFailed && self.phase != Phase::Idle {
            self.abort();
            return Step::Abort;
        }

        match (self.phase, trigger) {
            (Phase::TearingDown, WritePumped) => {
                self.phase = Phase::Building(AwaitTeardown);
                Step::TearDown
            }
            // the old stream went away on its own
            (Phase::TearingDown, StreamTerminated) | (Phase::Building(AwaitTeardown), StreamTerminated) => {
                match self.pending.take() {
                    Some(format) => {
                        self.phase = Phase::Building(AwaitReady);
                        Step::Build(format)
                    }
                    None => {
                        self.abort();
                        Step::Abort
                    }
                }
            }
            (Phase::Building(AwaitReady), StreamReady) => {
                self.phase = Phase::SyncingInfo;
                Step::SyncInfo
            }
            (Phase::SyncingInfo, InfoReceived) => {
                // a request that came in after the build needs another round
                self.phase = if self.pending.is_some() {
                    Phase::TearingDown
                } else {
                    Phase::Idle
                };
                Step::Finished
            }
            _ => Step::Nothing,
        }
    }

    /// Drop the sequence and any queued format
    pub fn abort(&mut self) {
        self.phase = Phase::Idle;
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(bits: u16, rate: u32) -> WaveFormat {
        WaveFormat::new(bits, 2, rate)
    }

    #[test]
    fn test_full_sequence() {
        let mut rc = Reconfigure::new();
        assert!(rc.request(fmt(24, 48_000)));
        assert!(rc.is_pending());

        assert_eq!(rc.advance(Trigger::WritePumped), Step::TearDown);
        assert_eq!(rc.advance(Trigger::StreamTerminated), Step::Build(fmt(24, 48_000)));
        assert_eq!(rc.pending_format(), None);
        assert_eq!(rc.advance(Trigger::StreamReady), Step::SyncInfo);
        assert_eq!(rc.advance(Trigger::InfoReceived), Step::Finished);
        assert_eq!(rc.phase(), Phase::Idle);
    }

    #[test]
    fn test_idle_ignores_triggers() {
        let mut rc = Reconfigure::new();
        for trigger in [
            Trigger::WritePumped,
            Trigger::StreamTerminated,
            Trigger::StreamReady,
            Trigger::StreamFailed,
            Trigger::InfoReceived,
        ] {
            assert_eq!(rc.advance(trigger), Step::Nothing);
        }
        assert!(!rc.is_pending());
    }

    #[test]
    fn test_latest_request_wins() {
        let mut rc = Reconfigure::new();
        assert!(rc.request(fmt(24, 48_000)));
        assert!(!rc.request(fmt(32, 96_000)));
        assert_eq!(rc.advance(Trigger::WritePumped), Step::TearDown);
        assert!(!rc.request(fmt(8, 22_050)));
        assert_eq!(rc.advance(Trigger::StreamTerminated), Step::Build(fmt(8, 22_050)));
        assert_eq!(rc.advance(Trigger::StreamReady), Step::SyncInfo);
        assert_eq!(rc.advance(Trigger::InfoReceived), Step::Finished);
        assert!(!rc.is_pending());
    }

    #[test]
    fn test_request_after_build_runs_again() {
        let mut rc = Reconfigure::new();
        rc.request(fmt(24, 48_000));
        rc.advance(Trigger::WritePumped);
        rc.advance(Trigger::StreamTerminated);
        assert!(!rc.request(fmt(16, 96_000)));

        assert_eq!(rc.advance(Trigger::StreamReady), Step::SyncInfo);
        assert_eq!(rc.advance(Trigger::InfoReceived), Step::Finished);
        assert_eq!(rc.phase(), Phase::TearingDown);
        assert_eq!(rc.advance(Trigger::WritePumped), Step::TearDown);
        assert_eq!(rc.advance(Trigger::StreamTerminated), Step::Build(fmt(16, 96_000)));
    }

    #[test]
    fn test_failure_aborts_and_clears() {
        let mut rc = Reconfigure::new();
        rc.request(fmt(24, 48_000));
        rc.advance(Trigger::WritePumped);
        rc.advance(Trigger::StreamTerminated);
        rc.request(fmt(16, 44_100));
        assert_eq!(rc.advance(Trigger::StreamFailed), Step::Abort);
        assert!(!rc.is_pending());
        assert_eq!(rc.pending_format(), None);
    }

    #[test]
    fn test_out_of_order_triggers_wait() {
        let mut rc = Reconfigure::new();
        rc.request(fmt(24, 48_000));
        assert_eq!(rc.advance(Trigger::StreamReady), Step::Nothing);
        assert_eq!(rc.advance(Trigger::InfoReceived), Step::Nothing);
        assert_eq!(rc.phase(), Phase::TearingDown);
        rc.advance(Trigger::WritePumped);
        assert_eq!(rc.advance(Trigger::WritePumped), Step::Nothing);
        assert_eq!(rc.phase(), Phase::Building(BuildPhase::AwaitTeardown));
    }

    #[test]
    fn test_old_stream_gone_before_pump() {
        let mut rc = Reconfigure::new();
        rc.request(fmt(24, 48_000));
        assert_eq!(rc.advance(Trigger::StreamTerminated), Step::Build(fmt(24, 48_000)));
        assert_eq!(rc.phase(), Phase::Building(BuildPhase::AwaitReady));
    }
}
