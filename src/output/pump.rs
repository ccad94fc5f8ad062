//! Write pump
//!
//! Runs on the event thread whenever the server wants more data. It never
//! blocks: if the host has nothing ready the request is satisfied with
//! silence and counted as an underrun.

use tracing::warn;

use crate::output::reconfig::{Phase, Trigger};
use crate::output::session::Session;
use crate::output::PlaybackState;
use crate::server::StreamId;

/// Write pump counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Write requests served
    pub requests: u64,
    /// Total bytes handed to the server
    pub bytes_written: u64,
    /// Part of `bytes_written` that was silence
    pub silence_bytes: u64,
    /// Chunks where the host had less data than asked for while playing
    pub underruns: u64,
}

#[derive(Debug, Default)]
pub(crate) struct WritePump {
    scratch: Vec<u8>,
    stats: PumpStats,
}

impl WritePump {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> PumpStats {
        self.stats
    }
}

impl Session {
    /// Serve a write request of `bytes` for `stream`
    pub(crate) fn pump_write(&mut self, stream: StreamId, bytes: usize) {
        let Some(spec) = self.live_stream().filter(|s| s.id == stream).map(|s| s.spec) else {
            return;
        };
        let silence = spec.encoding.silence_byte();
        self.pump.stats.requests += 1;

        let mut remaining = bytes;
        while remaining > 0 {
            let chunk = match self.backend.begin_write(stream, remaining) {
                Ok(0) => break,
                Ok(n) => n.min(remaining),
                Err(e) => {
                    warn!(error = %e, "begin_write failed");
                    break;
                }
            };

            let feed = self.playback() == PlaybackState::Playing && !self.reconfig.is_pending() && self.host.ok_to_read();

            let pump = &mut self.pump;
            pump.scratch.clear();
            pump.scratch.resize(chunk, silence);
            let read = if feed {
                self.host.read(&mut pump.scratch).clamp(0, chunk as isize) as usize
            } else {
                0
            };
            if read < chunk {
                pump.scratch[read..].fill(silence);
                pump.stats.silence_bytes += (chunk - read) as u64;
                if feed {
                    pump.stats.underruns += 1;
                }
            }

            if let Err(e) = self.backend.write(stream, &pump.scratch) {
                warn!(error = %e, "write failed");
                break;
            }
            pump.stats.bytes_written += chunk as u64;
            remaining -= chunk;
        }

        if self.reconfig.phase() == Phase::TearingDown {
            let step = self.reconfig.advance(Trigger::WritePumped);
            self.run_step(step);
        }
    }
}
