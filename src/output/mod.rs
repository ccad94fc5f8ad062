//! Output plugin
//!
//! [`OutputPlugin`] is what the host player drives. Host calls are
//! serialised and run on the calling thread; everything the server reports
//! is handled on the event thread owned by the plugin.

pub mod cork;
pub mod reconfig;
pub mod volume;

mod connection;
mod pump;
mod session;
mod stream;

use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::OutputConfig;
use crate::error::{ConnectionError, Error, OperationError, Result};
use crate::format::WaveFormat;
use crate::host::{Host, HostMessage};
use crate::server::{Connector, Mainloop, OutputDevice};

pub use pump::PumpStats;

use session::{Session, StateCell};
use stream::StreamOp;

/// Playback state as seen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

/// Output plugin bound to one host and one server connector
pub struct OutputPlugin {
    host: Arc<dyn Host>,
    connector: Arc<dyn Connector>,
    /// Event loop, present between `init` and `free`. Holding this lock
    /// serialises host calls.
    mainloop: Mutex<Option<Mainloop<Session>>>,
    event_thread: Mutex<Option<ThreadId>>,
    /// Format the host asked for most recently
    requested: Mutex<WaveFormat>,
    status: Arc<StateCell>,
}

impl OutputPlugin {
    pub fn new(host: Arc<dyn Host>, connector: Arc<dyn Connector>) -> Self {
        Self {
            host,
            connector,
            mainloop: Mutex::new(None),
            event_thread: Mutex::new(None),
            requested: Mutex::new(WaveFormat::generic()),
            status: Arc::new(StateCell::default()),
        }
    }

    /// Start the event loop. Calling it again is a no-op.
    pub fn init(&self) -> Result<()> {
        self.reject_event_thread()?;
        let mut slot = self.mainloop.lock();
        if slot.is_some() {
            return Ok(());
        }

        let config = OutputConfig::from_host(self.host.as_ref());
        debug!(?config, "initializing output");
        let (events, inbox) = Mainloop::<Session>::channel();
        let backend = self.connector.open(events.clone());
        let session = Session::new(self.host.clone(), backend, events.clone(), config, self.status.clone());
        let mainloop = Mainloop::start(session, inbox, events, |session: &mut Session, event| {
            session.handle(event)
        })?;

        *self.event_thread.lock() = Some(mainloop.thread_id());
        *slot = Some(mainloop);
        Ok(())
    }

    /// Stop playback and the event loop
    pub fn free(&self) -> Result<()> {
        self.reject_event_thread()?;
        let mut slot = self.mainloop.lock();
        if let Some(mut mainloop) = slot.take() {
            mainloop.lock().shutdown();
            mainloop.settle();
            mainloop.stop();
            info!("output freed");
        }
        *self.event_thread.lock() = None;
        Ok(())
    }

    /// Change the output format.
    ///
    /// Without a stream the format is only recorded for the next `play`.
    /// With a live stream the change is queued and carried out by the
    /// event thread; this call does not wait for it.
    pub fn set_format(&self, format: WaveFormat) -> Result<()> {
        self.reject_event_thread()?;
        *self.requested.lock() = format;

        let slot = self.mainloop.lock();
        let Some(mainloop) = slot.as_ref() else {
            return Ok(());
        };
        let mut session = mainloop.lock();
        if session.stream.is_none() && !session.reconfig.is_pending() {
            debug!(%format, "no stream, format recorded");
            return Ok(());
        }
        if format == session.format && !session.reconfig.is_pending() {
            return Ok(());
        }

        info!(%format, "format change requested");
        session.reconfig.request(format);
        session.nudge();
        Ok(())
    }

    /// Start playback, or resume it when paused
    pub fn play(&self) -> Result<()> {
        self.reject_event_thread()?;
        let slot = self.mainloop.lock();
        let mainloop = slot.as_ref().ok_or(ConnectionError::NotInitialized)?;

        let current = mainloop.lock().playback();
        match current {
            PlaybackState::Playing => return Ok(()),
            PlaybackState::Paused => return self.resume(mainloop),
            PlaybackState::Stopped => {}
        }

        let format = *self.requested.lock();
        connection::connect(mainloop)?;
        if let Err(e) = stream::create(mainloop, &format) {
            warn!(error = %e, "could not start playback");
            mainloop.lock().shutdown();
            return Err(e);
        }
        info!(%format, "playing");
        Ok(())
    }

    /// Stop playback and disconnect. No-op when already stopped.
    pub fn stop(&self) -> Result<()> {
        self.reject_event_thread()?;
        let slot = self.mainloop.lock();
        if let Some(mainloop) = slot.as_ref() {
            let mut session = mainloop.lock();
            if session.playback() != PlaybackState::Stopped || session.context.is_some() {
                session.shutdown();
                info!("stopped");
            }
        }
        Ok(())
    }

    /// Pause and cork the stream
    pub fn pause(&self) -> Result<()> {
        self.reject_event_thread()?;
        let slot = self.mainloop.lock();
        let Some(mainloop) = slot.as_ref() else {
            return Ok(());
        };
        let mut session = mainloop.lock();
        match session.playback() {
            PlaybackState::Playing => {
                session.cork.on_user_pause();
                session.set_playback(PlaybackState::Paused);
                stream::run_sync(mainloop, &mut session, StreamOp::Cork(true))?;
                Ok(())
            }
            PlaybackState::Paused => {
                // take over a pause the server asked for
                session.cork.on_user_pause();
                Ok(())
            }
            PlaybackState::Stopped => Ok(()),
        }
    }

    /// Resume after a pause, whoever paused. No-op when not paused.
    pub fn unpause(&self) -> Result<()> {
        self.reject_event_thread()?;
        let slot = self.mainloop.lock();
        match slot.as_ref() {
            Some(mainloop) => self.resume(mainloop),
            None => Ok(()),
        }
    }

    fn resume(&self, mainloop: &Mainloop<Session>) -> Result<()> {
        let mut session = mainloop.lock();
        if session.playback() != PlaybackState::Paused {
            return Ok(());
        }
        session.cork.on_user_unpause();
        session.set_playback(PlaybackState::Playing);
        stream::run_sync(mainloop, &mut session, StreamOp::Cork(false))?;
        Ok(())
    }

    pub fn state(&self) -> PlaybackState {
        self.status.load()
    }

    /// Wait until the server has played everything written so far
    pub fn drain(&self) -> Result<()> {
        self.stream_op(StreamOp::Drain)
    }

    /// Drop audio buffered on the server
    pub fn flush(&self) -> Result<()> {
        self.stream_op(StreamOp::Flush)
    }

    fn stream_op(&self, op: StreamOp) -> Result<()> {
        self.reject_event_thread()?;
        let slot = self.mainloop.lock();
        let Some(mainloop) = slot.as_ref() else {
            return Ok(());
        };
        let mut session = mainloop.lock();
        stream::run_sync(mainloop, &mut session, op)?;
        Ok(())
    }

    /// Handle a notification from the host
    pub fn message(&self, message: HostMessage) -> Result<()> {
        self.reject_event_thread()?;
        let slot = self.mainloop.lock();
        let Some(mainloop) = slot.as_ref() else {
            return Ok(());
        };

        match message {
            HostMessage::VolumeChanged => {
                let mut guard = mainloop.lock();
                let session = &mut *guard;
                let (sink_input, channels) = match session.stream.as_ref() {
                    Some(s) => (s.sink_input, s.spec.channels as usize),
                    None => (None, 0),
                };
                let enabled = session.config.volume_control;
                match session.volume.push_local_volume(
                    session.backend.as_mut(),
                    session.host.as_ref(),
                    sink_input,
                    channels,
                    enabled,
                ) {
                    Ok(_) | Err(OperationError::Disabled) => Ok(()),
                    Err(e) => Err(e.into()),
                }
            }
            HostMessage::ConfigChanged => {
                let config = OutputConfig::from_host(self.host.as_ref());
                debug!(?config, "configuration reloaded");
                mainloop.lock().config = config;
                Ok(())
            }
            HostMessage::TrackChanged => {
                let track = self.host.current_track();
                let mut session = mainloop.lock();
                let Some(id) = session.live_stream().map(|s| s.id) else {
                    return Ok(());
                };
                let props = stream::stream_props(track.as_ref());
                session.backend.update_proplist(id, &props);
                Ok(())
            }
        }
    }

    /// List the server's output devices over a separate connection
    pub fn enumerate_output_devices<F>(&self, mut callback: F) -> Result<()>
    where
        F: FnMut(&OutputDevice),
    {
        let config = OutputConfig::from_host(self.host.as_ref());
        let devices = self
            .connector
            .enumerate_sinks(config.server_addr())
            .map_err(ConnectionError::Unreachable)?;
        for device in &devices {
            callback(device);
        }
        Ok(())
    }

    /// Format most recently requested by the host
    pub fn format(&self) -> WaveFormat {
        *self.requested.lock()
    }

    /// Write pump counters
    pub fn stats(&self) -> PumpStats {
        if self.on_event_thread() {
            return PumpStats::default();
        }
        match self.mainloop.lock().as_ref() {
            Some(mainloop) => mainloop.lock().pump.stats(),
            None => PumpStats::default(),
        }
    }

    /// The current pause was requested by the server
    pub fn cork_requested(&self) -> bool {
        if self.on_event_thread() {
            return false;
        }
        match self.mainloop.lock().as_ref() {
            Some(mainloop) => mainloop.lock().cork.is_requested(),
            None => false,
        }
    }

    /// Block until every event the server has sent so far is handled
    pub fn settle(&self) {
        if self.on_event_thread() {
            return;
        }
        if let Some(mainloop) = self.mainloop.lock().as_ref() {
            mainloop.settle();
        }
    }

    fn on_event_thread(&self) -> bool {
        *self.event_thread.lock() == Some(thread::current().id())
    }

    /// Host calls from inside a notification would wait on themselves
    fn reject_event_thread(&self) -> Result<()> {
        if self.on_event_thread() {
            return Err(Error::Operation(OperationError::Rejected(
                "called from the event thread".to_string(),
            )));
        }
        Ok(())
    }
}

impl Drop for OutputPlugin {
    fn drop(&mut self) {
        if let Err(e) = self.free() {
            warn!(error = %e, "failed to free output");
        }
    }
}
