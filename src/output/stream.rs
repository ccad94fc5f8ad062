//! Stream controller
//!
//! Builds and releases the playback stream, and runs the synchronous
//! stream operations host threads wait on.

use parking_lot::MutexGuard;
use tracing::{debug, info};

use crate::constants::{ICON_NAME, STREAM_NAME};
use crate::error::{Error, FormatError, OperationError};
use crate::format::{negotiate, BufferAttr, WaveFormat};
use crate::host::TrackMetadata;
use crate::output::session::{Session, StreamSlot};
use crate::output::PlaybackState;
use crate::server::{Mainloop, OpId, Proplist, StreamFlags, StreamId, StreamState};

/// Properties of the playback stream, tagged with the current track
pub(crate) fn stream_props(track: Option<&TrackMetadata>) -> Proplist {
    let mut props = Proplist::new();
    props.set(Proplist::MEDIA_ROLE, "music");
    props.set(Proplist::MEDIA_ICON_NAME, ICON_NAME);
    if let Some(track) = track {
        if let Some(title) = &track.title {
            props.set(Proplist::MEDIA_TITLE, title.as_str());
        }
        if let Some(artist) = &track.artist {
            props.set(Proplist::MEDIA_ARTIST, artist.as_str());
        }
        if let Some(uri) = &track.uri {
            props.set(Proplist::MEDIA_FILENAME, uri.as_str());
        }
    }
    props
}

impl Session {
    /// Negotiate `format`, create a stream for it and start connecting.
    /// Does not wait for the stream to become ready.
    pub(crate) fn build_stream(&mut self, format: &WaveFormat, corked: bool) -> Result<StreamId, FormatError> {
        let negotiated = negotiate(format)?;
        let context = self
            .context
            .ok_or_else(|| FormatError::Rejected("not connected".to_string()))?;

        let track = self.host.current_track();
        let props = stream_props(track.as_ref());
        let id = self
            .backend
            .new_stream(context, STREAM_NAME, &negotiated.spec, &negotiated.channel_map, &props)
            .map_err(FormatError::Rejected)?;

        let attr = BufferAttr::for_latency(&negotiated.spec, self.config.buffer_ms);
        let flags = StreamFlags { start_corked: corked };
        self.stream = Some(StreamSlot {
            id,
            state: StreamState::Unconnected,
            sink_input: None,
            spec: negotiated.spec,
            corked,
        });
        self.format = *format;

        if let Err(e) = self.backend.connect_playback(id, &attr, flags) {
            self.release_stream();
            return Err(FormatError::Rejected(e));
        }
        if let Some(slot) = self.stream.as_mut() {
            slot.state = StreamState::Creating;
        }

        info!(
            stream = ?id,
            format = %negotiated.format,
            encoding = ?negotiated.spec.encoding,
            tlength = attr.tlength,
            corked,
            "stream created"
        );
        Ok(id)
    }

    /// Disconnect the stream, if any
    pub(crate) fn release_stream(&mut self) {
        if let Some(slot) = self.stream.take() {
            debug!(stream = ?slot.id, "releasing stream");
            self.backend.disconnect_stream(slot.id);
        }
        self.volume.reset();
    }
}

/// Build a stream for `format`, block until it is ready and start playing
pub(crate) fn create(mainloop: &Mainloop<Session>, format: &WaveFormat) -> Result<(), Error> {
    let mut session = mainloop.lock();
    let id = session.build_stream(format, false)?;

    loop {
        let state = match session.stream.as_ref().filter(|s| s.id == id) {
            Some(slot) => slot.state,
            None => StreamState::Terminated,
        };
        match state {
            StreamState::Ready => break,
            s if !s.is_good() || !session.context_state.is_good() => {
                let reason = session.backend.last_error();
                session.release_stream();
                return Err(FormatError::Rejected(reason).into());
            }
            _ => mainloop.wait(&mut session),
        }
    }

    if let Some(index) = session.stream.as_ref().and_then(|s| s.sink_input) {
        session.backend.get_sink_input_info(index);
    }
    session.set_playback(PlaybackState::Playing);
    Ok(())
}

/// Wait for a tracked operation to complete, or for the stream or
/// connection to die
pub(crate) fn wait_op(
    mainloop: &Mainloop<Session>,
    session: &mut MutexGuard<'_, Session>,
    op: OpId,
) -> Result<(), OperationError> {
    session.track(op);
    loop {
        if let Some(success) = session.take_completed(op) {
            return if success {
                Ok(())
            } else {
                Err(OperationError::Failed(session.backend.last_error()))
            };
        }
        if !session.stream_alive() {
            session.untrack(op);
            return Err(OperationError::Died(session.backend.last_error()));
        }
        mainloop.wait(session);
    }
}

/// Stream operations host threads run synchronously
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamOp {
    Cork(bool),
    Flush,
    Drain,
}

/// Issue `op` on the ready stream and wait for it. No stream is a no-op.
pub(crate) fn run_sync(
    mainloop: &Mainloop<Session>,
    session: &mut MutexGuard<'_, Session>,
    op: StreamOp,
) -> Result<(), OperationError> {
    let Some(id) = session.live_stream().map(|s| s.id) else {
        return Ok(());
    };
    let handle = match op {
        StreamOp::Cork(cork) => {
            session.mark_corked(cork);
            session.backend.cork(id, cork)
        }
        StreamOp::Flush => session.backend.flush(id),
        StreamOp::Drain => session.backend.drain(id),
    };
    debug!(?op, stream = ?id, "waiting for stream operation");
    wait_op(mainloop, session, handle)
}
