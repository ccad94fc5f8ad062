//! Playback session
//!
//! Everything the event thread and the host thread share lives in one
//! [`Session`] owned by the [`Mainloop`](crate::server::Mainloop) and
//! guarded by its lock. [`Session::handle`] is the loop's event handler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::OutputConfig;
use crate::format::{SampleSpec, WaveFormat};
use crate::host::{Host, OutputEvent};
use crate::output::cork::{CorkAction, CorkCoordinator};
use crate::output::pump::WritePump;
use crate::output::reconfig::{Reconfigure, Step, Trigger};
use crate::output::volume::VolumeBridge;
use crate::output::PlaybackState;
use crate::server::{
    ContextId, ContextState, EventSender, Facility, OpId, ServerBackend, ServerEvent, StreamEventKind, StreamId,
    StreamState, SubscriptionKind,
};

/// Playback state readable without the loop lock
#[derive(Debug, Default)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub fn load(&self) -> PlaybackState {
        match self.0.load(Ordering::Acquire) {
            1 => PlaybackState::Playing,
            2 => PlaybackState::Paused,
            _ => PlaybackState::Stopped,
        }
    }

    pub fn store(&self, state: PlaybackState) {
        let raw = match state {
            PlaybackState::Stopped => 0,
            PlaybackState::Playing => 1,
            PlaybackState::Paused => 2,
        };
        self.0.store(raw, Ordering::Release);
    }
}

/// The live stream
#[derive(Debug, Clone)]
pub(crate) struct StreamSlot {
    pub id: StreamId,
    pub state: StreamState,
    pub sink_input: Option<u32>,
    pub spec: SampleSpec,
    /// Cork state last asked of the server
    pub corked: bool,
}

impl StreamSlot {
    pub fn is_ready(&self) -> bool {
        self.state == StreamState::Ready
    }
}

pub(crate) struct Session {
    pub host: Arc<dyn Host>,
    pub backend: Box<dyn ServerBackend>,
    pub events: EventSender,
    pub config: OutputConfig,

    pub context: Option<ContextId>,
    pub context_state: ContextState,
    pub stream: Option<StreamSlot>,
    /// Stream disconnected by a reconfiguration, not yet terminated
    pub retiring: Option<StreamId>,
    /// Format the live stream was built from, as requested
    pub format: WaveFormat,

    playback: PlaybackState,
    status: Arc<StateCell>,

    pub reconfig: Reconfigure,
    pub volume: VolumeBridge,
    pub cork: CorkCoordinator,
    pub pump: WritePump,

    /// Operations a host thread is waiting on; `Some` once complete
    pub ops: HashMap<OpId, Option<bool>>,
    /// Info query finishing a reconfiguration
    pub info_sync: Option<OpId>,
}

impl Session {
    pub fn new(
        host: Arc<dyn Host>,
        backend: Box<dyn ServerBackend>,
        events: EventSender,
        config: OutputConfig,
        status: Arc<StateCell>,
    ) -> Self {
        status.store(PlaybackState::Stopped);
        Self {
            host,
            backend,
            events,
            config,
            context: None,
            context_state: ContextState::Unconnected,
            stream: None,
            retiring: None,
            format: WaveFormat::generic(),
            playback: PlaybackState::Stopped,
            status,
            reconfig: Reconfigure::new(),
            volume: VolumeBridge::new(),
            cork: CorkCoordinator::new(),
            pump: WritePump::new(),
            ops: HashMap::new(),
            info_sync: None,
        }
    }

    pub fn playback(&self) -> PlaybackState {
        self.playback
    }

    pub fn set_playback(&mut self, state: PlaybackState) {
        if self.playback != state {
            debug!(from = ?self.playback, to = ?state, "playback state");
        }
        self.playback = state;
        self.status.store(state);
    }

    /// The stream data is written to, if it is ready
    pub fn live_stream(&self) -> Option<&StreamSlot> {
        self.stream.as_ref().filter(|s| s.is_ready())
    }

    pub fn stream_alive(&self) -> bool {
        self.context_state.is_good() && self.stream.as_ref().is_some_and(|s| s.state.is_good())
    }

    /// Start tracking an operation a host thread will wait on
    pub fn track(&mut self, op: OpId) {
        self.ops.insert(op, None);
    }

    /// Result of a tracked operation once it completed
    pub fn take_completed(&mut self, op: OpId) -> Option<bool> {
        match self.ops.get(&op) {
            Some(Some(success)) => {
                let success = *success;
                self.ops.remove(&op);
                Some(success)
            }
            _ => None,
        }
    }

    pub fn untrack(&mut self, op: OpId) {
        self.ops.remove(&op);
    }

    /// Ask the event thread to look at the reconfiguration again. Only
    /// needed while corked: a playing stream keeps requesting data.
    pub fn nudge(&self) {
        if self.playback == PlaybackState::Playing {
            return;
        }
        if let Some(stream) = self.live_stream() {
            if !self.events.try_post(ServerEvent::WriteRequest { stream: stream.id, bytes: 0 }) {
                debug!("inbox full, reconfiguration waits for the next write");
            }
        }
    }

    /// Release the stream and the connection and stop. Runs on the event
    /// thread; the host is told why.
    pub fn fail(&mut self, reason: String) {
        error!(%reason, "playback stopped");
        self.shutdown();
        self.host.notify(OutputEvent::StoppedOnError(reason));
    }

    /// Tear everything down and go to Stopped
    pub fn shutdown(&mut self) {
        self.reconfig.abort();
        self.cork.reset();
        self.info_sync = None;
        self.release_stream();
        self.retiring = None;
        self.disconnect();
        self.set_playback(PlaybackState::Stopped);
    }

    /// Event loop handler
    pub fn handle(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::ContextState { context, state } => self.on_context_state(context, state),
            ServerEvent::StreamState {
                stream,
                state,
                sink_input,
            } => self.on_stream_state(stream, state, sink_input),
            ServerEvent::WriteRequest { stream, bytes } => self.pump_write(stream, bytes),
            ServerEvent::OperationComplete { op, success } => self.on_operation_complete(op, success),
            ServerEvent::Subscription { facility, kind, index } => self.on_subscription(facility, kind, index),
            ServerEvent::SinkInputInfo { op, index, volume } => {
                let current = self.stream.as_ref().and_then(|s| s.sink_input) == Some(index);
                if let (true, Some(volume)) = (current, volume) {
                    let enabled = self.config.volume_control;
                    self.volume.on_remote_volume_changed(self.host.as_ref(), &volume, enabled);
                }
                if self.info_sync == Some(op) {
                    self.finish_info_sync();
                }
            }
            ServerEvent::StreamEvent { stream, kind } => self.on_stream_event(stream, kind),
        }
    }

    fn on_context_state(&mut self, context: ContextId, state: ContextState) {
        if self.context != Some(context) {
            debug!(?context, ?state, "ignoring stale context event");
            return;
        }
        debug!(?state, "context state");
        self.context_state = state;

        match state {
            ContextState::Ready => {
                let op = self.backend.subscribe(context);
                debug!(?op, "subscribed to sink input events");
            }
            ContextState::Failed | ContextState::Terminated => {
                if self.stream.is_some() || self.reconfig.is_pending() || self.playback != PlaybackState::Stopped {
                    let reason = format!("connection lost: {}", self.backend.last_error());
                    self.fail(reason);
                }
            }
            _ => {}
        }
    }

    fn on_stream_state(&mut self, stream: StreamId, state: StreamState, sink_input: Option<u32>) {
        if self.retiring == Some(stream) {
            if !state.is_good() {
                debug!(?stream, ?state, "old stream gone");
                self.retiring = None;
                let step = self.reconfig.advance(Trigger::StreamTerminated);
                self.run_step(step);
            }
            return;
        }

        let Some(slot) = self.stream.as_mut().filter(|s| s.id == stream) else {
            debug!(?stream, ?state, "ignoring stale stream event");
            return;
        };
        debug!(?stream, ?state, "stream state");
        slot.state = state;
        if sink_input.is_some() {
            slot.sink_input = sink_input;
        }

        match state {
            StreamState::Ready => {
                info!(?stream, sink_input = ?slot.sink_input, "stream ready");
                // pause or unpause while the stream was being created
                let want_corked = self.playback == PlaybackState::Paused;
                if slot.corked != want_corked {
                    debug!(?stream, corked = want_corked, "correcting cork state");
                    slot.corked = want_corked;
                    self.backend.cork(stream, want_corked);
                }
                let step = self.reconfig.advance(Trigger::StreamReady);
                self.run_step(step);
            }
            StreamState::Failed | StreamState::Terminated => {
                if self.reconfig.is_pending() {
                    let step = self.reconfig.advance(Trigger::StreamFailed);
                    self.run_step(step);
                } else if self.playback != PlaybackState::Stopped {
                    let reason = format!("stream {}: {}", stream_state_word(state), self.backend.last_error());
                    self.fail(reason);
                }
                // otherwise a host thread is waiting on this stream and reports it
            }
            _ => {}
        }
    }

    fn on_operation_complete(&mut self, op: OpId, success: bool) {
        if let Some(slot) = self.ops.get_mut(&op) {
            *slot = Some(success);
        } else if !success {
            warn!(?op, error = %self.backend.last_error(), "operation failed");
        }
        // info query failed without delivering info
        if self.info_sync == Some(op) {
            self.finish_info_sync();
        }
    }

    fn on_subscription(&mut self, facility: Facility, kind: SubscriptionKind, index: u32) {
        if facility != Facility::SinkInput || kind != SubscriptionKind::Change {
            return;
        }
        let ours = self.stream.as_ref().and_then(|s| s.sink_input) == Some(index);
        if ours && self.config.volume_control {
            self.backend.get_sink_input_info(index);
        }
    }

    fn on_stream_event(&mut self, stream: StreamId, kind: StreamEventKind) {
        if self.live_stream().map(|s| s.id) != Some(stream) {
            debug!(?stream, ?kind, "ignoring event for stale stream");
            return;
        }
        let action = self.cork.on_server_request(kind, self.playback, self.config.pause_on_cork);
        debug!(?kind, ?action, "server cork request");

        match action {
            CorkAction::Ignore => {}
            CorkAction::Pause => {
                self.backend.flush(stream);
                self.backend.cork(stream, true);
                self.mark_corked(true);
                self.set_playback(PlaybackState::Paused);
                self.host.notify(OutputEvent::PausedByServer);
            }
            CorkAction::Resume => {
                self.backend.cork(stream, false);
                self.mark_corked(false);
                self.set_playback(PlaybackState::Playing);
                self.host.notify(OutputEvent::ResumedByServer);
            }
        }
    }

    pub fn mark_corked(&mut self, corked: bool) {
        if let Some(slot) = self.stream.as_mut() {
            slot.corked = corked;
        }
    }

    fn finish_info_sync(&mut self) {
        self.info_sync = None;
        let step = self.reconfig.advance(Trigger::InfoReceived);
        self.run_step(step);
    }

    /// Carry out a reconfiguration step on the event thread
    pub fn run_step(&mut self, step: Step) {
        match step {
            Step::Nothing => {}
            Step::TearDown => match self.stream.take() {
                Some(slot) => {
                    debug!(stream = ?slot.id, "tearing down stream for new format");
                    self.retiring = Some(slot.id);
                    self.backend.disconnect_stream(slot.id);
                }
                None => {
                    let next = self.reconfig.advance(Trigger::StreamTerminated);
                    self.run_step(next);
                }
            },
            Step::Build(format) => {
                let corked = self.playback == PlaybackState::Paused;
                if let Err(e) = self.build_stream(&format, corked) {
                    self.fail(e.to_string());
                }
            }
            Step::SyncInfo => match self.stream.as_ref().and_then(|s| s.sink_input) {
                Some(index) => {
                    self.info_sync = Some(self.backend.get_sink_input_info(index));
                }
                None => {
                    let next = self.reconfig.advance(Trigger::InfoReceived);
                    self.run_step(next);
                }
            },
            Step::Finished => {
                info!(format = %self.format, "stream reconfigured");
                if self.reconfig.is_pending() {
                    self.nudge();
                }
            }
            Step::Abort => {
                let reason = format!("reconfiguration failed: {}", self.backend.last_error());
                self.fail(reason);
            }
        }
    }
}

fn stream_state_word(state: StreamState) -> &'static str {
    match state {
        StreamState::Failed => "failed",
        StreamState::Terminated => "terminated",
        _ => "changed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_cell() {
        let cell = StateCell::default();
        assert_eq!(cell.load(), PlaybackState::Stopped);
        cell.store(PlaybackState::Paused);
        assert_eq!(cell.load(), PlaybackState::Paused);
        cell.store(PlaybackState::Playing);
        assert_eq!(cell.load(), PlaybackState::Playing);
    }
}
