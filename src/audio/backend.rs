//! Local output backend
//!
//! Plays straight to a cpal output device while speaking the same event
//! protocol as a sound server: the "server" is the device, the context is
//! the opened device, and every stream gets its own device stream thread.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::audio::buffer::SampleDecoder;
use crate::audio::device::{find_output_device, list_output_devices};
use crate::audio::playback::{DeviceStream, StreamParams, StreamShared};
use crate::format::{BufferAttr, ChannelMap, SampleSpec};
use crate::server::{
    ChannelVolumes, Connector, ContextId, ContextState, EventSender, Facility, OpId, OutputDevice,
    Proplist, ServerBackend, ServerEvent, StreamFlags, StreamId, StreamState, SubscriptionKind,
    Volume,
};

/// Opens [`CpalBackend`]s on the default cpal host
#[derive(Debug, Default)]
pub struct CpalConnector;

impl CpalConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for CpalConnector {
    fn open(&self, events: EventSender) -> Box<dyn ServerBackend> {
        Box::new(CpalBackend::new(events))
    }

    fn enumerate_sinks(&self, _server: Option<&str>) -> Result<Vec<OutputDevice>, String> {
        list_output_devices().map_err(|e| e.to_string())
    }
}

struct DeviceSlot {
    spec: SampleSpec,
    sink_input: u32,
    decoder: SampleDecoder,
    volume: ChannelVolumes,
    output: Option<DeviceStream>,
}

impl DeviceSlot {
    fn shared(&self) -> Option<&Arc<StreamShared>> {
        self.output.as_ref().map(DeviceStream::shared)
    }
}

/// Backend writing to a local output device
pub struct CpalBackend {
    events: EventSender,
    next_id: u64,
    context: Option<ContextId>,
    /// Device name, `None` for the host default
    device: Option<String>,
    streams: HashMap<StreamId, DeviceSlot>,
    last_error: Arc<Mutex<String>>,
}

impl CpalBackend {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            next_id: 0,
            context: None,
            device: None,
            streams: HashMap::new(),
            last_error: Arc::new(Mutex::new(String::new())),
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn fail(&self, error: impl ToString) -> String {
        let error = error.to_string();
        *self.last_error.lock() = error.clone();
        error
    }

    fn complete(&mut self, success: bool) -> OpId {
        let op = OpId(self.next_id());
        self.events.post(ServerEvent::OperationComplete { op, success });
        op
    }

    fn find_sink_input(&self, index: u32) -> Option<StreamId> {
        self.streams
            .iter()
            .find(|(_, slot)| slot.sink_input == index)
            .map(|(id, _)| *id)
    }
}

impl ServerBackend for CpalBackend {
    fn connect_context(&mut self, server: Option<&str>, props: &Proplist) -> Result<ContextId, String> {
        let context = ContextId(self.next_id());
        self.events.post(ServerEvent::ContextState {
            context,
            state: ContextState::Connecting,
        });

        match find_output_device(server) {
            Ok(_) => {
                info!(
                    device = server.unwrap_or("default"),
                    application = props.get(Proplist::APPLICATION_NAME).unwrap_or(""),
                    "output device opened"
                );
                self.context = Some(context);
                self.device = server.map(str::to_string);
                self.events.post(ServerEvent::ContextState {
                    context,
                    state: ContextState::Ready,
                });
            }
            Err(e) => {
                self.fail(&e);
                self.events.post(ServerEvent::ContextState {
                    context,
                    state: ContextState::Failed,
                });
            }
        }
        Ok(context)
    }

    fn disconnect_context(&mut self, context: ContextId) {
        if self.context != Some(context) {
            return;
        }
        for (_, mut slot) in self.streams.drain() {
            if let Some(mut output) = slot.output.take() {
                output.stop();
            }
        }
        self.context = None;
        self.events.post(ServerEvent::ContextState {
            context,
            state: ContextState::Terminated,
        });
    }

    fn subscribe(&mut self, _context: ContextId) -> OpId {
        self.complete(true)
    }

    fn new_stream(
        &mut self,
        context: ContextId,
        name: &str,
        spec: &SampleSpec,
        map: &ChannelMap,
        _props: &Proplist,
    ) -> Result<StreamId, String> {
        if self.context != Some(context) {
            return Err(self.fail("Bad state"));
        }
        if !spec.is_valid() || map.channels() != spec.channels as usize {
            return Err(self.fail("Invalid argument"));
        }
        let id = StreamId(self.next_id());
        let sink_input = id.0 as u32;
        debug!(stream = ?id, name, ?spec, "new stream");
        self.streams.insert(
            id,
            DeviceSlot {
                spec: *spec,
                sink_input,
                decoder: SampleDecoder::new(spec.encoding),
                volume: ChannelVolumes::uniform(spec.channels as usize, Volume::NORM),
                output: None,
            },
        );
        Ok(id)
    }

    fn connect_playback(&mut self, stream: StreamId, attr: &BufferAttr, flags: StreamFlags) -> Result<(), String> {
        let device = find_output_device(self.device.as_deref()).map_err(|e| self.fail(e))?;
        let events = self.events.clone();
        let last_error = self.last_error.clone();
        let slot = self.streams.get_mut(&stream).ok_or("No such entity")?;

        let params = StreamParams {
            id: stream,
            sink_input: slot.sink_input,
            spec: slot.spec,
            target_bytes: attr.tlength as usize,
            min_request: attr.minreq as usize,
        };
        let shared = Arc::new(StreamShared::new(params, flags.start_corked));
        shared.set_gain(slot.volume.avg().to_linear());

        events.post(ServerEvent::StreamState {
            stream,
            state: StreamState::Creating,
            sink_input: None,
        });
        let output = DeviceStream::start(device, shared, events.clone(), last_error).map_err(|e| e.to_string())?;
        slot.output = Some(output);
        events.post(ServerEvent::Subscription {
            facility: Facility::SinkInput,
            kind: SubscriptionKind::New,
            index: params.sink_input,
        });
        Ok(())
    }

    fn disconnect_stream(&mut self, stream: StreamId) {
        let Some(mut slot) = self.streams.remove(&stream) else {
            return;
        };
        if let Some(mut output) = slot.output.take() {
            output.stop();
        }
        self.events.post(ServerEvent::StreamState {
            stream,
            state: StreamState::Terminated,
            sink_input: None,
        });
        self.events.post(ServerEvent::Subscription {
            facility: Facility::SinkInput,
            kind: SubscriptionKind::Remove,
            index: slot.sink_input,
        });
    }

    fn begin_write(&mut self, stream: StreamId, requested: usize) -> Result<usize, String> {
        let Some(shared) = self.streams.get(&stream).and_then(DeviceSlot::shared) else {
            return Err(self.fail("Bad state"));
        };
        let frame = self.streams.get(&stream).map(|s| s.spec.frame_size()).unwrap_or(1).max(1);
        let writable = shared.writable_bytes().min(requested);
        Ok(writable - writable % frame)
    }

    fn write(&mut self, stream: StreamId, data: &[u8]) -> Result<(), String> {
        let Some(slot) = self.streams.get_mut(&stream) else {
            return Err(self.fail("Bad state"));
        };
        let Some(shared) = slot.output.as_ref().map(|o| o.shared().clone()) else {
            return Err(self.fail("Bad state"));
        };
        let samples = slot.decoder.decode(data);
        let pushed = shared.queue.push_samples(samples);
        if pushed < samples.len() {
            warn!(dropped = samples.len() - pushed, "sample queue overflow");
        }
        shared.written(data.len());
        Ok(())
    }

    fn cork(&mut self, stream: StreamId, cork: bool) -> OpId {
        let ok = match self.streams.get(&stream).and_then(DeviceSlot::shared) {
            Some(shared) => {
                shared.corked.store(cork, std::sync::atomic::Ordering::Relaxed);
                true
            }
            None => false,
        };
        self.complete(ok)
    }

    fn flush(&mut self, stream: StreamId) -> OpId {
        let ok = match self.streams.get_mut(&stream) {
            Some(slot) => {
                slot.decoder.reset();
                if let Some(shared) = slot.shared() {
                    let dropped = shared.queue.clear();
                    debug!(dropped, "flushed");
                }
                true
            }
            None => false,
        };
        self.complete(ok)
    }

    fn drain(&mut self, stream: StreamId) -> OpId {
        let shared = self.streams.get(&stream).and_then(DeviceSlot::shared).cloned();
        match shared {
            Some(shared) if !shared.queue.is_empty() => {
                let op = OpId(self.next_id());
                shared.drain_after_queued(op);
                op
            }
            Some(_) => self.complete(true),
            None => self.complete(false),
        }
    }

    fn set_sink_input_volume(&mut self, index: u32, volume: &ChannelVolumes) -> OpId {
        let Some(id) = self.find_sink_input(index) else {
            return self.complete(false);
        };
        if let Some(slot) = self.streams.get_mut(&id) {
            slot.volume = volume.clone();
            if let Some(shared) = slot.shared() {
                shared.set_gain(volume.avg().to_linear());
            }
        }
        let op = self.complete(true);
        self.events.post(ServerEvent::Subscription {
            facility: Facility::SinkInput,
            kind: SubscriptionKind::Change,
            index,
        });
        op
    }

    fn get_sink_input_info(&mut self, index: u32) -> OpId {
        let volume = self
            .find_sink_input(index)
            .and_then(|id| self.streams.get(&id))
            .map(|slot| slot.volume.clone());
        let op = OpId(self.next_id());
        self.events.post(ServerEvent::SinkInputInfo { op, index, volume });
        self.events.post(ServerEvent::OperationComplete { op, success: true });
        op
    }

    fn update_proplist(&mut self, stream: StreamId, props: &Proplist) -> OpId {
        let known = self.streams.contains_key(&stream);
        if known {
            if let Some(title) = props.get(Proplist::MEDIA_TITLE) {
                info!(title, "now playing");
            }
        }
        self.complete(known)
    }

    fn last_error(&self) -> String {
        self.last_error.lock().clone()
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        for (_, mut slot) in self.streams.drain() {
            if let Some(mut output) = slot.output.take() {
                output.stop();
            }
        }
    }
}
