//! In-process sound server
//!
//! Behaves like a well-mannered server: connections walk through the usual
//! states, streams become ready after connecting, every request completes.
//! The [`SimControl`] handle injects server-side events (write requests,
//! cork requests, remote volume changes, failures) and inspects what the
//! client did.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::format::{BufferAttr, ChannelMap, SampleEncoding, SampleSpec};
use crate::server::{
    ChannelVolumes, ContextId, ContextState, EventSender, Facility, OpId, OutputDevice, Proplist,
    ServerBackend, ServerEvent, StreamEventKind, StreamFlags, StreamId, StreamState,
    SubscriptionKind, Volume, Connector,
};

/// Requests the client made, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    Subscribe,
    Cork(StreamId, bool),
    Flush(StreamId),
    Drain(StreamId),
    SetVolume(u32, ChannelVolumes),
    GetInfo(u32),
    UpdateProplist(StreamId),
    DisconnectStream(StreamId),
    DisconnectContext(ContextId),
}

/// Snapshot of one simulated stream
#[derive(Debug, Clone)]
pub struct SimStream {
    pub id: StreamId,
    pub spec: SampleSpec,
    pub channel_map: ChannelMap,
    pub props: Proplist,
    pub attr: Option<BufferAttr>,
    pub flags: StreamFlags,
    pub state: StreamState,
    pub corked: bool,
    pub sink_input: Option<u32>,
    pub written: Vec<u8>,
}

struct SimState {
    events: Option<EventSender>,
    next_id: u64,
    next_sink_input: u32,

    reachable: bool,
    rejected: Vec<SampleEncoding>,
    write_granularity: usize,
    initial_request: bool,
    hold_ready: bool,
    held: Vec<(StreamId, u32)>,
    devices: Vec<OutputDevice>,

    context: Option<ContextId>,
    context_connects: usize,
    streams: BTreeMap<StreamId, SimStream>,
    volumes: HashMap<u32, ChannelVolumes>,
    calls: Vec<SimCall>,
    last_error: String,
}

impl SimState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn next_op(&mut self) -> OpId {
        OpId(self.next_id())
    }

    fn post(&self, event: ServerEvent) {
        if let Some(events) = &self.events {
            events.post(event);
        }
    }

    fn complete(&mut self, success: bool) -> OpId {
        let op = self.next_op();
        self.post(ServerEvent::OperationComplete { op, success });
        op
    }

    /// Finish connecting a stream that is still being created
    fn make_ready(&mut self, stream: StreamId, sink_input: u32) {
        let (channels, flags, attr) = match self.streams.get_mut(&stream) {
            Some(s) if s.state == StreamState::Creating => {
                s.state = StreamState::Ready;
                s.sink_input = Some(sink_input);
                (s.spec.channels as usize, s.flags, s.attr)
            }
            _ => return,
        };
        self.volumes.insert(sink_input, ChannelVolumes::uniform(channels, Volume::NORM));
        self.post(ServerEvent::StreamState {
            stream,
            state: StreamState::Ready,
            sink_input: Some(sink_input),
        });
        self.post(ServerEvent::Subscription {
            facility: Facility::SinkInput,
            kind: SubscriptionKind::New,
            index: sink_input,
        });
        if let (true, false, Some(attr)) = (self.initial_request, flags.start_corked, attr) {
            self.post(ServerEvent::WriteRequest {
                stream,
                bytes: attr.tlength as usize,
            });
        }
    }

    /// The stream that is connected and not torn down
    fn live_stream_id(&self) -> Option<StreamId> {
        self.streams
            .values()
            .rev()
            .find(|s| s.state.is_good() && s.sink_input.is_some())
            .map(|s| s.id)
    }
}

/// Test-side handle onto the simulated server
#[derive(Clone)]
pub struct SimControl {
    inner: Arc<Mutex<SimState>>,
}

impl SimControl {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimState {
                events: None,
                next_id: 0,
                next_sink_input: 0,
                reachable: true,
                rejected: Vec::new(),
                write_granularity: 0,
                initial_request: false,
                hold_ready: false,
                held: Vec::new(),
                devices: vec![OutputDevice {
                    name: "sim_output".to_string(),
                    description: "Simulated Output".to_string(),
                    is_default: true,
                }],
                context: None,
                context_connects: 0,
                streams: BTreeMap::new(),
                volumes: HashMap::new(),
                calls: Vec::new(),
                last_error: String::new(),
            })),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.inner.lock().reachable = reachable;
    }

    /// Streams with this encoding fail to connect
    pub fn reject_encoding(&self, encoding: SampleEncoding) {
        self.inner.lock().rejected.push(encoding);
    }

    /// Largest writable region handed out by `begin_write` (0 = unlimited)
    pub fn set_write_granularity(&self, bytes: usize) {
        self.inner.lock().write_granularity = bytes;
    }

    /// Ask for a full buffer as soon as a stream is ready
    pub fn set_initial_request(&self, enabled: bool) {
        self.inner.lock().initial_request = enabled;
    }

    /// Keep new streams in Creating until [`SimControl::release_ready`]
    pub fn hold_ready(&self, hold: bool) {
        self.inner.lock().hold_ready = hold;
    }

    /// Let every held stream become ready
    pub fn release_ready(&self) {
        let mut st = self.inner.lock();
        let held = std::mem::take(&mut st.held);
        for (stream, sink_input) in held {
            st.make_ready(stream, sink_input);
        }
    }

    pub fn set_devices(&self, devices: Vec<OutputDevice>) {
        self.inner.lock().devices = devices;
    }

    /// Server asks the live stream for more audio
    pub fn request_write(&self, bytes: usize) {
        let st = self.inner.lock();
        if let Some(stream) = st.live_stream_id() {
            st.post(ServerEvent::WriteRequest { stream, bytes });
        }
    }

    /// Server asks the live stream to cork, e.g. for a phone call
    pub fn request_cork(&self) {
        self.stream_event(StreamEventKind::RequestCork);
    }

    pub fn request_uncork(&self) {
        self.stream_event(StreamEventKind::RequestUncork);
    }

    fn stream_event(&self, kind: StreamEventKind) {
        let st = self.inner.lock();
        if let Some(stream) = st.live_stream_id() {
            st.post(ServerEvent::StreamEvent { stream, kind });
        }
    }

    /// An external mixer changes the live stream's volume
    pub fn set_remote_volume(&self, volume: Volume) {
        let mut st = self.inner.lock();
        let Some(stream) = st.live_stream_id() else {
            return;
        };
        let (index, channels) = {
            let s = &st.streams[&stream];
            (s.sink_input, s.spec.channels as usize)
        };
        if let Some(index) = index {
            st.volumes.insert(index, ChannelVolumes::uniform(channels, volume));
            st.post(ServerEvent::Subscription {
                facility: Facility::SinkInput,
                kind: SubscriptionKind::Change,
                index,
            });
        }
    }

    /// The live stream dies on the server side
    pub fn fail_stream(&self, reason: &str) {
        let mut st = self.inner.lock();
        let Some(id) = st.live_stream_id() else {
            return;
        };
        st.last_error = reason.to_string();
        if let Some(stream) = st.streams.get_mut(&id) {
            stream.state = StreamState::Failed;
        }
        st.post(ServerEvent::StreamState {
            stream: id,
            state: StreamState::Failed,
            sink_input: None,
        });
    }

    /// The server goes away
    pub fn kill_connection(&self, reason: &str) {
        let mut st = self.inner.lock();
        let Some(context) = st.context.take() else {
            return;
        };
        st.last_error = reason.to_string();
        let ids: Vec<StreamId> = st.streams.keys().copied().collect();
        for id in ids {
            let failed = match st.streams.get_mut(&id) {
                Some(s) if s.state.is_good() => {
                    s.state = StreamState::Failed;
                    true
                }
                _ => false,
            };
            if failed {
                st.post(ServerEvent::StreamState {
                    stream: id,
                    state: StreamState::Failed,
                    sink_input: None,
                });
            }
        }
        st.post(ServerEvent::ContextState {
            context,
            state: ContextState::Failed,
        });
    }

    pub fn live_stream(&self) -> Option<SimStream> {
        let st = self.inner.lock();
        st.live_stream_id().map(|id| st.streams[&id].clone())
    }

    /// Every stream ever created, oldest first
    pub fn streams(&self) -> Vec<SimStream> {
        self.inner.lock().streams.values().cloned().collect()
    }

    pub fn calls(&self) -> Vec<SimCall> {
        self.inner.lock().calls.clone()
    }

    pub fn context_connects(&self) -> usize {
        self.inner.lock().context_connects
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().context.is_some()
    }

    pub fn sink_input_volume(&self, index: u32) -> Option<ChannelVolumes> {
        self.inner.lock().volumes.get(&index).cloned()
    }
}

/// Opens [`SimBackend`]s sharing one [`SimControl`]
pub struct SimConnector {
    control: SimControl,
}

impl SimConnector {
    pub fn new() -> Self {
        Self {
            control: SimControl::new(),
        }
    }

    pub fn control(&self) -> SimControl {
        self.control.clone()
    }
}

impl Default for SimConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for SimConnector {
    fn open(&self, events: EventSender) -> Box<dyn ServerBackend> {
        self.control.inner.lock().events = Some(events);
        Box::new(SimBackend {
            control: self.control.clone(),
        })
    }

    fn enumerate_sinks(&self, _server: Option<&str>) -> Result<Vec<OutputDevice>, String> {
        let st = self.control.inner.lock();
        if st.reachable {
            Ok(st.devices.clone())
        } else {
            Err("Connection refused".to_string())
        }
    }
}

/// Client side of the simulated server
pub struct SimBackend {
    control: SimControl,
}

impl ServerBackend for SimBackend {
    fn connect_context(&mut self, _server: Option<&str>, _props: &Proplist) -> Result<ContextId, String> {
        let mut st = self.control.inner.lock();
        let context = ContextId(st.next_id());
        st.context_connects += 1;
        for state in [ContextState::Connecting, ContextState::Authorizing, ContextState::SettingName] {
            st.post(ServerEvent::ContextState { context, state });
        }
        if st.reachable {
            st.context = Some(context);
            st.post(ServerEvent::ContextState {
                context,
                state: ContextState::Ready,
            });
        } else {
            st.last_error = "Connection refused".to_string();
            st.post(ServerEvent::ContextState {
                context,
                state: ContextState::Failed,
            });
        }
        Ok(context)
    }

    fn disconnect_context(&mut self, context: ContextId) {
        let mut st = self.control.inner.lock();
        st.calls.push(SimCall::DisconnectContext(context));
        if st.context == Some(context) {
            st.context = None;
        }
        st.post(ServerEvent::ContextState {
            context,
            state: ContextState::Terminated,
        });
    }

    fn subscribe(&mut self, _context: ContextId) -> OpId {
        let mut st = self.control.inner.lock();
        st.calls.push(SimCall::Subscribe);
        st.complete(true)
    }

    fn new_stream(
        &mut self,
        context: ContextId,
        _name: &str,
        spec: &SampleSpec,
        map: &ChannelMap,
        props: &Proplist,
    ) -> Result<StreamId, String> {
        let mut st = self.control.inner.lock();
        if st.context != Some(context) {
            st.last_error = "Bad state".to_string();
            return Err(st.last_error.clone());
        }
        if !spec.is_valid() || map.channels() != spec.channels as usize {
            st.last_error = "Invalid argument".to_string();
            return Err(st.last_error.clone());
        }
        let id = StreamId(st.next_id());
        st.streams.insert(
            id,
            SimStream {
                id,
                spec: *spec,
                channel_map: map.clone(),
                props: props.clone(),
                attr: None,
                flags: StreamFlags::default(),
                state: StreamState::Unconnected,
                corked: false,
                sink_input: None,
                written: Vec::new(),
            },
        );
        Ok(id)
    }

    fn connect_playback(&mut self, stream: StreamId, attr: &BufferAttr, flags: StreamFlags) -> Result<(), String> {
        let mut st = self.control.inner.lock();
        let rejected = match st.streams.get(&stream) {
            Some(s) => st.rejected.contains(&s.spec.encoding),
            None => return Err("No such entity".to_string()),
        };
        let sink_input = st.next_sink_input;
        st.next_sink_input += 1;

        {
            let s = st.streams.get_mut(&stream).ok_or("No such entity")?;
            s.attr = Some(*attr);
            s.flags = flags;
            s.corked = flags.start_corked;
            s.state = StreamState::Creating;
        }
        st.post(ServerEvent::StreamState {
            stream,
            state: StreamState::Creating,
            sink_input: None,
        });

        if rejected {
            st.last_error = "Not supported".to_string();
            if let Some(s) = st.streams.get_mut(&stream) {
                s.state = StreamState::Failed;
            }
            st.post(ServerEvent::StreamState {
                stream,
                state: StreamState::Failed,
                sink_input: None,
            });
            return Ok(());
        }

        if st.hold_ready {
            st.held.push((stream, sink_input));
        } else {
            st.make_ready(stream, sink_input);
        }
        Ok(())
    }

    fn disconnect_stream(&mut self, stream: StreamId) {
        let mut st = self.control.inner.lock();
        st.calls.push(SimCall::DisconnectStream(stream));
        let index = match st.streams.get_mut(&stream) {
            Some(s) if s.state.is_good() => {
                s.state = StreamState::Terminated;
                s.sink_input
            }
            _ => return,
        };
        st.post(ServerEvent::StreamState {
            stream,
            state: StreamState::Terminated,
            sink_input: None,
        });
        if let Some(index) = index {
            st.volumes.remove(&index);
            st.post(ServerEvent::Subscription {
                facility: Facility::SinkInput,
                kind: SubscriptionKind::Remove,
                index,
            });
        }
    }

    fn begin_write(&mut self, stream: StreamId, requested: usize) -> Result<usize, String> {
        let st = self.control.inner.lock();
        match st.streams.get(&stream) {
            Some(s) if s.state == StreamState::Ready => {
                if st.write_granularity == 0 {
                    Ok(requested)
                } else {
                    Ok(requested.min(st.write_granularity))
                }
            }
            _ => Err("Bad state".to_string()),
        }
    }

    fn write(&mut self, stream: StreamId, data: &[u8]) -> Result<(), String> {
        let mut st = self.control.inner.lock();
        match st.streams.get_mut(&stream) {
            Some(s) if s.state == StreamState::Ready => {
                s.written.extend_from_slice(data);
                Ok(())
            }
            _ => Err("Bad state".to_string()),
        }
    }

    fn cork(&mut self, stream: StreamId, cork: bool) -> OpId {
        let mut st = self.control.inner.lock();
        st.calls.push(SimCall::Cork(stream, cork));
        let ok = match st.streams.get_mut(&stream) {
            Some(s) if s.state == StreamState::Ready => {
                s.corked = cork;
                true
            }
            _ => false,
        };
        st.complete(ok)
    }

    fn flush(&mut self, stream: StreamId) -> OpId {
        let mut st = self.control.inner.lock();
        st.calls.push(SimCall::Flush(stream));
        let ok = st.streams.get(&stream).is_some_and(|s| s.state == StreamState::Ready);
        st.complete(ok)
    }

    fn drain(&mut self, stream: StreamId) -> OpId {
        let mut st = self.control.inner.lock();
        st.calls.push(SimCall::Drain(stream));
        let ok = st.streams.get(&stream).is_some_and(|s| s.state == StreamState::Ready);
        st.complete(ok)
    }

    fn set_sink_input_volume(&mut self, index: u32, volume: &ChannelVolumes) -> OpId {
        let mut st = self.control.inner.lock();
        st.calls.push(SimCall::SetVolume(index, volume.clone()));
        if !st.volumes.contains_key(&index) {
            st.last_error = "No such entity".to_string();
            return st.complete(false);
        }
        st.volumes.insert(index, volume.clone());
        let op = st.complete(true);
        st.post(ServerEvent::Subscription {
            facility: Facility::SinkInput,
            kind: SubscriptionKind::Change,
            index,
        });
        op
    }

    fn get_sink_input_info(&mut self, index: u32) -> OpId {
        let mut st = self.control.inner.lock();
        st.calls.push(SimCall::GetInfo(index));
        let op = st.next_op();
        let volume = st.volumes.get(&index).cloned();
        let success = volume.is_some();
        st.post(ServerEvent::SinkInputInfo { op, index, volume });
        st.post(ServerEvent::OperationComplete { op, success });
        op
    }

    fn update_proplist(&mut self, stream: StreamId, props: &Proplist) -> OpId {
        let mut st = self.control.inner.lock();
        st.calls.push(SimCall::UpdateProplist(stream));
        let ok = match st.streams.get_mut(&stream) {
            Some(s) if s.state.is_good() => {
                for (key, value) in props.iter() {
                    s.props.set(key, value);
                }
                true
            }
            _ => false,
        };
        st.complete(ok)
    }

    fn last_error(&self) -> String {
        self.control.inner.lock().last_error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::mainloop::Mainloop;

    fn spec() -> SampleSpec {
        SampleSpec {
            encoding: SampleEncoding::S16Le,
            rate: 44_100,
            channels: 2,
        }
    }

    fn drain_events(inbox: crate::server::mainloop::Inbox, events: EventSender) -> Vec<ServerEvent> {
        let mut ml = Mainloop::start(Vec::new(), inbox, events, |seen: &mut Vec<ServerEvent>, ev| {
            seen.push(ev)
        })
        .unwrap();
        ml.settle();
        let seen = ml.lock().clone();
        ml.stop();
        seen
    }

    #[test]
    fn test_connect_walks_states() {
        let connector = SimConnector::new();
        let (events, inbox) = Mainloop::<Vec<ServerEvent>>::channel();
        let mut backend = connector.open(events.clone());
        let ctx = backend.connect_context(None, &Proplist::new()).unwrap();

        let states: Vec<ContextState> = drain_events(inbox, events)
            .into_iter()
            .filter_map(|ev| match ev {
                ServerEvent::ContextState { context, state } if context == ctx => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                ContextState::Connecting,
                ContextState::Authorizing,
                ContextState::SettingName,
                ContextState::Ready
            ]
        );
    }

    #[test]
    fn test_rejected_encoding_fails_stream() {
        let connector = SimConnector::new();
        let control = connector.control();
        control.reject_encoding(SampleEncoding::S16Le);
        let (events, inbox) = Mainloop::<Vec<ServerEvent>>::channel();
        let mut backend = connector.open(events.clone());
        let ctx = backend.connect_context(None, &Proplist::new()).unwrap();
        let stream = backend
            .new_stream(ctx, "playback", &spec(), &ChannelMap::waveex_extended(2), &Proplist::new())
            .unwrap();
        let attr = BufferAttr::for_latency(&spec(), 100);
        backend.connect_playback(stream, &attr, StreamFlags::default()).unwrap();

        let seen = drain_events(inbox, events);
        assert!(seen.contains(&ServerEvent::StreamState {
            stream,
            state: StreamState::Failed,
            sink_input: None
        }));
        assert_eq!(backend.last_error(), "Not supported");
    }

    #[test]
    fn test_write_granularity() {
        let connector = SimConnector::new();
        connector.control().set_write_granularity(100);
        let (events, _inbox) = Mainloop::<Vec<ServerEvent>>::channel();
        let mut backend = connector.open(events);
        let ctx = backend.connect_context(None, &Proplist::new()).unwrap();
        let stream = backend
            .new_stream(ctx, "playback", &spec(), &ChannelMap::waveex_extended(2), &Proplist::new())
            .unwrap();
        assert!(backend.begin_write(stream, 400).is_err());
        let attr = BufferAttr::for_latency(&spec(), 100);
        backend.connect_playback(stream, &attr, StreamFlags::default()).unwrap();
        assert_eq!(backend.begin_write(stream, 400), Ok(100));
        assert_eq!(backend.begin_write(stream, 40), Ok(40));
    }
}
