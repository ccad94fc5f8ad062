//! Sound-server client abstraction
//!
//! A [`ServerBackend`] is the client library: every call is made with the
//! event loop lock held and returns immediately. Completions and
//! notifications come back as [`ServerEvent`]s posted to the event loop's
//! inbox through an [`EventSender`].

pub mod mainloop;
pub mod sim;
pub mod volume;

use std::collections::BTreeMap;

use crossbeam_channel::{Sender, TrySendError};

use crate::constants::EVENT_INBOX_CAPACITY;
use crate::format::{BufferAttr, ChannelMap, SampleSpec};

pub use mainloop::Mainloop;
pub use volume::{ChannelVolumes, Volume};

/// Identifies one connection attempt; never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u64);

/// Identifies one stream; never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

/// Handle of an asynchronous request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub u64);

/// Connection states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Unconnected,
    Connecting,
    Authorizing,
    SettingName,
    Ready,
    Failed,
    Terminated,
}

impl ContextState {
    /// Not failed or terminated
    pub fn is_good(self) -> bool {
        !matches!(self, ContextState::Failed | ContextState::Terminated)
    }
}

/// Stream states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Unconnected,
    Creating,
    Ready,
    Failed,
    Terminated,
}

impl StreamState {
    pub fn is_good(self) -> bool {
        !matches!(self, StreamState::Failed | StreamState::Terminated)
    }
}

/// Subscription facilities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facility {
    SinkInput,
    Sink,
}

/// Subscription event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionKind {
    New,
    Change,
    Remove,
}

/// Events the server raises on a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEventKind {
    RequestCork,
    RequestUncork,
}

/// Flags for connecting a playback stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamFlags {
    /// Connect corked; data does not flow until uncorked
    pub start_corked: bool,
}

/// Output device reported by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDevice {
    pub name: String,
    pub description: String,
    pub is_default: bool,
}

/// Asynchronous completions and notifications
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    ContextState {
        context: ContextId,
        state: ContextState,
    },
    StreamState {
        stream: StreamId,
        state: StreamState,
        /// Server-side index, known once the stream is ready
        sink_input: Option<u32>,
    },
    /// The server wants `bytes` more bytes of audio
    WriteRequest {
        stream: StreamId,
        bytes: usize,
    },
    OperationComplete {
        op: OpId,
        success: bool,
    },
    Subscription {
        facility: Facility,
        kind: SubscriptionKind,
        index: u32,
    },
    SinkInputInfo {
        op: OpId,
        index: u32,
        volume: Option<ChannelVolumes>,
    },
    StreamEvent {
        stream: StreamId,
        kind: StreamEventKind,
    },
}

/// Messages carried by the event loop inbox
#[derive(Debug)]
pub(crate) enum LoopMessage {
    Event(ServerEvent),
    Barrier(Sender<()>),
    Shutdown,
}

/// Posting side of the event loop inbox, cloned into backends
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<LoopMessage>,
}

impl EventSender {
    pub(crate) fn new(tx: Sender<LoopMessage>) -> Self {
        Self { tx }
    }

    /// Queue an event. Never blocks, so it is safe with the loop lock held
    /// and on the event thread itself.
    pub fn post(&self, event: ServerEvent) {
        if self.tx.send(LoopMessage::Event(event)).is_err() {
            tracing::debug!("event loop gone, dropping event");
        }
    }

    /// Queue an event unless `EVENT_INBOX_CAPACITY` events are already
    /// waiting; returns false if it was dropped.
    ///
    /// Real-time threads must use this.
    pub fn try_post(&self, event: ServerEvent) -> bool {
        if self.tx.len() >= EVENT_INBOX_CAPACITY {
            return false;
        }
        match self.tx.try_send(LoopMessage::Event(event)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Messages waiting in the inbox
    pub fn pending(&self) -> usize {
        self.tx.len()
    }

    pub(crate) fn send_raw(&self, msg: LoopMessage) -> bool {
        self.tx.send(msg).is_ok()
    }
}

/// Ordered string properties attached to contexts and streams
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Proplist(BTreeMap<String, String>);

impl Proplist {
    pub const APPLICATION_NAME: &'static str = "application.name";
    pub const APPLICATION_ID: &'static str = "application.id";
    pub const APPLICATION_ICON_NAME: &'static str = "application.icon_name";
    pub const MEDIA_ROLE: &'static str = "media.role";
    pub const MEDIA_ICON_NAME: &'static str = "media.icon_name";
    pub const MEDIA_TITLE: &'static str = "media.title";
    pub const MEDIA_ARTIST: &'static str = "media.artist";
    pub const MEDIA_FILENAME: &'static str = "media.filename";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// The asynchronous client library.
///
/// Calls never block. Anything that completes later reports back through
/// the [`EventSender`] the backend was opened with.
pub trait ServerBackend: Send {
    /// Start connecting; state changes arrive as [`ServerEvent::ContextState`]
    fn connect_context(&mut self, server: Option<&str>, props: &Proplist) -> Result<ContextId, String>;

    fn disconnect_context(&mut self, context: ContextId);

    /// Subscribe to sink input change notifications
    fn subscribe(&mut self, context: ContextId) -> OpId;

    fn new_stream(
        &mut self,
        context: ContextId,
        name: &str,
        spec: &SampleSpec,
        map: &ChannelMap,
        props: &Proplist,
    ) -> Result<StreamId, String>;

    /// Connect for playback; state changes arrive as [`ServerEvent::StreamState`]
    fn connect_playback(&mut self, stream: StreamId, attr: &BufferAttr, flags: StreamFlags) -> Result<(), String>;

    /// Disconnect and release; a `Terminated` state change follows
    fn disconnect_stream(&mut self, stream: StreamId);

    /// Size of the writable region, possibly smaller than `requested`
    fn begin_write(&mut self, stream: StreamId, requested: usize) -> Result<usize, String>;

    fn write(&mut self, stream: StreamId, data: &[u8]) -> Result<(), String>;

    fn cork(&mut self, stream: StreamId, cork: bool) -> OpId;

    fn flush(&mut self, stream: StreamId) -> OpId;

    fn drain(&mut self, stream: StreamId) -> OpId;

    fn set_sink_input_volume(&mut self, index: u32, volume: &ChannelVolumes) -> OpId;

    /// Completes with a [`ServerEvent::SinkInputInfo`]
    fn get_sink_input_info(&mut self, index: u32) -> OpId;

    fn update_proplist(&mut self, stream: StreamId, props: &Proplist) -> OpId;

    /// Diagnostic for the last failure
    fn last_error(&self) -> String;
}

/// Creates backends and answers one-shot queries
pub trait Connector: Send + Sync {
    fn open(&self, events: EventSender) -> Box<dyn ServerBackend>;

    /// List output devices over a throwaway connection
    fn enumerate_sinks(&self, server: Option<&str>) -> Result<Vec<OutputDevice>, String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_goodness() {
        assert!(ContextState::Authorizing.is_good());
        assert!(ContextState::Ready.is_good());
        assert!(!ContextState::Failed.is_good());
        assert!(!ContextState::Terminated.is_good());
        assert!(StreamState::Creating.is_good());
        assert!(!StreamState::Failed.is_good());
    }

    #[test]
    fn test_proplist() {
        let mut props = Proplist::new();
        props.set(Proplist::MEDIA_ROLE, "music");
        props.set(Proplist::MEDIA_ROLE, "phone");
        assert_eq!(props.len(), 1);
        assert_eq!(props.get(Proplist::MEDIA_ROLE), Some("phone"));
        assert_eq!(props.get(Proplist::MEDIA_TITLE), None);
    }

    #[test]
    fn test_try_post_full_inbox() {
        let (tx, _rx) = crossbeam_channel::bounded(1);
        let events = EventSender::new(tx);
        let ev = ServerEvent::WriteRequest {
            stream: StreamId(1),
            bytes: 64,
        };
        assert!(events.try_post(ev.clone()));
        assert!(!events.try_post(ev));
        assert_eq!(events.pending(), 1);
    }

    #[test]
    fn test_post_never_blocks_past_capacity() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let events = EventSender::new(tx);
        let ev = ServerEvent::WriteRequest {
            stream: StreamId(1),
            bytes: 64,
        };
        for _ in 0..EVENT_INBOX_CAPACITY {
            assert!(events.try_post(ev.clone()));
        }
        // real-time posts give up, posts under the loop lock still go through
        assert!(!events.try_post(ev.clone()));
        events.post(ev);
        assert_eq!(events.pending(), EVENT_INBOX_CAPACITY + 1);
    }
}
