//! Threaded event loop
//!
//! One background thread drains the inbox and runs the handler for each
//! event with the loop lock held, then wakes every waiter. Host threads lock
//! the same mutex, issue requests and [`Mainloop::wait`] for the handler to
//! record the outcome. Waiting releases the lock, so a blocked host call and
//! a running callback never overlap.

use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{bounded, unbounded, Receiver};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::ConnectionError;
use crate::server::{EventSender, LoopMessage, ServerEvent};

/// Receiving side of the inbox, consumed by [`Mainloop::start`]
pub struct Inbox(Receiver<LoopMessage>);

struct Shared<S> {
    state: Mutex<S>,
    cond: Condvar,
}

/// Event loop owning the state `S` its callbacks mutate
pub struct Mainloop<S: Send + 'static> {
    shared: Arc<Shared<S>>,
    events: EventSender,
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

impl<S: Send + 'static> Mainloop<S> {
    /// Create the inbox. Backends get the sender before the loop starts.
    pub fn channel() -> (EventSender, Inbox) {
        let (tx, rx) = unbounded();
        (EventSender::new(tx), Inbox(rx))
    }

    /// Spawn the event thread
    pub fn start<H>(state: S, inbox: Inbox, events: EventSender, mut handler: H) -> Result<Self, ConnectionError>
    where
        H: FnMut(&mut S, ServerEvent) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: Mutex::new(state),
            cond: Condvar::new(),
        });
        let loop_shared = shared.clone();
        let Inbox(rx) = inbox;

        let handle = thread::Builder::new()
            .name("server-event-loop".to_string())
            .spawn(move || {
                while let Ok(msg) = rx.recv() {
                    match msg {
                        LoopMessage::Event(event) => {
                            let mut state = loop_shared.state.lock();
                            handler(&mut state, event);
                            drop(state);
                            loop_shared.cond.notify_all();
                        }
                        LoopMessage::Barrier(ack) => {
                            let _ = ack.send(());
                        }
                        LoopMessage::Shutdown => break,
                    }
                }
                tracing::debug!("event loop stopped");
            })
            .map_err(|e| ConnectionError::Failed(format!("failed to spawn event loop: {e}")))?;

        let thread_id = handle.thread().id();
        Ok(Self {
            shared,
            events,
            thread: Some(handle),
            thread_id,
        })
    }

    /// Take the loop lock
    pub fn lock(&self) -> MutexGuard<'_, S> {
        self.shared.state.lock()
    }

    /// Release the lock until the next event has been handled
    pub fn wait(&self, guard: &mut MutexGuard<'_, S>) {
        self.shared.cond.wait(guard);
    }

    /// Wake every waiter
    pub fn signal(&self) {
        self.shared.cond.notify_all();
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    pub fn is_event_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    pub fn events(&self) -> &EventSender {
        &self.events
    }

    /// Block until the inbox has been drained, including events produced
    /// while draining it. No-op on the event thread.
    pub fn settle(&self) {
        if self.is_event_thread() || self.thread.is_none() {
            return;
        }
        loop {
            let (ack_tx, ack_rx) = bounded(1);
            if !self.events.send_raw(LoopMessage::Barrier(ack_tx)) {
                return;
            }
            if ack_rx.recv().is_err() || self.events.pending() == 0 {
                return;
            }
        }
    }

    /// Stop the event thread after the events already queued
    pub fn stop(&mut self) {
        if self.is_event_thread() {
            return;
        }
        if let Some(handle) = self.thread.take() {
            self.events.send_raw(LoopMessage::Shutdown);
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }
}

impl<S: Send + 'static> Drop for Mainloop<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{OpId, StreamId};

    fn start_counter() -> Mainloop<Vec<ServerEvent>> {
        let (events, inbox) = Mainloop::<Vec<ServerEvent>>::channel();
        Mainloop::start(Vec::new(), inbox, events, |seen: &mut Vec<ServerEvent>, ev| seen.push(ev)).unwrap()
    }

    #[test]
    fn test_events_handled_in_order() {
        let ml = start_counter();
        for bytes in 1..=5 {
            ml.events().post(ServerEvent::WriteRequest {
                stream: StreamId(1),
                bytes,
            });
        }
        ml.settle();
        let seen = ml.lock();
        let sizes: Vec<usize> = seen
            .iter()
            .filter_map(|ev| match ev {
                ServerEvent::WriteRequest { bytes, .. } => Some(*bytes),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_wait_wakes_on_event() {
        let ml = Arc::new(start_counter());
        let poster = ml.clone();
        let mut guard = ml.lock();
        let handle = thread::spawn(move || {
            poster.events().post(ServerEvent::OperationComplete {
                op: OpId(7),
                success: true,
            });
        });
        while guard.is_empty() {
            ml.wait(&mut guard);
        }
        assert_eq!(
            guard[0],
            ServerEvent::OperationComplete {
                op: OpId(7),
                success: true
            }
        );
        drop(guard);
        handle.join().unwrap();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut ml = start_counter();
        assert!(ml.is_running());
        ml.stop();
        ml.stop();
        assert!(!ml.is_running());
        ml.settle();
    }
}
