//! Device output stream
//!
//! A cpal stream cannot leave the thread that built it, so every stream
//! gets a dedicated thread that builds it, plays it, and keeps it alive
//! until stopped. The real-time callback pulls samples from the shared
//! queue and tells the event loop how much room it freed.

use cpal::traits::{DeviceTrait, StreamTrait};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::SampleQueue;
use crate::error::AudioError;
use crate::format::SampleSpec;
use crate::server::{EventSender, OpId, ServerEvent, StreamId, StreamState};

/// Parameters of one device stream
#[derive(Debug, Clone, Copy)]
pub struct StreamParams {
    pub id: StreamId,
    pub sink_input: u32,
    pub spec: SampleSpec,
    /// Bytes of audio the stream keeps queued
    pub target_bytes: usize,
    /// Smallest request worth sending
    pub min_request: usize,
}

/// State shared between the backend and the device callback
pub struct StreamShared {
    pub queue: SampleQueue,
    pub corked: AtomicBool,
    /// Linear gain as `f32` bits
    gain: AtomicU32,
    /// Bytes requested from the writer and not yet written
    outstanding: AtomicUsize,
    /// Pending drain, 0 for none
    drain_op: AtomicU64,
    /// Completes the drain once `samples_played` reaches it
    drain_target: AtomicU64,
    samples_played: AtomicU64,
    params: StreamParams,
}

impl StreamShared {
    pub fn new(params: StreamParams, corked: bool) -> Self {
        let frame = params.spec.frame_size().max(1);
        let samples = params.target_bytes / frame * params.spec.channels as usize;
        Self {
            queue: SampleQueue::new(samples),
            corked: AtomicBool::new(corked),
            gain: AtomicU32::new(1.0f32.to_bits()),
            outstanding: AtomicUsize::new(0),
            drain_op: AtomicU64::new(0),
            drain_target: AtomicU64::new(0),
            samples_played: AtomicU64::new(0),
            params,
        }
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain.to_bits(), Ordering::Relaxed);
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    /// Bytes that fit in the queue right now
    pub fn writable_bytes(&self) -> usize {
        let channels = self.params.spec.channels.max(1) as usize;
        self.queue.free() / channels * self.params.spec.frame_size()
    }

    /// Account for bytes the writer delivered
    pub fn written(&self, bytes: usize) {
        let _ = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| Some(v.saturating_sub(bytes)));
    }

    /// Complete `op` once everything queued now has been played
    pub fn drain_after_queued(&self, op: OpId) {
        let target = self.samples_played.load(Ordering::Acquire) + self.queue.len() as u64;
        self.drain_target.store(target, Ordering::Release);
        self.drain_op.store(op.0, Ordering::Release);
    }

    /// Ask the writer for more data when enough room has opened up. Never
    /// blocks.
    pub fn request_more(&self, events: &EventSender) {
        let free = self.writable_bytes();
        let outstanding = self.outstanding.load(Ordering::Acquire);
        let want = free.saturating_sub(outstanding);
        if want < self.params.min_request {
            return;
        }
        self.outstanding.fetch_add(want, Ordering::AcqRel);
        let posted = events.try_post(ServerEvent::WriteRequest {
            stream: self.params.id,
            bytes: want,
        });
        if !posted {
            self.written(want);
        }
    }

    /// Bookkeeping at the end of a device period: `played` of `wanted`
    /// samples came from the queue
    fn end_period(&self, played: usize, wanted: usize, events: &EventSender) {
        if played < wanted {
            self.queue.record_underrun();
        }
        self.samples_played.fetch_add(played as u64, Ordering::AcqRel);
        self.request_more(events);
        self.complete_drain(events);
    }

    fn complete_drain(&self, events: &EventSender) {
        let op = self.drain_op.load(Ordering::Acquire);
        if op == 0 || self.samples_played.load(Ordering::Acquire) < self.drain_target.load(Ordering::Acquire) {
            return;
        }
        if self
            .drain_op
            .compare_exchange(op, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            events.try_post(ServerEvent::OperationComplete {
                op: OpId(op),
                success: true,
            });
        }
    }
}

/// Running device stream and its thread
pub struct DeviceStream {
    shared: Arc<StreamShared>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl DeviceStream {
    /// Spawn the stream thread. Readiness or failure is reported through
    /// `events` as a stream state change.
    pub fn start(
        device: cpal::Device,
        shared: Arc<StreamShared>,
        events: EventSender,
        last_error: Arc<Mutex<String>>,
    ) -> Result<Self, AudioError> {
        let params = shared.params;
        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();
        let shared_cb = shared.clone();

        let handle = thread::Builder::new()
            .name(format!("output-stream-{}", params.id.0))
            .spawn(move || {
                let config = cpal::StreamConfig {
                    channels: params.spec.channels as u16,
                    sample_rate: cpal::SampleRate(params.spec.rate),
                    buffer_size: cpal::BufferSize::Default,
                };

                let stream = device
                    .default_output_config()
                    .map_err(|e| AudioError::StreamError(e.to_string()))
                    .and_then(|default| build_output_stream(&device, &config, default.sample_format(), &shared_cb, &events, &last_error))
                    .and_then(|stream| {
                        stream.play().map_err(|e| AudioError::StreamError(e.to_string()))?;
                        Ok(stream)
                    });

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to open output stream");
                        *last_error.lock() = e.to_string();
                        events.post(ServerEvent::StreamState {
                            stream: params.id,
                            state: StreamState::Failed,
                            sink_input: None,
                        });
                        return;
                    }
                };

                tracing::info!(
                    stream = ?params.id,
                    rate = params.spec.rate,
                    channels = params.spec.channels,
                    "device stream playing"
                );
                events.post(ServerEvent::StreamState {
                    stream: params.id,
                    state: StreamState::Ready,
                    sink_input: Some(params.sink_input),
                });

                // keep the stream alive until stopped
                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                drop(stream);
            })
            .map_err(|e| AudioError::Thread(e.to_string()))?;

        Ok(Self {
            shared,
            running,
            thread_handle: Some(handle),
        })
    }

    pub fn shared(&self) -> &Arc<StreamShared> {
        &self.shared
    }

    /// Stop the device stream and join its thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DeviceStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    shared: &Arc<StreamShared>,
    events: &EventSender,
    last_error: &Arc<Mutex<String>>,
) -> Result<cpal::Stream, AudioError> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, shared, events, last_error),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, shared, events, last_error),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, shared, events, last_error),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, shared, events, last_error),
        other => Err(AudioError::UnsupportedFormat(format!("{other:?}"))),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: &Arc<StreamShared>,
    events: &EventSender,
    last_error: &Arc<Mutex<String>>,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let shared_cb = shared.clone();
    let events_cb = events.clone();
    let events_err = events.clone();
    let last_error = last_error.clone();
    let id = shared.params.id;

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
                if shared_cb.corked.load(Ordering::Relaxed) {
                    data.fill(silence);
                    return;
                }

                let gain = shared_cb.gain();
                let mut played = 0usize;
                for out in data.iter_mut() {
                    match shared_cb.queue.try_pop() {
                        Some(sample) => {
                            *out = <T as cpal::Sample>::from_sample::<f32>(sample * gain);
                            played += 1;
                        }
                        None => *out = silence,
                    }
                }
                shared_cb.end_period(played, data.len(), &events_cb);
            },
            move |err| {
                tracing::warn!("stream error: {err}");
                *last_error.lock() = err.to_string();
                events_err.try_post(ServerEvent::StreamState {
                    stream: id,
                    state: StreamState::Failed,
                    sink_input: None,
                });
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SampleEncoding;
    use crate::server::Mainloop;

    fn shared() -> StreamShared {
        let spec = SampleSpec {
            encoding: SampleEncoding::S16Le,
            rate: 48_000,
            channels: 2,
        };
        StreamShared::new(
            StreamParams {
                id: StreamId(1),
                sink_input: 0,
                spec,
                target_bytes: 400,
                min_request: 40,
            },
            false,
        )
    }

    #[test]
    fn test_requests_account_for_outstanding() {
        let shared = shared();
        let (events, _inbox) = Mainloop::<()>::channel();
        assert_eq!(shared.writable_bytes(), 400);

        shared.request_more(&events);
        assert_eq!(events.pending(), 1);
        // everything free is already requested
        shared.request_more(&events);
        assert_eq!(events.pending(), 1);

        shared.written(400);
        shared.queue.push_samples(&[0.0; 180]);
        assert_eq!(shared.writable_bytes(), 40);
        shared.request_more(&events);
        assert_eq!(events.pending(), 2);
    }

    #[test]
    fn test_drain_completes_after_queued_audio() {
        let shared = shared();
        let (events, _inbox) = Mainloop::<()>::channel();
        shared.request_more(&events);
        assert_eq!(events.pending(), 1);

        shared.queue.push_samples(&[0.5; 4]);
        shared.written(8);
        shared.drain_after_queued(OpId(9));

        shared.end_period(0, 4, &events);
        assert_eq!(events.pending(), 1);
        assert_eq!(shared.queue.underrun_count(), 1);

        while shared.queue.try_pop().is_some() {}
        shared.end_period(4, 4, &events);
        assert_eq!(events.pending(), 2);

        // completes once
        shared.end_period(0, 0, &events);
        assert_eq!(events.pending(), 2);
        assert_eq!(shared.queue.underrun_count(), 1);
    }

    #[test]
    fn test_gain_bits() {
        let shared = shared();
        assert_eq!(shared.gain(), 1.0);
        shared.set_gain(0.125);
        assert_eq!(shared.gain(), 0.125);
    }
}
