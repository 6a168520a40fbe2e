//! The audio playback loop and the output device sink.
//!
//! Decoded chunks go through a bounded channel to the device callback. The
//! channel is what paces the loop: a full queue blocks the writer until the
//! device has consumed enough samples.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};

use crate::clock::{StreamClock, SyncCoordinator};
use crate::error::{PlayerError, Result};
use crate::media::{AudioChunk, Decoder, MAX_CONSECUTIVE_DECODE_ERRORS};
use crate::video::PlaybackState;

/// Chunks queued ahead of the device.
const QUEUE_CHUNKS: usize = 8;

/// A write that cannot be queued for this long means the device stopped.
const WRITE_TIMEOUT: Duration = Duration::from_secs(2);

const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Somewhere to play interleaved f32 samples in real time.
pub trait AudioSink {
    /// Queues samples, blocking while the device is behind.
    fn write(&mut self, samples: Vec<f32>) -> Result<()>;

    /// Drops everything queued but not yet played.
    fn clear(&mut self);

    /// Waits for queued samples to finish playing.
    fn drain(&mut self);

    /// Playing time of the samples written but not yet played.
    fn buffered_ms(&self) -> f64;
}

struct Chunk {
    generation: u64,
    samples: Vec<f32>,
}

/// Device-callback side of the sink queue.
struct Feeder {
    rx: Receiver<Chunk>,
    generation: Arc<AtomicU64>,
    pending: Arc<AtomicUsize>,
    current: Vec<f32>,
    current_generation: u64,
    pos: usize,
}

impl Feeder {
    /// Fills `out`, padding with silence when the queue runs dry. Samples
    /// queued before the last `clear` are discarded unplayed.
    fn fill<T: Sample + FromSample<f32>>(&mut self, out: &mut [T]) {
        let generation = self.generation.load(Ordering::Acquire);
        let mut consumed = 0;
        if self.current_generation != generation {
            consumed += self.current.len() - self.pos;
            self.current.clear();
            self.pos = 0;
        }

        for slot in out.iter_mut() {
            while self.pos >= self.current.len() {
                match self.rx.try_recv() {
                    Ok(chunk) if chunk.generation >= generation => {
                        self.current = chunk.samples;
                        self.current_generation = chunk.generation;
                        self.pos = 0;
                    }
                    Ok(chunk) => consumed += chunk.samples.len(),
                    Err(_) => break,
                }
            }
            let sample = match self.current.get(self.pos) {
                Some(&s) => {
                    self.pos += 1;
                    consumed += 1;
                    s
                }
                None => 0.0,
            };
            *slot = T::from_sample(sample);
        }

        if consumed > 0 {
            self.pending.fetch_sub(consumed, Ordering::AcqRel);
        }
    }
}

/// Producer side of the sink queue, shared by every device sample format.
struct SinkQueue {
    tx: Sender<Chunk>,
    /// Second handle on the queue, used to throw away stale chunks on clear.
    rx: Receiver<Chunk>,
    generation: Arc<AtomicU64>,
    pending: Arc<AtomicUsize>,
    samples_per_ms: f64,
}

impl SinkQueue {
    fn new(sample_rate: u32, channels: u16) -> (Self, Feeder) {
        let (tx, rx) = bounded(QUEUE_CHUNKS);
        let generation = Arc::new(AtomicU64::new(0));
        let pending = Arc::new(AtomicUsize::new(0));
        let feeder = Feeder {
            rx: rx.clone(),
            generation: generation.clone(),
            pending: pending.clone(),
            current: Vec::new(),
            current_generation: 0,
            pos: 0,
        };
        let samples_per_ms = (sample_rate as f64 * channels as f64 / 1000.0).max(f64::MIN_POSITIVE);
        (Self { tx, rx, generation, pending, samples_per_ms }, feeder)
    }

    fn push(&self, samples: Vec<f32>) -> Result<()> {
        let len = samples.len();
        self.pending.fetch_add(len, Ordering::AcqRel);
        let chunk = Chunk { generation: self.generation.load(Ordering::Acquire), samples };
        self.tx.send_timeout(chunk, WRITE_TIMEOUT).map_err(|e| {
            self.pending.fetch_sub(len, Ordering::AcqRel);
            match e {
                SendTimeoutError::Timeout(_) => {
                    PlayerError::DeviceStartFailure("audio device stopped consuming samples".into())
                }
                SendTimeoutError::Disconnected(_) => PlayerError::DeviceStartFailure("audio stream closed".into()),
            }
        })
    }

    fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

impl AudioSink for SinkQueue {
    fn write(&mut self, samples: Vec<f32>) -> Result<()> {
        self.push(samples)
    }

    /// The chunk the device is partway through is dropped by the feeder on
    /// its next callback.
    fn clear(&mut self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        while let Ok(chunk) = self.rx.try_recv() {
            self.pending.fetch_sub(chunk.samples.len(), Ordering::AcqRel);
        }
    }

    fn drain(&mut self) {
        let started = Instant::now();
        while self.pending() > 0 && started.elapsed() < DRAIN_TIMEOUT {
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn buffered_ms(&self) -> f64 {
        self.pending() as f64 / self.samples_per_ms
    }
}

/// [`AudioSink`] on the default output device.
///
/// `cpal::Stream` is not `Send` on every platform, so the sink must be
/// created on the thread that plays it.
pub struct CpalSink {
    _stream: Stream,
    queue: SinkQueue,
    sample_rate: u32,
    channels: u16,
}

fn build_stream<T>(device: &cpal::Device, config: &StreamConfig, mut feeder: Feeder) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| feeder.fill(data),
            |err| log::error!("audio output error: {}", err),
            None,
        )
        .map_err(|e| PlayerError::DeviceOpenFailure(e.to_string()))
}

impl CpalSink {
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::DeviceOpenFailure("no audio output device found".into()))?;
        let device_name = device.description().map(|d| d.name().to_string()).unwrap_or_else(|_| "Unknown".into());

        let supported = device.default_output_config().map_err(|e| PlayerError::DeviceOpenFailure(e.to_string()))?;
        let sample_rate = supported.sample_rate();
        let channels = supported.channels();
        let format = supported.sample_format();
        log::info!("audio output device: {} ({}Hz, {}ch, {:?})", device_name, sample_rate, channels, format);

        let config: StreamConfig = supported.config();
        let (queue, feeder) = SinkQueue::new(sample_rate, channels);
        let stream = match format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, feeder)?,
            SampleFormat::I16 => build_stream::<i16>(&device, &config, feeder)?,
            SampleFormat::U16 => build_stream::<u16>(&device, &config, feeder)?,
            other => {
                return Err(PlayerError::DeviceOpenFailure(format!("unsupported sample format {:?}", other)));
            }
        };
        stream.play().map_err(|e| PlayerError::DeviceStartFailure(e.to_string()))?;

        Ok(Self { _stream: stream, queue, sample_rate, channels })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

impl AudioSink for CpalSink {
    fn write(&mut self, samples: Vec<f32>) -> Result<()> {
        self.queue.write(samples)
    }

    fn clear(&mut self) {
        self.queue.clear();
    }

    fn drain(&mut self) {
        self.queue.drain();
    }

    fn buffered_ms(&self) -> f64 {
        self.queue.buffered_ms()
    }
}

#[derive(Debug, Clone)]
pub struct AudioSummary {
    pub chunks_played: u64,
    pub chunks_skipped: u64,
}

/// Decodes one audio stream into a sink.
pub struct AudioPlayer<D, S> {
    decoder: D,
    sink: S,
    clock: Arc<StreamClock>,
    sync: SyncCoordinator,
    state: PlaybackState,
    /// Target of the last seek; the clock never reports earlier than this.
    seek_floor_ms: f64,
}

impl<D, S> AudioPlayer<D, S>
where
    D: Decoder<Frame = AudioChunk>,
    S: AudioSink,
{
    pub fn new(decoder: D, sink: S, sync: SyncCoordinator) -> Self {
        let clock = sync.audio_clock().cloned().unwrap_or_else(StreamClock::new);
        Self { decoder, sink, clock, sync, state: PlaybackState::Ready, seek_floor_ms: 0.0 }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    fn transition(&mut self, next: PlaybackState) {
        if self.state != next {
            log::debug!("audio: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    pub fn run(&mut self) -> Result<AudioSummary> {
        match self.play() {
            Ok(summary) => {
                self.transition(PlaybackState::Ended);
                Ok(summary)
            }
            Err(e) => {
                self.transition(PlaybackState::Failed);
                log::error!("audio playback failed: {}", e);
                Err(e)
            }
        }
    }

    fn play(&mut self) -> Result<AudioSummary> {
        self.transition(PlaybackState::Running);
        let mut played = 0;
        let mut skipped = 0;
        let mut consecutive_errors = 0;

        while !self.sync.should_stop() {
            if let Some(request) = self.clock.take_seek() {
                self.transition(PlaybackState::Seeking);
                self.decoder.seek(&request)?;
                self.sink.clear();
                self.clock.complete_seek(&request);
                self.seek_floor_ms = request.target_ms;
                self.transition(PlaybackState::Running);
            }

            let chunk = match self.decoder.next_frame() {
                Ok(Some(chunk)) => {
                    consecutive_errors = 0;
                    chunk
                }
                Ok(None) => {
                    log::info!("audio: end of stream after {} chunks", played);
                    self.sink.drain();
                    break;
                }
                Err(e) if e.is_transient() => {
                    consecutive_errors += 1;
                    skipped += 1;
                    log::warn!("audio: skipping chunk: {}", e);
                    if consecutive_errors > MAX_CONSECUTIVE_DECODE_ERRORS {
                        return Err(e);
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.play_chunk(chunk)?;
            played += 1;
        }

        Ok(AudioSummary { chunks_played: played, chunks_skipped: skipped })
    }

    /// Queues `chunk` and publishes the position the device is playing,
    /// which trails the end of the chunk by whatever is still buffered.
    fn play_chunk(&mut self, chunk: AudioChunk) -> Result<()> {
        let end_ms = chunk.pts_ms + chunk.duration_ms;
        self.sink.write(chunk.samples)?;
        let playing_ms = (end_ms - self.sink.buffered_ms()).max(self.seek_floor_ms);
        self.clock.set_time(playing_ms);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feeder_plays_queued_samples_then_silence() {
        let (queue, mut feeder) = SinkQueue::new(1000, 1);
        queue.push(vec![0.5, -0.5, 0.25]).unwrap();
        let mut out = [1.0f32; 5];
        feeder.fill(&mut out);
        assert_eq!(out, [0.5, -0.5, 0.25, 0.0, 0.0]);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn chunks_span_callbacks() {
        let (queue, mut feeder) = SinkQueue::new(1000, 1);
        queue.push(vec![1.0, 2.0, 3.0]).unwrap();
        queue.push(vec![4.0]).unwrap();
        let mut out = [0.0f32; 2];
        feeder.fill(&mut out);
        assert_eq!(out, [1.0, 2.0]);
        assert_eq!(queue.pending(), 2);
        feeder.fill(&mut out);
        assert_eq!(out, [3.0, 4.0]);
    }

    #[test]
    fn clear_discards_stale_samples() {
        let (mut queue, mut feeder) = SinkQueue::new(1000, 1);
        queue.push(vec![1.0, 1.0, 1.0, 1.0]).unwrap();
        let mut out = [0.0f32; 1];
        feeder.fill(&mut out);
        queue.clear();
        queue.push(vec![9.0]).unwrap();
        let mut out = [0.0f32; 3];
        feeder.fill(&mut out);
        assert_eq!(out, [9.0, 0.0, 0.0]);
        assert_eq!(queue.pending(), 0);
    }

    /// Decoder with nothing in it; the tests below feed chunks directly.
    struct Silence;

    impl Decoder for Silence {
        type Frame = AudioChunk;

        fn next_frame(&mut self) -> Result<Option<AudioChunk>> {
            Ok(None)
        }

        fn seek(&mut self, _request: &crate::clock::SeekRequest) -> Result<()> {
            Ok(())
        }
    }

    /// 20ms of mono audio at 1kHz.
    fn chunk(index: u32) -> AudioChunk {
        AudioChunk { pts_ms: index as f64 * 20.0, duration_ms: 20.0, samples: vec![0.1; 20] }
    }

    #[test]
    fn clock_follows_played_samples_not_queued_ones() {
        let (queue, mut feeder) = SinkQueue::new(1000, 1);
        let sync = SyncCoordinator::new(5000).with_audio(StreamClock::new());
        let mut player = AudioPlayer::new(Silence, queue, sync.clone());
        let clock = sync.audio_clock().unwrap().clone();

        for i in 0..4 {
            player.play_chunk(chunk(i)).unwrap();
        }
        assert_eq!(clock.time_ms(), 0.0);
        sync.seek(false);
        assert_eq!(clock.take_seek().unwrap().target_ms, 5000.0);

        let mut out = [0.0f32; 30];
        feeder.fill(&mut out);
        player.play_chunk(chunk(4)).unwrap();
        assert!((clock.time_ms() - 30.0).abs() < 1e-9);
    }

    #[test]
    fn clear_forgets_queued_time() {
        let (mut queue, _feeder) = SinkQueue::new(1000, 2);
        queue.write(vec![0.0; 80]).unwrap();
        assert_eq!(queue.buffered_ms(), 40.0);
        queue.clear();
        assert_eq!(queue.buffered_ms(), 0.0);
    }

    #[test]
    fn integer_formats_are_converted() {
        let (queue, mut feeder) = SinkQueue::new(1000, 1);
        queue.push(vec![0.0, 1.0]).unwrap();
        let mut out = [7i16; 3];
        feeder.fill(&mut out);
        assert_eq!(out[0], 0);
        assert!(out[1] > 32_000);
        assert_eq!(out[2], 0);
    }
}
