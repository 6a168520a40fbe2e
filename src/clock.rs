//! Per-stream presentation clocks and the seek coordinator.
//!
//! Each playback loop owns its decoder outright; the only state shared
//! between loops is a [`StreamClock`] per stream. The clock's lock is held
//! for a field read or write, never across decoding or device I/O.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekDirection {
    Forward,
    Backward,
}

/// An absolute reposition request for one stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekRequest {
    pub target_ms: f64,
    pub direction: SeekDirection,
}

impl SeekRequest {
    pub fn new(target_ms: f64, direction: SeekDirection) -> Self {
        Self { target_ms: target_ms.max(0.0), direction }
    }
}

#[derive(Debug, Default)]
struct ClockState {
    time_ms: f64,
    pending_seek: Option<SeekRequest>,
}

/// Presentation time of one stream plus its seek mailbox.
#[derive(Debug, Default)]
pub struct StreamClock {
    state: Mutex<ClockState>,
}

impl StreamClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn time_ms(&self) -> f64 {
        self.state.lock().time_ms
    }

    pub fn set_time(&self, time_ms: f64) {
        self.state.lock().time_ms = time_ms;
    }

    /// Posts a request, replacing one that has not been serviced yet.
    pub fn post_seek(&self, request: SeekRequest) {
        self.state.lock().pending_seek = Some(request);
    }

    /// Takes the pending request, if any. The owning loop calls this at the
    /// top of each iteration.
    pub fn take_seek(&self) -> Option<SeekRequest> {
        self.state.lock().pending_seek.take()
    }

    pub fn has_pending_seek(&self) -> bool {
        self.state.lock().pending_seek.is_some()
    }

    /// Resets the clock to a serviced request's target.
    pub fn complete_seek(&self, request: &SeekRequest) {
        self.state.lock().time_ms = request.target_ms;
    }
}

/// Shared handle the input listener and the loops use to coordinate.
///
/// Seeks are posted to each stream independently; each loop applies its
/// own at the start of its next iteration.
#[derive(Debug, Clone)]
pub struct SyncCoordinator {
    video: Option<Arc<StreamClock>>,
    audio: Option<Arc<StreamClock>>,
    seek_step_ms: f64,
    stop: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl SyncCoordinator {
    pub fn new(seek_step_ms: u64) -> Self {
        Self {
            video: None,
            audio: None,
            seek_step_ms: seek_step_ms as f64,
            stop: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_video(mut self, clock: Arc<StreamClock>) -> Self {
        self.video = Some(clock);
        self
    }

    pub fn with_audio(mut self, clock: Arc<StreamClock>) -> Self {
        self.audio = Some(clock);
        self
    }

    pub fn video_clock(&self) -> Option<&Arc<StreamClock>> {
        self.video.as_ref()
    }

    pub fn audio_clock(&self) -> Option<&Arc<StreamClock>> {
        self.audio.as_ref()
    }

    pub fn seek_step_ms(&self) -> f64 {
        self.seek_step_ms
    }

    /// Posts `current ± delta_ms` to every attached stream, each computed
    /// from that stream's own clock and clamped at zero.
    pub fn request_seek(&self, delta_ms: f64, direction: SeekDirection) {
        let signed = match direction {
            SeekDirection::Forward => delta_ms,
            SeekDirection::Backward => -delta_ms,
        };
        for (name, clock) in [("video", &self.video), ("audio", &self.audio)] {
            if let Some(clock) = clock {
                let request = SeekRequest::new(clock.time_ms() + signed, direction);
                log::debug!("{} seek {:?} to {:.0}ms", name, direction, request.target_ms);
                clock.post_seek(request);
            }
        }
    }

    /// One seek step forward, or backward when `backward` is set.
    pub fn seek(&self, backward: bool) {
        let direction = if backward { SeekDirection::Backward } else { SeekDirection::Forward };
        self.request_seek(self.seek_step_ms, direction);
    }

    /// Video clock minus audio clock, when both streams are playing.
    pub fn drift_ms(&self) -> Option<f64> {
        match (&self.video, &self.audio) {
            (Some(v), Some(a)) => Some(v.time_ms() - a.time_ms()),
            _ => None,
        }
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Set by the supervisor once both loops have returned.
    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator_at(video_ms: f64, audio_ms: f64) -> SyncCoordinator {
        let video = StreamClock::new();
        let audio = StreamClock::new();
        video.set_time(video_ms);
        audio.set_time(audio_ms);
        SyncCoordinator::new(5000).with_video(video).with_audio(audio)
    }

    #[test]
    fn backward_seek_clamps_at_zero() {
        let sync = coordinator_at(2000.0, 2000.0);
        sync.seek(true);
        let req = sync.video_clock().unwrap().take_seek().unwrap();
        assert_eq!(req.target_ms, 0.0);
        assert_eq!(req.direction, SeekDirection::Backward);
    }

    #[test]
    fn each_stream_seeks_from_its_own_clock() {
        let sync = coordinator_at(10_000.0, 9_960.0);
        sync.seek(false);
        assert_eq!(sync.video_clock().unwrap().take_seek().unwrap().target_ms, 15_000.0);
        assert_eq!(sync.audio_clock().unwrap().take_seek().unwrap().target_ms, 14_960.0);
    }

    #[test]
    fn take_clears_the_mailbox() {
        let clock = StreamClock::new();
        clock.post_seek(SeekRequest::new(100.0, SeekDirection::Forward));
        assert!(clock.has_pending_seek());
        assert!(clock.take_seek().is_some());
        assert!(clock.take_seek().is_none());
    }

    #[test]
    fn later_request_replaces_unserviced_one() {
        let sync = coordinator_at(0.0, 0.0);
        sync.seek(false);
        sync.request_seek(1000.0, SeekDirection::Forward);
        let req = sync.video_clock().unwrap().take_seek().unwrap();
        assert_eq!(req.target_ms, 1000.0);
    }

    #[test]
    fn completing_a_seek_resets_the_clock() {
        let clock = StreamClock::new();
        clock.set_time(42_000.0);
        let req = SeekRequest::new(7_000.0, SeekDirection::Backward);
        clock.complete_seek(&req);
        assert_eq!(clock.time_ms(), 7_000.0);
    }

    #[test]
    fn drift_needs_both_streams() {
        assert_eq!(coordinator_at(1040.0, 1000.0).drift_ms(), Some(40.0));
        let video_only = SyncCoordinator::new(5000).with_video(StreamClock::new());
        assert_eq!(video_only.drift_ms(), None);
        video_only.seek(true);
    }

    #[test]
    fn stop_flag_is_shared_between_clones() {
        let sync = SyncCoordinator::new(5000);
        let other = sync.clone();
        other.request_stop();
        assert!(sync.should_stop());
        assert!(!sync.is_finished());
    }
}
