//! The video playback loop and its frame-timing scheduler.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::clock::{StreamClock, SyncCoordinator};
use crate::error::{PlayerError, Result};
use crate::media::{Decoder, VideoFrame, MAX_CONSECUTIVE_DECODE_ERRORS};
use crate::perf::PerfStats;
use crate::render::{FrameRenderer, RenderBackend};
use crate::scaler::FrameScaler;
use crate::terminal::Terminal;
use crate::RenderConfig;

/// Terminal size is re-queried every this many rendered frames.
pub const RESIZE_CHECK_INTERVAL: u64 = 30;

/// Stats title refresh period, in rendered frames.
const STATS_INTERVAL: u64 = 30;

/// A frame this many intervals late drops the accumulated schedule instead
/// of rushing to catch up.
const MAX_CATCH_UP_FRAMES: u32 = 5;

/// Lifecycle of a playback loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Opening,
    Ready,
    Running,
    Seeking,
    Ended,
    Failed,
}

/// Paces rendered frames against absolute deadlines.
///
/// Each deadline is the previous one plus the interval, so time spent
/// decoding and rendering does not accumulate as drift.
#[derive(Debug)]
pub struct FrameScheduler {
    interval: Duration,
    deadline: Option<Instant>,
}

impl FrameScheduler {
    /// Interval in nanoseconds between rendered frames:
    /// `(1e9 / fps) * (1 + frames_to_skip)`.
    pub fn frame_interval_ns(fps: f64, frames_to_skip: u32) -> u64 {
        ((1e9 / fps) * (1 + frames_to_skip) as f64) as u64
    }

    pub fn new(fps: f64, frames_to_skip: u32) -> Result<Self> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(PlayerError::InvalidConfig(format!("frame rate must be positive, got {}", fps)));
        }
        let interval = Duration::from_nanos(Self::frame_interval_ns(fps, frames_to_skip));
        Ok(Self { interval, deadline: None })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Forgets the schedule; the next frame starts a new one.
    pub fn reset(&mut self) {
        self.deadline = None;
    }

    /// Advances to the next deadline and returns how long to wait for it
    /// in microseconds. Negative means the deadline has already passed.
    pub fn next_wait(&mut self, now: Instant) -> i64 {
        let deadline = self.deadline.unwrap_or(now) + self.interval;
        let wait_us = if deadline >= now {
            deadline.duration_since(now).as_micros() as i64
        } else {
            -(now.duration_since(deadline).as_micros() as i64)
        };

        let max_late = self.interval * MAX_CATCH_UP_FRAMES;
        if wait_us < 0 && now.duration_since(deadline) > max_late {
            log::debug!("{}us behind schedule, resynchronising", -wait_us);
            self.deadline = Some(now);
        } else {
            self.deadline = Some(deadline);
        }
        wait_us
    }

    /// Blocks until the next deadline, recording the wait (or lateness).
    pub fn wait(&mut self, perf: &mut PerfStats) {
        let wait_us = self.next_wait(Instant::now());
        perf.add_wait_time(wait_us);
        if wait_us > 0 {
            thread::sleep(Duration::from_micros(wait_us as u64));
        }
    }
}

/// What a finished loop reports back.
#[derive(Debug, Clone)]
pub struct PlaybackSummary {
    pub frames_decoded: u64,
    pub frames_rendered: u64,
    pub avg_frame_time_ms: f64,
    pub avg_wait_time_us: i64,
    pub backend: &'static str,
    /// Times the picture was re-fitted to the grid, the first fit included.
    pub geometry_changes: u64,
}

/// Decodes, scales and renders one video stream.
pub struct VideoPlayer<D, T> {
    decoder: D,
    terminal: T,
    frames_to_skip: u32,
    use_color: bool,
    scaler: FrameScaler,
    renderer: FrameRenderer,
    scheduler: FrameScheduler,
    clock: Arc<StreamClock>,
    sync: SyncCoordinator,
    show_stats: bool,
    state: PlaybackState,
}

impl<D, T> VideoPlayer<D, T>
where
    D: Decoder<Frame = VideoFrame>,
    T: Terminal,
{
    pub fn new(
        decoder: D,
        fps: f64,
        terminal: T,
        config: &RenderConfig,
        backend: Box<dyn RenderBackend>,
        sync: SyncCoordinator,
    ) -> Result<Self> {
        let clock = sync.video_clock().cloned().unwrap_or_else(StreamClock::new);
        let scheduler = FrameScheduler::new(fps, config.frames_to_skip)?;
        log::info!(
            "video ready: {:.3}fps, rendering every {} frame(s), {:?} per frame, {} backend",
            fps,
            config.frames_to_skip + 1,
            scheduler.interval(),
            backend.name()
        );
        Ok(Self {
            decoder,
            terminal,
            frames_to_skip: config.frames_to_skip,
            use_color: config.use_color,
            scaler: FrameScaler::new(config.force_aspect, 1, 1),
            renderer: FrameRenderer::new(backend),
            scheduler,
            clock,
            sync,
            show_stats: false,
            state: PlaybackState::Ready,
        })
    }

    /// Writes average frame time and A/V drift into the window title.
    pub fn with_stats(mut self, show_stats: bool) -> Self {
        self.show_stats = show_stats;
        self
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    fn transition(&mut self, next: PlaybackState) {
        if self.state != next {
            log::debug!("video: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Runs until end of stream, a stop request, or a fatal error.
    pub fn run(&mut self) -> Result<PlaybackSummary> {
        match self.play() {
            Ok(summary) => {
                self.transition(PlaybackState::Ended);
                Ok(summary)
            }
            Err(e) => {
                self.transition(PlaybackState::Failed);
                log::error!("video playback failed: {}", e);
                let _ = self.renderer.finish(&mut self.terminal);
                Err(e)
            }
        }
    }

    fn play(&mut self) -> Result<PlaybackSummary> {
        self.terminal.hide_cursor()?;
        self.terminal.init_color_mode(self.use_color)?;
        let size = self.terminal.get_size()?;
        self.scaler.set_terminal_size(size.width, size.height);
        self.transition(PlaybackState::Running);

        let mut decoded: u64 = 0;
        let mut since_seek: u64 = 0;
        let mut rendered: u64 = 0;
        let mut consecutive_errors: u32 = 0;

        while !self.sync.should_stop() {
            if let Some(request) = self.clock.take_seek() {
                self.transition(PlaybackState::Seeking);
                self.decoder.seek(&request)?;
                self.clock.complete_seek(&request);
                self.scheduler.reset();
                since_seek = 0;
                self.transition(PlaybackState::Running);
            }

            let frame = match self.decoder.next_frame() {
                Ok(Some(frame)) => {
                    consecutive_errors = 0;
                    frame
                }
                Ok(None) => {
                    log::info!("video: end of stream after {} frames", decoded);
                    break;
                }
                Err(e) if e.is_transient() => {
                    consecutive_errors += 1;
                    log::warn!("video: skipping frame: {}", e);
                    if consecutive_errors > MAX_CONSECUTIVE_DECODE_ERRORS {
                        return Err(e);
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            decoded += 1;
            since_seek += 1;
            if (since_seek - 1) % (self.frames_to_skip as u64 + 1) != 0 {
                continue;
            }

            self.clock.set_time(frame.pts_ms);
            let (scaled, geometry) = self.scaler.scale(&frame.image);
            self.renderer.render(scaled, geometry, &mut self.terminal)?;
            rendered += 1;

            if rendered % RESIZE_CHECK_INTERVAL == 0 {
                let size = self.terminal.get_size()?;
                if size.resized {
                    log::info!("terminal resized to {}x{}", size.width, size.height);
                    self.scaler.set_terminal_size(size.width, size.height);
                }
            }
            if self.show_stats && rendered % STATS_INTERVAL == 0 {
                self.update_stats_title()?;
            }

            self.scheduler.wait(self.renderer.perf_mut());
        }

        self.renderer.finish(&mut self.terminal)?;
        let perf = self.renderer.perf();
        Ok(PlaybackSummary {
            frames_decoded: decoded,
            frames_rendered: rendered,
            avg_frame_time_ms: perf.avg_frame_time_ms(),
            avg_wait_time_us: perf.avg_wait_time_us(),
            backend: self.renderer.backend_name(),
            geometry_changes: self.scaler.rebuilds(),
        })
    }

    fn update_stats_title(&mut self) -> Result<()> {
        let avg = self.renderer.perf().avg_frame_time_ms();
        let title = match self.sync.drift_ms() {
            Some(drift) => format!("termvideo | {:.2}ms/frame | A/V drift {:+.0}ms", avg, drift),
            None => format!("termvideo | {:.2}ms/frame", avg),
        };
        self.terminal.set_title(&title)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_accounts_for_skipped_frames() {
        assert_eq!(FrameScheduler::frame_interval_ns(25.0, 0), 40_000_000);
        assert_eq!(FrameScheduler::frame_interval_ns(25.0, 1), 80_000_000);
        assert_eq!(FrameScheduler::frame_interval_ns(50.0, 3), 80_000_000);
    }

    #[test]
    fn zero_frame_rate_is_rejected() {
        assert!(matches!(FrameScheduler::new(0.0, 0), Err(PlayerError::InvalidConfig(_))));
        assert!(FrameScheduler::new(f64::NAN, 0).is_err());
    }

    #[test]
    fn deadlines_accumulate_without_drift() {
        let mut s = FrameScheduler::new(100.0, 0).unwrap();
        let t0 = Instant::now();
        assert_eq!(s.next_wait(t0), 10_000);
        // rendering took 4ms; the next deadline is still 20ms after t0
        assert_eq!(s.next_wait(t0 + Duration::from_millis(14)), 6_000);
        assert_eq!(s.next_wait(t0 + Duration::from_millis(20)), 10_000);
    }

    #[test]
    fn lateness_is_negative() {
        let mut s = FrameScheduler::new(100.0, 0).unwrap();
        let t0 = Instant::now();
        s.next_wait(t0);
        assert_eq!(s.next_wait(t0 + Duration::from_millis(23)), -3_000);
    }

    #[test]
    fn far_behind_schedule_resynchronises() {
        let mut s = FrameScheduler::new(100.0, 0).unwrap();
        let t0 = Instant::now();
        s.next_wait(t0);
        let late = t0 + Duration::from_millis(500);
        assert!(s.next_wait(late) < 0);
        assert_eq!(s.next_wait(late), 10_000);
    }

    #[test]
    fn reset_starts_a_new_schedule() {
        let mut s = FrameScheduler::new(100.0, 0).unwrap();
        let t0 = Instant::now();
        s.next_wait(t0);
        s.reset();
        let t1 = t0 + Duration::from_millis(3);
        assert_eq!(s.next_wait(t1), 10_000);
    }
}
