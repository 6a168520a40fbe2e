//! Opens a media file and runs the video loop, audio loop and key listener
//! against one shared [`SyncCoordinator`].

use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};

use crate::audio::{AudioPlayer, AudioSummary, CpalSink};
use crate::clock::{StreamClock, SyncCoordinator};
use crate::error::PlayerError;
use crate::input;
use crate::media::{AudioStreamInfo, FfmpegAudioDecoder, FfmpegVideoDecoder, MediaInfo};
use crate::render::select_backend;
use crate::terminal::Terminal;
use crate::video::{PlaybackState, PlaybackSummary, VideoPlayer};
use crate::{AppConfig, PlayerOptions, RenderConfig};

/// Audio thread that has opened its device and decoder and is waiting for
/// the go signal.
struct AudioThread {
    start: mpsc::Sender<()>,
    handle: JoinHandle<Option<AudioSummary>>,
}

/// Everything [`MediaPlayer::play`] ran, for the end-of-playback report.
#[derive(Debug, Clone)]
pub struct PlaybackReport {
    pub video: PlaybackSummary,
    pub audio: Option<AudioSummary>,
}

/// A media file opened for playback.
///
/// All decoders and the audio device are set up by [`MediaPlayer::open`],
/// so failures surface before the terminal is taken over.
pub struct MediaPlayer {
    options: PlayerOptions,
    render: RenderConfig,
    info: MediaInfo,
    video: FfmpegVideoDecoder,
    audio: Option<AudioThread>,
    sync: SyncCoordinator,
}

fn start_audio(
    ffmpeg: &str,
    info: &MediaInfo,
    stream: &AudioStreamInfo,
    sync: SyncCoordinator,
) -> Result<AudioThread> {
    let (ready_tx, ready_rx) = mpsc::channel::<Result<(), PlayerError>>();
    let (start_tx, start_rx) = mpsc::channel::<()>();
    let ffmpeg = ffmpeg.to_string();
    let info = info.clone();
    let stream = stream.clone();

    let handle = thread::Builder::new()
        .name("audio".into())
        .spawn(move || {
            let setup = CpalSink::open().and_then(|sink| {
                let decoder = FfmpegAudioDecoder::open(&ffmpeg, &info, &stream, sink.sample_rate(), sink.channels())?;
                Ok((sink, decoder))
            });
            let (sink, decoder) = match setup {
                Ok(parts) => {
                    let _ = ready_tx.send(Ok(()));
                    parts
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return None;
                }
            };
            // A dropped sender means setup failed elsewhere; exit without playing.
            if start_rx.recv().is_err() {
                return None;
            }
            let mut player = AudioPlayer::new(decoder, sink, sync);
            player.run().ok()
        })
        .context("spawning audio thread")?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(AudioThread { start: start_tx, handle }),
        Ok(Err(e)) => {
            let _ = handle.join();
            Err(anyhow::Error::new(e).context("setting up audio (use --no-audio to play without sound)"))
        }
        Err(_) => {
            let _ = handle.join();
            Err(anyhow!("audio thread exited during setup"))
        }
    }
}

impl MediaPlayer {
    pub fn open(config: &AppConfig, render: RenderConfig, options: PlayerOptions) -> Result<Self> {
        log::debug!("{:?}: {}", PlaybackState::Opening, options.input.display());
        let info = MediaInfo::probe(&config.ffprobe, &options.input)
            .with_context(|| format!("opening {}", options.input.display()))?;
        log::info!(
            "{}: {} video / {} audio stream(s), {:.1}s",
            options.input.display(),
            info.video.len(),
            info.audio.len(),
            info.duration_secs
        );

        let video_stream = info.best_video()?.clone();
        let video = FfmpegVideoDecoder::open(&config.ffmpeg, &info, &video_stream, options.decode_width)
            .context("opening video decoder")?;

        let mut sync = SyncCoordinator::new(options.seek_step_ms).with_video(StreamClock::new());

        let audio = if !options.audio {
            None
        } else {
            match info.audio_stream(options.audio_language.as_deref()) {
                Ok(stream) => {
                    sync = sync.with_audio(StreamClock::new());
                    Some(start_audio(&config.ffmpeg, &info, stream, sync.clone())?)
                }
                Err(PlayerError::StreamNotFound(_)) => {
                    log::warn!("{} has no audio stream, playing video only", options.input.display());
                    None
                }
                Err(e) => return Err(e.into()),
            }
        };

        Ok(Self { options, render, info, video, audio, sync })
    }

    pub fn info(&self) -> &MediaInfo {
        &self.info
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.sync
    }

    /// Plays to the end (or until quit) on `terminal`, blocking the caller.
    pub fn play<T>(self, terminal: T) -> Result<PlaybackReport>
    where
        T: Terminal + 'static,
    {
        let Self { options, render, video, audio, sync, .. } = self;
        let caps = terminal.capabilities();
        let backend = select_backend(&render, &caps, options.double_buffer);
        let fps = video.fps();
        let mut video_player =
            VideoPlayer::new(video, fps, terminal, &render, backend, sync.clone())?.with_stats(options.show_stats);

        let listener = input::spawn_listener(sync.clone()).context("spawning input listener")?;
        let audio_handle = audio.map(|audio| {
            let _ = audio.start.send(());
            audio.handle
        });

        let video_handle = thread::Builder::new()
            .name("video".into())
            .spawn(move || video_player.run())
            .context("spawning video thread")?;

        let video_result = video_handle.join().map_err(|_| anyhow!("video thread panicked"));
        if !matches!(video_result, Ok(Ok(_))) {
            sync.request_stop();
        }

        let audio_summary = match audio_handle {
            Some(handle) => handle.join().map_err(|_| anyhow!("audio thread panicked"))?,
            None => None,
        };
        sync.mark_finished();
        let _ = listener.join();

        let video_summary = video_result??;
        log::info!(
            "played {} of {} decoded frames with the {} backend",
            video_summary.frames_rendered,
            video_summary.frames_decoded,
            video_summary.backend
        );
        Ok(PlaybackReport { video: video_summary, audio: audio_summary })
    }
}
