//! Stream discovery and decoding through `ffprobe` / `ffmpeg` subprocesses.
//!
//! `ffprobe` describes the container once at open time. Each playing stream
//! then gets its own `ffmpeg` child writing raw samples to a pipe; the child
//! is owned by a [`MediaHandle`] and restarted with input seeking to
//! reposition the stream.

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use image::RgbImage;
use parking_lot::Mutex;
use serde_json::Value;

use crate::clock::SeekRequest;
use crate::error::{PlayerError, Result};

/// Consecutive transient decode errors after which a stream is considered
/// broken rather than merely glitchy.
pub const MAX_CONSECUTIVE_DECODE_ERRORS: u32 = 32;

/// Last lines of `ffmpeg`'s diagnostics kept for the exit error.
const STDERR_TAIL_LINES: usize = 16;

/// Audio is delivered in chunks of this many milliseconds.
const AUDIO_CHUNK_MS: u32 = 20;

/// Source of timestamped frames for one elementary stream.
///
/// `Ok(None)` is end-of-stream. A [`PlayerError::PacketDecodeError`] means
/// only the current frame was lost.
pub trait Decoder: Send {
    type Frame;

    fn next_frame(&mut self) -> Result<Option<Self::Frame>>;

    /// Repositions the stream; the next frame starts at the target and no
    /// frame decoded before the seek is returned afterwards.
    fn seek(&mut self, request: &SeekRequest) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub pts_ms: f64,
    pub image: RgbImage,
}

/// Interleaved f32 samples at the output device's rate and channel count.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub pts_ms: f64,
    /// Playing time of `samples`.
    pub duration_ms: f64,
    pub samples: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoStreamInfo {
    /// Position among the file's video streams (`0:v:N`).
    pub index: usize,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioStreamInfo {
    /// Position among the file's audio streams (`0:a:N`).
    pub index: usize,
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub language: Option<String>,
}

/// What `ffprobe` reported about a file.
#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub path: PathBuf,
    pub video: Vec<VideoStreamInfo>,
    pub audio: Vec<AudioStreamInfo>,
    pub duration_secs: f64,
}

/// Parses `"30000/1001"` or `"25"` style rates. Zero or malformed rates
/// give `None`.
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let n: f64 = num.trim().parse().ok()?;
            let d: f64 = den.trim().parse().ok()?;
            if d == 0.0 {
                return None;
            }
            n / d
        }
        None => rate.trim().parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

fn codec_of(stream: &Value, kind: &'static str) -> Result<String> {
    match stream["codec_name"].as_str() {
        Some(name) if !name.is_empty() && name != "none" => Ok(name.to_string()),
        _ => Err(PlayerError::DecoderUnavailable {
            kind,
            codec: stream["codec_tag_string"].as_str().unwrap_or("unknown").to_string(),
        }),
    }
}

impl MediaInfo {
    /// Runs `ffprobe` on `path`.
    pub fn probe(ffprobe: &str, path: &Path) -> Result<Self> {
        let open_failure = |reason: String| PlayerError::OpenFailure { path: path.display().to_string(), reason };
        if !path.exists() {
            return Err(open_failure("file does not exist".into()));
        }

        let output = Command::new(ffprobe)
            .args(["-v", "error", "-print_format", "json", "-show_streams", "-show_format"])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| open_failure(format!("failed to run {}: {}", ffprobe, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(open_failure(stderr.trim().to_string()));
        }
        Self::from_ffprobe_json(path, &output.stdout)
    }

    pub fn from_ffprobe_json(path: &Path, json: &[u8]) -> Result<Self> {
        let json: Value = serde_json::from_slice(json).map_err(|e| PlayerError::OpenFailure {
            path: path.display().to_string(),
            reason: format!("unreadable ffprobe output: {}", e),
        })?;

        let mut video = Vec::new();
        let mut audio = Vec::new();
        let mut video_seen = 0;
        let mut audio_seen = 0;
        let mut video_error = None;

        for stream in json["streams"].as_array().map(Vec::as_slice).unwrap_or_default() {
            match stream["codec_type"].as_str() {
                Some("video") => {
                    let index = video_seen;
                    video_seen += 1;
                    // Embedded cover art shows up as a one-frame video stream.
                    if stream["disposition"]["attached_pic"].as_u64() == Some(1) {
                        continue;
                    }
                    let codec = match codec_of(stream, "video") {
                        Ok(codec) => codec,
                        Err(e) => {
                            video_error.get_or_insert(e);
                            continue;
                        }
                    };
                    let fps = stream["avg_frame_rate"]
                        .as_str()
                        .and_then(parse_frame_rate)
                        .or_else(|| stream["r_frame_rate"].as_str().and_then(parse_frame_rate));
                    let (Some(width), Some(height), Some(fps)) =
                        (stream["width"].as_u64(), stream["height"].as_u64(), fps)
                    else {
                        log::debug!("skipping video stream {} without size or rate", index);
                        continue;
                    };
                    video.push(VideoStreamInfo { index, codec, width: width as u32, height: height as u32, fps });
                }
                Some("audio") => {
                    let index = audio_seen;
                    audio_seen += 1;
                    let Ok(codec) = codec_of(stream, "audio") else {
                        log::debug!("skipping audio stream {} without a codec", index);
                        continue;
                    };
                    let sample_rate = stream["sample_rate"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0);
                    let channels = stream["channels"].as_u64().unwrap_or(0) as u16;
                    let language = stream["tags"]["language"].as_str().map(str::to_string);
                    audio.push(AudioStreamInfo { index, codec, sample_rate, channels, language });
                }
                _ => {}
            }
        }

        if video.is_empty() {
            if let Some(e) = video_error {
                return Err(e);
            }
        }

        let duration_secs = json["format"]["duration"].as_str().and_then(|s| s.parse().ok()).unwrap_or(0.0);
        Ok(Self { path: path.to_path_buf(), video, audio, duration_secs })
    }

    /// First decodable video stream.
    pub fn best_video(&self) -> Result<&VideoStreamInfo> {
        self.video.first().ok_or(PlayerError::StreamNotFound("video"))
    }

    /// Audio stream tagged with `language` (matched on its first three
    /// letters), otherwise the first audio stream.
    pub fn audio_stream(&self, language: Option<&str>) -> Result<&AudioStreamInfo> {
        if let Some(wanted) = language.map(language_key) {
            if let Some(stream) =
                self.audio.iter().find(|s| s.language.as_deref().map(language_key).as_deref() == Some(wanted.as_str()))
            {
                return Ok(stream);
            }
            log::info!("no audio stream tagged '{}', using the default stream", wanted);
        }
        self.audio.first().ok_or(PlayerError::StreamNotFound("audio"))
    }
}

fn language_key(tag: &str) -> String {
    tag.chars().take(3).collect::<String>().to_ascii_lowercase()
}

/// Size `ffmpeg` is asked to decode to: at most `max_width` wide, aspect
/// kept, both sides even.
pub fn decode_size(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    let even = |v: u32| (v.max(2) / 2) * 2;
    if max_width == 0 || width <= max_width {
        return (even(width), even(height));
    }
    let scaled_h = (height as f64 * max_width as f64 / width as f64).round() as u32;
    (even(max_width), even(scaled_h))
}

/// One running `ffmpeg` process and its output pipe.
///
/// Diagnostics are drained on a separate thread as they arrive, so a child
/// that complains about every packet never blocks on a full stderr pipe.
/// Dropping the handle kills and reaps the child.
pub struct MediaHandle {
    kind: &'static str,
    child: Child,
    stdout: ChildStdout,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    stderr_reader: Option<JoinHandle<()>>,
}

fn drain_stderr(kind: &'static str, pipe: ChildStderr, tail: Arc<Mutex<VecDeque<String>>>) {
    for line in BufReader::new(pipe).lines() {
        let Ok(line) = line else { break };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        log::warn!("{} decoder: {}", kind, line);
        let mut tail = tail.lock();
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}

impl MediaHandle {
    pub fn spawn(program: &str, args: &[String], kind: &'static str) -> Result<Self> {
        log::debug!("{} {}", program, args.join(" "));
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PlayerError::DecoderOpenFailure { kind, reason: format!("failed to run {}: {}", program, e) })?;
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(PlayerError::DecoderOpenFailure { kind, reason: "no stdout pipe".into() });
        };
        let stderr = child.stderr.take();
        let mut handle = Self { kind, child, stdout, stderr_tail: Arc::default(), stderr_reader: None };
        if let Some(pipe) = stderr {
            let tail = handle.stderr_tail.clone();
            let reader = thread::Builder::new()
                .name(format!("{}-stderr", kind))
                .spawn(move || drain_stderr(kind, pipe, tail))?;
            handle.stderr_reader = Some(reader);
        }
        Ok(handle)
    }

    /// Fills as much of `buf` as the pipe delivers before end of file.
    fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(PlayerError::PacketDecodeError(format!("{} pipe: {}", self.kind, e))),
            }
        }
        Ok(filled)
    }

    /// Called once the pipe is exhausted; an unsuccessful exit becomes an
    /// error carrying ffmpeg's last diagnostics.
    fn finish(&mut self) -> Result<()> {
        let status = self.child.wait()?;
        if let Some(reader) = self.stderr_reader.take() {
            let _ = reader.join();
        }
        if status.success() {
            return Ok(());
        }
        let message = self.stderr_tail.lock().iter().cloned().collect::<Vec<_>>().join("; ");
        Err(PlayerError::DecoderOpenFailure {
            kind: self.kind,
            reason: format!("ffmpeg exited with {}: {}", status, message),
        })
    }
}

impl Drop for MediaHandle {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(reader) = self.stderr_reader.take() {
            let _ = reader.join();
        }
    }
}

fn input_args(path: &Path, start_ms: f64) -> Vec<String> {
    let mut args: Vec<String> = vec!["-nostdin".into(), "-loglevel".into(), "error".into()];
    if start_ms > 0.0 {
        args.push("-ss".into());
        args.push(format!("{:.3}", start_ms / 1000.0));
    }
    args.push("-i".into());
    args.push(path.display().to_string());
    args
}

/// Video frames decoded to packed RGB by an `ffmpeg` child.
pub struct FfmpegVideoDecoder {
    ffmpeg: String,
    path: PathBuf,
    stream: VideoStreamInfo,
    width: u32,
    height: u32,
    handle: Option<MediaHandle>,
    origin_ms: f64,
    frames_read: u64,
    primed: Option<RgbImage>,
}

impl FfmpegVideoDecoder {
    /// Starts decoding and reads the first frame, so that a stream ffmpeg
    /// cannot decode fails here rather than mid-playback.
    pub fn open(ffmpeg: &str, info: &MediaInfo, stream: &VideoStreamInfo, max_width: u32) -> Result<Self> {
        let (width, height) = decode_size(stream.width, stream.height, max_width);
        log::info!(
            "video stream {}: {} {}x{} @ {:.3}fps, decoding at {}x{}",
            stream.index,
            stream.codec,
            stream.width,
            stream.height,
            stream.fps,
            width,
            height
        );
        let mut decoder = Self {
            ffmpeg: ffmpeg.to_string(),
            path: info.path.clone(),
            stream: stream.clone(),
            width,
            height,
            handle: None,
            origin_ms: 0.0,
            frames_read: 0,
            primed: None,
        };
        decoder.restart(0.0)?;
        decoder.primed = decoder.read_image()?;
        Ok(decoder)
    }

    pub fn fps(&self) -> f64 {
        self.stream.fps
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn restart(&mut self, start_ms: f64) -> Result<()> {
        self.handle = None;
        let mut args = input_args(&self.path, start_ms);
        args.extend([
            "-map".into(),
            format!("0:v:{}", self.stream.index),
            "-an".into(),
            "-sn".into(),
            "-vf".into(),
            format!("fps={},scale={}:{}", self.stream.fps, self.width, self.height),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgb24".into(),
            "pipe:1".into(),
        ]);
        self.handle = Some(MediaHandle::spawn(&self.ffmpeg, &args, "video")?);
        self.origin_ms = start_ms;
        self.frames_read = 0;
        Ok(())
    }

    fn read_image(&mut self) -> Result<Option<RgbImage>> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(None);
        };
        let mut buf = vec![0u8; self.width as usize * self.height as usize * 3];
        let n = handle.read_full(&mut buf)?;
        if n < buf.len() {
            handle.finish()?;
            self.handle = None;
            return Ok(None);
        }
        RgbImage::from_raw(self.width, self.height, buf)
            .map(Some)
            .ok_or_else(|| PlayerError::PacketDecodeError("short video frame".into()))
    }
}

impl Decoder for FfmpegVideoDecoder {
    type Frame = VideoFrame;

    fn next_frame(&mut self) -> Result<Option<VideoFrame>> {
        let image = match self.primed.take() {
            Some(image) => image,
            None => match self.read_image()? {
                Some(image) => image,
                None => return Ok(None),
            },
        };
        let pts_ms = self.origin_ms + self.frames_read as f64 * 1000.0 / self.stream.fps;
        self.frames_read += 1;
        Ok(Some(VideoFrame { pts_ms, image }))
    }

    fn seek(&mut self, request: &SeekRequest) -> Result<()> {
        log::info!("video seek {:?} to {:.0}ms", request.direction, request.target_ms);
        self.primed = None;
        self.restart(request.target_ms)
    }
}

/// Audio decoded and resampled to the device format by an `ffmpeg` child.
pub struct FfmpegAudioDecoder {
    ffmpeg: String,
    path: PathBuf,
    stream: AudioStreamInfo,
    sample_rate: u32,
    channels: u16,
    chunk_frames: usize,
    handle: Option<MediaHandle>,
    origin_ms: f64,
    frames_read: u64,
    primed: Option<Vec<f32>>,
}

impl FfmpegAudioDecoder {
    /// `sample_rate` and `channels` are the output device's; the stream is
    /// converted to them on the fly.
    pub fn open(ffmpeg: &str, info: &MediaInfo, stream: &AudioStreamInfo, sample_rate: u32, channels: u16) -> Result<Self> {
        if sample_rate == 0 || channels == 0 {
            return Err(PlayerError::ResamplerSetupFailure(format!(
                "cannot convert to {} channels at {}Hz",
                channels, sample_rate
            )));
        }
        log::info!(
            "audio stream {}: {} {}ch @ {}Hz{}, output {}ch @ {}Hz",
            stream.index,
            stream.codec,
            stream.channels,
            stream.sample_rate,
            stream.language.as_deref().map(|l| format!(" [{}]", l)).unwrap_or_default(),
            channels,
            sample_rate
        );
        let mut decoder = Self {
            ffmpeg: ffmpeg.to_string(),
            path: info.path.clone(),
            stream: stream.clone(),
            sample_rate,
            channels,
            chunk_frames: (sample_rate * AUDIO_CHUNK_MS / 1000).max(1) as usize,
            handle: None,
            origin_ms: 0.0,
            frames_read: 0,
            primed: None,
        };
        decoder.restart(0.0)?;
        decoder.primed = decoder.read_samples()?;
        Ok(decoder)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    fn restart(&mut self, start_ms: f64) -> Result<()> {
        self.handle = None;
        let mut args = input_args(&self.path, start_ms);
        args.extend([
            "-map".into(),
            format!("0:a:{}", self.stream.index),
            "-vn".into(),
            "-sn".into(),
            "-f".into(),
            "f32le".into(),
            "-acodec".into(),
            "pcm_f32le".into(),
            "-ac".into(),
            self.channels.to_string(),
            "-ar".into(),
            self.sample_rate.to_string(),
            "pipe:1".into(),
        ]);
        self.handle = Some(MediaHandle::spawn(&self.ffmpeg, &args, "audio")?);
        self.origin_ms = start_ms;
        self.frames_read = 0;
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Option<Vec<f32>>> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(None);
        };
        let frame_bytes = self.channels as usize * 4;
        let mut buf = vec![0u8; self.chunk_frames * frame_bytes];
        let n = handle.read_full(&mut buf)?;
        // Only whole sample frames are played.
        let usable = n - n % frame_bytes;
        if usable == 0 {
            handle.finish()?;
            self.handle = None;
            return Ok(None);
        }
        let samples = buf[..usable]
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Some(samples))
    }
}

impl Decoder for FfmpegAudioDecoder {
    type Frame = AudioChunk;

    fn next_frame(&mut self) -> Result<Option<AudioChunk>> {
        let samples = match self.primed.take() {
            Some(samples) => samples,
            None => match self.read_samples()? {
                Some(samples) => samples,
                None => return Ok(None),
            },
        };
        let pts_ms = self.origin_ms + self.frames_read as f64 * 1000.0 / self.sample_rate as f64;
        let frames = (samples.len() / self.channels as usize) as u64;
        self.frames_read += frames;
        let duration_ms = frames as f64 * 1000.0 / self.sample_rate as f64;
        Ok(Some(AudioChunk { pts_ms, duration_ms, samples }))
    }

    fn seek(&mut self, request: &SeekRequest) -> Result<()> {
        log::info!("audio seek {:?} to {:.0}ms", request.direction, request.target_ms);
        self.primed = None;
        self.restart(request.target_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const PROBE: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "video", "codec_name": "mjpeg", "width": 300, "height": 300,
             "avg_frame_rate": "0/0", "r_frame_rate": "90000/1", "disposition": {"attached_pic": 1}},
            {"index": 1, "codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
             "avg_frame_rate": "30000/1001", "r_frame_rate": "30000/1001", "disposition": {"attached_pic": 0}},
            {"index": 2, "codec_type": "audio", "codec_name": "aac", "sample_rate": "48000", "channels": 2,
             "tags": {"language": "eng"}},
            {"index": 3, "codec_type": "audio", "codec_name": "opus", "sample_rate": "48000", "channels": 6,
             "tags": {"language": "jpn"}},
            {"index": 4, "codec_type": "subtitle", "codec_name": "subrip"}
        ],
        "format": {"duration": "12.500000"}
    }"#;

    fn probe() -> MediaInfo {
        MediaInfo::from_ffprobe_json(Path::new("movie.mkv"), PROBE.as_bytes()).unwrap()
    }

    #[test]
    fn frame_rates() {
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }

    #[test]
    fn cover_art_is_not_the_video_stream() {
        let info = probe();
        let video = info.best_video().unwrap();
        assert_eq!(video.index, 1);
        assert_eq!(video.codec, "h264");
        assert_eq!((video.width, video.height), (1920, 1080));
        assert_eq!(info.duration_secs, 12.5);
    }

    #[test]
    fn audio_language_preference() {
        let info = probe();
        assert_eq!(info.audio_stream(None).unwrap().index, 0);
        assert_eq!(info.audio_stream(Some("jpn-JP")).unwrap().index, 1);
        assert_eq!(info.audio_stream(Some("JPN")).unwrap().channels, 6);
        assert_eq!(info.audio_stream(Some("fra")).unwrap().index, 0);
    }

    #[test]
    fn missing_streams_are_reported() {
        let info = MediaInfo::from_ffprobe_json(Path::new("a.wav"), br#"{"streams": [], "format": {}}"#).unwrap();
        assert!(matches!(info.best_video(), Err(PlayerError::StreamNotFound("video"))));
        assert!(matches!(info.audio_stream(Some("eng")), Err(PlayerError::StreamNotFound("audio"))));
    }

    #[test]
    fn undecodable_video_is_reported() {
        let json = br#"{"streams": [{"codec_type": "video", "codec_tag_string": "xyz1", "width": 10, "height": 10}]}"#;
        let err = MediaInfo::from_ffprobe_json(Path::new("x"), json).unwrap_err();
        assert!(matches!(err, PlayerError::DecoderUnavailable { kind: "video", ref codec } if codec == "xyz1"));
    }

    #[test]
    fn garbage_probe_output_is_an_open_failure() {
        let err = MediaInfo::from_ffprobe_json(Path::new("x"), b"not json").unwrap_err();
        assert!(matches!(err, PlayerError::OpenFailure { .. }));
    }

    #[test]
    fn missing_file_fails_to_open() {
        let err = MediaInfo::probe("ffprobe", Path::new("/definitely/not/here.mp4")).unwrap_err();
        assert!(matches!(err, PlayerError::OpenFailure { .. }));
    }

    #[test]
    fn decode_size_is_capped_and_even() {
        assert_eq!(decode_size(1920, 1080, 480), (480, 270));
        assert_eq!(decode_size(1280, 533, 320), (320, 132));
        assert_eq!(decode_size(321, 241, 640), (320, 240));
        assert_eq!(decode_size(1, 1, 0), (2, 2));
    }

    #[test]
    fn invalid_device_format_is_a_resampler_error() {
        let info = probe();
        let stream = info.audio_stream(None).unwrap().clone();
        let err = FfmpegAudioDecoder::open("ffmpeg", &info, &stream, 0, 2).err().unwrap();
        assert!(matches!(err, PlayerError::ResamplerSetupFailure(_)));
    }

    #[cfg(unix)]
    fn fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    fn tiny_video() -> (MediaInfo, VideoStreamInfo) {
        let stream = VideoStreamInfo { index: 0, codec: "rawvideo".into(), width: 2, height: 2, fps: 25.0 };
        let info = MediaInfo {
            path: PathBuf::from("clip.mkv"),
            video: vec![stream.clone()],
            audio: Vec::new(),
            duration_secs: 0.04,
        };
        (info, stream)
    }

    #[cfg(unix)]
    #[test]
    fn noisy_decoder_does_not_stall_on_its_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        // Far more than a pipe buffer of warnings, then one 2x2 frame.
        let script = fake_ffmpeg(
            dir.path(),
            "i=0\nwhile [ $i -lt 6000 ]; do echo \"error while decoding MB $i, bytestream -5\" >&2; i=$((i+1)); done\nprintf 'abcdefghijkl'",
        );
        let program = script.to_string_lossy().into_owned();
        let (tx, rx) = std::sync::mpsc::channel();
        thread::spawn(move || {
            let (info, stream) = tiny_video();
            let result = FfmpegVideoDecoder::open(&program, &info, &stream, 0).and_then(|mut decoder| {
                let first = decoder.next_frame()?.map(|frame| frame.image.into_raw());
                let ended = decoder.next_frame()?.is_none();
                Ok((first, ended))
            });
            let _ = tx.send(result);
        });

        let (first, ended) = rx.recv_timeout(Duration::from_secs(20)).expect("decoder stalled").unwrap();
        assert_eq!(first.unwrap(), b"abcdefghijkl".to_vec());
        assert!(ended);
    }

    #[cfg(unix)]
    #[test]
    fn failing_decoder_reports_its_last_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_ffmpeg(dir.path(), "echo 'clip.mkv: Invalid data found when processing input' >&2\nexit 1");
        let (info, stream) = tiny_video();
        let err = FfmpegVideoDecoder::open(&script.to_string_lossy(), &info, &stream, 0).err().unwrap();
        match err {
            PlayerError::DecoderOpenFailure { kind, reason } => {
                assert_eq!(kind, "video");
                assert!(reason.contains("Invalid data found"), "{}", reason);
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
