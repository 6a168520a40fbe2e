//! # termvideo - terminal video player
//!
//! `termvideo` plays a video file as a grid of coloured text characters in
//! the terminal, with its audio kept in step and live seeking.
//!
//! ## Features
//!
//! - Aspect-preserving downscale to the terminal grid, re-fitted on resize
//! - True-colour, palette-quantized and monochrome output
//! - Audio through the default output device
//! - Ctrl+Left / Ctrl+Right seeking on both streams
//!
//! ## Example
//!
//! ```no_run
//! use termvideo::{AppConfig, MediaPlayer, PlayerOptions, RenderConfig};
//! use termvideo::terminal::{CrosstermTerminal, TerminalCaps, TerminalSession};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = AppConfig::default();
//! let render = RenderConfig::from_preset(config.preset(&config.default_preset)?, config.mono_chars.clone());
//! let options = PlayerOptions::new("movie.mp4").with_seek_step_ms(10_000);
//! let player = MediaPlayer::open(&config, render, options)?;
//!
//! let _session = TerminalSession::enter()?;
//! let report = player.play(CrosstermTerminal::new(TerminalCaps::probe()))?;
//! println!("Average frame time: {:.3}ms", report.video.avg_frame_time_ms);
//! # Ok(())
//! # }
//! ```

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub mod audio;
pub mod clock;
pub mod color;
pub mod error;
pub mod input;
pub mod media;
pub mod optimizer;
pub mod perf;
pub mod player;
pub mod render;
pub mod scaler;
pub mod terminal;
pub mod video;

pub use clock::{SeekDirection, SeekRequest, StreamClock, SyncCoordinator};
pub use error::PlayerError;
pub use player::{MediaPlayer, PlaybackReport};
pub use video::{PlaybackState, PlaybackSummary};

/// Playback quality preset
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Preset {
    /// Frames decoded but not drawn between drawn frames
    pub frames_to_skip: u32,
    /// Per-channel difference (0-255) below which the colour is not re-sent
    pub color_threshold: u8,
    /// Widest frame, in pixels, requested from the decoder
    pub decode_width: u32,
}

fn default_mono_chars() -> String {
    "@&%QWNM0gB$#DR8mHXKAUbGOpV4d9h6PkqwSE2]ayjxY5Zoen[ult13If}C{iF|(7J)vTLs?z/*cr!+<>;=^,_:'-.` ".to_string()
}

fn default_color_chars() -> String {
    " `.-':_,^=;><+!rc*/z?sLTv)J7(|Fi{C}fI31tlu[neoZ5Yxjya]2ESwqkP6h9d4VpOGbUAKXHm8RD#$Bg0MNWQ%&@".to_string()
}

fn default_seek_step_ms() -> u64 {
    5000
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

/// Application configuration with presets and character sets
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub presets: HashMap<String, Preset>,
    pub default_preset: String,
    /// Ramp for monochrome output, dark to light on a white background
    #[serde(default = "default_mono_chars")]
    pub mono_chars: String,
    /// Ramp for colour output, dark to light on a black background
    #[serde(default = "default_color_chars")]
    pub color_chars: String,
    #[serde(default = "default_seek_step_ms")]
    pub seek_step_ms: u64,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        let default_json = r#"{
            "presets": {
                "default": {"frames_to_skip": 0, "color_threshold": 4,  "decode_width": 480},
                "small":   {"frames_to_skip": 1, "color_threshold": 12, "decode_width": 240},
                "large":   {"frames_to_skip": 0, "color_threshold": 0,  "decode_width": 960}
            },
            "default_preset": "default",
            "seek_step_ms": 5000,
            "ffmpeg": "ffmpeg",
            "ffprobe": "ffprobe"
        }"#;
        serde_json::from_str(default_json).unwrap_or_else(|_| Self::fallback())
    }
}

impl AppConfig {
    fn fallback() -> Self {
        let preset = Preset { frames_to_skip: 0, color_threshold: 4, decode_width: 480 };
        Self {
            presets: HashMap::from([("default".to_string(), preset)]),
            default_preset: "default".to_string(),
            mono_chars: default_mono_chars(),
            color_chars: default_color_chars(),
            seek_step_ms: default_seek_step_ms(),
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
        }
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&text).context("parsing config json")?;
        config.validate().with_context(|| format!("config file {}", path.display()))?;
        Ok(config)
    }

    /// Checks the character sets are usable as one-byte-per-cell ramps.
    pub fn validate(&self) -> Result<(), PlayerError> {
        for (field, chars) in [("mono_chars", &self.mono_chars), ("color_chars", &self.color_chars)] {
            if chars.is_empty() {
                return Err(PlayerError::InvalidConfig(format!("{} is empty", field)));
            }
            if !chars.is_ascii() {
                return Err(PlayerError::InvalidConfig(format!(
                    "{} contains non-ASCII characters. This will cause corrupted output. \
                     Please use only ASCII characters.",
                    field
                )));
            }
        }
        if !self.presets.contains_key(&self.default_preset) {
            return Err(PlayerError::InvalidConfig(format!("default preset '{}' is not defined", self.default_preset)));
        }
        Ok(())
    }

    /// Get a preset by name
    pub fn preset(&self, name: &str) -> Result<&Preset> {
        self.presets.get(name).ok_or_else(|| anyhow!("Preset '{}' not found", name))
    }

    /// Character ramp for the requested colour mode
    pub fn chars_for(&self, use_color: bool) -> &str {
        if use_color {
            &self.color_chars
        } else {
            &self.mono_chars
        }
    }
}

/// How frames are turned into text. Fixed once playback starts.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    /// Characters ordered from low to high luminance
    pub char_set: String,
    pub use_color: bool,
    /// Keep the source aspect ratio, padding the spare cells
    pub force_aspect: bool,
    /// Weight the three channels equally when computing luminance
    pub force_average_luminance: bool,
    pub frames_to_skip: u32,
    pub color_threshold: u8,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            char_set: default_mono_chars(),
            use_color: false,
            force_aspect: false,
            force_average_luminance: false,
            frames_to_skip: 0,
            color_threshold: 4,
        }
    }
}

impl RenderConfig {
    pub fn with_char_set(mut self, char_set: String) -> Self {
        self.char_set = char_set;
        self
    }

    pub fn with_color(mut self, use_color: bool) -> Self {
        self.use_color = use_color;
        self
    }

    pub fn with_force_aspect(mut self, force_aspect: bool) -> Self {
        self.force_aspect = force_aspect;
        self
    }

    pub fn with_average_luminance(mut self, force_average: bool) -> Self {
        self.force_average_luminance = force_average;
        self
    }

    pub fn with_frames_to_skip(mut self, frames_to_skip: u32) -> Self {
        self.frames_to_skip = frames_to_skip;
        self
    }

    pub fn with_color_threshold(mut self, color_threshold: u8) -> Self {
        self.color_threshold = color_threshold;
        self
    }

    /// Create a render configuration from a preset
    pub fn from_preset(preset: &Preset, char_set: String) -> Self {
        Self {
            char_set,
            frames_to_skip: preset.frames_to_skip,
            color_threshold: preset.color_threshold,
            ..Self::default()
        }
    }
}

/// Everything about a playback session that is not about drawing.
#[derive(Debug, Clone)]
pub struct PlayerOptions {
    pub input: PathBuf,
    /// Distance of one seek step
    pub seek_step_ms: u64,
    /// Use the double-buffered cell writer on true-colour terminals
    pub double_buffer: bool,
    pub audio: bool,
    /// Preferred audio track language tag, e.g. "eng"
    pub audio_language: Option<String>,
    pub decode_width: u32,
    /// Show frame time and A/V drift in the window title
    pub show_stats: bool,
}

impl PlayerOptions {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            seek_step_ms: default_seek_step_ms(),
            double_buffer: false,
            audio: true,
            audio_language: None,
            decode_width: 480,
            show_stats: false,
        }
    }

    pub fn with_seek_step_ms(mut self, seek_step_ms: u64) -> Self {
        self.seek_step_ms = seek_step_ms;
        self
    }

    pub fn with_double_buffer(mut self, double_buffer: bool) -> Self {
        self.double_buffer = double_buffer;
        self
    }

    pub fn with_audio(mut self, audio: bool) -> Self {
        self.audio = audio;
        self
    }

    pub fn with_audio_language(mut self, language: Option<String>) -> Self {
        self.audio_language = language;
        self
    }

    pub fn with_decode_width(mut self, decode_width: u32) -> Self {
        self.decode_width = decode_width;
        self
    }

    pub fn with_stats(mut self, show_stats: bool) -> Self {
        self.show_stats = show_stats;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_has_presets() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.seek_step_ms, 5000);
        assert_eq!(config.preset("small").unwrap().frames_to_skip, 1);
        assert!(config.preset("huge").is_err());
        assert!(config.mono_chars.starts_with('@'));
        assert!(config.color_chars.starts_with(' '));
    }

    #[test]
    fn config_file_overrides_and_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"presets": {{"fast": {{"frames_to_skip": 2, "color_threshold": 20, "decode_width": 160}}}},
               "default_preset": "fast", "mono_chars": " .:#", "seek_step_ms": 1000}}"#
        )
        .unwrap();
        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.mono_chars, " .:#");
        assert_eq!(config.seek_step_ms, 1000);
        assert_eq!(config.ffmpeg, "ffmpeg");
        assert_eq!(config.color_chars, default_color_chars());
    }

    #[test]
    fn non_ascii_char_set_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"presets": {{"default": {{"frames_to_skip": 0, "color_threshold": 4, "decode_width": 480}}}},
               "default_preset": "default", "color_chars": " ░▒▓█"}}"#
        )
        .unwrap();
        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("non-ASCII"));
    }

    #[test]
    fn empty_char_set_and_missing_preset_are_rejected() {
        let mut config = AppConfig::default();
        config.mono_chars.clear();
        assert!(matches!(config.validate(), Err(PlayerError::InvalidConfig(_))));

        let mut config = AppConfig::default();
        config.default_preset = "nope".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn render_config_from_preset() {
        let preset = Preset { frames_to_skip: 3, color_threshold: 9, decode_width: 320 };
        let render = RenderConfig::from_preset(&preset, "ab".into()).with_color(true).with_force_aspect(true);
        assert_eq!(render.frames_to_skip, 3);
        assert_eq!(render.color_threshold, 9);
        assert_eq!(render.char_set, "ab");
        assert!(render.use_color && render.force_aspect && !render.force_average_luminance);
    }
}
