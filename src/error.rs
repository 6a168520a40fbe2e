use std::io;

/// Errors raised while opening or playing a media file.
///
/// Setup-phase variants abort playback before any loop starts. During
/// playback only [`PlayerError::PacketDecodeError`] is expected and the
/// loops skip past it.
#[derive(thiserror::Error, Debug)]
pub enum PlayerError {
    #[error("unable to open media file {path}: {reason}")]
    OpenFailure { path: String, reason: String },

    #[error("no {0} stream found in file")]
    StreamNotFound(&'static str),

    #[error("no decoder available for {kind} codec '{codec}'")]
    DecoderUnavailable { kind: &'static str, codec: String },

    #[error("{kind} decoder could not be opened: {reason}")]
    DecoderOpenFailure { kind: &'static str, reason: String },

    #[error("error setting up resampler: {0}")]
    ResamplerSetupFailure(String),

    #[error("unable to open audio output device: {0}")]
    DeviceOpenFailure(String),

    #[error("unable to start audio output device: {0}")]
    DeviceStartFailure(String),

    #[error("error decoding packet: {0}")]
    PacketDecodeError(String),

    #[error("terminal does not support colour output: {0}")]
    TerminalCapabilityError(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl PlayerError {
    /// A single bad packet or frame; the loop moves on to the next one.
    pub fn is_transient(&self) -> bool {
        matches!(self, PlayerError::PacketDecodeError(_))
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_packet_errors_are_transient() {
        assert!(PlayerError::PacketDecodeError("bad".into()).is_transient());
        assert!(!PlayerError::StreamNotFound("video").is_transient());
        assert!(!PlayerError::DeviceStartFailure("x".into()).is_transient());
    }

    #[test]
    fn messages_name_the_failure() {
        let err = PlayerError::StreamNotFound("audio");
        assert_eq!(err.to_string(), "no audio stream found in file");
        let err = PlayerError::DecoderUnavailable { kind: "video", codec: "vp9".into() };
        assert!(err.to_string().contains("vp9"));
    }
}
