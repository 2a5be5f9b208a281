// SPDX-License-Identifier: MPL-2.0
use std::fmt;

use crate::domain::video::Eye;

#[derive(Debug, Clone)]
pub enum Error {
    Io(String),
    Config(String),
    Session(SessionError),
    Texture(TextureError),
    Player(PlayerError),
}

/// Failures raised while opening or reading a decode session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// The locator could not be resolved or the container could not be parsed.
    SourceUnreadable(String),

    /// The source has no video track.
    NoVideoTrack,

    /// The source has no audio track, so there is no playback clock.
    NoAudioTrack,

    /// The reader refused the requested output configuration.
    CannotAttachOutput,

    /// The reader was configured but would not start.
    CannotStartReading,

    /// The session was cancelled while in use.
    Cancelled,

    /// The backend reported a decode failure mid-stream.
    Decode(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::SourceUnreadable(locator) => {
                write!(f, "Source is unreadable: {}", locator)
            }
            SessionError::NoVideoTrack => write!(f, "No video track found"),
            SessionError::NoAudioTrack => write!(f, "No audio track found"),
            SessionError::CannotAttachOutput => write!(f, "Reader rejected the output settings"),
            SessionError::CannotStartReading => write!(f, "Reader failed to start"),
            SessionError::Cancelled => write!(f, "Session was cancelled"),
            SessionError::Decode(msg) => write!(f, "Decoding failed: {}", msg),
        }
    }
}

/// Failures raised by the GPU texture path.
#[derive(Debug, Clone, PartialEq)]
pub enum TextureError {
    /// The device could not create a pixel-buffer-to-texture converter.
    CacheCreationFailed(String),

    /// A pixel buffer plane could not be turned into a texture.
    ConversionFailed(String),

    /// The device rejected a command batch.
    SubmissionFailed(String),
}

impl fmt::Display for TextureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextureError::CacheCreationFailed(msg) => {
                write!(f, "Texture cache creation failed: {}", msg)
            }
            TextureError::ConversionFailed(msg) => write!(f, "Texture conversion failed: {}", msg),
            TextureError::SubmissionFailed(msg) => write!(f, "GPU submission failed: {}", msg),
        }
    }
}

/// Failures raised while turning a decoded sample into eye surfaces.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractError {
    /// The sample carries no image data.
    NoPixelData,

    /// A stereo sample is missing the buffer tagged for this eye.
    MissingEye(Eye),

    /// Texture conversion failed for one of the buffers.
    Texture(TextureError),
}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractError::NoPixelData => write!(f, "Sample has no pixel data"),
            ExtractError::MissingEye(eye) => write!(f, "Stereo sample is missing the {} eye", eye),
            ExtractError::Texture(e) => write!(f, "{}", e),
        }
    }
}

impl From<TextureError> for ExtractError {
    fn from(err: TextureError) -> Self {
        ExtractError::Texture(err)
    }
}

/// Failures surfaced by the playback controller to its host.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerError {
    /// Opening a source or one of its sessions failed.
    Session(SessionError),

    /// The audio transport did not confirm the seek.
    SeekRejected,

    /// A newer init or seek replaced this request before it finished.
    Superseded,

    /// The operation needs a source but none has been initialized.
    NotInitialized,
}

impl fmt::Display for PlayerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerError::Session(e) => write!(f, "{}", e),
            PlayerError::SeekRejected => write!(f, "Seek was rejected by the audio transport"),
            PlayerError::Superseded => write!(f, "Request was superseded by a newer one"),
            PlayerError::NotInitialized => write!(f, "Player has no source loaded"),
        }
    }
}

impl From<SessionError> for PlayerError {
    fn from(err: SessionError) -> Self {
        PlayerError::Session(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O Error: {}", e),
            Error::Config(e) => write!(f, "Config Error: {}", e),
            Error::Session(e) => write!(f, "Session Error: {}", e),
            Error::Texture(e) => write!(f, "Texture Error: {}", e),
            Error::Player(e) => write!(f, "Player Error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<SessionError> for Error {
    fn from(err: SessionError) -> Self {
        Error::Session(err)
    }
}

impl From<TextureError> for Error {
    fn from(err: TextureError) -> Self {
        Error::Texture(err)
    }
}

impl From<PlayerError> for Error {
    fn from(err: PlayerError) -> Self {
        Error::Player(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_io_error() {
        let err = Error::Io("disk failure".to_string());
        assert_eq!(format!("{}", err), "I/O Error: disk failure");
    }

    #[test]
    fn from_io_error_produces_io_variant() {
        let io_error = std::io::Error::other("boom");
        let err: Error = io_error.into();
        match err {
            Error::Io(message) => assert!(message.contains("boom")),
            _ => panic!("expected Io variant"),
        }
    }

    #[test]
    fn session_error_wraps_into_player_error() {
        let err: PlayerError = SessionError::NoAudioTrack.into();
        assert_eq!(err, PlayerError::Session(SessionError::NoAudioTrack));
        assert_eq!(format!("{}", err), "No audio track found");
    }

    #[test]
    fn missing_eye_names_the_eye() {
        let err = ExtractError::MissingEye(Eye::Right);
        assert_eq!(format!("{}", err), "Stereo sample is missing the right eye");
    }

    #[test]
    fn texture_error_converts_into_extract_error() {
        let err: ExtractError = TextureError::ConversionFailed("plane 1".into()).into();
        assert!(matches!(err, ExtractError::Texture(TextureError::ConversionFailed(_))));
    }

    #[test]
    fn toml_error_becomes_config_variant() {
        let parse: std::result::Result<toml::Value, _> = toml::from_str("= broken");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Config(_)));
    }
}
