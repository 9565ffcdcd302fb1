use std::fmt;

use serde::Serialize;

/// Result alias that carries the custom [`EngineError`] type.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Stable failure taxonomy surfaced to the host UI.
///
/// Every failure the engine reports maps onto exactly one of these entries so
/// the UI can guide remediation (for example, telling "permission denied"
/// apart from "device not found").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// The library candidate was missing or could not be classified.
    LibraryUnavailable,
    /// Every construction strategy was exhausted.
    InstantiationFailed,
    /// The host exposes no audio context constructor.
    AudioContextUnavailable,
    /// The user or host refused capture permission.
    PermissionDenied,
    /// The requested input device does not exist.
    DeviceNotFound,
    /// The host cannot provide the requested kind of capture.
    CaptureUnsupported,
    /// Connecting nodes in the audio graph failed.
    ConnectionFailed,
}

impl ErrorKind {
    /// Short, user-facing message for this failure.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::LibraryUnavailable => "visualizer library is unavailable",
            Self::InstantiationFailed => "visualizer could not be started, using the built-in renderer",
            Self::AudioContextUnavailable => "audio is not supported on this platform",
            Self::PermissionDenied => "permission to capture audio was denied",
            Self::DeviceNotFound => "the selected audio device was not found",
            Self::CaptureUnsupported => "audio capture is not supported here",
            Self::ConnectionFailed => "audio source could not be connected",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.user_message())
    }
}

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A failure that belongs to the engine's taxonomy.
    #[error("{kind}: {detail}")]
    Engine { kind: ErrorKind, detail: String },
    /// Free-form failure outside the taxonomy (poisoned locks, bad config).
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Wrapper around JSON (de)serialisation errors.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Creates a taxonomy error with a diagnostic detail.
    pub fn new<T: Into<String>>(kind: ErrorKind, detail: T) -> Self {
        Self::Engine {
            kind,
            detail: detail.into(),
        }
    }

    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Returns the taxonomy entry, if this error belongs to one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Engine { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<&str> for EngineError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for EngineError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

/// Classification of a failure raised by the host or an external library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostErrorKind {
    NotAllowed,
    NotFound,
    NotSupported,
    Overconstrained,
    Security,
    Abort,
    Type,
    Other,
}

/// A value "thrown" by a host API or by the external visualizer library.
///
/// Host errors never cross a component boundary as-is: they are either
/// treated as a "try next" signal or mapped onto [`ErrorKind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct HostError {
    pub kind: HostErrorKind,
    pub message: String,
}

impl HostError {
    pub fn new<T: Into<String>>(kind: HostErrorKind, message: T) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a generic type error, the usual failure of a bad call.
    pub fn type_error<T: Into<String>>(message: T) -> Self {
        Self::new(HostErrorKind::Type, message)
    }

    /// Error returned when an instance lacks the requested capability.
    pub fn missing(capability: &str) -> Self {
        Self::type_error(format!("`{capability}` is not a function"))
    }

    /// Maps a capture failure onto the engine taxonomy.
    pub fn capture_kind(&self) -> ErrorKind {
        match self.kind {
            HostErrorKind::NotAllowed | HostErrorKind::Security | HostErrorKind::Abort => {
                ErrorKind::PermissionDenied
            }
            HostErrorKind::NotFound | HostErrorKind::Overconstrained => ErrorKind::DeviceNotFound,
            HostErrorKind::NotSupported => ErrorKind::CaptureUnsupported,
            HostErrorKind::Type | HostErrorKind::Other => ErrorKind::ConnectionFailed,
        }
    }
}

/// Result alias for host and external-library calls.
pub type HostResult<T> = std::result::Result<T, HostError>;
