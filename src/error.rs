//! Error types for chapterflow.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Message channel errors
    #[error("Message channel failed: {message}")]
    Transport { message: String },

    #[error("Message protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    // Chapter pipeline errors
    #[error("Malformed chapter payload: {reason}")]
    MalformedChapter { reason: String },

    #[error("Chapter {number} already received")]
    DuplicateChapter { number: u32 },

    #[error("Chapter {number} out of order (expected chapter {expected})")]
    OutOfOrderChapter { number: u32, expected: u32 },

    #[error(
        "Chapter {number} words start at {first_start:.3}s, before timeline tail at {tail_start:.3}s"
    )]
    TimelineOrder {
        number: u32,
        first_start: f64,
        tail_start: f64,
    },

    // Playback errors
    #[error("Playback stall not recovered at {position:.3}s")]
    StallUnrecovered { position: f64 },

    #[error("Media player command failed: {message}")]
    Player { message: String },

    // Actor/session errors
    #[error("Session {epoch} has ended")]
    SessionEnded { epoch: u64 },

    #[error("Engine input queue closed")]
    QueueClosed,

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// True for conditions the engine handles locally without leaving the session.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::MalformedChapter { .. }
                | EngineError::DuplicateChapter { .. }
                | EngineError::StallUnrecovered { .. }
                | EngineError::Player { .. }
        )
    }

    /// True for conditions that end the session in the `error` state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Transport { .. })
    }

    /// True for invariant violations: the input is rejected and reported loudly.
    pub fn is_defect(&self) -> bool {
        matches!(
            self,
            EngineError::OutOfOrderChapter { .. } | EngineError::TimelineOrder { .. }
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_transport_display() {
        let error = EngineError::Transport {
            message: "socket closed".to_string(),
        };
        assert_eq!(error.to_string(), "Message channel failed: socket closed");
    }

    #[test]
    fn test_malformed_chapter_display() {
        let error = EngineError::MalformedChapter {
            reason: "missing audioDurationSeconds".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Malformed chapter payload: missing audioDurationSeconds"
        );
    }

    #[test]
    fn test_duplicate_chapter_display() {
        let error = EngineError::DuplicateChapter { number: 3 };
        assert_eq!(error.to_string(), "Chapter 3 already received");
    }

    #[test]
    fn test_out_of_order_display() {
        let error = EngineError::OutOfOrderChapter {
            number: 4,
            expected: 2,
        };
        assert_eq!(
            error.to_string(),
            "Chapter 4 out of order (expected chapter 2)"
        );
    }

    #[test]
    fn test_timeline_order_display() {
        let error = EngineError::TimelineOrder {
            number: 2,
            first_start: 9.5,
            tail_start: 10.0,
        };
        assert_eq!(
            error.to_string(),
            "Chapter 2 words start at 9.500s, before timeline tail at 10.000s"
        );
    }

    #[test]
    fn test_stall_unrecovered_display() {
        let error = EngineError::StallUnrecovered { position: 42.0 };
        assert_eq!(
            error.to_string(),
            "Playback stall not recovered at 42.000s"
        );
    }

    #[test]
    fn test_session_ended_display() {
        let error = EngineError::SessionEnded { epoch: 7 };
        assert_eq!(error.to_string(), "Session 7 has ended");
    }

    #[test]
    fn test_classification() {
        assert!(EngineError::DuplicateChapter { number: 1 }.is_recoverable());
        assert!(
            EngineError::MalformedChapter {
                reason: "x".to_string()
            }
            .is_recoverable()
        );
        assert!(EngineError::StallUnrecovered { position: 1.0 }.is_recoverable());
        assert!(
            EngineError::Transport {
                message: "x".to_string()
            }
            .is_fatal()
        );
        assert!(
            EngineError::OutOfOrderChapter {
                number: 3,
                expected: 2
            }
            .is_defect()
        );
        assert!(!EngineError::QueueClosed.is_recoverable());
        assert!(!EngineError::QueueClosed.is_fatal());
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: EngineError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: EngineError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_from_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error: EngineError = json_error.into();
        assert!(error.to_string().starts_with("Message protocol error"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<EngineError>();
        assert_sync::<EngineError>();
    }
}
