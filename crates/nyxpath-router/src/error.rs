// ============================================
// File: crates/nyxpath-router/src/error.rs
// ============================================
//! # Router Error Types
//!
//! ## Last Modified
//! v0.1.0 - Initial router errors

use thiserror::Error;

use nyxpath_common::error::CommonError;
use nyxpath_common::{PathId, RouterId};
use nyxpath_core::error::CoreError;
use nyxpath_transport::error::TransportError;

/// Result type for router operations.
pub type Result<T> = std::result::Result<T, RouterError>;

/// Router error types.
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("Failed to load configuration from '{path}': {reason}")]
    ConfigLoad {
        path: String,
        reason: String,
    },

    #[error("Invalid configuration: {field} - {reason}")]
    ConfigInvalid {
        field: String,
        reason: String,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathId),

    #[error("Path {path} is {current}, operation needs {required}")]
    PathState {
        path: String,
        current: String,
        required: String,
    },

    #[error("Path already registered: {0}")]
    PathExists(PathId),

    #[error("Transit hop limit reached: max {limit}")]
    TransitLimitReached {
        limit: usize,
    },

    #[error("Not enough usable routers: need {needed}, have {available}")]
    NotEnoughRouters {
        needed: usize,
        available: usize,
    },

    #[error("Hop key negotiation with {router:?} failed: {reason}")]
    HopKey {
        router: RouterId,
        reason: String,
    },

    #[error("No exit session on path {0}")]
    NoExit(PathId),

    #[error("Router failed to start: {reason}")]
    StartupFailed {
        reason: String,
    },

    #[error(transparent)]
    Common(#[from] CommonError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RouterError {
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn path_state(
        path: impl Into<String>,
        current: impl std::fmt::Display,
        required: impl Into<String>,
    ) -> Self {
        Self::PathState {
            path: path.into(),
            current: current.to_string(),
            required: required.into(),
        }
    }

    pub fn hop_key(router: RouterId, reason: impl Into<String>) -> Self {
        Self::HopKey {
            router,
            reason: reason.into(),
        }
    }

    pub fn startup_failed(reason: impl Into<String>) -> Self {
        Self::StartupFailed {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigLoad { .. } | Self::ConfigInvalid { .. })
    }

    #[must_use]
    pub const fn is_path_error(&self) -> bool {
        matches!(
            self,
            Self::Common(CommonError::HopCount { .. })
                | Self::PathNotFound(_)
                | Self::PathState { .. }
                | Self::PathExists(_)
                | Self::NoExit(_)
        )
    }

    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ConfigLoad { .. } | Self::StartupFailed { .. })
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::NotEnoughRouters { .. } | Self::TransitLimitReached { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RouterError::config_load("/etc/nyxpath.toml", "file not found");
        assert!(err.to_string().contains("/etc/nyxpath.toml"));

        let err: RouterError = CommonError::HopCount { count: 9, max: 8 }.into();
        assert_eq!(err.to_string(), "Hop count 9 not in [1, 8]");
        assert!(err.is_path_error());
    }

    #[test]
    fn test_error_classification() {
        let config_err = RouterError::config_invalid("paths.hops", "must be > 0");
        assert!(config_err.is_config_error());
        assert!(!config_err.is_fatal());

        assert!(RouterError::PathNotFound(PathId::generate()).is_path_error());
        assert!(RouterError::Transport(TransportError::queue_full("outbound queue")).is_retryable());
        assert!(!RouterError::NoExit(PathId::generate()).is_retryable());
    }
}
