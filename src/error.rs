//! Error taxonomy.
//!
//! Every failure is returned as a `Result` to the caller; the system alarm
//! (`crate::state::SystemState`) is the cross-cutting channel for conditions
//! requiring operator intervention. Nothing here unwinds.

use thiserror::Error;

/// Configuration loading/validation error.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read configuration: {0}")]
    Io(String),
    /// TOML parse error.
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    /// Parameter bounds or semantic validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Why the toolsetter probe failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProbeFailKind {
    /// The switch was already tripped when the probe started.
    #[error("toolsetter switch already tripped")]
    AlreadyTripped,
    /// Probe travel completed without contact; the tool is physically missing.
    #[error("no toolsetter contact, tool missing")]
    NoContact,
}

/// Tool change failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AtcError {
    /// Required rack/toolsetter positions absent or malformed at init.
    #[error("ATC not initialized")]
    NotReady,
    /// Requested tool index outside the valid range.
    #[error("invalid tool number: {0}")]
    InvalidTool(u8),
    /// Clamp actuation requested while the spindle is not disabled.
    #[error("clamp actuation rejected: spindle not disabled")]
    ClampWhileSpinning,
    /// Toolsetter probe failed; a system alarm has been raised.
    #[error("tool length probe failed: {0}")]
    Probe(ProbeFailKind),
}
