//! Core types for the callback registry library
//!
//! This module defines the handle that crosses the native boundary, the
//! disposal policy attached to each registration and the error taxonomy
//! shared by the registry, the argument buffers and the native bridge.

use crate::native::CallStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Opaque integer identifying a registered callback
///
/// Handles are allocated from a monotonic counter and never reused, so a
/// stale handle fails deterministically instead of aliasing a newer
/// registration. A handle is not a memory address.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Handle(u64);

impl Handle {
    /// The reserved handle of the sentinel entry
    pub const SENTINEL: Handle = Handle(0);

    /// Rebuild a handle from the raw integer held by native code
    pub const fn from_raw(raw: u64) -> Self {
        Handle(raw)
    }

    /// Raw integer representation, as handed to native code
    pub const fn as_raw(self) -> u64 {
        self.0
    }

    /// True if this is the reserved sentinel handle
    pub const fn is_sentinel(self) -> bool {
        self.0 == Self::SENTINEL.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Handle> for u64 {
    fn from(handle: Handle) -> Self {
        handle.0
    }
}

/// What happens to a registration when it is invoked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposal {
    /// Removed from the registry by its first invocation, before it runs
    #[default]
    AutoDispose,
    /// Stays registered until explicitly disposed
    Persistent,
}

impl Disposal {
    /// True for [`Disposal::AutoDispose`]
    pub fn is_auto(self) -> bool {
        matches!(self, Disposal::AutoDispose)
    }
}

impl fmt::Display for Disposal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposal::AutoDispose => write!(f, "auto-dispose"),
            Disposal::Persistent => write!(f, "persistent"),
        }
    }
}

/// Errors that can occur while registering or invoking callbacks
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown callback handle {0} (disposed or never registered)")]
    UnknownCallback(Handle),

    #[error("Sentinel callback (handle 0) invoked")]
    SentinelInvoked,

    #[error("Callback handle space exhausted")]
    HandleSpaceExhausted,

    #[error("Invalid argument buffer: {0}")]
    InvalidBuffer(String),

    #[error("Callback failed: {0}")]
    CallbackFailed(String),

    #[error("Native code reported status {0:?}")]
    NativeStatus(CallStatus),
}

impl RegistryError {
    /// Status code reported to native code for this error
    pub fn status(&self) -> CallStatus {
        match self {
            RegistryError::UnknownCallback(_) => CallStatus::UnknownCallback,
            RegistryError::SentinelInvoked => CallStatus::SentinelInvoked,
            RegistryError::InvalidBuffer(_) => CallStatus::InvalidBuffer,
            RegistryError::CallbackFailed(_) => CallStatus::CallbackFailed,
            RegistryError::HandleSpaceExhausted => CallStatus::CallbackFailed,
            RegistryError::NativeStatus(status) => *status,
        }
    }
}
