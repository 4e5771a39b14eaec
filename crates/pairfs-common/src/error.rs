//! The universal result code for PairFS operations
//!
//! `OpsErr` is threaded through the node directory, the buddy group
//! mapper, the mirrored-message protocol and the resync job, and is
//! what crosses the wire in response payloads. It deliberately includes
//! `Success` so that a primary can compare its own outcome against the
//! one reported by its secondary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result code shared by every PairFS operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpsErr {
    Success,
    /// Unspecified internal failure (programmer error, invariant violation)
    Internal,
    /// Operation was interrupted by shutdown
    Interrupted,
    /// Communication with a peer failed (timeout, reset, connect failure)
    Communication,
    /// Entry or ID already exists
    Exists,
    /// Path component does not exist
    PathNotExists,
    /// Directory is not empty
    NotEmpty,
    /// Resource is busy (e.g. a resync is already running, a target is
    /// already member of another buddy group, a conflicting file lock)
    InUse,
    /// Optimistic concurrency check failed; caller should re-read and retry
    Again,
    UnknownNode,
    UnknownTarget,
    UnknownPool,
    /// Invalid argument (e.g. primary == secondary)
    InvalidArg,
    /// Requestor does not own the referenced handle
    NotOwner,
    OutOfMem,
}

impl OpsErr {
    /// Wire representation of this code.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Internal => 1,
            Self::Interrupted => 2,
            Self::Communication => 3,
            Self::Exists => 4,
            Self::PathNotExists => 5,
            Self::NotEmpty => 6,
            Self::InUse => 7,
            Self::Again => 8,
            Self::UnknownNode => 9,
            Self::UnknownTarget => 10,
            Self::UnknownPool => 11,
            Self::InvalidArg => 12,
            Self::NotOwner => 13,
            Self::OutOfMem => 14,
        }
    }

    /// Decode a wire code. Unknown codes collapse to `Internal`; a peer
    /// speaking a newer protocol revision must not crash us.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Success,
            2 => Self::Interrupted,
            3 => Self::Communication,
            4 => Self::Exists,
            5 => Self::PathNotExists,
            6 => Self::NotEmpty,
            7 => Self::InUse,
            8 => Self::Again,
            9 => Self::UnknownNode,
            10 => Self::UnknownTarget,
            11 => Self::UnknownPool,
            12 => Self::InvalidArg,
            13 => Self::NotOwner,
            14 => Self::OutOfMem,
            _ => Self::Internal,
        }
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// Check if this is a transient error the caller may retry.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Communication | Self::Again | Self::InUse)
    }

    /// Errors that indicate the referenced object is missing rather than
    /// an operational failure.
    #[must_use]
    pub const fn is_not_found(self) -> bool {
        matches!(
            self,
            Self::PathNotExists | Self::UnknownNode | Self::UnknownTarget | Self::UnknownPool
        )
    }
}

impl fmt::Display for OpsErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::Success => "success",
            Self::Internal => "internal error",
            Self::Interrupted => "operation interrupted",
            Self::Communication => "communication error",
            Self::Exists => "entry exists already",
            Self::PathNotExists => "path does not exist",
            Self::NotEmpty => "directory is not empty",
            Self::InUse => "resource is in use",
            Self::Again => "state changed concurrently, try again",
            Self::UnknownNode => "unknown node",
            Self::UnknownTarget => "unknown target",
            Self::UnknownPool => "unknown storage pool",
            Self::InvalidArg => "invalid argument",
            Self::NotOwner => "not owner of the handle",
            Self::OutOfMem => "out of memory",
        };
        f.write_str(msg)
    }
}
