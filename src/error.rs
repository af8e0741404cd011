//! Engine Error Types
//!
//! Unified error type for operations that can fail. Creating or destroying
//! engine objects while a step is in progress is a programming error; those
//! operations return `Result<T, WorldError>` instead of panicking.

use core::fmt;

/// Unified error type for world operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorldError {
    /// The world is mid-step. Bodies, fixtures, and joints cannot be created
    /// or destroyed until the step completes.
    Locked,
    /// A body index does not refer to a live body.
    InvalidBody {
        /// The offending index
        index: u32,
    },
    /// A fixture index does not refer to a live fixture.
    InvalidFixture {
        /// The offending index
        index: u32,
    },
    /// A joint index does not refer to a live joint.
    InvalidJoint {
        /// The offending index
        index: u32,
    },
    /// A joint definition references the same body twice or a missing body.
    InvalidJointDef {
        /// Human-readable description of the problem
        reason: &'static str,
    },
    /// A capacity limit was exceeded (too many threads, task groups, etc.).
    CapacityExceeded {
        /// What resource was exhausted
        resource: &'static str,
        /// The limit that was exceeded
        limit: usize,
    },
}

impl fmt::Display for WorldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Locked => write!(f, "world is locked (mid-step)"),
            Self::InvalidBody { index } => write!(f, "invalid body index {index}"),
            Self::InvalidFixture { index } => write!(f, "invalid fixture index {index}"),
            Self::InvalidJoint { index } => write!(f, "invalid joint index {index}"),
            Self::InvalidJointDef { reason } => write!(f, "invalid joint definition: {reason}"),
            Self::CapacityExceeded { resource, limit } => {
                write!(f, "{resource} capacity exceeded (limit={limit})")
            }
        }
    }
}

impl std::error::Error for WorldError {}
