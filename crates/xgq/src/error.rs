use thiserror::Error;

pub type Result<T> = std::result::Result<T, XgqError>;

/// Unified error type for XGQ transport operations.
///
/// Variants split into two families with very different handling rules:
///
/// - Structural errors (`TooSmall`, `UnsupportedVersion`, `Corrupt`,
///   `InvalidArgument`) are raised once at setup and abort that setup attempt
///   only.
/// - Transient outcomes (`NotReady`, `NoSpace`, `Empty`) are expected
///   steady-state results of polling a peer and must not be logged or
///   escalated; callers simply retry on a later iteration.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum XgqError {
    #[error("ring region of {total_len} bytes cannot hold {min_slots} slots of {slot_size} bytes")]
    TooSmall {
        total_len: u64,
        slot_size: u32,
        min_slots: u32,
    },

    /// The allocator has not yet published the magic sentinel. Poll again.
    #[error("ring header not ready (allocator has not published the sentinel)")]
    NotReady,

    #[error("unsupported protocol version {major}.{minor} (expected major {expected})")]
    UnsupportedVersion { major: u16, minor: u16, expected: u16 },

    #[error("corrupt ring header: slot count {slot_count} is not a power of two >= 2")]
    Corrupt { slot_count: u32 },

    /// Producer ring is full even after a cursor refresh. Retry later.
    #[error("no submission slot available")]
    NoSpace,

    /// Consumer ring is empty even after a cursor refresh. Retry later.
    #[error("ring is empty")]
    Empty,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl XgqError {
    /// True for outcomes that are part of normal polling rather than faults.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            XgqError::NotReady | XgqError::NoSpace | XgqError::Empty
        )
    }
}
