//! Error types returned by the kernel.

use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::{Frame, PlayerHandle};

/// Why a frame number was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum InvalidFrameReason {
    /// The frame was [`Frame::NULL`].
    NullFrame,
    /// The frame is negative but not [`Frame::NULL`].
    Negative,
    /// The frame lies before the first tick the structure tracks.
    BeforeStart {
        /// The first tick the structure tracks.
        start: Frame,
    },
    /// Frames must be pushed or recorded in strictly increasing order.
    NotIncreasing {
        /// The most recent frame already stored.
        last: Frame,
    },
    /// The frame does not fall on the configured sampling interval.
    OffInterval {
        /// The sampling interval in ticks.
        interval: u32,
    },
    /// The frame is further ahead of the last complete tick than the input
    /// history accepts.
    BeyondHorizon {
        /// The highest tick currently accepted.
        horizon: Frame,
    },
    /// The frame is further ahead than the prediction window allows.
    OutsidePredictionWindow {
        /// The last verified frame.
        verified: Frame,
        /// The configured maximum prediction.
        max_prediction: usize,
    },
}

impl InvalidFrameReason {
    /// The reason a stored tick is rejected, or `None` if it is non-negative.
    #[must_use]
    pub const fn for_negative(frame: Frame) -> Option<Self> {
        if frame.is_null() {
            Some(Self::NullFrame)
        } else if frame.is_valid() {
            None
        } else {
            Some(Self::Negative)
        }
    }
}

impl Display for InvalidFrameReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NullFrame => write!(f, "frame is NULL"),
            Self::Negative => write!(f, "frame is negative"),
            Self::BeforeStart { start } => write!(f, "frame precedes start frame {}", start),
            Self::NotIncreasing { last } => {
                write!(f, "frame must be greater than last stored frame {}", last)
            },
            Self::OffInterval { interval } => {
                write!(f, "frame is not a multiple of the interval {}", interval)
            },
            Self::BeyondHorizon { horizon } => {
                write!(f, "frame is past the input horizon {}", horizon)
            },
            Self::OutsidePredictionWindow {
                verified,
                max_prediction,
            } => write!(
                f,
                "frame exceeds verified frame {} by more than {} predicted frames",
                verified, max_prediction
            ),
        }
    }
}

/// Why a system index operation was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum SystemIndexReason {
    /// System indices are fixed once the graph is built.
    GraphSealed,
    /// The system index exceeds the bitset width.
    OutOfRange {
        /// The offending index.
        index: usize,
        /// Number of bits available.
        capacity: usize,
    },
    /// More systems were registered than the enable bitset can hold.
    TooManySystems {
        /// Number of systems registered.
        count: usize,
        /// Number of bits available.
        capacity: usize,
    },
    /// A child was attached to a system that is not a group.
    NotAGroup {
        /// The parent index.
        parent: usize,
    },
    /// Two systems share a name.
    DuplicateName {
        /// The duplicated name.
        name: String,
    },
}

impl Display for SystemIndexReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GraphSealed => write!(f, "system indices cannot be reassigned after session start"),
            Self::OutOfRange { index, capacity } => {
                write!(f, "system index {} out of range (capacity {})", index, capacity)
            },
            Self::TooManySystems { count, capacity } => write!(
                f,
                "{} systems registered but the enable bitset holds {}",
                count, capacity
            ),
            Self::NotAGroup { parent } => {
                write!(f, "system {} cannot own children: not a group", parent)
            },
            Self::DuplicateName { name } => write!(f, "system name '{}' registered twice", name),
        }
    }
}

/// This enum contains all error messages this library can return. Most API functions will generally return a [`Result<(), LockstepError>`].
///
/// [`Result<(), LockstepError>`]: std::result::Result
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum LockstepError {
    /// Prediction has run `max_prediction` frames ahead of the last verified frame.
    PredictionThreshold,
    /// You made an invalid request, usually by using wrong parameters for function calls.
    InvalidRequest {
        /// Further specifies why the request was invalid.
        info: String,
    },
    /// An invalid frame number was provided.
    InvalidFrame {
        /// The frame that was invalid.
        frame: Frame,
        /// Why the frame was rejected.
        reason: InvalidFrameReason,
    },
    /// An invalid player handle was provided. Player handles must be less than the number of players.
    InvalidPlayerHandle {
        /// The player handle that was invalid.
        handle: PlayerHandle,
        /// The maximum valid player handle (player_count - 1).
        max_handle: PlayerHandle,
    },
    /// A deserialized frame carried a checksum that does not match its contents.
    ChecksumMismatch {
        /// The tick of the rejected frame.
        frame: Frame,
        /// The checksum stored in the encoded frame.
        encoded: u64,
        /// The checksum recomputed from the decoded state.
        computed: u64,
    },
    /// Serialization or deserialization of data failed.
    Serialization {
        /// A description of what failed to serialize/deserialize.
        context: String,
    },
    /// A system registration or enable-bit operation was rejected.
    SystemIndex {
        /// Why the operation failed.
        reason: SystemIndexReason,
    },
    /// A fixed-capacity structure cannot satisfy the request.
    Capacity {
        /// The structure that ran out of room.
        what: &'static str,
        /// The amount that was requested.
        requested: usize,
        /// The available capacity.
        capacity: usize,
    },
    /// An internal error occurred that should not happen under normal operation.
    /// If you encounter this error, please report it as a bug.
    InternalError {
        /// A description of the internal error.
        context: String,
    },
}

impl LockstepError {
    pub(crate) fn invalid_request(info: impl Into<String>) -> Self {
        Self::InvalidRequest { info: info.into() }
    }

    pub(crate) fn serialization(context: impl Into<String>) -> Self {
        Self::Serialization {
            context: context.into(),
        }
    }
}

impl Display for LockstepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockstepError::PredictionThreshold => {
                write!(
                    f,
                    "Prediction threshold is reached, cannot proceed without verified input."
                )
            },
            LockstepError::InvalidRequest { info } => {
                write!(f, "Invalid Request: {}", info)
            },
            LockstepError::InvalidFrame { frame, reason } => {
                write!(f, "Invalid frame {}: {}", frame, reason)
            },
            LockstepError::InvalidPlayerHandle { handle, max_handle } => {
                write!(
                    f,
                    "Invalid player handle {}: must be less than or equal to {}",
                    handle, max_handle
                )
            },
            LockstepError::ChecksumMismatch {
                frame,
                encoded,
                computed,
            } => {
                write!(
                    f,
                    "Checksum mismatch on frame {}: encoded {:#018x}, computed {:#018x}",
                    frame, encoded, computed
                )
            },
            LockstepError::Serialization { context } => {
                write!(f, "Serialization error: {}", context)
            },
            LockstepError::SystemIndex { reason } => {
                write!(f, "System index error: {}", reason)
            },
            LockstepError::Capacity {
                what,
                requested,
                capacity,
            } => {
                write!(
                    f,
                    "Capacity exceeded for {}: requested {}, capacity {}",
                    what, requested, capacity
                )
            },
            LockstepError::InternalError { context } => {
                write!(f, "Internal error (please report as bug): {}", context)
            },
        }
    }
}

impl Error for LockstepError {}

impl From<SystemIndexReason> for LockstepError {
    fn from(reason: SystemIndexReason) -> Self {
        Self::SystemIndex { reason }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn checksum_mismatch_display_carries_both_values() {
        let err = LockstepError::ChecksumMismatch {
            frame: Frame::new(12),
            encoded: 0xAB,
            computed: 0xCD,
        };
        let text = err.to_string();
        assert!(text.contains("frame 12"));
        assert!(text.contains("0x00000000000000ab"));
        assert!(text.contains("0x00000000000000cd"));
    }

    #[test]
    fn system_index_reason_converts() {
        let err: LockstepError = SystemIndexReason::GraphSealed.into();
        assert!(matches!(
            err,
            LockstepError::SystemIndex {
                reason: SystemIndexReason::GraphSealed
            }
        ));
        assert!(err.to_string().contains("after session start"));
    }

    #[test]
    fn invalid_frame_display() {
        let err = LockstepError::InvalidFrame {
            frame: Frame::new(3),
            reason: InvalidFrameReason::NotIncreasing { last: Frame::new(5) },
        };
        assert_eq!(
            err.to_string(),
            "Invalid frame 3: frame must be greater than last stored frame 5"
        );
    }
}
