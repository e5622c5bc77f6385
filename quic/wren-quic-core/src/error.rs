// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::fmt;

/// Failures surfaced by the transport control core.
///
/// Input validation failures leave the connection usable; the offending
/// packet or frame is dropped by the caller. The remaining variants indicate
/// a broken driving sequence and should be treated as fatal by the
/// connection actor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A packet number was recorded out of order for its space
    NonMonotonicPacketNumber,
    /// An ACK frame carried no ranges, or ranges that were not strictly
    /// descending and disjoint
    InvalidAckRanges,
    /// A packet number cannot be truncated into at most four bytes against
    /// the largest acknowledged packet number
    PacketNumberTruncation,
    /// An event for a packet number space arrived after the space was
    /// discarded
    PacketNumberSpaceDiscarded,
    /// An elapsed-time computation went backwards
    InvalidTimestamp,
    /// The loss detection timer fired without a pending deadline or without
    /// any packet crossing the loss threshold
    SpuriousLossTimeout,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NonMonotonicPacketNumber => {
                write!(f, "packet numbers must strictly increase within a space")
            }
            Self::InvalidAckRanges => write!(f, "ACK ranges are empty or not strictly descending"),
            Self::PacketNumberTruncation => {
                write!(f, "packet number does not fit in a four byte encoding")
            }
            Self::PacketNumberSpaceDiscarded => {
                write!(f, "packet number space was already discarded")
            }
            Self::InvalidTimestamp => write!(f, "elapsed time computation went backwards"),
            Self::SpuriousLossTimeout => {
                write!(f, "loss detection timeout fired without a pending loss")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
