// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    error::Error,
    varint::{VarInt, MAX_VARINT_VALUE},
};
use core::fmt;
use s2n_codec::{DecoderBuffer, DecoderBufferResult, DecoderError, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-12.3
//# The packet number is an integer in the range 0 to 2^62-1.  This
//# number is used in determining the cryptographic nonce for packet
//# protection.  Each endpoint maintains a separate packet number for
//# sending and receiving.

/// A full, unprotected packet number
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketNumber(VarInt);

impl PacketNumber {
    pub const ZERO: Self = Self(VarInt::ZERO);

    #[inline]
    pub const fn new(value: VarInt) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0.as_u64()
    }

    #[inline]
    pub fn checked_add(self, rhs: u64) -> Option<Self> {
        self.0.checked_add_u64(rhs).map(Self)
    }

    #[inline]
    pub fn checked_sub(self, rhs: Self) -> Option<u64> {
        self.as_u64().checked_sub(rhs.as_u64())
    }

    /// Returns the distance to the preceding packet number, if `self` is the
    /// direct successor of `other`
    #[inline]
    pub fn checked_distance(self, other: Self) -> Option<u64> {
        self.checked_sub(other)
    }

    /// Returns the next packet number
    #[inline]
    pub fn next(self) -> Option<Self> {
        self.checked_add(1)
    }

    #[inline]
    pub const fn as_varint(self) -> VarInt {
        self.0
    }
}

impl From<VarInt> for PacketNumber {
    #[inline]
    fn from(value: VarInt) -> Self {
        Self(value)
    }
}

impl fmt::Display for PacketNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-12.3
//# *  Initial space: All Initial packets (Section 17.2.2) are in this
//#    space.
//#
//# *  Handshake space: All Handshake packets (Section 17.2.4) are in
//#    this space.
//#
//# *  Application data space: All 0-RTT (Section 17.2.3) and 1-RTT
//#    (Section 17.3) encrypted packets are in this space.

/// The available packet number spaces for QUIC packets
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PacketNumberSpace {
    #[default]
    Initial = 0,
    Handshake = 1,
    ApplicationData = 2,
}

impl PacketNumberSpace {
    pub const COUNT: usize = 3;

    #[inline]
    pub fn is_initial(self) -> bool {
        matches!(self, Self::Initial)
    }

    #[inline]
    pub fn is_handshake(self) -> bool {
        matches!(self, Self::Handshake)
    }

    #[inline]
    pub fn is_application_data(self) -> bool {
        matches!(self, Self::ApplicationData)
    }

    /// Returns the index of the space in per-space state arrays
    #[inline]
    pub fn as_index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Handshake => "handshake",
            Self::ApplicationData => "application",
        }
    }
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.1
//# Packet numbers are integers in the range 0 to 2^62-1 (Section 12.3).
//# When present in long or short packet headers, they are encoded in 1
//# to 4 bytes.  The number of bits required to represent the packet
//# number is reduced by including only the least significant bits of the
//# packet number.

/// A truncated packet number as it appears on the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TruncatedPacketNumber {
    value: u32,
    len: u8,
}

impl TruncatedPacketNumber {
    /// Creates a truncated packet number from its wire value and length in
    /// bytes (1-4)
    #[inline]
    pub fn new(value: u32, len: u8) -> Self {
        debug_assert!((1..=4).contains(&len));
        debug_assert!(len == 4 || value < 1 << (len * 8));
        Self { value, len }
    }

    #[inline]
    pub fn into_u32(self) -> u32 {
        self.value
    }

    /// Length of the wire encoding in bytes
    #[inline]
    pub fn bytesize(self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn bitsize(self) -> usize {
        self.bytesize() * 8
    }

    /// Returns the packet number length bits for the packet tag
    #[inline]
    pub fn into_packet_tag_mask(self) -> u8 {
        self.len - 1
    }

    /// Reads a truncated packet number of `len` bytes (1-4) from the buffer
    #[inline]
    pub fn decode(buffer: DecoderBuffer, len: u8) -> DecoderBufferResult<Self> {
        if !(1..=4).contains(&len) {
            return Err(DecoderError::InvariantViolation(
                "invalid packet number length",
            ));
        }
        let (bytes, buffer) = buffer.decode_slice(len as usize)?;
        let mut value = 0u32;
        for byte in bytes.into_less_safe_slice() {
            value = (value << 8) | *byte as u32;
        }
        Ok((Self { value, len }, buffer))
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-17.1
    //# Once header protection is removed, the packet number is decoded by
    //# finding the packet number value that is closest to the next expected
    //# packet.  The next expected packet is the highest received packet
    //# number plus one.
    #[inline]
    pub fn expand(self, largest_received: PacketNumber) -> PacketNumber {
        let expected = largest_received.as_u64() + 1;
        let window = 1u64 << self.bitsize();
        let mask = window - 1;
        let base = expected & !mask;
        let value = self.value as u64;

        let same = base + value;
        let below = if base >= window { base - window + value } else { same };
        let above = base + window + value;

        let delta = |candidate: u64| expected.abs_diff(candidate);

        // nearest candidate wins; on a tie the larger candidate is taken so
        // that a value sitting exactly half a window away resolves forwards
        let mut selected = same;
        if delta(below) < delta(selected) {
            selected = below;
        }
        if above <= MAX_VARINT_VALUE && delta(above) <= delta(selected) {
            selected = above;
        }

        PacketNumber(VarInt::new(selected).unwrap_or(VarInt::MAX))
    }
}

impl EncoderValue for TruncatedPacketNumber {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        let bytes = self.value.to_be_bytes();
        encoder.write_slice(&bytes[4 - self.bytesize()..]);
    }
}

impl PacketNumber {
    //= https://www.rfc-editor.org/rfc/rfc9000#section-17.1
    //# As a result, the size of the packet number encoding is at least one
    //# bit more than the base-2 logarithm of the number of contiguous
    //# unacknowledged packet numbers, including the new packet.
    #[inline]
    pub fn truncate(
        self,
        largest_acked: Option<PacketNumber>,
    ) -> Result<TruncatedPacketNumber, Error> {
        let num_unacked = match largest_acked {
            Some(largest_acked) => self
                .checked_sub(largest_acked)
                .ok_or(Error::NonMonotonicPacketNumber)?,
            None => self.as_u64() + 1,
        };

        let min_bits = 64 - num_unacked.leading_zeros() as u64 + 1;
        let len = match min_bits {
            0..=8 => 1,
            9..=16 => 2,
            17..=24 => 3,
            25..=32 => 4,
            _ => return Err(Error::PacketNumberTruncation),
        };
        let mask = if len == 4 { u32::MAX } else { (1u32 << (len * 8)) - 1 };

        Ok(TruncatedPacketNumber::new(
            (self.as_u64() & mask as u64) as u32,
            len,
        ))
    }
}
