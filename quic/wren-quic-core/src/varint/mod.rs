// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::{fmt, ops::Deref};
use s2n_codec::{decoder_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-16
//# QUIC packets and frames commonly use a variable-length encoding for
//# non-negative integer values.  This encoding ensures that smaller
//# integer values need fewer bytes to encode.

//= https://www.rfc-editor.org/rfc/rfc9000#section-16
//# The QUIC variable-length integer encoding reserves the two most
//# significant bits of the first byte to encode the base 2 logarithm of
//# the integer encoding length in bytes.  The integer value is encoded
//# on the remaining bits, in network byte order.

pub const MAX_VARINT_VALUE: u64 = (1 << 62) - 1;

const ONE_BYTE_MAX: u64 = (1 << 6) - 1;
const TWO_BYTE_MAX: u64 = (1 << 14) - 1;
const FOUR_BYTE_MAX: u64 = (1 << 30) - 1;

#[derive(Debug)]
pub struct VarIntError;

impl fmt::Display for VarIntError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "varint range exceeded")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for VarIntError {}

/// A 62-bit variable-length integer
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct VarInt(u64);

impl VarInt {
    pub const MAX: Self = Self(MAX_VARINT_VALUE);
    pub const ZERO: Self = Self(0);

    #[inline]
    pub const fn new(value: u64) -> Result<Self, VarIntError> {
        if value > MAX_VARINT_VALUE {
            return Err(VarIntError);
        }
        Ok(Self(value))
    }

    /// Returns a `VarInt` without validating the value is less than VarInt::MAX
    ///
    /// Callers must check the value does not exceed `MAX_VARINT_VALUE`.
    #[inline]
    pub const fn new_unchecked(value: u64) -> Self {
        debug_assert!(value <= MAX_VARINT_VALUE);
        Self(value)
    }

    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        Self(value as u64)
    }

    #[inline]
    pub const fn from_u16(value: u16) -> Self {
        Self(value as u64)
    }

    #[inline]
    pub const fn from_u32(value: u32) -> Self {
        Self(value as u64)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        Self::new(self.0.checked_add(rhs.0)?).ok()
    }

    #[inline]
    pub fn checked_add_u64(self, rhs: u64) -> Option<Self> {
        Self::new(self.0.checked_add(rhs)?).ok()
    }

    #[inline]
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        Some(Self(self.0.checked_sub(rhs.0)?))
    }

    #[inline]
    pub fn saturating_add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0).min(MAX_VARINT_VALUE))
    }

    /// Returns the number of bytes the value occupies on the wire
    #[inline]
    #[allow(clippy::match_overlapping_arm)]
    pub fn encoding_len(self) -> usize {
        match self.0 {
            0..=ONE_BYTE_MAX => 1,
            0..=TWO_BYTE_MAX => 2,
            0..=FOUR_BYTE_MAX => 4,
            _ => 8,
        }
    }
}

impl Deref for VarInt {
    type Target = u64;

    #[inline]
    fn deref(&self) -> &u64 {
        &self.0
    }
}

impl fmt::Display for VarInt {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u8> for VarInt {
    #[inline]
    fn from(value: u8) -> Self {
        Self(value as u64)
    }
}

impl From<u16> for VarInt {
    #[inline]
    fn from(value: u16) -> Self {
        Self(value as u64)
    }
}

impl From<u32> for VarInt {
    #[inline]
    fn from(value: u32) -> Self {
        Self(value as u64)
    }
}

impl TryFrom<u64> for VarInt {
    type Error = VarIntError;

    #[inline]
    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<usize> for VarInt {
    type Error = VarIntError;

    #[inline]
    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value as u64)
    }
}

impl From<VarInt> for u64 {
    #[inline]
    fn from(value: VarInt) -> Self {
        value.0
    }
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-16
//# This means that integers are encoded on 1, 2, 4, or 8 bytes and can
//# encode 6-, 14-, 30-, or 62-bit values, respectively.

impl EncoderValue for VarInt {
    #[inline]
    #[allow(clippy::match_overlapping_arm)]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        match self.0 {
            value @ 0..=ONE_BYTE_MAX => encoder.encode(&(value as u8)),
            value @ 0..=TWO_BYTE_MAX => encoder.encode(&((value as u16) | (0b01 << 14))),
            value @ 0..=FOUR_BYTE_MAX => encoder.encode(&((value as u32) | (0b10 << 30))),
            value => encoder.encode(&(value | (0b11 << 62))),
        }
    }
}

decoder_value!(
    impl<'a> VarInt {
        fn decode(buffer: Buffer) -> Result<Self> {
            let (first, buffer) = buffer.decode::<u8>()?;
            let two_bit = first >> 6;
            let mut value = (first & 0b0011_1111) as u64;

            let remaining_len = (1usize << two_bit) - 1;
            let (tail, buffer) = buffer.decode_slice(remaining_len)?;
            for byte in tail.into_less_safe_slice() {
                value = (value << 8) | *byte as u64;
            }

            Ok((VarInt(value), buffer))
        }
    }
);
