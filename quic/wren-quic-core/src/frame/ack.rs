// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{error::Error, packet::number::PacketNumber, varint::VarInt};
use alloc::vec::Vec;
use core::{fmt, time::Duration};
use s2n_codec::{DecoderBuffer, DecoderBufferResult, DecoderError, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.3
//# Receivers send ACK frames (types 0x02 and 0x03) to inform senders of
//# packets they have received and processed.  The ACK frame contains one
//# or more ACK Ranges.  ACK Ranges identify acknowledged packets.  If
//# the frame type is 0x03, ACK frames also contain the cumulative count
//# of QUIC packets with associated ECN marks received on the connection
//# up until this point.

const ACK_TAG: u8 = 0x02;
const ACK_W_ECN_TAG: u8 = 0x03;

/// An inclusive range of acknowledged packet numbers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AckRange {
    pub largest: PacketNumber,
    pub smallest: PacketNumber,
}

impl AckRange {
    #[inline]
    pub fn new(smallest: PacketNumber, largest: PacketNumber) -> Self {
        debug_assert!(smallest <= largest);
        Self { largest, smallest }
    }

    #[inline]
    pub fn contains(&self, packet_number: PacketNumber) -> bool {
        self.smallest <= packet_number && packet_number <= self.largest
    }
}

/// Validates that `ranges` form a well-formed ACK: non-empty, each range
/// ordered, strictly descending, and separated by a gap of at least one
/// packet number (so the wire `gap` field is representable).
#[inline]
pub fn is_valid_range_set(ranges: &[AckRange]) -> bool {
    if ranges.is_empty() {
        return false;
    }
    let mut prev_smallest: Option<PacketNumber> = None;
    for range in ranges {
        if range.largest < range.smallest {
            return false;
        }
        if let Some(prev_smallest) = prev_smallest {
            let gap_representable = range
                .largest
                .checked_add(2)
                .map_or(false, |limit| limit <= prev_smallest);
            if !gap_representable {
                return false;
            }
        }
        prev_smallest = Some(range.smallest);
    }
    true
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.3.2
//# The ACK frame uses the least significant bit of the type value (that
//# is, type 0x03) to indicate ECN feedback and report receipt of QUIC
//# packets with associated ECN codepoints.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EcnCounts {
    pub ecn_ce: VarInt,
    pub ect_0: VarInt,
    pub ect_1: VarInt,
}

/// An ACK frame over an owned, descending list of [`AckRange`]s
#[derive(Clone, PartialEq, Eq)]
pub struct AckFrame {
    /// Acknowledgement delay in its wire encoding; see [`encode_ack_delay`]
    pub ack_delay: VarInt,
    ranges: Vec<AckRange>,
    pub ecn_counts: Option<EcnCounts>,
}

impl AckFrame {
    /// Builds an ACK frame, validating the range set
    #[inline]
    pub fn new(
        ranges: Vec<AckRange>,
        ack_delay: VarInt,
        ecn_counts: Option<EcnCounts>,
    ) -> Result<Self, Error> {
        if !is_valid_range_set(&ranges) {
            return Err(Error::InvalidAckRanges);
        }
        Ok(Self {
            ack_delay,
            ranges,
            ecn_counts,
        })
    }

    #[inline]
    pub fn tag(&self) -> u8 {
        if self.ecn_counts.is_some() {
            ACK_W_ECN_TAG
        } else {
            ACK_TAG
        }
    }

    #[inline]
    pub fn largest_acknowledged(&self) -> PacketNumber {
        self.ranges[0].largest
    }

    /// The acknowledged ranges in descending order of `largest`
    #[inline]
    pub fn ranges(&self) -> &[AckRange] {
        &self.ranges
    }

    #[inline]
    pub fn into_ranges(self) -> Vec<AckRange> {
        self.ranges
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-19.3
    //# ACK Frame {
    //#   Type (i) = 0x02..0x03,
    //#   Largest Acknowledged (i),
    //#   ACK Delay (i),
    //#   ACK Range Count (i),
    //#   First ACK Range (i),
    //#   ACK Range (..) ...,
    //#   [ECN Counts (..)],
    //# }
    pub fn decode(buffer: DecoderBuffer) -> DecoderBufferResult<Self> {
        let (tag, buffer) = buffer.decode::<VarInt>()?;
        let has_ecn = match tag.as_u64() {
            tag if tag == ACK_TAG as u64 => false,
            tag if tag == ACK_W_ECN_TAG as u64 => true,
            _ => return Err(DecoderError::InvariantViolation("unexpected frame type")),
        };

        let (largest_acknowledged, buffer) = buffer.decode::<VarInt>()?;
        let (ack_delay, buffer) = buffer.decode::<VarInt>()?;
        let (range_count, buffer) = buffer.decode::<VarInt>()?;
        let (first_ack_range, mut buffer) = buffer.decode::<VarInt>()?;

        let smallest = largest_acknowledged
            .checked_sub(first_ack_range)
            .ok_or(ACK_RANGE_DECODING_ERROR)?;

        let mut ranges = Vec::with_capacity(range_count.as_u64().min(64) as usize + 1);
        ranges.push(AckRange::new(smallest.into(), largest_acknowledged.into()));

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.3.1
        //# Each ACK Range consists of alternating Gap and ACK Range Length
        //# values in descending packet number order.
        let mut prev_smallest = smallest;
        for _ in 0..range_count.as_u64() {
            let (gap, remaining) = buffer.decode::<VarInt>()?;
            let (length, remaining) = remaining.decode::<VarInt>()?;
            buffer = remaining;

            //= https://www.rfc-editor.org/rfc/rfc9000#section-19.3.1
            //# largest = previous_smallest - gap - 2
            let largest = prev_smallest
                .checked_sub(gap)
                .and_then(|value| value.checked_sub(VarInt::from_u8(2)))
                .ok_or(ACK_RANGE_DECODING_ERROR)?;
            let smallest = largest
                .checked_sub(length)
                .ok_or(ACK_RANGE_DECODING_ERROR)?;

            ranges.push(AckRange::new(smallest.into(), largest.into()));
            prev_smallest = smallest;
        }

        let (ecn_counts, buffer) = if has_ecn {
            let (ecn_ce, buffer) = buffer.decode::<VarInt>()?;
            let (ect_0, buffer) = buffer.decode::<VarInt>()?;
            let (ect_1, buffer) = buffer.decode::<VarInt>()?;
            (
                Some(EcnCounts {
                    ecn_ce,
                    ect_0,
                    ect_1,
                }),
                buffer,
            )
        } else {
            (None, buffer)
        };

        let frame = Self {
            ack_delay,
            ranges,
            ecn_counts,
        };

        Ok((frame, buffer))
    }
}

impl EncoderValue for AckFrame {
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        debug_assert!(is_valid_range_set(&self.ranges));

        encoder.encode(&VarInt::from_u8(self.tag()));

        let first = self.ranges[0];
        let first_ack_range = first
            .largest
            .checked_sub(first.smallest)
            .expect("ranges are validated on construction");

        encoder.encode(&first.largest.as_varint());
        encoder.encode(&self.ack_delay);
        encoder.encode(&VarInt::new_unchecked(self.ranges.len() as u64 - 1));
        encoder.encode(&VarInt::new_unchecked(first_ack_range));

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.3.1
        //# Gap and ACK Range Length values use a relative integer encoding for
        //# efficiency.  Though each encoded value is positive, the values are
        //# subtracted, so that each ACK Range describes progressively lower-
        //# numbered packets.
        let mut prev_smallest = first.smallest;
        for range in &self.ranges[1..] {
            let gap = prev_smallest.as_u64() - range.largest.as_u64() - 2;
            let length = range.largest.as_u64() - range.smallest.as_u64();

            encoder.encode(&VarInt::new_unchecked(gap));
            encoder.encode(&VarInt::new_unchecked(length));

            prev_smallest = range.smallest;
        }

        if let Some(ecn_counts) = self.ecn_counts.as_ref() {
            encoder.encode(&ecn_counts.ecn_ce);
            encoder.encode(&ecn_counts.ect_0);
            encoder.encode(&ecn_counts.ect_1);
        }
    }
}

impl fmt::Debug for AckFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AckFrame")
            .field("ack_delay", &self.ack_delay)
            .field("ranges", &self.ranges)
            .field("ecn_counts", &self.ecn_counts)
            .finish()
    }
}

const ACK_RANGE_DECODING_ERROR: DecoderError = DecoderError::InvariantViolation("invalid ACK ranges");

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.3
//# ACK Delay:  A variable-length integer encoding the acknowledgment
//# delay in microseconds; see Section 13.2.5.  It is decoded by
//# multiplying the value in the field by 2 to the power of the
//# ack_delay_exponent transport parameter sent by the sender of the
//# ACK frame; see Section 18.2.

#[inline]
pub fn encode_ack_delay(delay: Duration, exponent: u8) -> VarInt {
    let micros = delay.as_micros() as u64;
    VarInt::new(micros >> exponent).unwrap_or(VarInt::MAX)
}

#[inline]
pub fn decode_ack_delay(wire: VarInt, exponent: u8) -> Duration {
    let micros = wire
        .as_u64()
        .checked_shl(exponent as u32)
        .unwrap_or(u64::MAX);
    Duration::from_micros(micros)
}
