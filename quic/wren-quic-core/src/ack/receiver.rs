// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    error::Error,
    frame::ack::{encode_ack_delay, AckFrame, AckRange},
    packet::number::{PacketNumber, PacketNumberSpace},
    status::config::InternalConfig,
    time::{Deadline, Duration, Timestamp},
    varint::VarInt,
};
use alloc::vec::Vec;
use s2n_codec::{Encoder, EncoderValue};

/// An inclusive range of received packet numbers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct RecvRange {
    begin: PacketNumber,
    end: PacketNumber,
}

/// Outcome of attempting to write an ACK frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckTransmission {
    /// An ACK frame was written; `largest_acknowledged` should be recorded
    /// on the outgoing packet so the acknowledged history can be pruned once
    /// the peer confirms it
    Sent {
        largest_acknowledged: PacketNumber,
    },
    /// Nothing to acknowledge, or the delayed-ACK conditions are not met yet
    NoData,
    /// The encoder cannot hold the frame; retrying later is safe
    NoCapacity,
}

/// Received packet history for a single packet number space
#[derive(Clone, Debug, Default)]
struct RecvSpaceHistory {
    /// Disjoint ranges in ascending packet number order
    ranges: Vec<RecvRange>,
    /// Packet numbers below the watermark are reported as duplicates and
    /// never re-acknowledged
    ignore_under: PacketNumber,
    lowest_since_last_ack: Option<PacketNumber>,
    highest_since_last_ack: Option<PacketNumber>,
    ack_eliciting_since_last_ack: u64,
}

impl RecvSpaceHistory {
    fn reset(&mut self) {
        *self = Self::default();
    }

    fn is_duplicated(&self, packet_number: PacketNumber) -> bool {
        if packet_number < self.ignore_under {
            return true;
        }
        let idx = self.ranges.partition_point(|range| range.end < packet_number);
        self.ranges
            .get(idx)
            .map_or(false, |range| range.begin <= packet_number)
    }

    /// Inserts `packet_number`, coalescing adjacent ranges.
    /// Returns false if the number was already present or below the watermark.
    fn insert(&mut self, packet_number: PacketNumber) -> bool {
        if packet_number < self.ignore_under {
            return false;
        }

        // first range that ends at or above the new packet number
        let idx = self.ranges.partition_point(|range| range.end < packet_number);

        if let Some(range) = self.ranges.get(idx) {
            if range.begin <= packet_number {
                return false;
            }
            if Some(range.begin) == packet_number.next() {
                self.ranges[idx].begin = packet_number;
                // the range may now touch its lower neighbor
                if idx > 0 && self.ranges[idx - 1].end.next() == Some(packet_number) {
                    self.ranges[idx].begin = self.ranges[idx - 1].begin;
                    self.ranges.remove(idx - 1);
                }
                return true;
            }
        }

        if idx > 0 && self.ranges[idx - 1].end.next() == Some(packet_number) {
            self.ranges[idx - 1].end = packet_number;
            return true;
        }

        self.ranges.insert(
            idx,
            RecvRange {
                begin: packet_number,
                end: packet_number,
            },
        );
        true
    }

    fn on_packet_processed(&mut self, packet_number: PacketNumber, is_ack_eliciting: bool) -> bool {
        if is_ack_eliciting {
            self.ack_eliciting_since_last_ack += 1;
        }
        match (self.lowest_since_last_ack, self.highest_since_last_ack) {
            (None, _) | (_, None) => {
                self.lowest_since_last_ack = Some(packet_number);
                self.highest_since_last_ack = Some(packet_number);
            }
            (Some(lowest), Some(highest)) => {
                if packet_number < lowest {
                    self.lowest_since_last_ack = Some(packet_number);
                }
                if packet_number > highest {
                    self.highest_since_last_ack = Some(packet_number);
                }
            }
        }

        self.insert(packet_number)
    }

    fn on_ack_sent(&mut self) {
        self.ack_eliciting_since_last_ack = 0;
        self.lowest_since_last_ack = None;
        self.highest_since_last_ack = None;
    }

    /// Raises the duplicate watermark and drops history below it
    fn delete_under(&mut self, packet_number: PacketNumber) {
        if packet_number < self.ignore_under {
            return;
        }
        self.ignore_under = packet_number;
        self.ranges.retain(|range| range.end >= packet_number);
        if let Some(range) = self.ranges.first_mut() {
            if range.begin < packet_number {
                range.begin = packet_number;
            }
        }
    }

    /// Collects ACK ranges (descending) restricted to the packet numbers
    /// seen since the last ACK left
    fn ack_ranges(&self, out: &mut Vec<AckRange>) {
        out.clear();
        let (Some(lowest), Some(highest)) =
            (self.lowest_since_last_ack, self.highest_since_last_ack)
        else {
            return;
        };

        for range in self.ranges.iter().rev() {
            if range.begin > highest {
                continue;
            }
            if range.end < lowest {
                break;
            }
            let largest = range.end.min(highest);
            let smallest = range.begin.max(lowest);
            out.push(AckRange::new(smallest, largest));
        }
    }

    fn send<E: Encoder>(
        &mut self,
        encoder: &mut E,
        buffer: &mut Vec<AckRange>,
        ack_delay: Option<Duration>,
        config: &InternalConfig,
    ) -> Result<AckTransmission, Error> {
        if self.ack_eliciting_since_last_ack == 0 {
            return Ok(AckTransmission::NoData);
        }
        self.ack_ranges(buffer);
        if buffer.is_empty() {
            return Ok(AckTransmission::NoData);
        }

        let ack_delay = ack_delay
            .map(|delay| encode_ack_delay(delay, config.local_ack_delay_exponent))
            .unwrap_or(VarInt::ZERO);
        let frame = AckFrame::new(core::mem::take(buffer), ack_delay, None)?;

        if frame.encoding_size() > encoder.remaining_capacity() {
            *buffer = frame.into_ranges();
            return Ok(AckTransmission::NoCapacity);
        }
        encoder.encode(&frame);

        let largest_acknowledged = frame.largest_acknowledged();
        *buffer = frame.into_ranges();
        self.on_ack_sent();

        Ok(AckTransmission::Sent {
            largest_acknowledged,
        })
    }
}

/// Receive history over all packet number spaces, with delayed-ACK
/// scheduling for the application space.
#[derive(Clone, Debug, Default)]
pub struct ReceiveHistory {
    spaces: [RecvSpaceHistory; PacketNumberSpace::COUNT],
    last_recv: Option<Timestamp>,
    ack_delay_timer: Deadline,
    /// Scratch space reused between ACK emissions
    buffer: Vec<AckRange>,
}

impl ReceiveHistory {
    pub fn reset(&mut self) {
        for space in &mut self.spaces {
            space.reset();
        }
        self.last_recv = None;
        self.ack_delay_timer.disarm();
        self.buffer.clear();
    }

    /// True if the packet number was already processed in the space
    #[inline]
    pub fn is_duplicated(&self, space: PacketNumberSpace, packet_number: PacketNumber) -> bool {
        self.spaces[space.as_index()].is_duplicated(packet_number)
    }

    /// Records a fully processed packet.
    ///
    /// For the application space this may arm the delayed-ACK timer: an
    /// ACK is deferred by `local_max_ack_delay` while fewer than
    /// `delay_ack_packet_count` ack-eliciting packets are outstanding.
    pub fn on_packet_processed(
        &mut self,
        space: PacketNumberSpace,
        packet_number: PacketNumber,
        is_ack_eliciting: bool,
        config: &InternalConfig,
        now: Timestamp,
    ) -> bool {
        let inserted = self.spaces[space.as_index()].on_packet_processed(packet_number, is_ack_eliciting);

        if space.is_application_data()
            && !self.ack_delay_timer.is_armed()
            && self.spaces[space.as_index()].ack_eliciting_since_last_ack
                < config.base.delay_ack_packet_count
        {
            self.last_recv = Some(now);
            self.ack_delay_timer.arm(now + config.local_max_ack_delay);
        }

        inserted
    }

    /// Attempts to write an ACK frame for the space into `encoder`
    pub fn send<E: Encoder>(
        &mut self,
        encoder: &mut E,
        space: PacketNumberSpace,
        config: &InternalConfig,
        now: Timestamp,
    ) -> Result<AckTransmission, Error> {
        let mut buffer = core::mem::take(&mut self.buffer);
        let result = match space {
            PacketNumberSpace::Initial | PacketNumberSpace::Handshake => {
                self.spaces[space.as_index()].send(encoder, &mut buffer, None, config)
            }
            PacketNumberSpace::ApplicationData => {
                if !self.should_send_application_ack(config, now) {
                    Ok(AckTransmission::NoData)
                } else {
                    let ack_delay = match (self.ack_delay_timer.is_armed(), self.last_recv) {
                        (true, Some(last_recv)) => Some(now.saturating_duration_since(last_recv)),
                        _ => Some(Duration::ZERO),
                    };
                    let result =
                        self.spaces[space.as_index()].send(encoder, &mut buffer, ack_delay, config);
                    if matches!(result, Ok(AckTransmission::Sent { .. })) {
                        self.ack_delay_timer.disarm();
                        self.last_recv = None;
                    }
                    result
                }
            }
        };
        self.buffer = buffer;
        result
    }

    fn should_send_application_ack(&self, config: &InternalConfig, now: Timestamp) -> bool {
        !config.base.use_ack_delay
            || self.ack_delay_timer.has_fired(now)
            || self.spaces[PacketNumberSpace::ApplicationData.as_index()]
                .ack_eliciting_since_last_ack
                >= config.base.delay_ack_packet_count
    }

    /// Raises the application-space duplicate watermark once the peer has
    /// confirmed receipt of an ACK covering everything below `packet_number`
    pub fn delete_under(&mut self, packet_number: PacketNumber) {
        self.spaces[PacketNumberSpace::ApplicationData.as_index()].delete_under(packet_number);
    }

    pub fn on_packet_number_space_discarded(&mut self, space: PacketNumberSpace) {
        if !space.is_application_data() {
            self.spaces[space.as_index()].reset();
        }
    }

    /// Deadline of the delayed-ACK timer, for the timer fabric
    #[inline]
    pub fn ack_timer_deadline(&self) -> Option<Timestamp> {
        self.ack_delay_timer.at()
    }
}
