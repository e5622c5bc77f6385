// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    ack::RecordHandle,
    frame::AckRange,
    packet::{number::PacketNumber, PacketStatus, PacketType},
    time::{Duration, Timestamp},
};
use alloc::{collections::VecDeque, vec::Vec};

/// Everything the recovery engine remembers about one sent packet
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SentPacket {
    pub packet_type: PacketType,
    pub packet_number: PacketNumber,
    pub status: PacketStatus,
    pub sent_bytes: u64,
    pub time_sent: Timestamp,
    /// Largest packet number acknowledged by an ACK frame carried in this
    /// packet, if it carried one
    pub largest_ack: Option<PacketNumber>,
    /// Fate observer attached by the transport; resolved through the
    /// record arena when the packet is acknowledged or lost
    pub record: Option<RecordHandle>,
}

/// Result of one loss detection pass over a space
#[derive(Debug, Default)]
pub struct LossDetection {
    /// Packets declared lost, removed from the store, in ascending packet
    /// number order
    pub lost: Vec<SentPacket>,
    /// Earliest time a surviving packet will cross the loss threshold
    pub next_loss_time: Option<Timestamp>,
    /// Latest send time among lost packets that count towards congestion
    pub sent_time_of_last_loss: Option<Timestamp>,
    /// Send times bounding the longest run of consecutively lost
    /// ack-eliciting packets
    pub persistent_period: Option<(Timestamp, Timestamp)>,
}

/// Sent packets of one packet number space, ordered by packet number
#[derive(Clone, Debug, Default)]
pub struct SentPacketStore {
    packets: VecDeque<SentPacket>,
}

impl SentPacketStore {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Send time of the oldest tracked packet
    #[inline]
    pub fn first_sent_time(&self) -> Option<Timestamp> {
        self.packets.front().map(|packet| packet.time_sent)
    }

    /// Appends a record; packet numbers must arrive in increasing order
    pub fn push(&mut self, packet: SentPacket) {
        debug_assert!(self
            .packets
            .back()
            .map_or(true, |back| back.packet_number < packet.packet_number));
        self.packets.push_back(packet);
    }

    /// Removes and returns the packets covered by the (descending,
    /// validated) ACK ranges, in ascending packet number order
    pub fn drain_acked(&mut self, ranges: &[AckRange]) -> Vec<SentPacket> {
        let smallest = ranges.last().map(|range| range.smallest);
        let largest = ranges.first().map(|range| range.largest);
        let (Some(smallest), Some(largest)) = (smallest, largest) else {
            return Vec::new();
        };

        let mut acked = Vec::new();
        let mut kept = VecDeque::with_capacity(self.packets.len());
        for packet in self.packets.drain(..) {
            let pn = packet.packet_number;
            let in_ranges = pn >= smallest
                && pn <= largest
                && ranges.iter().any(|range| range.contains(pn));
            if in_ranges {
                acked.push(packet);
            } else {
                kept.push_back(packet);
            }
        }
        self.packets = kept;
        acked
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.1
    //# A packet is declared lost if it meets all of the following
    //# conditions:
    //#
    //# *  The packet is unacknowledged, in flight, and was sent prior to an
    //#    acknowledged packet.
    //#
    //# *  The packet was sent kPacketThreshold packets before an
    //#    acknowledged packet (Section 6.1.1), or it was sent long enough in
    //#    the past (Section 6.1.2).
    pub fn detect_lost(
        &mut self,
        now: Timestamp,
        loss_delay: Duration,
        largest_acked: PacketNumber,
        packet_order_threshold: u64,
    ) -> LossDetection {
        let mut outcome = LossDetection::default();
        let lost_send_time = now.checked_sub(loss_delay);

        let mut kept = VecDeque::with_capacity(self.packets.len());
        let mut period: Option<Period> = None;

        for packet in self.packets.drain(..) {
            let pn = packet.packet_number;
            if pn > largest_acked {
                kept.push_back(packet);
                continue;
            }

            let time_threshold =
                lost_send_time.map_or(false, |cutoff| packet.time_sent <= cutoff);
            let order_threshold = pn
                .checked_add(packet_order_threshold)
                .map_or(false, |limit| limit <= largest_acked);

            if !(time_threshold || order_threshold) {
                // still plausibly in flight; it crosses the time threshold
                // at time_sent + loss_delay
                let deadline = packet.time_sent + loss_delay;
                if outcome.next_loss_time.map_or(true, |t| deadline < t) {
                    outcome.next_loss_time = Some(deadline);
                }
                kept.push_back(packet);
                continue;
            }

            if packet.status.is_ack_eliciting() && !packet.status.is_mtu_probe() {
                outcome.sent_time_of_last_loss = Some(
                    outcome
                        .sent_time_of_last_loss
                        .map_or(packet.time_sent, |prev| prev.max(packet.time_sent)),
                );
            }

            track_persistent_period(&mut period, &mut outcome, &packet);
            outcome.lost.push(packet);
        }

        self.packets = kept;
        if let Some(period) = period {
            period.commit(&mut outcome);
        }
        outcome
    }

    /// Removes every record, e.g. when the space is discarded
    pub fn drain_all(&mut self) -> Vec<SentPacket> {
        self.packets.drain(..).collect()
    }
}

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.6.2
//# A sender establishes persistent congestion after the receipt of an
//# acknowledgment if two packets that are ack-eliciting are declared
//# lost, and:
//#
//# *  across all packet number spaces, none of the packets sent between
//#    the send times of these two packets are acknowledged;
#[derive(Debug)]
struct Period {
    start: Timestamp,
    end: Timestamp,
    prev_packet: PacketNumber,
}

impl Period {
    fn duration(&self) -> Duration {
        self.end.saturating_duration_since(self.start)
    }

    fn commit(self, outcome: &mut LossDetection) {
        let candidate = (self.start, self.end);
        let longer = outcome.persistent_period.map_or(true, |(start, end)| {
            self.duration() > end.saturating_duration_since(start)
        });
        if longer {
            outcome.persistent_period = Some(candidate);
        }
    }
}

fn track_persistent_period(
    period: &mut Option<Period>,
    outcome: &mut LossDetection,
    packet: &SentPacket,
) {
    // a lost MTU probe says nothing about congestion; it neither extends
    // nor continues a run, so a probe between two losses breaks contiguity
    if packet.status.is_mtu_probe() {
        return;
    }

    if let Some(current) = period.take() {
        if packet.packet_number.checked_distance(current.prev_packet) == Some(1) {
            let mut current = current;
            if packet.status.is_ack_eliciting() {
                current.end = current.end.max(packet.time_sent);
            }
            current.prev_packet = packet.packet_number;
            *period = Some(current);
            return;
        }
        // a gap of surviving packets ends the run
        current.commit(outcome);
    }

    if packet.status.is_ack_eliciting() {
        *period = Some(Period {
            start: packet.time_sent,
            end: packet.time_sent,
            prev_packet: packet.packet_number,
        });
    }
}
