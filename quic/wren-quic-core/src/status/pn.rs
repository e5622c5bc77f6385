// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    error::Error,
    packet::number::{PacketNumber, PacketNumberSpace},
    packet::PacketStatus,
    time::Timestamp,
};

/// Issues packet numbers for one space and tracks what the peer has
/// acknowledged of them.
#[derive(Clone, Copy, Debug, Default)]
pub struct PacketNumberIssuer {
    next_packet_number: PacketNumber,
    highest_sent: Option<PacketNumber>,
    largest_acked: Option<PacketNumber>,
    last_ack_eliciting_packet_sent_time: Option<Timestamp>,
    ack_eliciting_in_flight: u64,
}

impl PacketNumberIssuer {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// The next packet number to be consumed
    #[inline]
    pub fn next_packet_number(&self) -> PacketNumber {
        self.next_packet_number
    }

    /// Advances the issue counter. Skipped numbers are never reissued.
    pub fn consume_packet_number(&mut self) {
        self.next_packet_number = self
            .next_packet_number
            .next()
            .expect("packet number space exhausted");
    }

    #[inline]
    pub fn largest_acked_packet_number(&self) -> Option<PacketNumber> {
        self.largest_acked
    }

    #[inline]
    pub fn last_ack_eliciting_packet_sent_time(&self) -> Option<Timestamp> {
        self.last_ack_eliciting_packet_sent_time
    }

    #[inline]
    pub fn no_ack_eliciting_in_flight(&self) -> bool {
        self.ack_eliciting_in_flight == 0
    }

    /// Records a sent packet.
    ///
    /// The packet number must not run ahead of the issue counter and must be
    /// strictly above everything recorded before; the returned range covers
    /// the recorded number along with any skipped numbers below it.
    pub fn on_packet_sent(
        &mut self,
        packet_number: PacketNumber,
        status: PacketStatus,
        time_sent: Timestamp,
    ) -> Result<(PacketNumber, PacketNumber), Error> {
        if self.highest_sent.map_or(false, |highest| packet_number <= highest)
            || self.next_packet_number < packet_number
        {
            return Err(Error::NonMonotonicPacketNumber);
        }

        let range_begin = match self.highest_sent {
            Some(highest) => highest.next().expect("packet number space exhausted"),
            None => PacketNumber::ZERO,
        };
        self.highest_sent = Some(packet_number);

        if status.is_ack_eliciting() {
            self.last_ack_eliciting_packet_sent_time = Some(time_sent);
            if status.is_byte_counted() {
                self.ack_eliciting_in_flight += 1;
            }
        }

        Ok((range_begin, packet_number))
    }

    pub fn on_ack_received(&mut self, largest_acked: PacketNumber) {
        if self.largest_acked.map_or(true, |prev| prev < largest_acked) {
            self.largest_acked = Some(largest_acked);
        }
    }

    pub fn on_packet_ack(&mut self, status: PacketStatus) {
        self.on_packet_removed(status);
    }

    pub fn on_packet_lost(&mut self, status: PacketStatus) {
        self.on_packet_removed(status);
    }

    fn on_packet_removed(&mut self, status: PacketStatus) {
        if status.is_ack_eliciting() && status.is_byte_counted() {
            self.ack_eliciting_in_flight = self.ack_eliciting_in_flight.saturating_sub(1);
        }
    }

    pub fn on_packet_number_space_discard(&mut self) {
        self.last_ack_eliciting_packet_sent_time = None;
        self.ack_eliciting_in_flight = 0;
    }

    /// A Retry restarts the space: sent state is forgotten, but the issue
    /// counter keeps increasing so packet numbers are never reused.
    pub fn on_retry_received(&mut self) {
        self.last_ack_eliciting_packet_sent_time = None;
        self.ack_eliciting_in_flight = 0;
        self.highest_sent = None;
        self.largest_acked = None;
    }
}

/// True if no space has an ack-eliciting packet in flight
#[inline]
pub fn no_ack_eliciting_in_flight(issuers: &[PacketNumberIssuer; PacketNumberSpace::COUNT]) -> bool {
    issuers
        .iter()
        .all(PacketNumberIssuer::no_ack_eliciting_in_flight)
}

/// Tracks the largest received packet number per space, which anchors
/// truncated packet number expansion.
#[derive(Clone, Copy, Debug, Default)]
pub struct PacketNumberAcceptor {
    largest_received: Option<PacketNumber>,
}

impl PacketNumberAcceptor {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn on_packet_processed(&mut self, packet_number: PacketNumber) {
        if self
            .largest_received
            .map_or(true, |largest| largest < packet_number)
        {
            self.largest_received = Some(packet_number);
        }
    }

    /// The expansion anchor; zero before anything is received
    #[inline]
    pub fn largest_received_packet_number(&self) -> PacketNumber {
        self.largest_received.unwrap_or(PacketNumber::ZERO)
    }
}

/// Remembers the largest `largest_ack` carried by any of our acknowledged
/// application-space packets: everything below it has provably reached the
/// peer and can be dropped from the receive history.
#[derive(Clone, Copy, Debug, Default)]
pub struct SentAckTracker {
    largest_acked_sent_ack: Option<PacketNumber>,
}

impl SentAckTracker {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn on_packet_acked(
        &mut self,
        space: PacketNumberSpace,
        largest_ack: Option<PacketNumber>,
    ) {
        if !space.is_application_data() {
            return;
        }
        if let Some(largest_ack) = largest_ack {
            if self
                .largest_acked_sent_ack
                .map_or(true, |prev| prev < largest_ack)
            {
                self.largest_acked_sent_ack = Some(largest_ack);
            }
        }
    }

    #[inline]
    pub fn largest_acked_sent_ack(&self) -> Option<PacketNumber> {
        self.largest_acked_sent_ack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frame::FrameType,
        time::{clock::testing, Clock},
        varint::VarInt,
    };

    fn pn(value: u64) -> PacketNumber {
        PacketNumber::new(VarInt::new(value).unwrap())
    }

    fn eliciting() -> PacketStatus {
        let mut status = PacketStatus::default();
        status.on_frame(FrameType::Ping);
        status
    }

    #[test]
    fn issue_and_record() {
        let now = testing::Clock::default().now();
        let mut issuer = PacketNumberIssuer::default();

        assert_eq!(issuer.next_packet_number(), pn(0));
        issuer.consume_packet_number();
        issuer.consume_packet_number();

        // recording a consumed number returns the covered range
        assert_eq!(issuer.on_packet_sent(pn(0), eliciting(), now), Ok((pn(0), pn(0))));
        // a skipped number widens the next range
        assert_eq!(issuer.on_packet_sent(pn(1), eliciting(), now), Ok((pn(1), pn(1))));

        // replays and unissued numbers are rejected
        assert_eq!(
            issuer.on_packet_sent(pn(1), eliciting(), now),
            Err(Error::NonMonotonicPacketNumber)
        );
        assert_eq!(
            issuer.on_packet_sent(pn(5), eliciting(), now),
            Err(Error::NonMonotonicPacketNumber)
        );
    }

    #[test]
    fn skipped_numbers_are_covered_by_the_range() {
        let now = testing::Clock::default().now();
        let mut issuer = PacketNumberIssuer::default();
        for _ in 0..5 {
            issuer.consume_packet_number();
        }

        assert_eq!(issuer.on_packet_sent(pn(1), eliciting(), now), Ok((pn(0), pn(1))));
        assert_eq!(issuer.on_packet_sent(pn(4), eliciting(), now), Ok((pn(2), pn(4))));
    }

    #[test]
    fn in_flight_accounting() {
        let now = testing::Clock::default().now();
        let mut issuer = PacketNumberIssuer::default();
        issuer.consume_packet_number();
        issuer.consume_packet_number();

        assert!(issuer.no_ack_eliciting_in_flight());
        issuer.on_packet_sent(pn(0), eliciting(), now).unwrap();
        issuer.on_packet_sent(pn(1), eliciting(), now).unwrap();
        assert!(!issuer.no_ack_eliciting_in_flight());
        assert_eq!(issuer.last_ack_eliciting_packet_sent_time(), Some(now));

        issuer.on_packet_ack(eliciting());
        assert!(!issuer.no_ack_eliciting_in_flight());
        issuer.on_packet_lost(eliciting());
        assert!(issuer.no_ack_eliciting_in_flight());
    }

    #[test]
    fn ack_only_packets_are_not_in_flight() {
        let now = testing::Clock::default().now();
        let mut issuer = PacketNumberIssuer::default();
        issuer.consume_packet_number();

        let mut ack_only = PacketStatus::default();
        ack_only.on_frame(FrameType::Ack);
        issuer.on_packet_sent(pn(0), ack_only, now).unwrap();

        assert!(issuer.no_ack_eliciting_in_flight());
        assert_eq!(issuer.last_ack_eliciting_packet_sent_time(), None);
    }

    #[test]
    fn largest_acked_is_monotone() {
        let mut issuer = PacketNumberIssuer::default();
        issuer.on_ack_received(pn(5));
        issuer.on_ack_received(pn(3));
        assert_eq!(issuer.largest_acked_packet_number(), Some(pn(5)));
        issuer.on_ack_received(pn(9));
        assert_eq!(issuer.largest_acked_packet_number(), Some(pn(9)));
    }

    #[test]
    fn retry_keeps_the_issue_counter() {
        let now = testing::Clock::default().now();
        let mut issuer = PacketNumberIssuer::default();
        issuer.consume_packet_number();
        issuer.on_packet_sent(pn(0), eliciting(), now).unwrap();
        issuer.on_ack_received(pn(0));

        issuer.on_retry_received();
        assert_eq!(issuer.next_packet_number(), pn(1));
        assert_eq!(issuer.largest_acked_packet_number(), None);
        assert!(issuer.no_ack_eliciting_in_flight());

        // the next send starts a fresh range at zero
        issuer.consume_packet_number();
        assert_eq!(issuer.on_packet_sent(pn(1), eliciting(), now), Ok((pn(0), pn(1))));
    }

    #[test]
    fn acceptor_tracks_largest() {
        let mut acceptor = PacketNumberAcceptor::default();
        assert_eq!(acceptor.largest_received_packet_number(), pn(0));
        acceptor.on_packet_processed(pn(7));
        acceptor.on_packet_processed(pn(3));
        assert_eq!(acceptor.largest_received_packet_number(), pn(7));
    }

    #[test]
    fn sent_ack_tracker_only_tracks_application_space() {
        let mut tracker = SentAckTracker::default();
        tracker.on_packet_acked(PacketNumberSpace::Initial, Some(pn(9)));
        assert_eq!(tracker.largest_acked_sent_ack(), None);

        tracker.on_packet_acked(PacketNumberSpace::ApplicationData, Some(pn(4)));
        tracker.on_packet_acked(PacketNumberSpace::ApplicationData, None);
        tracker.on_packet_acked(PacketNumberSpace::ApplicationData, Some(pn(2)));
        assert_eq!(tracker.largest_acked_sent_ack(), Some(pn(4)));
    }
}
