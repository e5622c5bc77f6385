// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    packet::number::PacketNumberSpace,
    recovery::RttEstimator,
    status::handshake::HandshakeStatus,
    time::{Duration, Timestamp},
};

/// Probe timeout accounting: the exponential backoff counter and the
/// number of probe packets the transport still owes the network.
#[derive(Clone, Copy, Debug, Default)]
pub struct PtoState {
    pto_count: u32,
    probe_required: u8,
    pto_space: Option<PacketNumberSpace>,
}

impl PtoState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
    //# Even when there are ack-eliciting packets in flight in multiple
    //# packet number spaces, the exponential increase in PTO occurs across
    //# all spaces to prevent excess load on the network.
    #[inline]
    pub fn pto_exponent(&self) -> u64 {
        1u64.checked_shl(self.pto_count).unwrap_or(u64::MAX)
    }

    #[inline]
    pub fn pto_count(&self) -> u32 {
        self.pto_count
    }

    #[inline]
    pub fn probe_timeout_duration(&self, rtt: &RttEstimator) -> Duration {
        rtt.probe_timeout_duration(self.pto_exponent())
    }

    #[inline]
    pub fn probe_timeout_duration_with_max_ack_delay(&self, rtt: &RttEstimator) -> Duration {
        rtt.probe_timeout_duration_with_max_ack_delay(self.pto_exponent())
    }

    /// True if a probe packet is owed in `space`
    #[inline]
    pub fn is_probe_required(&self, space: PacketNumberSpace) -> bool {
        self.pto_space == Some(space) && self.probe_required > 0
    }

    /// Sending an ack-eliciting packet consumes one probe from the budget
    pub fn on_packet_sent(&mut self, is_ack_eliciting: bool) {
        if is_ack_eliciting && self.probe_required > 0 {
            self.probe_required -= 1;
        }
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.2.1
    //# When the PTO fires, the client MUST send a Handshake packet if it
    //# has Handshake keys, otherwise it MUST send an Initial packet in a
    //# UDP datagram with a payload of at least 1200 bytes.
    pub fn on_pto_no_flight(&mut self, space: PacketNumberSpace) {
        self.probe_required = self.probe_required.saturating_add(1);
        self.pto_space = Some(space);
        self.pto_count = self.pto_count.saturating_add(1);
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.4
    //# An endpoint
    //# MAY send up to two full-sized datagrams containing ack-eliciting
    //# packets to avoid an expensive consecutive PTO expiration due to a
    //# single lost datagram or to transmit data from multiple packet number
    //# spaces.
    pub fn on_pto_timeout(&mut self, space: Option<PacketNumberSpace>) {
        self.probe_required = self.probe_required.saturating_add(2);
        self.pto_space = space;
        self.pto_count = self.pto_count.saturating_add(1);
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
    //# The PTO backoff factor is reset when an acknowledgment is received,
    //# except in the following case.  A server might take longer to respond
    //# to packets during the handshake than otherwise.  To protect such a
    //# server from repeated client probes, the PTO backoff is not reset at a
    //# client that is not yet certain that the server has finished
    //# validating the client's address.
    pub fn on_ack_received(&mut self, handshake: &HandshakeStatus) {
        self.probe_required = 0;
        if handshake.peer_completed_address_validation() {
            self.pto_count = 0;
        }
    }

    pub fn on_packet_number_space_discard(&mut self) {
        self.reset();
    }

    /// A Retry proves a round trip to the server: when no backoff has
    /// accumulated yet, the first Initial's flight time becomes the first
    /// RTT sample.
    pub fn on_retry_received(
        &mut self,
        rtt: &mut RttEstimator,
        first_sent_time: Option<Timestamp>,
        now: Timestamp,
    ) {
        if self.pto_count == 0 {
            if let Some(first_sent_time) = first_sent_time {
                let _ = rtt.sample(now, first_sent_time, Duration::ZERO);
            }
        }
        self.pto_count = 0;
    }
}
