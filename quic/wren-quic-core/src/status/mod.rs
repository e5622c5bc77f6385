// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The per-connection control plane.
//!
//! [`Status`] composes the RTT estimator, congestion state, pacer, probe
//! and loss timers, idle/handshake tracking and the per-space packet
//! number machinery behind a single event surface. The transport drives it
//! from its connection actor: every inbound or outbound packet event calls
//! exactly one hook, and timers advance by polling
//! [`Status::get_earliest_deadline`] and dispatching the matching timeout.

pub mod config;
pub mod handshake;
pub mod idle;
pub mod pn;

use crate::{
    ack::RecordArena,
    error::Error,
    frame::ack::{decode_ack_delay, is_valid_range_set, AckRange, EcnCounts},
    log::{ConnectionLogger, NoopLogger},
    packet::number::{PacketNumber, PacketNumberSpace},
    recovery::{
        Congestion, CongestionAlgorithm, LossTimer, LossTimerState, PtoState, RttEstimator,
        SentPacket, SentPacketStore, TokenBudgetPacer,
    },
    status::{
        config::{InternalConfig, PayloadSize, DEFAULT_ACK_DELAY_EXPONENT},
        handshake::HandshakeStatus,
        idle::IdleTimer,
        pn::{
            no_ack_eliciting_in_flight, PacketNumberAcceptor, PacketNumberIssuer, SentAckTracker,
        },
    },
    time::{earliest, Deadline, Duration, Timestamp},
    varint::VarInt,
};
use alloc::vec::Vec;

//= https://www.rfc-editor.org/rfc/rfc9000#section-10.2
//# The closing and draining connection states exist to ensure that
//# connections close cleanly and that delayed or reordered packets are
//# properly discarded.  These states SHOULD persist for at least three
//# times the current PTO interval as defined in [QUIC-RECOVERY].
const CLOSE_PTO_FACTOR: u32 = 3;

/// Packets removed from the sent tracker by one acknowledgement
#[derive(Debug, Default)]
pub struct AckedPackets {
    /// Newly acknowledged packets, ascending by packet number
    pub acked: Vec<SentPacket>,
    /// Packets the acknowledgement proved lost, ascending by packet number
    pub lost: Vec<SentPacket>,
}

/// Per-connection transport status: timers, recovery and congestion state.
pub struct Status<Alg, Log = NoopLogger> {
    config: InternalConfig,
    handshake: HandshakeStatus,
    payload_size: PayloadSize,
    peer_ack_delay_exponent: u8,
    creation_time: Timestamp,
    rtt: RttEstimator,
    congestion: Congestion<Alg>,

    idle: IdleTimer,
    loss: LossTimer,
    pto: PtoState,
    pacer: TokenBudgetPacer,
    close_timer: Deadline,
    ping_timer: Deadline,

    issuers: [PacketNumberIssuer; PacketNumberSpace::COUNT],
    acceptors: [PacketNumberAcceptor; PacketNumberSpace::COUNT],
    stores: [SentPacketStore; PacketNumberSpace::COUNT],
    discarded: [bool; PacketNumberSpace::COUNT],
    sent_ack_tracker: SentAckTracker,
    records: RecordArena,

    logger: Log,
}

impl<Alg: CongestionAlgorithm> Status<Alg> {
    pub fn new(
        config: InternalConfig,
        algorithm: Alg,
        is_server: bool,
        max_udp_payload: u64,
        now: Timestamp,
    ) -> Self {
        Self::with_logger(config, algorithm, NoopLogger, is_server, max_udp_payload, now)
    }
}

impl<Alg: CongestionAlgorithm, Log: ConnectionLogger> Status<Alg, Log> {
    pub fn with_logger(
        config: InternalConfig,
        algorithm: Alg,
        logger: Log,
        is_server: bool,
        max_udp_payload: u64,
        now: Timestamp,
    ) -> Self {
        let payload_size = PayloadSize::new(max_udp_payload);
        let congestion = Congestion::new(&config, &payload_size, algorithm);
        let rtt = RttEstimator::new(config.base.initial_rtt);
        Self {
            config,
            handshake: HandshakeStatus::new(is_server),
            payload_size,
            peer_ack_delay_exponent: DEFAULT_ACK_DELAY_EXPONENT,
            creation_time: now,
            rtt,
            congestion,
            idle: IdleTimer::default(),
            loss: LossTimer::default(),
            pto: PtoState::default(),
            pacer: TokenBudgetPacer::default(),
            close_timer: Deadline::idle(),
            ping_timer: Deadline::idle(),
            issuers: Default::default(),
            acceptors: Default::default(),
            stores: Default::default(),
            discarded: [false; PacketNumberSpace::COUNT],
            sent_ack_tracker: SentAckTracker::default(),
            records: RecordArena::default(),
            logger,
        }
    }

    /// Rebuilds the connection state from scratch, e.g. for a client
    /// restarting after a Version Negotiation
    pub fn reset(&mut self, algorithm: Alg, is_server: bool, max_udp_payload: u64, now: Timestamp) {
        self.handshake.reset(is_server);
        self.payload_size = PayloadSize::new(max_udp_payload);
        self.peer_ack_delay_exponent = DEFAULT_ACK_DELAY_EXPONENT;
        self.rtt.reset(self.config.base.initial_rtt);
        self.congestion.reset(&self.config, &self.payload_size, algorithm);
        self.idle.reset();
        self.loss.reset();
        self.pto.reset();
        self.pacer.reset();
        self.close_timer.disarm();
        self.ping_timer.disarm();
        for issuer in &mut self.issuers {
            issuer.reset();
        }
        for acceptor in &mut self.acceptors {
            acceptor.reset();
        }
        for store in &mut self.stores {
            store.drain_all();
        }
        self.discarded = [false; PacketNumberSpace::COUNT];
        self.sent_ack_tracker.reset();
        self.records = RecordArena::default();
        self.creation_time = now;
    }

    // transport parameter events

    pub fn on_transport_parameter_received(
        &mut self,
        idle_timeout: Option<Duration>,
        max_ack_delay: Duration,
        ack_delay_exponent: u8,
    ) {
        self.rtt.on_peer_max_ack_delay(max_ack_delay);
        self.peer_ack_delay_exponent = ack_delay_exponent;
        self.idle.apply_idle_timeout(&self.config, idle_timeout);
        self.handshake.on_transport_parameter_read();
    }

    /// Remembered 0-RTT transport parameters only carry the idle timeout
    /// into the new connection
    pub fn on_zero_rtt_transport_parameter(&mut self, idle_timeout: Option<Duration>) {
        self.idle.apply_idle_timeout(&self.config, idle_timeout);
    }

    /// PMTU growth; shrinking updates are ignored
    pub fn on_payload_size_update(&mut self, new_size: u64) {
        let old_size = self.payload_size.current();
        if self.payload_size.update(new_size) {
            self.congestion
                .on_max_udp_payload_size_update(&self.config, old_size, new_size);
        }
    }

    // handshake events

    pub fn on_handshake_start(&mut self) {
        self.handshake.on_handshake_start();
    }

    /// TLS handshake completion; servers confirm implicitly
    pub fn on_handshake_complete(&mut self) {
        self.handshake.on_handshake_complete();
        if self.handshake.is_server() {
            self.on_handshake_confirmed();
        }
    }

    /// Server: handshake completion. Client: HANDSHAKE_DONE received.
    pub fn on_handshake_confirmed(&mut self) {
        self.handshake.on_handshake_confirmed();
    }

    // packet events

    /// Records a sent packet.
    ///
    /// Returns the packet number range `[prev_highest + 1, packet_number]`
    /// the record covers (skipped numbers included).
    pub fn on_packet_sent(
        &mut self,
        space: PacketNumberSpace,
        packet: SentPacket,
    ) -> Result<(PacketNumber, PacketNumber), Error> {
        if self.discarded[space.as_index()] {
            return Err(Error::PacketNumberSpaceDiscarded);
        }

        let range = self.issuers[space.as_index()].on_packet_sent(
            packet.packet_number,
            packet.status,
            packet.time_sent,
        )?;

        self.handshake.on_packet_sent(space, packet.sent_bytes);
        self.idle
            .on_packet_sent(packet.time_sent, packet.status.is_ack_eliciting());
        self.pto.on_packet_sent(packet.status.is_ack_eliciting());

        if packet.status.is_byte_counted() {
            self.congestion
                .on_packet_sent(packet.sent_bytes, packet.time_sent);
            self.pacer.on_packet_sent(
                &self.config,
                &self.payload_size,
                &self.congestion,
                &self.rtt,
                packet.time_sent,
                packet.sent_bytes,
            );
            self.arm_loss_timer(packet.time_sent);
        }
        self.pacer.maybe_update_timer(
            &self.config,
            &self.payload_size,
            &self.congestion,
            &self.handshake,
            &self.rtt,
        );

        if packet.status.is_mtu_probe() {
            self.logger.on_mtu_probe(packet.sent_bytes);
        }
        self.logger
            .on_packet_sending(packet.packet_type, packet.packet_number, packet.sent_bytes);

        self.stores[space.as_index()].push(packet);
        Ok(range)
    }

    /// Anti-amplification accounting for every datagram attributed to the
    /// connection
    pub fn on_datagram_received(&mut self, recv_bytes: u64, now: Timestamp) {
        let was_limited = self.handshake.is_at_anti_amplification_limit();
        self.handshake.on_datagram_received(recv_bytes);
        if was_limited {
            // the credit may have unblocked a parked loss timer
            self.arm_loss_timer(now);
        }
    }

    /// A packet was decrypted successfully (but not yet fully processed)
    pub fn on_packet_decrypted(&mut self, space: PacketNumberSpace, now: Timestamp) {
        self.handshake.on_packet_decrypted(space);
        self.idle.on_packet_decrypted(now);
    }

    /// A packet's payload was processed completely
    pub fn on_packet_processed(&mut self, space: PacketNumberSpace, packet_number: PacketNumber) {
        self.acceptors[space.as_index()].on_packet_processed(packet_number);
    }

    /// Applies a validated ACK frame to the space's sent packets.
    ///
    /// `ranges` must be in descending order of `largest` (the wire decoder
    /// produces them that way). `is_flow_control_limited` is consulted per
    /// acknowledged packet to suppress window growth while the sender is
    /// application limited.
    pub fn on_ack_received<F: FnMut() -> bool>(
        &mut self,
        space: PacketNumberSpace,
        ack_delay_wire: VarInt,
        ecn_counts: Option<EcnCounts>,
        ranges: &[AckRange],
        now: Timestamp,
        mut is_flow_control_limited: F,
    ) -> Result<AckedPackets, Error> {
        if self.discarded[space.as_index()] {
            return Err(Error::PacketNumberSpaceDiscarded);
        }
        if !is_valid_range_set(ranges) {
            return Err(Error::InvalidAckRanges);
        }

        self.handshake.on_ack_received(space);
        let largest_acknowledged = ranges[0].largest;
        self.issuers[space.as_index()].on_ack_received(largest_acknowledged);

        let acked = self.stores[space.as_index()].drain_acked(ranges);

        let mut has_ack_eliciting = false;
        let mut newest: Option<(PacketNumber, Timestamp)> = None;
        for packet in &acked {
            self.issuers[space.as_index()].on_packet_ack(packet.status);
            self.sent_ack_tracker.on_packet_acked(space, packet.largest_ack);
            has_ack_eliciting |= packet.status.is_ack_eliciting();
            if newest.map_or(true, |(pn, _)| pn < packet.packet_number) {
                newest = Some((packet.packet_number, packet.time_sent));
            }
            if let Some(handle) = packet.record {
                self.records.mark_acked(handle);
            }
        }

        if let Some((packet_number, time_sent)) = newest {
            //= https://www.rfc-editor.org/rfc/rfc9002#section-5.1
            //# An endpoint generates an RTT sample on receiving an ACK frame
            //# that meets the following two conditions:
            //#
            //# *  the largest acknowledged packet number is newly acknowledged, and
            //#
            //# *  at least one of the newly acknowledged packets was ack-eliciting.
            if packet_number == largest_acknowledged && has_ack_eliciting {
                let ack_delay = decode_ack_delay(ack_delay_wire, self.peer_ack_delay_exponent);
                self.rtt.sample(now, time_sent, ack_delay)?;
                self.logger.on_rtt_updated(&self.rtt, now);
            }

            if ecn_counts.is_some() {
                //= https://www.rfc-editor.org/rfc/rfc9002#section-7.1
                //# If a path has been validated to support Explicit Congestion
                //# Notification (ECN) [RFC3168] [RFC8311], QUIC treats a Congestion
                //# Experienced (CE) codepoint in the IP header as a signal of
                //# congestion.
                self.congestion
                    .on_congestion_event(&self.config, &self.payload_size, time_sent);
            }
        }

        let lost = self.detect_and_remove_lost(space, now, false)?;

        for packet in &acked {
            let flow_control_limited = is_flow_control_limited();
            self.congestion.on_packet_ack(
                &self.config,
                &self.payload_size,
                packet.sent_bytes,
                packet.time_sent,
                packet.status,
                flow_control_limited,
            );
        }

        self.pto.on_ack_received(&self.handshake);
        self.arm_loss_timer(now);

        Ok(AckedPackets { acked, lost })
    }

    /// Dispatched by the connection actor when the loss detection deadline
    /// passes. Returns the packets declared lost.
    pub fn on_loss_detection_timeout(&mut self, now: Timestamp) -> Result<Vec<SentPacket>, Error> {
        match self.loss.current_state() {
            LossTimerState::WaitForLoss => {
                let space = self
                    .loss
                    .current_space()
                    .ok_or(Error::SpuriousLossTimeout)?;
                let lost = self.detect_and_remove_lost(space, now, true)?;
                self.arm_loss_timer(now);
                Ok(lost)
            }
            LossTimerState::WaitForPto => {
                self.on_pto_timeout();
                self.logger.on_pto_fired(self.loss.current_space());
                self.arm_loss_timer(now);
                Ok(Vec::new())
            }
            _ => Err(Error::SpuriousLossTimeout),
        }
    }

    /// Releases an Initial or Handshake space once its keys are dropped.
    /// Returns the records that were still tracked.
    pub fn on_packet_number_space_discard(
        &mut self,
        space: PacketNumberSpace,
        now: Timestamp,
    ) -> Vec<SentPacket> {
        if space.is_application_data() || self.discarded[space.as_index()] {
            return Vec::new();
        }

        let removed = self.stores[space.as_index()].drain_all();
        for packet in &removed {
            self.congestion
                .on_packet_number_space_discard(packet.sent_bytes, packet.status);
            if let Some(handle) = packet.record {
                self.records.mark_lost(handle);
            }
        }
        self.issuers[space.as_index()].on_packet_number_space_discard();
        self.loss.on_packet_number_space_discard(space);
        self.pto.on_packet_number_space_discard();
        self.discarded[space.as_index()] = true;
        self.arm_loss_timer(now);
        removed
    }

    /// A Retry packet restarts the Initial exchange. All outstanding
    /// packets are returned for retransmission; when no probe timeout has
    /// fired yet, the first Initial doubles as an RTT measurement.
    pub fn on_retry_received(&mut self, now: Timestamp) -> Vec<SentPacket> {
        self.handshake.on_retry_received();

        let mut removed = self.stores[PacketNumberSpace::Initial.as_index()].drain_all();
        removed.extend(self.stores[PacketNumberSpace::ApplicationData.as_index()].drain_all());
        let first_sent_time = removed.iter().map(|packet| packet.time_sent).min();

        for packet in &removed {
            self.congestion
                .on_packet_number_space_discard(packet.sent_bytes, packet.status);
            if let Some(handle) = packet.record {
                self.records.mark_lost(handle);
            }
        }

        self.pto.on_retry_received(&mut self.rtt, first_sent_time, now);
        self.loss.on_retry_received();
        self.issuers[PacketNumberSpace::Initial.as_index()].on_retry_received();
        self.issuers[PacketNumberSpace::ApplicationData.as_index()].on_retry_received();

        removed
    }

    // packet number issuing

    pub fn next_and_largest_acked_packet_number(
        &self,
        space: PacketNumberSpace,
    ) -> (PacketNumber, Option<PacketNumber>) {
        let issuer = &self.issuers[space.as_index()];
        (
            issuer.next_packet_number(),
            issuer.largest_acked_packet_number(),
        )
    }

    pub fn consume_packet_number(&mut self, space: PacketNumberSpace) {
        self.issuers[space.as_index()].consume_packet_number();
    }

    /// The anchor for truncated packet number expansion in the space
    pub fn largest_received_packet_number(&self, space: PacketNumberSpace) -> PacketNumber {
        self.acceptors[space.as_index()].largest_received_packet_number()
    }

    /// Largest `largest_ack` among acknowledged application packets; feeds
    /// [`crate::ack::ReceiveHistory::delete_under`]
    pub fn largest_acked_sent_ack(&self) -> Option<PacketNumber> {
        self.sent_ack_tracker.largest_acked_sent_ack()
    }

    // timeouts and deadlines

    pub fn is_handshake_timeout(&self, now: Timestamp) -> bool {
        let Some(timeout) = self.config.base.handshake_timeout else {
            return false;
        };
        now.saturating_duration_since(self.creation_time) >= timeout
    }

    pub fn is_loss_timeout(&self, now: Timestamp) -> bool {
        self.loss.is_timeout(now)
    }

    pub fn is_idle_timeout(&self, now: Timestamp) -> bool {
        self.idle.is_timeout(&self.config, &self.handshake, now)
    }

    /// True if pacing, a pending probe or a collapsed window permits (or
    /// demands) sending in the space right now
    pub fn can_send(&self, space: PacketNumberSpace, now: Timestamp) -> bool {
        self.pacer.can_send(now)
            || self.pto.is_probe_required(space)
            || self.congestion.should_send_any_packet()
    }

    pub fn is_pto_probe_required(&self, space: PacketNumberSpace) -> bool {
        self.pto.is_probe_required(space)
    }

    pub fn should_send_any_packet(&self) -> bool {
        self.congestion.should_send_any_packet()
    }

    /// Arms the closing-period timer
    pub fn set_close_timer(&mut self, now: Timestamp) {
        let period = self.pto.probe_timeout_duration_with_max_ack_delay(&self.rtt);
        self.close_timer.arm(now + period * CLOSE_PTO_FACTOR);
    }

    pub fn is_close_timeout(&self, now: Timestamp) -> bool {
        self.close_timer.has_fired(now)
    }

    pub fn close_deadline(&self) -> Option<Timestamp> {
        self.close_timer.at()
    }

    /// True if the keep-alive period elapsed with no other timer pending
    pub fn should_send_ping(&self, now: Timestamp) -> bool {
        self.loss.current_state() == LossTimerState::NoTimer && self.ping_timer.has_fired(now)
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-8.2.4
    //# Endpoints SHOULD abandon path validation based on a timer.  When
    //# setting this timer, implementations are cautioned that the new path
    //# could have a longer round-trip time than the original.  A value of
    //# three times the larger of the current PTO or the PTO for the new
    //# path (using kInitialRtt, as defined in [QUIC-RECOVERY]) is
    //# RECOMMENDED.
    pub fn path_validation_deadline(&self, now: Timestamp) -> Timestamp {
        let factor = self.config.base.path_validation_timeout_factor;
        let current = self.pto.probe_timeout_duration_with_max_ack_delay(&self.rtt) * factor;

        let fresh_path = RttEstimator::new(self.config.base.initial_rtt);
        let initial = fresh_path.probe_timeout_duration(self.pto.pto_exponent());

        now + current.max(initial)
    }

    /// The earliest pending deadline across the timer fabric.
    ///
    /// `ack_delay_deadline` is the delayed-ACK deadline owned by the
    /// receive history.
    pub fn get_earliest_deadline(&self, ack_delay_deadline: Option<Timestamp>) -> Option<Timestamp> {
        earliest([
            ack_delay_deadline,
            self.loss.deadline(),
            self.ping_timer.at(),
            self.close_timer.at(),
            self.pacer.deadline(),
            self.idle.deadline(&self.config, &self.handshake),
        ])
    }

    // views

    #[inline]
    pub fn is_server(&self) -> bool {
        self.handshake.is_server()
    }

    #[inline]
    pub fn handshake_status(&self) -> &HandshakeStatus {
        &self.handshake
    }

    pub fn on_retry_sent(&mut self) {
        self.handshake.on_retry_sent();
    }

    #[inline]
    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    #[inline]
    pub fn pto(&self) -> &PtoState {
        &self.pto
    }

    #[inline]
    pub fn loss_timer(&self) -> &LossTimer {
        &self.loss
    }

    #[inline]
    pub fn config(&self) -> &InternalConfig {
        &self.config
    }

    #[inline]
    pub fn congestion(&self) -> &Congestion<Alg> {
        &self.congestion
    }

    #[inline]
    pub fn bytes_in_flight(&self) -> u64 {
        self.congestion.bytes_in_flight()
    }

    #[inline]
    pub fn congestion_window(&self) -> u64 {
        self.congestion.congestion_window()
    }

    /// Fate records observed by stream buffers and loss notifiers
    #[inline]
    pub fn records(&self) -> &RecordArena {
        &self.records
    }

    #[inline]
    pub fn records_mut(&mut self) -> &mut RecordArena {
        &mut self.records
    }

    // internals

    fn on_pto_timeout(&mut self) {
        if no_ack_eliciting_in_flight(&self.issuers)
            && !self.handshake.peer_completed_address_validation()
        {
            //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.2.1
            //# When the PTO fires, the client MUST send a Handshake packet if
            //# it has Handshake keys, otherwise it MUST send an Initial
            //# packet in a UDP datagram with a payload of at least 1200
            //# bytes.
            let space = if self.handshake.handshake_packet_sent() {
                PacketNumberSpace::Handshake
            } else {
                PacketNumberSpace::Initial
            };
            self.pto.on_pto_no_flight(space);
        } else {
            self.pto.on_pto_timeout(self.loss.current_space());
        }
    }

    fn detect_and_remove_lost(
        &mut self,
        space: PacketNumberSpace,
        now: Timestamp,
        must_lose: bool,
    ) -> Result<Vec<SentPacket>, Error> {
        self.loss.reset_loss_time(space);

        let Some(largest_acked) =
            self.issuers[space.as_index()].largest_acked_packet_number()
        else {
            if must_lose {
                return Err(Error::SpuriousLossTimeout);
            }
            return Ok(Vec::new());
        };

        let loss_delay = self.rtt.loss_time_threshold(&self.config);
        let outcome = self.stores[space.as_index()].detect_lost(
            now,
            loss_delay,
            largest_acked,
            self.config.base.packet_order_threshold,
        );

        if let Some(next_loss_time) = outcome.next_loss_time {
            self.loss.update_loss_time(space, next_loss_time);
        }

        let mut sent_time_of_last_loss = None;
        for packet in &outcome.lost {
            self.issuers[space.as_index()].on_packet_lost(packet.status);
            self.congestion.on_packet_lost(
                &mut sent_time_of_last_loss,
                packet.sent_bytes,
                packet.time_sent,
                packet.status,
            );
            if let Some(handle) = packet.record {
                self.records.mark_lost(handle);
            }
        }

        if !outcome.lost.is_empty() {
            self.congestion.on_packets_lost(
                &self.config,
                &self.payload_size,
                &self.rtt,
                &self.pto,
                sent_time_of_last_loss,
                outcome.persistent_period,
            );
        }

        if must_lose && outcome.lost.is_empty() {
            return Err(Error::SpuriousLossTimeout);
        }
        Ok(outcome.lost)
    }

    fn arm_loss_timer(&mut self, now: Timestamp) {
        self.loss.arm(
            &self.config,
            &self.handshake,
            &self.pto,
            &self.rtt,
            &self.issuers,
            &mut self.ping_timer,
            now,
        );
        self.logger.on_loss_timer_updated(
            self.loss.current_state(),
            self.loss.current_space(),
            self.loss.deadline(),
        );
    }
}

#[cfg(test)]
mod tests;
