// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    packet::number::PacketNumberSpace,
    recovery::{PtoState, RttEstimator},
    status::{
        config::InternalConfig,
        handshake::HandshakeStatus,
        pn::{no_ack_eliciting_in_flight, PacketNumberIssuer},
    },
    time::{Deadline, Timestamp},
};

/// What the armed loss detection deadline, if any, is waiting for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LossTimerState {
    /// Nothing to wait for; the keep-alive PING timer may run instead
    NoTimer,
    /// A sent packet will cross the loss time threshold at the deadline
    WaitForLoss,
    /// Blocked on the peer: sending more would exceed the amplification
    /// limit, so no timer can make progress
    AtAntiAmplificationLimit,
    /// No loss pending; the deadline fires a probe timeout
    WaitForPto,
}

impl LossTimerState {
    pub fn name(self) -> &'static str {
        match self {
            Self::NoTimer => "no timer",
            Self::WaitForLoss => "wait for loss",
            Self::AtAntiAmplificationLimit => "at anti-amplification limit",
            Self::WaitForPto => "wait for pto",
        }
    }
}

/// The loss detection timer: per-space earliest loss times plus the single
/// armed deadline shared between loss detection and probe timeouts.
#[derive(Clone, Debug)]
pub struct LossTimer {
    loss_time: [Option<Timestamp>; PacketNumberSpace::COUNT],
    timer: Deadline,
    state: LossTimerState,
    timer_space: Option<PacketNumberSpace>,
}

impl Default for LossTimer {
    fn default() -> Self {
        Self {
            loss_time: [None; PacketNumberSpace::COUNT],
            timer: Deadline::idle(),
            state: LossTimerState::NoTimer,
            timer_space: None,
        }
    }
}

impl LossTimer {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    #[inline]
    pub fn current_state(&self) -> LossTimerState {
        self.state
    }

    /// The space the armed deadline applies to
    #[inline]
    pub fn current_space(&self) -> Option<PacketNumberSpace> {
        self.timer_space
    }

    #[inline]
    pub fn is_timeout(&self, now: Timestamp) -> bool {
        self.timer.has_fired(now)
    }

    #[inline]
    pub fn deadline(&self) -> Option<Timestamp> {
        self.timer.at()
    }

    pub fn reset_loss_time(&mut self, space: PacketNumberSpace) {
        self.loss_time[space.as_index()] = None;
    }

    /// Lowers the space's loss time towards `time`
    pub fn update_loss_time(&mut self, space: PacketNumberSpace, time: Timestamp) {
        let slot = &mut self.loss_time[space.as_index()];
        if slot.map_or(true, |existing| time < existing) {
            *slot = Some(time);
        }
    }

    pub fn on_packet_number_space_discard(&mut self, space: PacketNumberSpace) {
        self.reset_loss_time(space);
    }

    pub fn on_retry_received(&mut self) {
        self.reset();
    }

    fn earliest_loss_time(&self) -> Option<(Timestamp, PacketNumberSpace)> {
        let mut earliest: Option<(Timestamp, PacketNumberSpace)> = None;
        for (index, slot) in self.loss_time.iter().enumerate() {
            if let Some(time) = slot {
                if earliest.map_or(true, |(t, _)| *time < t) {
                    earliest = Some((*time, SPACES[index]));
                }
            }
        }
        earliest
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
    //# When an ack-eliciting packet is transmitted, the sender schedules a
    //# timer for the PTO period as follows:
    //#
    //# PTO = smoothed_rtt + max(4*rttvar, kGranularity) + max_ack_delay
    fn probe_deadline(
        &self,
        handshake: &HandshakeStatus,
        pto: &PtoState,
        rtt: &RttEstimator,
        issuers: &[PacketNumberIssuer; PacketNumberSpace::COUNT],
        now: Timestamp,
    ) -> Option<(Timestamp, PacketNumberSpace)> {
        let duration = pto.probe_timeout_duration(rtt);

        if no_ack_eliciting_in_flight(issuers) {
            //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.2.1
            //# Since the server could be blocked until more datagrams are
            //# received from the client, it is the client's responsibility
            //# to send packets to unblock the server until it is certain
            //# that the server has finished its address validation
            if handshake.peer_completed_address_validation() {
                return None;
            }
            let space = if handshake.handshake_packet_sent() {
                PacketNumberSpace::Handshake
            } else {
                PacketNumberSpace::Initial
            };
            return Some((now + duration, space));
        }

        let mut deadline: Option<(Timestamp, PacketNumberSpace)> = None;
        let mut duration = duration;
        for space in SPACES {
            let issuer = &issuers[space.as_index()];
            if issuer.no_ack_eliciting_in_flight() {
                continue;
            }
            if space.is_application_data() {
                //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
                //# An endpoint MUST NOT set its PTO timer for the Application
                //# Data packet number space until the handshake is confirmed.
                if !handshake.handshake_confirmed() {
                    return deadline;
                }
                duration += rtt.max_ack_delay() * u32::try_from(pto.pto_exponent()).unwrap_or(u32::MAX);
            }
            if let Some(sent_time) = issuer.last_ack_eliciting_packet_sent_time() {
                let candidate = sent_time + duration;
                if deadline.map_or(true, |(t, _)| candidate < t) {
                    deadline = Some((candidate, space));
                }
            }
        }
        deadline
    }

    /// Re-arms the timer after any event that can change what it waits for
    pub fn arm(
        &mut self,
        config: &InternalConfig,
        handshake: &HandshakeStatus,
        pto: &PtoState,
        rtt: &RttEstimator,
        issuers: &[PacketNumberIssuer; PacketNumberSpace::COUNT],
        ping_timer: &mut Deadline,
        now: Timestamp,
    ) {
        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
        //# If a time threshold loss detection timer is set, it takes
        //# precedence over the PTO timer.
        if let Some((deadline, space)) = self.earliest_loss_time() {
            self.timer.arm(deadline);
            self.state = LossTimerState::WaitForLoss;
            self.timer_space = Some(space);
            ping_timer.disarm();
            return;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.2.1
        //# If no additional data can be sent, the server's PTO timer MUST
        //# NOT be armed until datagrams have been received from the client
        if handshake.is_at_anti_amplification_limit() {
            self.timer.disarm();
            self.state = LossTimerState::AtAntiAmplificationLimit;
            self.timer_space = None;
            ping_timer.disarm();
            return;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
        //# An endpoint that has no ack-eliciting packets in flight and is
        //# certain the peer has validated its address does not rearm the
        //# timer.
        if no_ack_eliciting_in_flight(issuers) && handshake.peer_completed_address_validation() {
            self.timer.disarm();
            self.state = LossTimerState::NoTimer;
            self.timer_space = None;
            Self::arm_ping(config, ping_timer, now);
            return;
        }

        match self.probe_deadline(handshake, pto, rtt, issuers, now) {
            Some((deadline, space)) => {
                self.timer.arm(deadline);
                self.state = LossTimerState::WaitForPto;
                self.timer_space = Some(space);
            }
            None => {
                self.timer.disarm();
                self.state = LossTimerState::NoTimer;
                self.timer_space = None;
                Self::arm_ping(config, ping_timer, now);
            }
        }
    }

    fn arm_ping(config: &InternalConfig, ping_timer: &mut Deadline, now: Timestamp) {
        if let Some(period) = config.base.ping_period {
            ping_timer.arm(now + period);
        }
    }
}

const SPACES: [PacketNumberSpace; PacketNumberSpace::COUNT] = [
    PacketNumberSpace::Initial,
    PacketNumberSpace::Handshake,
    PacketNumberSpace::ApplicationData,
];
