// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    status::{config::InternalConfig, handshake::HandshakeStatus},
    time::{Duration, Timestamp},
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-10.1
//# If a max_idle_timeout is specified by either endpoint in its transport
//# parameters (Section 18.2), the connection is silently closed and its
//# state is discarded when it remains idle for longer than the minimum of
//# the max_idle_timeout value advertised by both endpoints.

/// Idle timeout arbitration.
///
/// The effective timeout is the minimum of both endpoints' advertised
/// values; before the handshake confirms, the (usually shorter)
/// handshake-idle timeout applies instead.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdleTimer {
    negotiated_timeout: Option<Duration>,
    last_recv_time: Option<Timestamp>,
    first_ack_eliciting_sent_after_idle: Option<Timestamp>,
}

impl IdleTimer {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Applies the peer's `max_idle_timeout` transport parameter
    pub fn apply_idle_timeout(&mut self, config: &InternalConfig, peer_idle_timeout: Option<Duration>) {
        self.negotiated_timeout = match (config.idle_timeout, peer_idle_timeout) {
            (Some(local), Some(peer)) => Some(local.min(peer)),
            (Some(local), None) => Some(local),
            (None, Some(peer)) => Some(peer),
            (None, None) => None,
        };
    }

    fn current_timeout(
        &self,
        config: &InternalConfig,
        handshake: &HandshakeStatus,
    ) -> Option<Duration> {
        if handshake.handshake_confirmed() {
            self.negotiated_timeout
        } else {
            config.base.handshake_idle_timeout
        }
    }

    /// The idle deadline, if one is running
    pub fn deadline(
        &self,
        config: &InternalConfig,
        handshake: &HandshakeStatus,
    ) -> Option<Timestamp> {
        let timeout = self.current_timeout(config, handshake)?;
        let base = match (self.last_recv_time, self.first_ack_eliciting_sent_after_idle) {
            (Some(recv), Some(sent)) => recv.min(sent),
            (Some(recv), None) => recv,
            (None, Some(sent)) => sent,
            (None, None) => return None,
        };
        Some(base + timeout)
    }

    pub fn is_timeout(
        &self,
        config: &InternalConfig,
        handshake: &HandshakeStatus,
        now: Timestamp,
    ) -> bool {
        self.deadline(config, handshake)
            .map_or(false, |deadline| deadline.has_elapsed(now))
    }

    /// Receiving anything restarts the idle period
    pub fn on_packet_decrypted(&mut self, now: Timestamp) {
        self.last_recv_time = Some(now);
        self.first_ack_eliciting_sent_after_idle = None;
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-10.1
    //# An endpoint also restarts its idle timer when sending an ack-
    //# eliciting packet if no other ack-eliciting packets have been sent
    //# since last receiving and processing a packet.
    pub fn on_packet_sent(&mut self, now: Timestamp, is_ack_eliciting: bool) {
        if is_ack_eliciting && self.first_ack_eliciting_sent_after_idle.is_none() {
            self.first_ack_eliciting_sent_after_idle = Some(now);
        }
    }
}
