// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    error::Error,
    packet::{
        number::{PacketNumber, PacketNumberSpace},
        PacketType,
    },
    recovery::{LossTimerState, RttEstimator},
    time::Timestamp,
};

/// Telemetry sink injected into the transport control core.
///
/// Every hook has an empty default body; implementations override the
/// events they care about. The core never inspects results, so loggers
/// cannot influence behavior.
pub trait ConnectionLogger {
    /// A received packet was discarded before processing completed
    fn on_packet_dropped(
        &mut self,
        packet_type: PacketType,
        packet_number: Option<PacketNumber>,
        error: &Error,
    ) {
        let _ = (packet_type, packet_number, error);
    }

    fn on_debug(&mut self, message: &str) {
        let _ = message;
    }

    /// A core operation surfaced an error to the transport
    fn on_error_reported(&mut self, error: &Error) {
        let _ = error;
    }

    fn on_packet_sending(
        &mut self,
        packet_type: PacketType,
        packet_number: PacketNumber,
        sent_bytes: u64,
    ) {
        let _ = (packet_type, packet_number, sent_bytes);
    }

    fn on_packet_received(
        &mut self,
        packet_type: PacketType,
        packet_number: PacketNumber,
        recv_bytes: u64,
    ) {
        let _ = (packet_type, packet_number, recv_bytes);
    }

    /// A probe timeout fired for the given space
    fn on_pto_fired(&mut self, space: Option<PacketNumberSpace>) {
        let _ = space;
    }

    /// The loss detection timer was re-armed
    fn on_loss_timer_updated(
        &mut self,
        state: LossTimerState,
        space: Option<PacketNumberSpace>,
        deadline: Option<Timestamp>,
    ) {
        let _ = (state, space, deadline);
    }

    /// An MTU probe of the given size is outstanding
    fn on_mtu_probe(&mut self, probe_size: u64) {
        let _ = probe_size;
    }

    /// The RTT estimate changed after an acknowledgement
    fn on_rtt_updated(&mut self, rtt: &RttEstimator, now: Timestamp) {
        let _ = (rtt, now);
    }
}

/// Discards every event
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLogger;

impl ConnectionLogger for NoopLogger {}
