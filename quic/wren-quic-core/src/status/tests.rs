// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::{
    frame::FrameType,
    packet::{PacketStatus, PacketType},
    recovery::{NullAlgorithm, WindowModifier},
    time::{clock::testing, Clock},
};

const PAYLOAD: u64 = 1200;

#[derive(Clone, Copy, Debug, Default)]
struct CountingAlgorithm {
    sent: usize,
    acked: usize,
    congestion_events: usize,
}

impl CongestionAlgorithm for CountingAlgorithm {
    fn on_packet_sent(&mut self, _sent_bytes: u64, _time_sent: Timestamp) {
        self.sent += 1;
    }

    fn on_packet_ack(&mut self, _window: &mut WindowModifier, _sent_bytes: u64, _time_sent: Timestamp) {
        self.acked += 1;
    }

    fn on_congestion_event(&mut self, _window: &mut WindowModifier, _time_sent: Timestamp) {
        self.congestion_events += 1;
    }
}

struct Env<Alg> {
    clock: testing::Clock,
    status: Status<Alg>,
}

fn client() -> Env<CountingAlgorithm> {
    let clock = testing::Clock::default();
    let status = Status::new(
        InternalConfig::default(),
        CountingAlgorithm::default(),
        false,
        PAYLOAD,
        clock.now(),
    );
    Env { clock, status }
}

fn server() -> Env<NullAlgorithm> {
    let clock = testing::Clock::default();
    let status = Status::new(
        InternalConfig::default(),
        NullAlgorithm,
        true,
        PAYLOAD,
        clock.now(),
    );
    Env { clock, status }
}

fn pn(value: u64) -> PacketNumber {
    PacketNumber::new(VarInt::new(value).unwrap())
}

fn range(smallest: u64, largest: u64) -> AckRange {
    AckRange::new(pn(smallest), pn(largest))
}

impl<Alg: CongestionAlgorithm> Env<Alg> {
    fn packet(&self, space: PacketNumberSpace, number: u64, frame: FrameType) -> SentPacket {
        let mut status = PacketStatus::default();
        status.on_frame(frame);
        let packet_type = match space {
            PacketNumberSpace::Initial => PacketType::Initial,
            PacketNumberSpace::Handshake => PacketType::Handshake,
            PacketNumberSpace::ApplicationData => PacketType::OneRtt,
        };
        SentPacket {
            packet_type,
            packet_number: pn(number),
            status,
            sent_bytes: PAYLOAD,
            time_sent: self.clock.now(),
            largest_ack: None,
            record: None,
        }
    }

    fn send(&mut self, space: PacketNumberSpace, number: u64, frame: FrameType) {
        let packet = self.packet(space, number, frame);
        while self.status.next_and_largest_acked_packet_number(space).0 <= pn(number) {
            self.status.consume_packet_number(space);
        }
        self.status.on_packet_sent(space, packet).unwrap();
    }

    fn ack(
        &mut self,
        space: PacketNumberSpace,
        ranges: &[AckRange],
    ) -> Result<AckedPackets, Error> {
        self.status
            .on_ack_received(space, VarInt::ZERO, None, ranges, self.clock.now(), || false)
    }
}

#[test]
fn packet_number_ranges_and_monotonicity() {
    let mut env = client();
    let space = PacketNumberSpace::ApplicationData;

    env.send(space, 0, FrameType::Stream);

    // replaying the same number is rejected
    let replay = env.packet(space, 0, FrameType::Stream);
    assert_eq!(
        env.status.on_packet_sent(space, replay),
        Err(Error::NonMonotonicPacketNumber)
    );

    // skipping a number widens the reported range
    let skipped = env.packet(space, 2, FrameType::Stream);
    env.status.consume_packet_number(space);
    env.status.consume_packet_number(space);
    assert_eq!(env.status.on_packet_sent(space, skipped), Ok((pn(1), pn(2))));
}

#[test]
fn loss_by_packet_order_threshold() {
    let mut env = client();
    let space = PacketNumberSpace::ApplicationData;

    for number in 0..4 {
        env.send(space, number, FrameType::Stream);
    }
    assert_eq!(env.status.bytes_in_flight(), 4 * PAYLOAD);

    let outcome = env.ack(space, &[range(3, 3)]).unwrap();

    let acked: Vec<u64> = outcome.acked.iter().map(|p| p.packet_number.as_u64()).collect();
    let lost: Vec<u64> = outcome.lost.iter().map(|p| p.packet_number.as_u64()).collect();
    assert_eq!(acked, [3]);
    // only packet 0 satisfies 0 + 3 <= 3; packets 1 and 2 survive
    assert_eq!(lost, [0]);

    assert_eq!(env.status.bytes_in_flight(), 2 * PAYLOAD);
    let algorithm = env.status.congestion().algorithm();
    assert_eq!(algorithm.congestion_events, 1);
    // the acked packet was sent inside the recovery period the loss just
    // opened, so it earns no window growth
    assert_eq!(algorithm.acked, 0);
}

#[test]
fn ack_with_invalid_ranges_is_rejected() {
    let mut env = client();
    let space = PacketNumberSpace::ApplicationData;
    env.send(space, 0, FrameType::Stream);

    assert_eq!(env.ack(space, &[]).unwrap_err(), Error::InvalidAckRanges);
    // ascending order
    assert_eq!(
        env.ack(space, &[range(0, 0), range(2, 3)]).unwrap_err(),
        Error::InvalidAckRanges
    );
    // the failed ACK left the tracker untouched
    assert_eq!(env.status.bytes_in_flight(), PAYLOAD);
}

#[test]
fn rtt_sample_uses_reported_ack_delay() {
    let mut env = client();
    let space = PacketNumberSpace::ApplicationData;
    env.status.on_transport_parameter_received(
        None,
        Duration::from_millis(25),
        DEFAULT_ACK_DELAY_EXPONENT,
    );

    env.send(space, 0, FrameType::Stream);
    env.clock.advance(Duration::from_millis(100));
    env.ack(space, &[range(0, 0)]).unwrap();
    assert_eq!(env.status.rtt().smoothed_rtt(), Duration::from_millis(100));
    assert_eq!(env.status.rtt().min_rtt(), Duration::from_millis(100));

    // second sample: 10ms of reported delay (wire 1250 << 3 = 10000us) is
    // subtracted before smoothing
    env.send(space, 1, FrameType::Stream);
    env.clock.advance(Duration::from_millis(120));
    let now = env.clock.now();
    env.status
        .on_ack_received(
            space,
            VarInt::new(1250).unwrap(),
            None,
            &[range(0, 1)],
            now,
            || false,
        )
        .unwrap();

    let expected = 7 * Duration::from_millis(100) / 8 + Duration::from_millis(110) / 8;
    assert_eq!(env.status.rtt().smoothed_rtt(), expected);
}

#[test]
fn no_rtt_sample_without_newly_acked_largest() {
    let mut env = client();
    let space = PacketNumberSpace::ApplicationData;

    env.send(space, 0, FrameType::Stream);
    env.send(space, 1, FrameType::Stream);
    env.clock.advance(Duration::from_millis(50));

    // the frame's largest (1) was already removed by this first ACK
    env.ack(space, &[range(0, 1)]).unwrap();
    assert!(env.status.rtt().has_first_rtt_sample());

    let before = env.status.rtt().clone();
    env.clock.advance(Duration::from_millis(50));
    // duplicate ACK: nothing newly acked, no sample
    env.ack(space, &[range(0, 1)]).unwrap();
    assert_eq!(env.status.rtt(), &before);
}

#[test]
fn pto_timeout_requests_probes() {
    let mut env = client();
    let space = PacketNumberSpace::Initial;

    env.send(space, 0, FrameType::Crypto);
    assert_eq!(
        env.status.loss_timer().current_state(),
        LossTimerState::WaitForPto
    );
    let deadline = env.status.loss_timer().deadline().unwrap();

    env.clock.advance(deadline - env.clock.now());
    assert!(env.status.is_loss_timeout(env.clock.now()));

    let lost = env.status.on_loss_detection_timeout(env.clock.now()).unwrap();
    assert!(lost.is_empty());

    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.4
    //= type=test
    //# When a PTO timer expires, a sender MUST send at least one ack-
    //# eliciting packet in the packet number space as a probe.
    assert!(env.status.is_pto_probe_required(space));
    assert!(env.status.can_send(space, env.clock.now()));
    assert_eq!(env.status.pto().pto_count(), 1);

    // sending the probes drains the budget
    env.send(space, 1, FrameType::Crypto);
    env.send(space, 2, FrameType::Crypto);
    assert!(!env.status.is_pto_probe_required(space));
}

#[test]
fn ack_resets_pto_backoff_after_validation() {
    let mut env = client();
    let space = PacketNumberSpace::Handshake;

    env.send(space, 0, FrameType::Crypto);
    let deadline = env.status.loss_timer().deadline().unwrap();
    env.clock.advance(deadline - env.clock.now());
    env.status.on_loss_detection_timeout(env.clock.now()).unwrap();
    assert_eq!(env.status.pto().pto_count(), 1);

    env.clock.advance(Duration::from_millis(10));
    // a handshake-space ACK both validates the peer and resets the backoff
    env.ack(space, &[range(0, 0)]).unwrap();
    assert_eq!(env.status.pto().pto_count(), 0);
    assert!(env.status.handshake_status().peer_completed_address_validation());
}

#[test]
fn spurious_loss_timeout_is_an_error() {
    let mut env = client();
    assert_eq!(
        env.status.on_loss_detection_timeout(env.clock.now()),
        Err(Error::SpuriousLossTimeout)
    );
}

#[test]
fn wait_for_loss_fires_and_removes_packets() {
    let mut env = client();
    let space = PacketNumberSpace::ApplicationData;

    let first_sent = env.clock.now();
    env.send(space, 0, FrameType::Stream);
    env.clock.advance(Duration::from_millis(1));
    env.send(space, 1, FrameType::Stream);
    env.clock.advance(Duration::from_millis(40));

    // packet 1 is acked; packet 0 (41ms old, threshold 45ms) is too recent
    // to be lost by time and too close for the order threshold, so a loss
    // timer is armed at its threshold crossing
    env.ack(space, &[range(1, 1)]).unwrap();
    assert_eq!(
        env.status.loss_timer().current_state(),
        LossTimerState::WaitForLoss
    );
    let deadline = env.status.loss_timer().deadline().unwrap();
    assert_eq!(deadline, first_sent + Duration::from_millis(45));

    env.clock.advance(deadline - env.clock.now() + Duration::from_millis(1));
    let lost = env.status.on_loss_detection_timeout(env.clock.now()).unwrap();
    assert_eq!(lost.len(), 1);
    assert_eq!(lost[0].packet_number, pn(0));
    assert_eq!(
        env.status.loss_timer().current_state(),
        LossTimerState::WaitForPto
    );
}

#[test]
fn anti_amplification_parks_and_datagrams_unpark() {
    let mut env = server();
    let space = PacketNumberSpace::Initial;

    env.status.on_datagram_received(100, env.clock.now());
    env.send(space, 0, FrameType::Crypto);

    // 1200 sent >= 3 * 100 received
    assert!(env.status.handshake_status().is_at_anti_amplification_limit());
    assert_eq!(
        env.status.loss_timer().current_state(),
        LossTimerState::AtAntiAmplificationLimit
    );

    // more credit lifts the limit and restores the PTO timer
    env.status.on_datagram_received(1200, env.clock.now());
    assert!(!env.status.handshake_status().is_at_anti_amplification_limit());
    assert_eq!(
        env.status.loss_timer().current_state(),
        LossTimerState::WaitForPto
    );

    // once the client's handshake packet decrypts, the address stays
    // validated regardless of the byte ratio
    env.status
        .on_packet_decrypted(PacketNumberSpace::Handshake, env.clock.now());
    env.send(space, 1, FrameType::Crypto);
    env.send(space, 2, FrameType::Crypto);
    assert!(!env.status.handshake_status().is_at_anti_amplification_limit());
}

#[test]
fn space_discard_returns_bytes_and_rejects_later_events() {
    let mut env = client();
    let space = PacketNumberSpace::Initial;

    env.send(space, 0, FrameType::Crypto);
    env.send(space, 1, FrameType::Crypto);
    assert_eq!(env.status.bytes_in_flight(), 2 * PAYLOAD);

    let removed = env
        .status
        .on_packet_number_space_discard(space, env.clock.now());
    assert_eq!(removed.len(), 2);
    assert_eq!(env.status.bytes_in_flight(), 0);

    // the space is gone: acks and sends now fail
    assert_eq!(
        env.ack(space, &[range(0, 1)]).unwrap_err(),
        Error::PacketNumberSpaceDiscarded
    );
    let packet = env.packet(space, 2, FrameType::Crypto);
    assert_eq!(
        env.status.on_packet_sent(space, packet),
        Err(Error::PacketNumberSpaceDiscarded)
    );

    // discarding twice returns nothing
    assert!(env
        .status
        .on_packet_number_space_discard(space, env.clock.now())
        .is_empty());
}

#[test]
fn application_space_cannot_be_discarded() {
    let mut env = client();
    let space = PacketNumberSpace::ApplicationData;
    env.send(space, 0, FrameType::Stream);

    assert!(env
        .status
        .on_packet_number_space_discard(space, env.clock.now())
        .is_empty());
    assert_eq!(env.status.bytes_in_flight(), PAYLOAD);
}

#[test]
fn retry_resets_rtt_baseline() {
    let mut env = client();
    let space = PacketNumberSpace::Initial;

    env.clock.advance(Duration::from_millis(10));
    env.send(space, 0, FrameType::Crypto);

    env.clock.advance(Duration::from_millis(30));
    let removed = env.status.on_retry_received(env.clock.now());
    assert_eq!(removed.len(), 1);

    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.2
    //= type=test
    //# When a Retry packet is received, the client can use the elapsed
    //# time to compute an initial RTT estimate
    assert_eq!(env.status.rtt().smoothed_rtt(), Duration::from_millis(30));
    assert!(env.status.handshake_status().retry_received());
    assert_eq!(env.status.bytes_in_flight(), 0);
    assert_eq!(env.status.pto().pto_count(), 0);

    // the issue counter survives so numbers are not reused
    let (next, largest_acked) = env.status.next_and_largest_acked_packet_number(space);
    assert_eq!(next, pn(1));
    assert_eq!(largest_acked, None);
}

#[test]
fn earliest_deadline_aggregates_all_timers() {
    let mut env = client();
    let space = PacketNumberSpace::Initial;

    env.send(space, 0, FrameType::Crypto);
    let loss_deadline = env.status.loss_timer().deadline().unwrap();
    assert_eq!(env.status.get_earliest_deadline(None), Some(loss_deadline));

    // an earlier delayed-ACK deadline wins
    let ack_deadline = env.clock.now() + Duration::from_millis(1);
    assert_eq!(
        env.status.get_earliest_deadline(Some(ack_deadline)),
        Some(ack_deadline)
    );

    // the close timer participates once armed
    env.status.set_close_timer(env.clock.now());
    let close_deadline = env.status.close_deadline().unwrap();
    assert!(close_deadline > loss_deadline);
    assert_eq!(env.status.get_earliest_deadline(None), Some(loss_deadline));
    assert!(!env.status.is_close_timeout(env.clock.now()));
    assert!(env.status.is_close_timeout(close_deadline));
}

#[test]
fn handshake_timeout_counts_from_creation() {
    let clock = testing::Clock::default();
    let mut config = InternalConfig::default();
    config.base.handshake_timeout = Some(Duration::from_secs(10));
    let status: Status<NullAlgorithm> =
        Status::new(config, NullAlgorithm, false, PAYLOAD, clock.now());

    assert!(!status.is_handshake_timeout(clock.now()));
    assert!(status.is_handshake_timeout(clock.now() + Duration::from_secs(10)));
}

#[test]
fn server_handshake_complete_confirms() {
    let mut env = server();
    env.status.on_handshake_complete();
    assert!(env.status.handshake_status().handshake_complete());
    assert!(env.status.handshake_status().handshake_confirmed());

    let mut env = client();
    env.status.on_handshake_complete();
    assert!(env.status.handshake_status().handshake_complete());
    assert!(!env.status.handshake_status().handshake_confirmed());
    env.status.on_handshake_confirmed();
    assert!(env.status.handshake_status().handshake_confirmed());
}

#[test]
fn keep_alive_ping_when_idle() {
    let clock = testing::Clock::default();
    let mut config = InternalConfig::default();
    config.base.ping_period = Some(Duration::from_secs(5));
    let mut env = Env {
        clock,
        status: Status::new(config, CountingAlgorithm::default(), false, PAYLOAD, clock.now()),
    };
    let space = PacketNumberSpace::Handshake;

    // validated peer, nothing in flight: the ping timer runs
    env.send(space, 0, FrameType::Crypto);
    env.clock.advance(Duration::from_millis(20));
    env.ack(space, &[range(0, 0)]).unwrap();

    assert_eq!(env.status.loss_timer().current_state(), LossTimerState::NoTimer);
    assert!(!env.status.should_send_ping(env.clock.now()));
    env.clock.advance(Duration::from_secs(5));
    assert!(env.status.should_send_ping(env.clock.now()));
}

#[test]
fn fate_records_are_marked() {
    use crate::ack::AckLostState;

    let mut env = client();
    let space = PacketNumberSpace::ApplicationData;

    let acked_handle = env.status.records_mut().alloc();
    let lost_handle = env.status.records_mut().alloc();

    for (number, handle) in [(0u64, lost_handle), (1, acked_handle)] {
        let mut packet = env.packet(space, number, FrameType::Stream);
        packet.record = Some(handle);
        while env.status.next_and_largest_acked_packet_number(space).0 <= pn(number) {
            env.status.consume_packet_number(space);
        }
        env.status.on_packet_sent(space, packet).unwrap();
        env.clock.advance(Duration::from_millis(500));
    }

    env.clock.advance(Duration::from_secs(2));
    env.ack(space, &[range(1, 1)]).unwrap();

    // packet 1 was acked; packet 0 is lost by the time threshold
    assert_eq!(env.status.records().get(acked_handle), Some(AckLostState::Acked));
    assert_eq!(env.status.records().get(lost_handle), Some(AckLostState::Lost));

    env.status.records_mut().release(acked_handle);
    assert_eq!(env.status.records().get(acked_handle), None);
}

#[test]
fn largest_ack_flows_back_for_history_pruning() {
    let mut env = client();
    let space = PacketNumberSpace::ApplicationData;

    // this packet carried an ACK frame acknowledging up to 41
    let mut packet = env.packet(space, 0, FrameType::Ack);
    packet.status.on_frame(FrameType::Stream);
    packet.largest_ack = Some(pn(41));
    env.status.consume_packet_number(space);
    env.status.on_packet_sent(space, packet).unwrap();

    assert_eq!(env.status.largest_acked_sent_ack(), None);
    env.clock.advance(Duration::from_millis(20));
    env.ack(space, &[range(0, 0)]).unwrap();
    assert_eq!(env.status.largest_acked_sent_ack(), Some(pn(41)));
}

#[test]
fn path_validation_deadline_is_at_least_the_fresh_path_pto() {
    let env = client();
    let now = env.clock.now();

    let fresh = RttEstimator::new(env.status.config().base.initial_rtt);
    let floor = fresh.probe_timeout_duration(1);
    let deadline = env.status.path_validation_deadline(now);
    assert!(deadline >= now + floor);
}

#[test]
fn reset_rebuilds_initial_state() {
    let mut env = client();
    let space = PacketNumberSpace::Initial;

    env.send(space, 0, FrameType::Crypto);
    env.clock.advance(Duration::from_millis(20));
    env.ack(space, &[range(0, 0)]).unwrap();
    env.status
        .on_packet_number_space_discard(space, env.clock.now());
    assert!(env.status.rtt().has_first_rtt_sample());

    env.status.reset(
        CountingAlgorithm::default(),
        false,
        PAYLOAD,
        env.clock.now(),
    );

    assert_eq!(env.status.bytes_in_flight(), 0);
    assert!(!env.status.rtt().has_first_rtt_sample());
    assert_eq!(env.status.loss_timer().current_state(), LossTimerState::NoTimer);
    assert_eq!(env.status.get_earliest_deadline(None), None);

    // discarded spaces are live again
    env.send(space, 0, FrameType::Crypto);
    assert_eq!(env.status.bytes_in_flight(), PAYLOAD);
}

#[test]
fn payload_size_updates_only_grow() {
    let mut env = client();
    env.status.on_payload_size_update(1500);
    env.status.on_payload_size_update(1400);
    // a shrink is ignored; the congestion window reflects only the growth
    let window = env.status.congestion_window();
    assert_eq!(window, 10 * PAYLOAD);
}
