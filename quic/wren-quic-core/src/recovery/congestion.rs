// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    packet::PacketStatus,
    recovery::{PtoState, RttEstimator},
    status::config::{InternalConfig, PayloadSize},
    time::{Duration, Timestamp},
};

#[inline]
fn min_window(config: &InternalConfig, max_udp_payload_size: u64) -> u64 {
    config.base.window_minimum_factor * max_udp_payload_size
}

/// Direction-checked access to the congestion window, handed to the
/// pluggable algorithm for the duration of one callback.
#[derive(Debug)]
pub struct WindowModifier<'a> {
    window: &'a mut u64,
    min_window: u64,
    max_payload: u64,
    grow: bool,
}

impl<'a> WindowModifier<'a> {
    #[inline]
    pub fn window(&self) -> u64 {
        *self.window
    }

    #[inline]
    pub fn min_window(&self) -> u64 {
        self.min_window
    }

    #[inline]
    pub fn max_payload(&self) -> u64 {
        self.max_payload
    }

    /// Applies a new window value.
    ///
    /// The acknowledgement path may only grow the window and the congestion
    /// path may only shrink it; updates in the wrong direction are refused.
    #[inline]
    pub fn update(&mut self, new_window: u64) -> bool {
        if self.grow {
            if new_window < *self.window {
                return false;
            }
        } else if new_window > *self.window {
            return false;
        }
        *self.window = new_window;
        true
    }
}

/// A congestion control algorithm.
///
/// The recovery engine owns the window and the in-flight accounting; the
/// algorithm only decides how the window moves. The provided
/// [`NullAlgorithm`] keeps the initial window forever; Reno, CUBIC or BBR
/// style controllers implement this trait without touching the tracker.
pub trait CongestionAlgorithm {
    fn on_packet_sent(&mut self, sent_bytes: u64, time_sent: Timestamp);

    /// Invoked once per acknowledged byte-counted packet, outside recovery
    fn on_packet_ack(&mut self, window: &mut WindowModifier, sent_bytes: u64, time_sent: Timestamp);

    /// Invoked when loss or ECN signals congestion, at most once per
    /// recovery period
    fn on_congestion_event(&mut self, window: &mut WindowModifier, time_sent: Timestamp);
}

/// The do-nothing algorithm
#[derive(Clone, Copy, Debug, Default)]
pub struct NullAlgorithm;

impl CongestionAlgorithm for NullAlgorithm {
    fn on_packet_sent(&mut self, _sent_bytes: u64, _time_sent: Timestamp) {}

    fn on_packet_ack(
        &mut self,
        _window: &mut WindowModifier,
        _sent_bytes: u64,
        _time_sent: Timestamp,
    ) {
    }

    fn on_congestion_event(&mut self, _window: &mut WindowModifier, _time_sent: Timestamp) {}
}

/// Congestion state shared by every algorithm: the window, bytes in
/// flight, the recovery period and persistent congestion handling.
#[derive(Clone, Debug)]
pub struct Congestion<Alg> {
    congestion_window: u64,
    bytes_in_flight: u64,
    congestion_recovery_start_time: Option<Timestamp>,
    /// Set when the window collapsed; a packet should be sent regardless of
    /// pacing so the connection does not stall
    should_send_any: bool,
    algorithm: Alg,
}

impl<Alg: CongestionAlgorithm> Congestion<Alg> {
    pub fn new(config: &InternalConfig, payload_size: &PayloadSize, algorithm: Alg) -> Self {
        Self {
            congestion_window: config.base.window_initial_factor * payload_size.current(),
            bytes_in_flight: 0,
            congestion_recovery_start_time: None,
            should_send_any: false,
            algorithm,
        }
    }

    pub fn reset(&mut self, config: &InternalConfig, payload_size: &PayloadSize, algorithm: Alg) {
        *self = Self::new(config, payload_size, algorithm);
    }

    #[inline]
    pub fn congestion_window(&self) -> u64 {
        self.congestion_window
    }

    /// The pluggable algorithm driving this window
    #[inline]
    pub fn algorithm(&self) -> &Alg {
        &self.algorithm
    }

    #[inline]
    pub fn bytes_in_flight(&self) -> u64 {
        self.bytes_in_flight
    }

    #[inline]
    pub fn should_send_any_packet(&self) -> bool {
        self.should_send_any
    }

    #[inline]
    pub fn is_congestion_limited(&self, payload_size: &PayloadSize) -> bool {
        self.bytes_in_flight + payload_size.current() > self.congestion_window
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.2
    //# A recovery period ends and the sender enters congestion avoidance
    //# when a packet sent during the recovery period is acknowledged.
    #[inline]
    pub fn in_congestion_recovery(&self, time_sent: Timestamp) -> bool {
        self.congestion_recovery_start_time
            .map_or(false, |start| time_sent <= start)
    }

    pub fn on_packet_sent(&mut self, sent_bytes: u64, time_sent: Timestamp) {
        self.bytes_in_flight += sent_bytes;
        self.should_send_any = false;
        self.algorithm.on_packet_sent(sent_bytes, time_sent);
    }

    /// Applies credit for one acknowledged packet
    pub fn on_packet_ack(
        &mut self,
        config: &InternalConfig,
        payload_size: &PayloadSize,
        sent_bytes: u64,
        time_sent: Timestamp,
        status: PacketStatus,
        flow_control_limited: bool,
    ) {
        if !status.is_byte_counted() {
            return;
        }
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(sent_bytes);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.8
        //# When bytes in flight is smaller than the congestion window and
        //# sending is not pacing limited, the congestion window is
        //# underutilized.  When this occurs, the congestion window SHOULD
        //# NOT be increased in either slow start or congestion avoidance.
        if flow_control_limited {
            return;
        }
        if self.in_congestion_recovery(time_sent) {
            return;
        }

        let mut modifier = WindowModifier {
            window: &mut self.congestion_window,
            min_window: min_window(config, payload_size.current()),
            max_payload: payload_size.current(),
            grow: true,
        };
        self.algorithm.on_packet_ack(&mut modifier, sent_bytes, time_sent);
    }

    /// Accounts one lost packet; congestion reaction happens afterwards in
    /// [`Congestion::on_packets_lost`]
    pub fn on_packet_lost(
        &mut self,
        sent_time_of_last_loss: &mut Option<Timestamp>,
        sent_bytes: u64,
        time_sent: Timestamp,
        status: PacketStatus,
    ) {
        if !status.is_byte_counted() {
            return;
        }
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(sent_bytes);

        if !status.is_ack_eliciting() {
            return;
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-14.4
        //# Loss of a QUIC packet that is carried in a PMTU probe is therefore
        //# not a reliable indication of congestion and SHOULD NOT trigger a
        //# congestion control reaction; see Item 7 in Section 3 of
        //# [DPLPMTUD].
        if status.is_mtu_probe() {
            return;
        }

        *sent_time_of_last_loss = match *sent_time_of_last_loss {
            Some(prev) => Some(prev.max(time_sent)),
            None => Some(time_sent),
        };
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.1
    //# The sender MUST exit slow start and enter a recovery period when a
    //# packet is lost or when the ECN-CE count reported by its peer
    //# increases.
    pub fn on_congestion_event(
        &mut self,
        config: &InternalConfig,
        payload_size: &PayloadSize,
        time_sent: Timestamp,
    ) {
        if self.in_congestion_recovery(time_sent) {
            return;
        }
        self.congestion_recovery_start_time = Some(time_sent);

        let mut modifier = WindowModifier {
            window: &mut self.congestion_window,
            min_window: min_window(config, payload_size.current()),
            max_payload: payload_size.current(),
            grow: false,
        };
        self.algorithm.on_congestion_event(&mut modifier, time_sent);
        self.should_send_any = true;
    }

    /// Reacts to a completed loss detection pass.
    ///
    /// `persistent_period` carries the send times bounding the longest run
    /// of consecutively lost ack-eliciting packets.
    pub fn on_packets_lost(
        &mut self,
        config: &InternalConfig,
        payload_size: &PayloadSize,
        rtt: &RttEstimator,
        pto: &PtoState,
        sent_time_of_last_loss: Option<Timestamp>,
        persistent_period: Option<(Timestamp, Timestamp)>,
    ) -> bool {
        if let Some(time_sent) = sent_time_of_last_loss {
            self.on_congestion_event(config, payload_size, time_sent);
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.6.2
        //# The persistent congestion period SHOULD NOT start until there is
        //# at least one RTT sample.
        let Some(first_rtt_sample) = rtt.first_rtt_sample() else {
            return false;
        };
        let Some((earliest, latest)) = persistent_period else {
            return false;
        };
        if earliest <= first_rtt_sample || latest <= first_rtt_sample {
            return false;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.6.1
        //# The persistent congestion duration is computed as follows:
        //#
        //# (smoothed_rtt + max(4*rttvar, kGranularity) + max_ack_delay) *
        //#     kPersistentCongestionThreshold
        let threshold = u32::try_from(config.base.persistent_congestion_threshold).unwrap_or(u32::MAX);
        let duration = pto.probe_timeout_duration_with_max_ack_delay(rtt) * threshold;

        if latest.saturating_duration_since(earliest) >= duration {
            //= https://www.rfc-editor.org/rfc/rfc9002#section-7.6.2
            //# When persistent congestion is declared, the sender's congestion
            //# window MUST be reduced to the minimum congestion window
            //# (kMinimumWindow)
            self.congestion_window = min_window(config, payload_size.current());
            self.congestion_recovery_start_time = None;
            self.should_send_any = true;
            return true;
        }
        false
    }

    /// Bytes per second the current window sustains at the smoothed RTT
    pub fn bandwidth(&self, rtt: &RttEstimator) -> u64 {
        let smoothed = rtt.smoothed_rtt();
        if smoothed.is_zero() {
            return u64::MAX;
        }
        self.congestion_window
            .saturating_mul(1_000_000)
            .checked_div(smoothed.as_micros() as u64)
            .unwrap_or(u64::MAX)
    }

    /// A PMTU update re-bases a window sitting at the old minimum
    pub fn on_max_udp_payload_size_update(
        &mut self,
        config: &InternalConfig,
        old_size: u64,
        new_size: u64,
    ) {
        if min_window(config, old_size) == self.congestion_window {
            self.congestion_window = min_window(config, new_size);
        }
    }

    pub fn on_packet_number_space_discard(&mut self, sent_bytes: u64, status: PacketStatus) {
        if status.is_byte_counted() {
            self.bytes_in_flight = self.bytes_in_flight.saturating_sub(sent_bytes);
        }
    }

    pub fn on_connection_migration(&mut self, config: &InternalConfig, payload_size: &PayloadSize) {
        self.congestion_window = config.base.window_initial_factor * payload_size.current();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frame::FrameType,
        status::config::DEFAULT_INITIAL_RTT,
        time::{clock::testing, Clock},
    };

    const PAYLOAD: u64 = 1200;

    fn setup() -> (InternalConfig, PayloadSize, Congestion<NullAlgorithm>) {
        let config = InternalConfig::default();
        let payload_size = PayloadSize::new(PAYLOAD);
        let congestion = Congestion::new(&config, &payload_size, NullAlgorithm);
        (config, payload_size, congestion)
    }

    fn eliciting() -> PacketStatus {
        let mut status = PacketStatus::default();
        status.on_frame(FrameType::Stream);
        status
    }

    fn sampled_rtt(epoch: Timestamp) -> RttEstimator {
        let mut rtt = RttEstimator::new(DEFAULT_INITIAL_RTT);
        rtt.sample(epoch + Duration::from_millis(100), epoch, Duration::ZERO)
            .unwrap();
        rtt
    }

    #[test]
    fn initial_window() {
        let (_, _, congestion) = setup();
        assert_eq!(congestion.congestion_window(), 10 * PAYLOAD);
        assert_eq!(congestion.bytes_in_flight(), 0);
    }

    #[test]
    fn bytes_in_flight_accounting() {
        let (config, payload_size, mut congestion) = setup();
        let now = testing::Clock::default().now();

        congestion.on_packet_sent(PAYLOAD, now);
        congestion.on_packet_sent(PAYLOAD, now);
        assert_eq!(congestion.bytes_in_flight(), 2 * PAYLOAD);

        congestion.on_packet_ack(&config, &payload_size, PAYLOAD, now, eliciting(), false);
        assert_eq!(congestion.bytes_in_flight(), PAYLOAD);

        let mut last_loss = None;
        congestion.on_packet_lost(&mut last_loss, PAYLOAD, now, eliciting());
        assert_eq!(congestion.bytes_in_flight(), 0);
        assert_eq!(last_loss, Some(now));
    }

    #[test]
    fn ack_only_packets_are_not_counted() {
        let (config, payload_size, mut congestion) = setup();
        let now = testing::Clock::default().now();

        let mut ack_only = PacketStatus::default();
        ack_only.on_frame(FrameType::Ack);

        congestion.on_packet_ack(&config, &payload_size, PAYLOAD, now, ack_only, false);
        assert_eq!(congestion.bytes_in_flight(), 0);
    }

    #[test]
    fn congestion_event_once_per_recovery_period() {
        let (config, payload_size, mut congestion) = setup();
        let mut clock = testing::Clock::default();
        let first = clock.now();

        congestion.on_congestion_event(&config, &payload_size, first);
        assert!(congestion.should_send_any_packet());
        assert!(congestion.in_congestion_recovery(first));

        // a loss from inside the recovery period does not restart it
        congestion.on_congestion_event(&config, &payload_size, first);
        assert!(congestion.in_congestion_recovery(first));

        // a send leaves the escape hatch behind
        clock.advance(Duration::from_millis(1));
        congestion.on_packet_sent(PAYLOAD, clock.now());
        assert!(!congestion.should_send_any_packet());
        assert!(!congestion.in_congestion_recovery(clock.now()));
    }

    #[test]
    fn mtu_probe_loss_is_not_congestion() {
        let (_, _, mut congestion) = setup();
        let now = testing::Clock::default().now();

        let mut status = eliciting();
        status.set_mtu_probe();
        congestion.on_packet_sent(PAYLOAD, now);

        let mut last_loss = None;
        congestion.on_packet_lost(&mut last_loss, PAYLOAD, now, status);
        assert_eq!(congestion.bytes_in_flight(), 0);
        assert_eq!(last_loss, None);
    }

    #[test]
    fn persistent_congestion_collapses_the_window() {
        let (config, payload_size, mut congestion) = setup();
        let mut clock = testing::Clock::default();
        let epoch = clock.now();
        let rtt = sampled_rtt(epoch);
        let pto = PtoState::default();

        clock.advance(Duration::from_millis(200));
        let earliest = clock.now();
        // keep losing for far longer than 3 * (pto + max_ack_delay)
        clock.advance(Duration::from_secs(10));
        let latest = clock.now();

        let collapsed = congestion.on_packets_lost(
            &config,
            &payload_size,
            &rtt,
            &pto,
            Some(latest),
            Some((earliest, latest)),
        );
        assert!(collapsed);
        assert_eq!(congestion.congestion_window(), 2 * PAYLOAD);
        assert!(!congestion.in_congestion_recovery(latest));
    }

    #[test]
    fn short_loss_runs_are_not_persistent() {
        let (config, payload_size, mut congestion) = setup();
        let mut clock = testing::Clock::default();
        let epoch = clock.now();
        let rtt = sampled_rtt(epoch);
        let pto = PtoState::default();

        clock.advance(Duration::from_millis(200));
        let earliest = clock.now();
        clock.advance(Duration::from_millis(100));
        let latest = clock.now();

        let collapsed = congestion.on_packets_lost(
            &config,
            &payload_size,
            &rtt,
            &pto,
            Some(latest),
            Some((earliest, latest)),
        );
        assert!(!collapsed);
        assert_eq!(congestion.congestion_window(), 10 * PAYLOAD);
    }

    #[test]
    fn losses_before_first_rtt_sample_are_not_persistent() {
        let (config, payload_size, mut congestion) = setup();
        let mut clock = testing::Clock::default();
        let earliest = clock.now();
        clock.advance(Duration::from_secs(100));
        let latest = clock.now();

        // the first sample postdates the whole loss run
        clock.advance(Duration::from_millis(1));
        let mut rtt = RttEstimator::new(DEFAULT_INITIAL_RTT);
        rtt.sample(
            clock.now() + Duration::from_millis(1),
            clock.now(),
            Duration::ZERO,
        )
        .unwrap();

        let collapsed = congestion.on_packets_lost(
            &config,
            &payload_size,
            &rtt,
            &PtoState::default(),
            Some(latest),
            Some((earliest, latest)),
        );
        assert!(!collapsed);
    }

    #[test]
    fn window_modifier_is_direction_checked() {
        let mut window = 10_000u64;
        let mut grow = WindowModifier {
            window: &mut window,
            min_window: 2_400,
            max_payload: 1_200,
            grow: true,
        };
        assert!(!grow.update(9_999));
        assert!(grow.update(12_000));
        assert_eq!(window, 12_000);

        let mut shrink = WindowModifier {
            window: &mut window,
            min_window: 2_400,
            max_payload: 1_200,
            grow: false,
        };
        assert!(!shrink.update(12_001));
        assert!(shrink.update(6_000));
        assert_eq!(window, 6_000);
    }

    #[test]
    fn pmtu_growth_rebases_a_minimum_window() {
        let (config, _, mut congestion) = setup();
        congestion.congestion_window = 2 * PAYLOAD;

        congestion.on_max_udp_payload_size_update(&config, PAYLOAD, 1500);
        assert_eq!(congestion.congestion_window(), 3000);

        // a window above the minimum is left alone
        congestion.congestion_window = 9000;
        congestion.on_max_udp_payload_size_update(&config, 1500, 9000);
        assert_eq!(congestion.congestion_window(), 9000);
    }

    #[test]
    fn space_discard_returns_bytes() {
        let (_, _, mut congestion) = setup();
        let now = testing::Clock::default().now();
        congestion.on_packet_sent(PAYLOAD, now);
        congestion.on_packet_number_space_discard(PAYLOAD, eliciting());
        assert_eq!(congestion.bytes_in_flight(), 0);
    }

    #[test]
    fn connection_migration_restores_initial_window() {
        let (config, payload_size, mut congestion) = setup();
        congestion.congestion_window = 2 * PAYLOAD;

        congestion.on_connection_migration(&config, &payload_size);
        assert_eq!(congestion.congestion_window(), 10 * PAYLOAD);
    }

    #[test]
    fn bandwidth_from_window_and_rtt() {
        let (_, _, congestion) = setup();
        let epoch = testing::Clock::default().now();
        let rtt = sampled_rtt(epoch);

        // 12000 bytes per 100ms is 120kB/s
        assert_eq!(congestion.bandwidth(&rtt), 120_000);
    }
}
