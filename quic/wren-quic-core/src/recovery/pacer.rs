// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    recovery::{Congestion, CongestionAlgorithm, RttEstimator},
    status::{
        config::{InternalConfig, PayloadSize},
        handshake::HandshakeStatus,
    },
    time::{Deadline, Duration, Timestamp},
};

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.7
//# A perfectly paced sender spreads packets exactly evenly over time.
//# For a window-based congestion controller, such as the one in this
//# document, that rate can be computed by averaging the congestion
//# window over the RTT.

/// A token-budget send pacer.
///
/// The budget refills at the adjusted bandwidth and is capped at a burst
/// allowance; when a send exhausts it the pacer arms a wakeup for the
/// moment one more full-sized packet is affordable.
#[derive(Clone, Debug, Default)]
pub struct TokenBudgetPacer {
    last_sent_time: Option<Timestamp>,
    timer: Deadline,
    budget_at_last_sent: u64,
}

impl TokenBudgetPacer {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// True if pacing does not currently block sending
    #[inline]
    pub fn can_send(&self, now: Timestamp) -> bool {
        !self.timer.is_armed() || self.timer.has_fired(now)
    }

    #[inline]
    pub fn deadline(&self) -> Option<Timestamp> {
        self.timer.at()
    }

    pub fn on_packet_sent<Alg: CongestionAlgorithm>(
        &mut self,
        config: &InternalConfig,
        payload_size: &PayloadSize,
        congestion: &Congestion<Alg>,
        rtt: &RttEstimator,
        time_sent: Timestamp,
        sent_bytes: u64,
    ) {
        let budget = self.budget(config, payload_size, congestion, rtt, time_sent);
        self.budget_at_last_sent = budget.saturating_sub(sent_bytes);
        self.last_sent_time = Some(time_sent);
    }

    /// Arms the pacing timer when the connection is in a state that wants
    /// pacing; called after [`TokenBudgetPacer::on_packet_sent`]
    pub fn maybe_update_timer<Alg: CongestionAlgorithm>(
        &mut self,
        config: &InternalConfig,
        payload_size: &PayloadSize,
        congestion: &Congestion<Alg>,
        handshake: &HandshakeStatus,
        rtt: &RttEstimator,
    ) {
        if congestion.should_send_any_packet() && handshake.handshake_complete() {
            self.set_next_send_time(config, payload_size, congestion, rtt);
        }
    }

    fn set_next_send_time<Alg: CongestionAlgorithm>(
        &mut self,
        config: &InternalConfig,
        payload_size: &PayloadSize,
        congestion: &Congestion<Alg>,
        rtt: &RttEstimator,
    ) {
        let max_payload = payload_size.current();
        if self.budget_at_last_sent >= max_payload {
            self.timer.disarm();
            return;
        }
        let Some(last_sent_time) = self.last_sent_time else {
            self.timer.disarm();
            return;
        };

        let bandwidth = adjusted_bandwidth(config, congestion, rtt);
        if bandwidth == 0 {
            self.timer.disarm();
            return;
        }

        let missing = max_payload - self.budget_at_last_sent;
        // ceil of missing bytes over bytes-per-second, in microseconds
        let delay_micros = missing
            .saturating_mul(1_000_000)
            .div_ceil(bandwidth);

        self.timer
            .arm(last_sent_time + Duration::from_micros(delay_micros));
    }

    /// The spendable budget at `now`
    pub fn budget<Alg: CongestionAlgorithm>(
        &self,
        config: &InternalConfig,
        payload_size: &PayloadSize,
        congestion: &Congestion<Alg>,
        rtt: &RttEstimator,
        now: Timestamp,
    ) -> u64 {
        let max_burst = self.max_burst_size(config, payload_size, congestion, rtt);
        let Some(last_sent_time) = self.last_sent_time else {
            return max_burst;
        };

        let elapsed = now.saturating_duration_since(last_sent_time);
        let refill = adjusted_bandwidth(config, congestion, rtt)
            .saturating_mul(elapsed.as_micros() as u64)
            / 1_000_000;

        max_burst.min(self.budget_at_last_sent.saturating_add(refill))
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-7.7
    //# Senders SHOULD limit bursts to the initial congestion window
    fn max_burst_size<Alg: CongestionAlgorithm>(
        &self,
        config: &InternalConfig,
        payload_size: &PayloadSize,
        congestion: &Congestion<Alg>,
        rtt: &RttEstimator,
    ) -> u64 {
        // two timer granularities worth of bandwidth
        let from_bandwidth = adjusted_bandwidth(config, congestion, rtt)
            .saturating_mul(2)
            / 1_000;
        from_bandwidth.max(config.base.window_initial_factor * payload_size.current())
    }
}

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.7
//# rate = N * congestion_window / smoothed_rtt
fn adjusted_bandwidth<Alg: CongestionAlgorithm>(
    config: &InternalConfig,
    congestion: &Congestion<Alg>,
    rtt: &RttEstimator,
) -> u64 {
    let gain = config.base.pacer_gain;
    let numer = *gain.numer();
    let denom = *gain.denom();
    debug_assert!(denom != 0);

    congestion
        .bandwidth(rtt)
        .saturating_mul(numer)
        .checked_div(denom)
        .unwrap_or(u64::MAX)
}
