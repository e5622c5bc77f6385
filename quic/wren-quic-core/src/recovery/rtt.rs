// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    error::Error,
    recovery::GRANULARITY,
    status::config::InternalConfig,
    time::{Duration, Timestamp},
};
use core::cmp::{max, min};

/// Round trip time state for a connection
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RttEstimator {
    latest_rtt: Duration,
    min_rtt: Duration,
    smoothed_rtt: Duration,
    rttvar: Duration,
    /// The peer's `max_ack_delay` transport parameter; acknowledgement
    /// delays above this value are the peer's own tardiness and are not
    /// subtracted from samples
    peer_max_ack_delay: Option<Duration>,
    first_rtt_sample: Option<Timestamp>,
}

impl RttEstimator {
    //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
    //# smoothed_rtt = kInitialRtt
    //# rttvar = kInitialRtt / 2
    pub fn new(initial_rtt: Duration) -> Self {
        Self {
            latest_rtt: Duration::ZERO,
            min_rtt: Duration::ZERO,
            smoothed_rtt: initial_rtt,
            rttvar: initial_rtt / 2,
            peer_max_ack_delay: None,
            first_rtt_sample: None,
        }
    }

    pub fn reset(&mut self, initial_rtt: Duration) {
        *self = Self::new(initial_rtt);
    }

    /// Re-seeds the estimate for a migrated path, keeping the negotiated
    /// `max_ack_delay` and the first-sample marker
    pub fn on_connection_migrate(&mut self, initial_rtt: Duration) {
        self.latest_rtt = Duration::ZERO;
        self.min_rtt = Duration::ZERO;
        self.smoothed_rtt = initial_rtt;
        self.rttvar = initial_rtt / 2;
    }

    #[inline]
    pub fn latest_rtt(&self) -> Duration {
        self.latest_rtt
    }

    #[inline]
    pub fn min_rtt(&self) -> Duration {
        self.min_rtt
    }

    #[inline]
    pub fn smoothed_rtt(&self) -> Duration {
        self.smoothed_rtt
    }

    #[inline]
    pub fn rttvar(&self) -> Duration {
        self.rttvar
    }

    #[inline]
    pub fn first_rtt_sample(&self) -> Option<Timestamp> {
        self.first_rtt_sample
    }

    #[inline]
    pub fn has_first_rtt_sample(&self) -> bool {
        self.first_rtt_sample.is_some()
    }

    /// Applies the peer's `max_ack_delay` transport parameter
    pub fn on_peer_max_ack_delay(&mut self, max_ack_delay: Duration) {
        self.peer_max_ack_delay = Some(max_ack_delay);
    }

    #[inline]
    pub fn max_ack_delay(&self) -> Duration {
        self.peer_max_ack_delay.unwrap_or(Duration::ZERO)
    }

    /// Takes an RTT sample from an acknowledged packet.
    ///
    /// `ack_delay` is the peer-reported delay, already decoded from its wire
    /// form. Fails if the packet appears to have been sent in the future.
    pub fn sample(
        &mut self,
        now: Timestamp,
        time_sent: Timestamp,
        ack_delay: Duration,
    ) -> Result<(), Error> {
        let rtt = now
            .checked_duration_since(time_sent)
            .ok_or(Error::InvalidTimestamp)?;

        self.latest_rtt = rtt;

        if self.first_rtt_sample.is_none() {
            //= https://www.rfc-editor.org/rfc/rfc9002#section-5.2
            //# min_rtt MUST be set to the latest_rtt on the first RTT sample.
            self.min_rtt = rtt;
            //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
            //# smoothed_rtt = latest_rtt
            //# rttvar = latest_rtt / 2
            self.smoothed_rtt = rtt;
            self.rttvar = rtt / 2;
            self.first_rtt_sample = Some(now);
            return Ok(());
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.2
        //# min_rtt MUST be set to the lesser of min_rtt and latest_rtt
        //# (Section 5.1) on all other samples.
        self.min_rtt = min(self.min_rtt, self.latest_rtt);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# *  MUST use the lesser of the acknowledgement delay and the peer's
        //#    max_ack_delay after the handshake is confirmed; and
        let ack_delay = match self.peer_max_ack_delay {
            Some(max_ack_delay) => min(ack_delay, max_ack_delay),
            None => ack_delay,
        };

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# *  MUST NOT subtract the acknowledgement delay from the RTT sample if
        //#    the resulting value is smaller than the min_rtt.
        let mut adjusted_rtt = self.latest_rtt;
        if self.latest_rtt >= self.min_rtt + ack_delay {
            adjusted_rtt -= ack_delay;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# smoothed_rtt = 7/8 * smoothed_rtt + 1/8 * adjusted_rtt
        //# rttvar_sample = abs(smoothed_rtt - adjusted_rtt)
        //# rttvar = 3/4 * rttvar + 1/4 * rttvar_sample
        let rttvar_sample = abs_difference(self.smoothed_rtt, adjusted_rtt);
        self.rttvar = (3 * self.rttvar + rttvar_sample) / 4;
        self.smoothed_rtt = (7 * self.smoothed_rtt + adjusted_rtt) / 8;

        Ok(())
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
    //# PTO = smoothed_rtt + max(4*rttvar, kGranularity) + max_ack_delay
    #[inline]
    pub fn probe_timeout_duration(&self, pto_exponent: u64) -> Duration {
        let backoff = u32::try_from(pto_exponent).unwrap_or(u32::MAX);
        self.smoothed_rtt + max(4 * self.rttvar, GRANULARITY) * backoff
    }

    /// PTO period including the peer's `max_ack_delay`, used for the
    /// application space and the persistent congestion window
    #[inline]
    pub fn probe_timeout_duration_with_max_ack_delay(&self, pto_exponent: u64) -> Duration {
        let backoff = u32::try_from(pto_exponent).unwrap_or(u32::MAX);
        self.probe_timeout_duration(pto_exponent) + self.max_ack_delay() * backoff
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.2
    //# The time threshold is:
    //#
    //# max(kTimeThreshold * max(smoothed_rtt, latest_rtt), kGranularity)
    #[inline]
    pub fn loss_time_threshold(&self, config: &InternalConfig) -> Duration {
        let threshold = config.base.time_threshold;
        let numer = *threshold.numer();
        let denom = *threshold.denom();
        debug_assert!(denom != 0);

        let base = max(self.smoothed_rtt, self.latest_rtt).as_nanos() as u64;
        let scaled = base.saturating_mul(numer);
        // the recommended threshold is 9/8, so favor the shift
        let candidate = if denom == 8 {
            scaled >> 3
        } else {
            scaled / denom.max(1)
        };

        max(Duration::from_nanos(candidate), GRANULARITY)
    }
}

#[inline]
fn abs_difference(a: Duration, b: Duration) -> Duration {
    if a > b {
        a - b
    } else {
        b - a
    }
}
