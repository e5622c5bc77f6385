// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::time::Duration;
use num_rational::Ratio;

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.2
//# When no previous RTT is available, the initial RTT
//# SHOULD be set to 333 milliseconds.
pub const DEFAULT_INITIAL_RTT: Duration = Duration::from_millis(333);

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.1
//# The RECOMMENDED initial value for the packet reordering threshold
//# (kPacketThreshold) is 3, based on best practices for TCP loss
//# detection [RFC5681] [RFC6675].
pub const DEFAULT_PACKET_ORDER_THRESHOLD: u64 = 3;

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.2
//# The RECOMMENDED time threshold (kTimeThreshold), expressed as an
//# RTT multiplier, is 9/8.
pub const DEFAULT_TIME_THRESHOLD: Ratio<u64> = Ratio::new_raw(9, 8);

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.7
//# Using a value for "N" that is small, but at least 1 (for example,
//# 1.25) ensures that variations in RTT do not result in
//# underutilization of the congestion window.
pub const DEFAULT_PACER_GAIN: Ratio<u64> = Ratio::new_raw(5, 4);

//= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
//# If this value is absent, a default value of 3 is assumed (indicating a
//# multiplier of 8).
pub const DEFAULT_ACK_DELAY_EXPONENT: u8 = 3;

//= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
//# If this value is absent, a default of 25 milliseconds is assumed.
pub const DEFAULT_LOCAL_MAX_ACK_DELAY: Duration = Duration::from_millis(25);

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.6.1
//# The RECOMMENDED value for kPersistentCongestionThreshold is 3
pub const DEFAULT_PERSISTENT_CONGESTION_THRESHOLD: u64 = 3;

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.2
//# Endpoints SHOULD use an initial congestion window of ten times the
//# maximum datagram size (max_datagram_size)
pub const DEFAULT_WINDOW_INITIAL_FACTOR: u64 = 10;

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.2
//# The RECOMMENDED value is 2 * max_datagram_size.
pub const DEFAULT_WINDOW_MINIMUM_FACTOR: u64 = 2;

//= https://www.rfc-editor.org/rfc/rfc9000#section-8.1
//# an endpoint MUST limit the amount of data it sends to the unvalidated
//# address to three times the amount of data received from that address.
pub const AMPLIFICATION_FACTOR: u64 = 3;

/// Number of ack-eliciting packets received before an ACK is sent without
/// waiting for the delayed-ACK timer
pub const DEFAULT_DELAY_ACK_PACKET_COUNT: u64 = 2;

pub const DEFAULT_PATH_VALIDATION_TIMEOUT_FACTOR: u32 = 3;

/// Immutable per-connection tuning knobs
#[derive(Clone, Debug)]
pub struct Config {
    pub window_initial_factor: u64,
    pub window_minimum_factor: u64,
    /// Overall limit on handshake duration; `None` disables the check
    pub handshake_timeout: Option<Duration>,
    /// Idle timeout applied before the handshake is confirmed
    pub handshake_idle_timeout: Option<Duration>,
    pub initial_rtt: Duration,
    pub packet_order_threshold: u64,
    pub time_threshold: Ratio<u64>,
    pub delay_ack_packet_count: u64,
    pub use_ack_delay: bool,
    pub pacer_gain: Ratio<u64>,
    pub persistent_congestion_threshold: u64,
    /// Keep-alive PING period while no loss or probe timer is pending;
    /// `None` disables keep-alives
    pub ping_period: Option<Duration>,
    pub path_validation_timeout_factor: u32,
    /// Server only: require address validation through Retry
    pub retry_required: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_initial_factor: DEFAULT_WINDOW_INITIAL_FACTOR,
            window_minimum_factor: DEFAULT_WINDOW_MINIMUM_FACTOR,
            handshake_timeout: None,
            handshake_idle_timeout: None,
            initial_rtt: DEFAULT_INITIAL_RTT,
            packet_order_threshold: DEFAULT_PACKET_ORDER_THRESHOLD,
            time_threshold: DEFAULT_TIME_THRESHOLD,
            delay_ack_packet_count: DEFAULT_DELAY_ACK_PACKET_COUNT,
            use_ack_delay: true,
            pacer_gain: DEFAULT_PACER_GAIN,
            persistent_congestion_threshold: DEFAULT_PERSISTENT_CONGESTION_THRESHOLD,
            ping_period: None,
            path_validation_timeout_factor: DEFAULT_PATH_VALIDATION_TIMEOUT_FACTOR,
            retry_required: false,
        }
    }
}

/// [`Config`] extended with the values that overlap local transport
/// parameters
#[derive(Clone, Debug)]
pub struct InternalConfig {
    pub base: Config,
    /// Locally offered idle timeout; `None` leaves the peer's value in charge
    pub idle_timeout: Option<Duration>,
    pub local_ack_delay_exponent: u8,
    pub local_max_ack_delay: Duration,
}

impl Default for InternalConfig {
    fn default() -> Self {
        Self {
            base: Config::default(),
            idle_timeout: None,
            local_ack_delay_exponent: DEFAULT_ACK_DELAY_EXPONENT,
            local_max_ack_delay: DEFAULT_LOCAL_MAX_ACK_DELAY,
        }
    }
}

impl From<Config> for InternalConfig {
    fn from(base: Config) -> Self {
        Self {
            base,
            ..Self::default()
        }
    }
}

/// The connection's current maximum UDP payload size.
///
/// The value only grows: PMTU discovery shrinking mid-connection would
/// invalidate in-flight accounting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PayloadSize {
    max_udp_payload_size: u64,
}

impl PayloadSize {
    #[inline]
    pub fn new(max_udp_payload_size: u64) -> Self {
        Self {
            max_udp_payload_size,
        }
    }

    /// Applies a PMTU update, returning whether the value grew
    #[inline]
    pub fn update(&mut self, size: u64) -> bool {
        if size < self.max_udp_payload_size {
            return false;
        }
        self.max_udp_payload_size = size;
        true
    }

    #[inline]
    pub fn current(self) -> u64 {
        self.max_udp_payload_size
    }
}
