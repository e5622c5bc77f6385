// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

mod congestion;
mod loss_timer;
mod pacer;
mod pto;
mod rtt;
mod sent;

pub use congestion::{Congestion, CongestionAlgorithm, NullAlgorithm, WindowModifier};
pub use loss_timer::{LossTimer, LossTimerState};
pub use pacer::TokenBudgetPacer;
pub use pto::PtoState;
pub use rtt::RttEstimator;
pub use sent::{LossDetection, SentPacket, SentPacketStore};

use crate::time::Duration;

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.2
//# The RECOMMENDED value of the timer granularity (kGranularity) is 1 millisecond.
pub const GRANULARITY: Duration = Duration::from_millis(1);
