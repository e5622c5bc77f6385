// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::time::timestamp::Timestamp;

/// One pending deadline in the connection's timer fabric.
///
/// The control plane never blocks on time. Loss detection, probe
/// timeouts, pacing, keep-alive PINGs, the closing period and delayed
/// ACKs each record the instant they next need attention; the connection
/// actor asks the status façade for the earliest pending instant and
/// dispatches the matching handler once the clock crosses it. Deadlines
/// are edge triggered: an instant in the past keeps reporting as fired
/// until the handler disarms or re-arms it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Timestamp>,
}

impl Deadline {
    /// A deadline that is not waiting for anything
    pub const fn idle() -> Self {
        Self { at: None }
    }

    /// Schedules the deadline, replacing any pending instant
    #[inline]
    pub fn arm(&mut self, at: Timestamp) {
        self.at = Some(at);
    }

    /// Clears the deadline; a disarmed deadline never fires
    #[inline]
    pub fn disarm(&mut self) {
        self.at = None;
    }

    /// The pending instant, if any
    #[inline]
    pub fn at(&self) -> Option<Timestamp> {
        self.at
    }

    #[inline]
    pub fn is_armed(&self) -> bool {
        self.at.is_some()
    }

    /// True once the pending instant is no longer in the future
    #[inline]
    pub fn has_fired(&self, now: Timestamp) -> bool {
        self.at.map_or(false, |at| at.has_elapsed(now))
    }
}

/// The earliest of a set of pending instants, e.g. the connection's next
/// required wakeup across every deadline it runs
#[inline]
pub fn earliest(candidates: impl IntoIterator<Item = Option<Timestamp>>) -> Option<Timestamp> {
    candidates.into_iter().flatten().min()
}
