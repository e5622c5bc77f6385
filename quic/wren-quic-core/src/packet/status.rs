// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::frame::FrameType;
use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    struct Flags: u8 {
        const ACK_ELICITING = 0x01;
        const BYTE_COUNTED = 0x02;
        const NON_PATH_PROBE = 0x04;
        const MTU_PROBE = 0x08;
        const SKIPPED = 0x10;
    }
}

/// Per-packet summary of the frames an assembled packet carries.
///
/// The flags are accumulated with [`PacketStatus::on_frame`] as frames are
/// written to the packet; MTU probe and skip markings are applied by the
/// packet assembler directly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PacketStatus(Flags);

impl PacketStatus {
    /// Folds a written frame into the packet summary
    #[inline]
    pub fn on_frame(&mut self, frame_type: FrameType) {
        if frame_type.is_ack_eliciting() {
            self.0 |= Flags::ACK_ELICITING;
        }
        if frame_type.is_byte_counted() {
            self.0 |= Flags::BYTE_COUNTED;
        }
        if !frame_type.is_path_probing() {
            self.0 |= Flags::NON_PATH_PROBE;
        }
    }

    #[inline]
    pub fn set_mtu_probe(&mut self) {
        self.0 |= Flags::MTU_PROBE;
    }

    #[inline]
    pub fn set_skipped(&mut self) {
        self.0 |= Flags::SKIPPED;
    }

    /// True if any contained frame requires the peer to acknowledge the packet
    #[inline]
    pub fn is_ack_eliciting(self) -> bool {
        self.0.contains(Flags::ACK_ELICITING)
    }

    /// True if the packet counts towards bytes in flight
    #[inline]
    pub fn is_byte_counted(self) -> bool {
        self.0.contains(Flags::BYTE_COUNTED)
    }

    /// True if every contained frame is permitted in a path probe
    #[inline]
    pub fn is_path_probe(self) -> bool {
        !self.0.contains(Flags::NON_PATH_PROBE)
    }

    #[inline]
    pub fn is_mtu_probe(self) -> bool {
        self.0.contains(Flags::MTU_PROBE)
    }

    #[inline]
    pub fn is_skipped(self) -> bool {
        self.0.contains(Flags::SKIPPED)
    }
}
