// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{packet::number::PacketNumberSpace, status::config::AMPLIFICATION_FACTOR};
use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    struct Flags: u16 {
        const IS_SERVER = 0x001;
        const HANDSHAKE_SENT = 0x002;
        const HANDSHAKE_RECEIVED = 0x004;
        const HANDSHAKE_ACK_RECEIVED = 0x008;
        const CONFIRMED = 0x010;
        const COMPLETE = 0x020;
        const RETRY_RECEIVED = 0x040;
        const RETRY_SENT = 0x080;
        const STARTED = 0x100;
        const TRANSPORT_PARAMETER_READ = 0x200;
    }
}

/// Handshake progress flags plus the byte counters backing the
/// anti-amplification limit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HandshakeStatus {
    flags: Flags,
    sent_bytes: u64,
    recv_bytes: u64,
}

impl HandshakeStatus {
    pub fn new(is_server: bool) -> Self {
        let mut flags = Flags::empty();
        flags.set(Flags::IS_SERVER, is_server);
        Self {
            flags,
            sent_bytes: 0,
            recv_bytes: 0,
        }
    }

    pub fn reset(&mut self, is_server: bool) {
        *self = Self::new(is_server);
    }

    pub fn on_handshake_start(&mut self) {
        self.flags |= Flags::STARTED;
    }

    pub fn on_packet_sent(&mut self, space: PacketNumberSpace, size: u64) {
        self.sent_bytes += size;
        if space.is_handshake() {
            self.flags |= Flags::HANDSHAKE_SENT;
        }
    }

    pub fn on_datagram_received(&mut self, size: u64) {
        self.recv_bytes += size;
    }

    /// Called once a packet in `space` is successfully decrypted; a
    /// decrypted Handshake packet proves the peer owns its address
    pub fn on_packet_decrypted(&mut self, space: PacketNumberSpace) {
        if space.is_handshake() {
            self.flags |= Flags::HANDSHAKE_RECEIVED;
        }
    }

    pub fn on_ack_received(&mut self, space: PacketNumberSpace) {
        if space.is_handshake() {
            self.flags |= Flags::HANDSHAKE_ACK_RECEIVED;
        }
    }

    pub fn on_handshake_confirmed(&mut self) {
        self.flags |= Flags::CONFIRMED;
    }

    pub fn on_handshake_complete(&mut self) {
        self.flags |= Flags::COMPLETE;
    }

    pub fn on_retry_received(&mut self) {
        self.flags |= Flags::RETRY_RECEIVED;
    }

    pub fn on_retry_sent(&mut self) {
        self.flags |= Flags::RETRY_SENT;
    }

    pub fn on_transport_parameter_read(&mut self) {
        self.flags |= Flags::TRANSPORT_PARAMETER_READ;
    }

    #[inline]
    pub fn is_server(&self) -> bool {
        self.flags.contains(Flags::IS_SERVER)
    }

    #[inline]
    pub fn handshake_started(&self) -> bool {
        self.flags.contains(Flags::STARTED)
    }

    #[inline]
    pub fn handshake_packet_sent(&self) -> bool {
        self.flags.contains(Flags::HANDSHAKE_SENT)
    }

    #[inline]
    pub fn handshake_packet_received(&self) -> bool {
        self.flags.contains(Flags::HANDSHAKE_RECEIVED)
    }

    #[inline]
    pub fn handshake_ack_received(&self) -> bool {
        self.flags.contains(Flags::HANDSHAKE_ACK_RECEIVED)
    }

    #[inline]
    pub fn handshake_confirmed(&self) -> bool {
        self.flags.contains(Flags::CONFIRMED)
    }

    #[inline]
    pub fn handshake_complete(&self) -> bool {
        self.flags.contains(Flags::COMPLETE)
    }

    #[inline]
    pub fn retry_received(&self) -> bool {
        self.flags.contains(Flags::RETRY_RECEIVED)
    }

    #[inline]
    pub fn retry_sent(&self) -> bool {
        self.flags.contains(Flags::RETRY_SENT)
    }

    #[inline]
    pub fn transport_parameter_read(&self) -> bool {
        self.flags.contains(Flags::TRANSPORT_PARAMETER_READ)
    }

    #[inline]
    pub fn sent_bytes(&self) -> u64 {
        self.sent_bytes
    }

    #[inline]
    pub fn recv_bytes(&self) -> u64 {
        self.recv_bytes
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-8.1
    //# Prior to validating the client address, servers MUST NOT send more
    //# than three times as many bytes as the number of bytes they have
    //# received.
    #[inline]
    pub fn is_at_anti_amplification_limit(&self) -> bool {
        if self.peer_address_validated() {
            return false;
        }
        self.sent_bytes >= AMPLIFICATION_FACTOR * self.recv_bytes
    }

    /// True once the peer's address is validated from our side.
    ///
    /// A client always treats the server address as validated; a server
    /// requires a decrypted Handshake packet from the client.
    #[inline]
    pub fn peer_address_validated(&self) -> bool {
        if !self.is_server() {
            return true;
        }
        self.handshake_packet_received()
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
    //# That is, the client MUST set the PTO timer if the client has not
    //# received an acknowledgment for any of its Handshake packets and the
    //# handshake is not confirmed (see Section 4.1.2 of [QUIC-TLS]), even
    //# if there are no packets in flight.
    #[inline]
    pub fn peer_completed_address_validation(&self) -> bool {
        if self.is_server() {
            return true;
        }
        self.handshake_ack_received() || self.handshake_confirmed()
    }
}
