// Copyright 2025 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Checksum-offload policy.

use bitflags::bitflags;

use crate::internal::buffer::PacketBuf;
use crate::internal::device::DeviceCapabilities;

/// A kind of checksum a datagram may request on transmit.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ChecksumKind {
    /// The IPv4 header checksum.
    Ipv4Header,
    /// The TCP checksum over pseudo-header and payload.
    Tcp,
    /// The UDP checksum over pseudo-header and payload.
    Udp,
}

bitflags! {
    /// A set of [`ChecksumKind`]s.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
    pub struct ChecksumKinds: u8 {
        /// See [`ChecksumKind::Ipv4Header`].
        const IPV4_HEADER = 1 << 0;
        /// See [`ChecksumKind::Tcp`].
        const TCP = 1 << 1;
        /// See [`ChecksumKind::Udp`].
        const UDP = 1 << 2;
    }
}

impl From<ChecksumKind> for ChecksumKinds {
    fn from(kind: ChecksumKind) -> Self {
        match kind {
            ChecksumKind::Ipv4Header => ChecksumKinds::IPV4_HEADER,
            ChecksumKind::Tcp => ChecksumKinds::TCP,
            ChecksumKind::Udp => ChecksumKinds::UDP,
        }
    }
}

/// The outcome of the checksum-offload decision: which requested kinds the
/// interface computes in hardware and which must be computed in software.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ChecksumPartition {
    /// Kinds delegated to the interface.
    pub offload: ChecksumKinds,
    /// Kinds that must be computed before hand-off.
    pub software: ChecksumKinds,
}

/// Splits `requested` checksum kinds between hardware offload and software
/// computation based on what `caps` advertises for transmit.
///
/// Pure over its inputs. The IP header checksum field is expected to be
/// zeroed before either path runs; some offload engines require it.
pub fn partition(caps: &DeviceCapabilities, requested: ChecksumKinds) -> ChecksumPartition {
    let offload = requested & caps.checksum_tx;
    ChecksumPartition { offload, software: requested - offload }
}

/// Computes the one's-complement checksum over `header`.
///
/// The checksum field within `header` must already be zeroed. Computing the
/// sum over a header that carries a correct checksum yields `[0, 0]`, which
/// is how tests verify emitted fragments.
pub(crate) fn header_checksum(header: &[u8]) -> [u8; 2] {
    internet_checksum::checksum(header)
}

/// The external transport-layer checksum helper.
///
/// When the interface cannot offload a requested transport checksum, the
/// pipeline asks this helper to compute it in software before any
/// fragmentation decision is taken. The pseudo-header/payload algorithm is
/// owned by the transport layer, not by this crate.
pub trait TransportChecksumHelper {
    /// Computes the checksums named by `kinds` directly into `packet`.
    fn finalize(&self, packet: &mut PacketBuf, kinds: ChecksumKinds);
}

/// A helper for callers that never request transport checksums.
impl TransportChecksumHelper for () {
    fn finalize(&self, _packet: &mut PacketBuf, kinds: ChecksumKinds) {
        debug_assert!(kinds.is_empty(), "no helper to compute {kinds:?}");
    }
}
