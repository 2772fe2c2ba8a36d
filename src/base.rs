// Copyright 2025 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Base types shared across the egress pipeline.

use core::fmt::{self, Display, Formatter};
use core::sync::atomic::{AtomicU16, Ordering};

use bitflags::bitflags;
use net_types::ip::Ipv4Addr;
use net_types::SpecifiedAddr;
use rand::Rng;

/// The default time-to-live stamped on unicast datagrams whose caller left it
/// unset.
pub const DEFAULT_TTL: u8 = 64;

/// The default time-to-live for multicast datagrams, confining them to the
/// local link unless the socket opts into a larger scope.
pub const DEFAULT_MULTICAST_TTL: u8 = 1;

/// A path maximum transmission unit in bytes.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Mtu(u32);

impl Mtu {
    /// Creates a new `Mtu`.
    pub const fn new(mtu: u32) -> Self {
        Self(mtu)
    }

    /// The MTU value in bytes.
    pub const fn get(&self) -> u32 {
        let Self(mtu) = self;
        *mtu
    }
}

impl Display for Mtu {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let Self(mtu) = self;
        write!(f, "{}", mtu)
    }
}

impl From<Mtu> for u32 {
    fn from(Mtu(mtu): Mtu) -> Self {
        mtu
    }
}

impl From<Mtu> for usize {
    fn from(Mtu(mtu): Mtu) -> Self {
        mtu as usize
    }
}

bitflags! {
    /// Per-call behavior modifiers for [`OutputPipeline::send`].
    ///
    /// [`OutputPipeline::send`]: crate::OutputPipeline::send
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
    pub struct SendFlags: u16 {
        /// Resolve the destination by matching a local interface address
        /// instead of performing a full route lookup.
        const ROUTE_TO_INTERFACE = 1 << 0;
        /// The datagram header was fully constructed by the caller.
        const RAW_OUTPUT = 1 << 1;
        /// The datagram is being forwarded rather than locally originated.
        const FORWARDING = 1 << 2;
        /// The caller explicitly permits transmission to a broadcast address.
        const ALLOW_BROADCAST = 1 << 3;
        /// Perform path MTU discovery: the don't-fragment flag is forced on
        /// and oversized datagrams fail with the discovered MTU.
        const PATH_MTU_DISCOVERY = 1 << 4;
        /// Select the egress interface from the per-call interface index
        /// override rather than the routing table.
        const ROUTE_BY_INTERFACE_INDEX = 1 << 5;
        /// Keep the caller-supplied identifier instead of assigning a fresh
        /// one.
        const SUPPRESS_NEW_IDENTIFIER = 1 << 6;
    }
}

/// Ephemeral per-send overrides carried alongside a datagram.
///
/// Built fresh from ancillary data for each call and never persisted.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct IpPktOpts {
    /// Overrides the source address filled into an unspecified header.
    pub src_addr: Option<SpecifiedAddr<Ipv4Addr>>,
    /// Selects the egress interface by index when
    /// [`SendFlags::ROUTE_BY_INTERFACE_INDEX`] is set.
    pub interface_index: Option<u32>,
}

/// Allocates 16-bit datagram identifiers.
///
/// Identifiers are handed out from a randomly-seeded wrapping counter. For
/// segmentation-offloaded datagrams a contiguous range is reserved so that
/// offload-generated segments do not collide with later assignments.
#[derive(Debug)]
pub struct PacketIdAllocator {
    next: AtomicU16,
}

impl PacketIdAllocator {
    /// Creates a new allocator seeded from `rng`.
    pub fn new<R: Rng>(rng: &mut R) -> Self {
        Self { next: AtomicU16::new(rng.gen()) }
    }

    /// Reserves `count` consecutive identifiers, returning the first.
    ///
    /// `count` must be non-zero.
    pub(crate) fn reserve(&self, count: u16) -> u16 {
        debug_assert_ne!(count, 0);
        self.next.fetch_add(count, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::rngs::mock::StepRng;

    #[test]
    fn identifier_range_reservation() {
        let mut rng = StepRng::new(7, 0);
        let alloc = PacketIdAllocator::new(&mut rng);
        let first = alloc.reserve(4);
        // The next single allocation must land past the reserved range.
        assert_eq!(alloc.reserve(1), first.wrapping_add(4));
        assert_eq!(alloc.reserve(1), first.wrapping_add(5));
    }
}
