// Copyright 2025 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! IPv4 egress pipeline.
//!
//! This crate carries locally originated and forwarded IPv4 datagrams from
//! the transport seam to the link layer: route resolution through a
//! per-socket cache, header finalization, multicast send policy, the
//! security policy and filter hooks, the checksum-offload decision, and
//! fragmentation. The routing table, interfaces, and transport checksum
//! algorithms are injected through traits.

#![warn(missing_docs, unreachable_patterns, clippy::useless_conversion, clippy::redundant_clone)]

#[path = "."]
mod internal {
    pub(super) mod base;
    pub(super) mod buffer;
    pub(super) mod checksum;
    pub(super) mod counters;
    pub(super) mod device;
    pub(super) mod error;
    pub(super) mod filter;
    pub(super) mod fragmentation;
    pub(super) mod ipv4;
    pub(super) mod multicast;
    pub(super) mod output;
    pub(super) mod routes;
    pub(super) mod socket;

    #[cfg(any(test, feature = "testutils"))]
    pub(super) mod testutil;
}

pub use internal::base::{
    IpPktOpts, Mtu, PacketIdAllocator, SendFlags, DEFAULT_MULTICAST_TTL, DEFAULT_TTL,
};
pub use internal::buffer::{FragmentChain, PacketBuf, PacketMeta};
pub use internal::checksum::{
    partition, ChecksumKind, ChecksumKinds, ChecksumPartition, TransportChecksumHelper,
};
pub use internal::counters::{Counter, IpCounters};
pub use internal::device::{
    AddressStatus, Device, DeviceCapabilities, DeviceGuard, DeviceSendFrameError,
};
pub use internal::error::IpError;
pub use internal::filter::{
    FilterDirection, FilterHook, PolicyDecision, PolicyOutcome, SecurityPolicy,
};
pub use internal::fragmentation::{fragment, FragmentationCounters, FragmentationError};
pub use internal::ipv4::{
    verify_header_checksum, FragmentOffset, Ipv4HeaderBuilder, Ipv4HeaderMut, HDR_PREFIX_LEN,
    MAX_HDR_LEN, MAX_OPTIONS_LEN, MAX_TOTAL_LEN,
};
pub use internal::multicast::{
    GroupJoinResult, GroupLeaveResult, InterfaceSelector, Membership, MulticastGroupSet,
    SocketMulticastOptions, MAX_MEMBERSHIPS,
};
pub use internal::output::{LocalDelivery, OutputPipeline};
pub use internal::routes::{
    ResolveRouteError, ResolvedRoute, RouteCache, RouteGeneration, RouteGuard, RouteTable,
};
pub use internal::socket::{IpSocketOptions, OptionName, PortRange};

/// Fake interfaces and routing tables for tests.
#[cfg(any(test, feature = "testutils"))]
pub mod testutil {
    pub use crate::internal::testutil::{
        FakeDelivery, FakeDevice, FakeRouteTable, SentFrame, MULTICAST_GROUP,
    };
}
