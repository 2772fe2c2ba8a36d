// Copyright 2025 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The link-layer device seam.

use core::fmt::Debug;

use net_types::ip::Ipv4Addr;
use net_types::{MulticastAddr, SpecifiedAddr};
use thiserror::Error;

use crate::internal::base::Mtu;
use crate::internal::buffer::PacketBuf;
use crate::internal::checksum::{ChecksumKind, ChecksumKinds};
use crate::internal::multicast::{GroupJoinResult, GroupLeaveResult};

/// Transmit capabilities an interface advertises.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct DeviceCapabilities {
    /// Checksum kinds the interface computes in hardware on transmit.
    pub checksum_tx: ChecksumKinds,
    /// The interface performs segmentation offload.
    pub segmentation_offload: bool,
    /// The interface can transmit multicast frames.
    pub multicast: bool,
    /// The interface can transmit broadcast frames.
    pub broadcast: bool,
    /// The interface is a point-to-point link.
    pub point_to_point: bool,
    /// The interface is a loopback-only device.
    pub loopback: bool,
}

impl DeviceCapabilities {
    /// Returns whether the interface offloads `kind` on transmit.
    pub fn supports_checksum(&self, kind: ChecksumKind) -> bool {
        self.checksum_tx.contains(kind.into())
    }
}

/// The validity state of a local source address.
///
/// `Tentative` and `Duplicated` produce different send outcomes and must
/// not be conflated: a tentative or detached address is reported to the
/// caller, a duplicated one is dropped silently to avoid duplicate-address
/// -detection noise.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AddressStatus {
    /// The address completed duplicate address detection and is usable.
    Assigned,
    /// The address is still tentative or its interface is detached.
    Tentative,
    /// Duplicate address detection found another holder of the address.
    Duplicated,
}

/// Errors from the link-layer output function.
#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum DeviceSendFrameError {
    /// The transmit queue refused the frame.
    #[error("transmit queue full")]
    QueueFull,
    /// The device could not allocate transmit resources.
    #[error("allocation failed")]
    Alloc,
    /// The frame violated the device's size constraints.
    #[error("frame size constraints violated")]
    SizeConstraintsViolation,
}

/// An egress network interface.
///
/// Implementations are cheaply cloneable identifiers (typically an `Arc`
/// around interface state). The `acquire`/`release` pair implements the
/// scoped-acquisition contract: the pipeline acquires a reference for the
/// duration of one send and releases it on every exit path, which
/// [`DeviceGuard`] enforces structurally.
pub trait Device: Clone + Debug + PartialEq {
    /// The interface index.
    fn index(&self) -> u32;

    /// The interface MTU.
    fn mtu(&self) -> Mtu;

    /// The interface's transmit capabilities.
    fn capabilities(&self) -> DeviceCapabilities;

    /// Whether the interface is a loopback device.
    fn is_loopback(&self) -> bool {
        self.capabilities().loopback
    }

    /// Whether the interface is up; a mid-teardown interface reports
    /// `false` and routes through it are treated as invalid.
    fn is_up(&self) -> bool;

    /// The interface's primary local address, used to fill unspecified
    /// source addresses.
    fn primary_addr(&self) -> Option<SpecifiedAddr<Ipv4Addr>>;

    /// The interface's subnet broadcast address, if any.
    fn broadcast_addr(&self) -> Option<SpecifiedAddr<Ipv4Addr>>;

    /// The validity state of `addr` if it is assigned to this interface.
    fn addr_status(&self, addr: SpecifiedAddr<Ipv4Addr>) -> Option<AddressStatus>;

    /// Joins `group` in the interface's reference-counted group-join table.
    fn join_group(&self, group: MulticastAddr<Ipv4Addr>) -> GroupJoinResult;

    /// Leaves `group` in the interface's group-join table.
    fn leave_group(&self, group: MulticastAddr<Ipv4Addr>) -> GroupLeaveResult;

    /// Whether the interface currently holds a membership of `group`.
    fn is_group_member(&self, group: &MulticastAddr<Ipv4Addr>) -> bool;

    /// The number of frames the transmit queue can currently accept.
    ///
    /// Used for the all-or-nothing admission check before a fragment chain
    /// is handed over.
    fn tx_available(&self) -> usize;

    /// Hands one frame to the link layer, addressed to `next_hop`.
    ///
    /// The implementation must not retain the frame beyond the call unless
    /// it transfers ownership by queueing it.
    fn output(
        &self,
        frame: PacketBuf,
        next_hop: SpecifiedAddr<Ipv4Addr>,
    ) -> Result<(), DeviceSendFrameError>;

    /// Notes a new holder of a reference to this interface.
    fn acquire(&self);

    /// Releases a reference taken with [`Device::acquire`].
    fn release(&self);
}

/// An acquired interface reference, released on drop.
#[derive(Debug)]
pub struct DeviceGuard<D: Device> {
    device: D,
}

impl<D: Device> DeviceGuard<D> {
    pub(crate) fn new(device: D) -> Self {
        device.acquire();
        Self { device }
    }

    pub(crate) fn device(&self) -> &D {
        &self.device
    }
}

impl<D: Device> Drop for DeviceGuard<D> {
    fn drop(&mut self) {
        self.device.release();
    }
}
