// Copyright 2025 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Multicast membership bookkeeping.
//!
//! Two structures cooperate here. Each interface keeps a reference-counted
//! [`MulticastGroupSet`], the table group-management protocols announce
//! from. Each socket keeps a [`SocketMulticastOptions`]: outgoing-interface
//! selection, TTL, loopback flag, and a bounded membership list. A socket
//! membership is unique per (interface, group) pair; joining twice is an
//! error, not a reference-count increment. The socket table is allocated
//! lazily on first use and reclaimed automatically once every field is back
//! at its default, so sockets that never touch multicast carry no state.

use core::num::NonZeroUsize;
use std::collections::hash_map::{Entry, HashMap};

use arrayvec::ArrayVec;
use derivative::Derivative;
use net_types::ip::Ipv4Addr;
use net_types::{MulticastAddr, SpecifiedAddr, Witness as _};

use crate::internal::base::DEFAULT_MULTICAST_TTL;
use crate::internal::device::Device;
use crate::internal::error::IpError;
use crate::internal::routes::RouteTable;

/// The maximum number of memberships per socket.
///
/// A protocol limit, not an implementation accident; exceeding it fails
/// with [`IpError::TooManyReferences`] rather than growing the table.
pub const MAX_MEMBERSHIPS: usize = 20;

/// The result of joining a group in a [`MulticastGroupSet`].
#[derive(Debug, Eq, PartialEq)]
pub enum GroupJoinResult {
    /// The interface was not a member; group-management protocols should
    /// announce the join.
    Joined,
    /// The interface was already a member; the reference count was
    /// incremented.
    AlreadyMember,
}

/// The result of leaving a group in a [`MulticastGroupSet`].
#[derive(Debug, Eq, PartialEq)]
pub enum GroupLeaveResult {
    /// The reference count reached zero and the interface left the group.
    Left,
    /// Other references remain; the interface is still a member.
    StillMember,
    /// The interface was not a member of the group.
    NotMember,
}

/// A reference-counted set of multicast groups joined on one interface.
#[derive(Debug, Default)]
pub struct MulticastGroupSet {
    inner: HashMap<MulticastAddr<Ipv4Addr>, NonZeroUsize>,
}

impl MulticastGroupSet {
    /// Joins `group`, incrementing its reference count.
    pub fn join(&mut self, group: MulticastAddr<Ipv4Addr>) -> GroupJoinResult {
        match self.inner.entry(group) {
            Entry::Vacant(e) => {
                let _: &mut NonZeroUsize = e.insert(NonZeroUsize::MIN);
                GroupJoinResult::Joined
            }
            Entry::Occupied(mut e) => {
                *e.get_mut() = e.get().checked_add(1).expect("group refcount overflow");
                GroupJoinResult::AlreadyMember
            }
        }
    }

    /// Leaves `group`, decrementing its reference count.
    pub fn leave(&mut self, group: MulticastAddr<Ipv4Addr>) -> GroupLeaveResult {
        match self.inner.entry(group) {
            Entry::Vacant(_) => GroupLeaveResult::NotMember,
            Entry::Occupied(mut e) => match NonZeroUsize::new(e.get().get() - 1) {
                None => {
                    let _: NonZeroUsize = e.remove();
                    GroupLeaveResult::Left
                }
                Some(remaining) => {
                    *e.get_mut() = remaining;
                    GroupLeaveResult::StillMember
                }
            },
        }
    }

    /// Whether the interface is a member of `group`.
    pub fn contains(&self, group: &MulticastAddr<Ipv4Addr>) -> bool {
        self.inner.contains_key(group)
    }
}

/// Selects the interface for a membership operation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum InterfaceSelector {
    /// Pick the interface the routing table would use to reach the group.
    Any,
    /// The interface owning this local address.
    LocalAddr(SpecifiedAddr<Ipv4Addr>),
    /// The interface with this index.
    Index(u32),
}

/// One socket membership: this socket joined `group` on `device`.
#[derive(Debug, Clone, PartialEq)]
pub struct Membership<D> {
    /// The joined interface.
    pub device: D,
    /// The joined group.
    pub group: MulticastAddr<Ipv4Addr>,
}

/// The allocated per-socket multicast option table.
#[derive(Derivative)]
#[derivative(Debug(bound = "D: core::fmt::Debug"))]
struct MulticastOptions<D: Device> {
    outgoing_interface: Option<D>,
    ttl: u8,
    loopback: bool,
    memberships: ArrayVec<Membership<D>, MAX_MEMBERSHIPS>,
}

impl<D: Device> Default for MulticastOptions<D> {
    fn default() -> Self {
        Self {
            outgoing_interface: None,
            ttl: DEFAULT_MULTICAST_TTL,
            loopback: true,
            memberships: ArrayVec::new(),
        }
    }
}

impl<D: Device> MulticastOptions<D> {
    fn is_default(&self) -> bool {
        let Self { outgoing_interface, ttl, loopback, memberships } = self;
        outgoing_interface.is_none()
            && *ttl == DEFAULT_MULTICAST_TTL
            && *loopback
            && memberships.is_empty()
    }
}

impl<D: Device> Drop for MulticastOptions<D> {
    fn drop(&mut self) {
        // Socket teardown: every remaining membership is released against
        // its interface's group-join table.
        for Membership { device, group } in self.memberships.take() {
            let _: GroupLeaveResult = device.leave_group(group);
        }
    }
}

/// Per-socket multicast send options and membership list.
///
/// Present only while any field differs from its default; see the module
/// docs.
#[derive(Derivative)]
#[derivative(Debug(bound = "D: core::fmt::Debug"), Default(bound = ""))]
pub struct SocketMulticastOptions<D: Device> {
    table: Option<Box<MulticastOptions<D>>>,
}

impl<D: Device> SocketMulticastOptions<D> {
    /// Creates an empty (absent) table.
    pub fn new() -> Self {
        Self { table: None }
    }

    /// Whether the backing table is currently allocated.
    pub fn is_allocated(&self) -> bool {
        self.table.is_some()
    }

    /// The configured outgoing interface override, if any.
    pub fn outgoing_interface(&self) -> Option<&D> {
        self.table.as_ref()?.outgoing_interface.as_ref()
    }

    /// The TTL for multicast datagrams sent on this socket.
    pub fn ttl(&self) -> u8 {
        self.table.as_ref().map_or(DEFAULT_MULTICAST_TTL, |t| t.ttl)
    }

    /// Whether multicast datagrams loop back to the local input path when
    /// the socket is a member of the destination group.
    pub fn loopback_enabled(&self) -> bool {
        self.table.as_ref().map_or(true, |t| t.loopback)
    }

    /// Whether this socket joined `group` on `device`.
    pub fn is_member(&self, device: &D, group: MulticastAddr<Ipv4Addr>) -> bool {
        self.table.as_ref().is_some_and(|t| {
            t.memberships.iter().any(|m| m.group == group && &m.device == device)
        })
    }

    /// The socket's memberships in join order.
    pub fn memberships(&self) -> impl Iterator<Item = &Membership<D>> {
        self.table.as_ref().map(|t| t.memberships.iter()).into_iter().flatten()
    }

    fn table_mut(&mut self) -> &mut MulticastOptions<D> {
        self.table.get_or_insert_with(Default::default)
    }

    fn reclaim(&mut self) {
        if self.table.as_ref().is_some_and(|t| t.is_default()) {
            self.table = None;
        }
    }

    /// Sets or clears the outgoing interface override.
    ///
    /// An unspecified address clears the override; a local unicast address
    /// selects its owning interface, which must be multicast-capable.
    pub fn set_outgoing_interface<R: RouteTable<Dev = D>>(
        &mut self,
        table: &R,
        addr: Ipv4Addr,
    ) -> Result<(), IpError> {
        match SpecifiedAddr::new(addr) {
            None => {
                self.table_mut().outgoing_interface = None;
            }
            Some(addr) => {
                let device =
                    table.device_with_local_addr(addr).ok_or(IpError::AddressUnavailable)?;
                if !device.capabilities().multicast {
                    return Err(IpError::AddressUnavailable);
                }
                self.table_mut().outgoing_interface = Some(device);
            }
        }
        self.reclaim();
        Ok(())
    }

    /// Sets the multicast TTL.
    pub fn set_ttl(&mut self, ttl: u8) {
        self.table_mut().ttl = ttl;
        self.reclaim();
    }

    /// Enables or disables multicast loopback.
    pub fn set_loopback(&mut self, enabled: bool) {
        self.table_mut().loopback = enabled;
        self.reclaim();
    }

    fn resolve_selector<R: RouteTable<Dev = D>>(
        &self,
        table: &R,
        group: MulticastAddr<Ipv4Addr>,
        selector: InterfaceSelector,
    ) -> Result<D, IpError> {
        match selector {
            InterfaceSelector::Any => {
                let route = table.lookup(group.into_specified())?;
                Ok(route.device)
            }
            InterfaceSelector::LocalAddr(addr) => {
                table.device_with_local_addr(addr).ok_or(IpError::AddressUnavailable)
            }
            InterfaceSelector::Index(index) => {
                table.device_by_index(index).ok_or(IpError::AddressUnavailable)
            }
        }
    }

    /// Joins `group` on the interface named by `selector`.
    pub fn add_membership<R: RouteTable<Dev = D>>(
        &mut self,
        table: &R,
        group: Ipv4Addr,
        selector: InterfaceSelector,
    ) -> Result<(), IpError> {
        let group = MulticastAddr::new(group).ok_or(IpError::AddressNotInMulticastRange)?;
        let device = self.resolve_selector(table, group, selector)?;
        if !device.capabilities().multicast {
            return Err(IpError::AddressUnavailable);
        }
        if self.is_member(&device, group) {
            return Err(IpError::AddressInUse);
        }
        if self.table_mut().memberships.is_full() {
            self.reclaim();
            return Err(IpError::TooManyReferences);
        }
        let _: GroupJoinResult = device.join_group(group);
        self.table_mut().memberships.push(Membership { device, group });
        Ok(())
    }

    /// Drops the membership of `group` on the interface named by
    /// `selector`; `InterfaceSelector::Any` matches the first membership of
    /// the group on any interface.
    ///
    /// Remaining memberships keep their relative order.
    pub fn drop_membership<R: RouteTable<Dev = D>>(
        &mut self,
        table: &R,
        group: Ipv4Addr,
        selector: InterfaceSelector,
    ) -> Result<(), IpError> {
        let group = MulticastAddr::new(group).ok_or(IpError::AddressNotInMulticastRange)?;
        let device = match selector {
            InterfaceSelector::Any => None,
            selector => Some(self.resolve_selector(table, group, selector)?),
        };
        let table = self.table.as_mut().ok_or(IpError::AddressUnavailable)?;
        let index = table
            .memberships
            .iter()
            .position(|m| {
                m.group == group && device.as_ref().map_or(true, |device| &m.device == device)
            })
            .ok_or(IpError::AddressUnavailable)?;
        let Membership { device, group } = table.memberships.remove(index);
        let _: GroupLeaveResult = device.leave_group(group);
        self.reclaim();
        Ok(())
    }
}
