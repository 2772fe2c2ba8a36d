// Copyright 2025 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Fake interfaces and routing tables for tests.

use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use net_types::ip::Ipv4Addr;
use net_types::{MulticastAddr, SpecifiedAddr, Witness as _};

use crate::internal::base::Mtu;
use crate::internal::buffer::{PacketBuf, PacketMeta};
use crate::internal::checksum::ChecksumKinds;
use crate::internal::device::{
    AddressStatus, Device, DeviceCapabilities, DeviceSendFrameError,
};
use crate::internal::multicast::{GroupJoinResult, GroupLeaveResult, MulticastGroupSet};
use crate::internal::output::LocalDelivery;
use crate::internal::routes::{
    ResolveRouteError, ResolvedRoute, RouteGeneration, RouteTable,
};

/// The multicast group tests join by default.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new([239, 1, 1, 1]);

/// A frame captured by a fake sink, flattened for inspection.
#[derive(Debug)]
pub struct SentFrame {
    /// The frame bytes.
    pub bytes: Vec<u8>,
    /// The link destination, absent for locally delivered copies.
    pub next_hop: Option<SpecifiedAddr<Ipv4Addr>>,
    /// The transmit metadata the frame carried.
    pub meta: PacketMeta,
}

impl SentFrame {
    fn capture(mut packet: PacketBuf, next_hop: Option<SpecifiedAddr<Ipv4Addr>>) -> Self {
        let meta = core::mem::take(packet.meta_mut());
        Self { bytes: packet.into_contiguous(), next_hop, meta }
    }
}

#[derive(Debug)]
struct FakeDeviceState {
    index: u32,
    mtu: Mtu,
    caps: DeviceCapabilities,
    up: AtomicBool,
    primary_addr: Option<SpecifiedAddr<Ipv4Addr>>,
    broadcast_addr: Option<SpecifiedAddr<Ipv4Addr>>,
    addr_status: Mutex<HashMap<Ipv4Addr, AddressStatus>>,
    groups: Mutex<MulticastGroupSet>,
    sent: Mutex<Vec<SentFrame>>,
    tx_available: AtomicUsize,
    output_error: Mutex<Option<DeviceSendFrameError>>,
    acquires: AtomicUsize,
    releases: AtomicUsize,
}

/// A fake interface recording everything handed to it.
#[derive(Debug, Clone)]
pub struct FakeDevice(Arc<FakeDeviceState>);

impl PartialEq for FakeDevice {
    fn eq(&self, FakeDevice(other): &FakeDevice) -> bool {
        let FakeDevice(this) = self;
        Arc::ptr_eq(this, other)
    }
}

impl FakeDevice {
    /// A multicast- and broadcast-capable interface with a 1500-byte MTU
    /// and `192.0.2.<index>` as its primary address.
    pub fn new_ethernet() -> Self {
        Self::with_capabilities(
            1,
            DeviceCapabilities {
                checksum_tx: ChecksumKinds::empty(),
                segmentation_offload: false,
                multicast: true,
                broadcast: true,
                point_to_point: false,
                loopback: false,
            },
        )
    }

    /// An interface with the given index and capabilities.
    pub fn with_capabilities(index: u32, caps: DeviceCapabilities) -> Self {
        let primary = SpecifiedAddr::new(Ipv4Addr::new([192, 0, 2, index as u8]));
        let broadcast = SpecifiedAddr::new(Ipv4Addr::new([192, 0, 2, 255]));
        let addr_status = primary
            .iter()
            .map(|addr| (addr.get(), AddressStatus::Assigned))
            .collect::<HashMap<_, _>>();
        Self(Arc::new(FakeDeviceState {
            index,
            mtu: Mtu::new(1500),
            caps,
            up: AtomicBool::new(true),
            primary_addr: primary,
            broadcast_addr: broadcast,
            addr_status: Mutex::new(addr_status),
            groups: Mutex::new(MulticastGroupSet::default()),
            sent: Mutex::new(Vec::new()),
            tx_available: AtomicUsize::new(usize::MAX),
            output_error: Mutex::new(None),
            acquires: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }))
    }

    /// Marks the interface as mid-teardown.
    pub fn set_down(&self) {
        let Self(state) = self;
        state.up.store(false, Ordering::SeqCst);
    }

    /// Sets the validity state of `addr` on this interface.
    pub fn set_addr_status(&self, addr: SpecifiedAddr<Ipv4Addr>, status: AddressStatus) {
        let Self(state) = self;
        let _: Option<AddressStatus> =
            state.addr_status.lock().unwrap().insert(addr.get(), status);
    }

    /// Sets the number of frames the transmit queue will admit.
    pub fn set_tx_available(&self, available: usize) {
        let Self(state) = self;
        state.tx_available.store(available, Ordering::SeqCst);
    }

    /// Makes subsequent `output` calls fail with `error`, or succeed again
    /// with `None`.
    pub fn set_output_error(&self, error: Option<DeviceSendFrameError>) {
        let Self(state) = self;
        *state.output_error.lock().unwrap() = error;
    }

    /// Drains the recorded frames.
    pub fn taken_frames(&self) -> Vec<SentFrame> {
        let Self(state) = self;
        core::mem::take(&mut *state.sent.lock().unwrap())
    }

    /// The number of references taken.
    pub fn acquires(&self) -> usize {
        let Self(state) = self;
        state.acquires.load(Ordering::SeqCst)
    }

    /// The number of references released.
    pub fn releases(&self) -> usize {
        let Self(state) = self;
        state.releases.load(Ordering::SeqCst)
    }
}

impl Device for FakeDevice {
    fn index(&self) -> u32 {
        let Self(state) = self;
        state.index
    }

    fn mtu(&self) -> Mtu {
        let Self(state) = self;
        state.mtu
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let Self(state) = self;
        state.caps
    }

    fn is_up(&self) -> bool {
        let Self(state) = self;
        state.up.load(Ordering::SeqCst)
    }

    fn primary_addr(&self) -> Option<SpecifiedAddr<Ipv4Addr>> {
        let Self(state) = self;
        state.primary_addr
    }

    fn broadcast_addr(&self) -> Option<SpecifiedAddr<Ipv4Addr>> {
        let Self(state) = self;
        state.broadcast_addr
    }

    fn addr_status(&self, addr: SpecifiedAddr<Ipv4Addr>) -> Option<AddressStatus> {
        let Self(state) = self;
        state.addr_status.lock().unwrap().get(&addr.get()).copied()
    }

    fn join_group(&self, group: MulticastAddr<Ipv4Addr>) -> GroupJoinResult {
        let Self(state) = self;
        state.groups.lock().unwrap().join(group)
    }

    fn leave_group(&self, group: MulticastAddr<Ipv4Addr>) -> GroupLeaveResult {
        let Self(state) = self;
        state.groups.lock().unwrap().leave(group)
    }

    fn is_group_member(&self, group: &MulticastAddr<Ipv4Addr>) -> bool {
        let Self(state) = self;
        state.groups.lock().unwrap().contains(group)
    }

    fn tx_available(&self) -> usize {
        let Self(state) = self;
        state.tx_available.load(Ordering::SeqCst)
    }

    fn output(
        &self,
        frame: PacketBuf,
        next_hop: SpecifiedAddr<Ipv4Addr>,
    ) -> Result<(), DeviceSendFrameError> {
        let Self(state) = self;
        if let Some(error) = state.output_error.lock().unwrap().clone() {
            return Err(error);
        }
        let available = state.tx_available.load(Ordering::SeqCst);
        if available == 0 {
            return Err(DeviceSendFrameError::QueueFull);
        }
        if available != usize::MAX {
            state.tx_available.store(available - 1, Ordering::SeqCst);
        }
        state.sent.lock().unwrap().push(SentFrame::capture(frame, Some(next_hop)));
        Ok(())
    }

    fn acquire(&self) {
        let Self(state) = self;
        let _: usize = state.acquires.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        let Self(state) = self;
        let _: usize = state.releases.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct FakeRouteTableState {
    default_device: FakeDevice,
    extra_devices: Mutex<Vec<FakeDevice>>,
    unreachable: Mutex<HashSet<Ipv4Addr>>,
    generation: AtomicU64,
    lookups: AtomicUsize,
    acquires: AtomicUsize,
    releases: AtomicUsize,
}

/// A fake routing table serving one default route, with per-destination
/// error injection and reference accounting.
#[derive(Debug, Clone)]
pub struct FakeRouteTable(Arc<FakeRouteTableState>);

impl FakeRouteTable {
    /// A table routing every destination through `device`.
    pub fn with_default_route(device: FakeDevice) -> Self {
        Self(Arc::new(FakeRouteTableState {
            default_device: device,
            extra_devices: Mutex::new(Vec::new()),
            unreachable: Mutex::new(HashSet::new()),
            generation: AtomicU64::new(0),
            lookups: AtomicUsize::new(0),
            acquires: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }))
    }

    /// Registers an additional interface visible to the by-index and
    /// by-address finders.
    pub fn add_device(&self, device: FakeDevice) {
        let Self(state) = self;
        state.extra_devices.lock().unwrap().push(device);
    }

    /// Makes lookups of `dst` fail with `Unreachable`.
    pub fn set_unreachable(&self, dst: Ipv4Addr) {
        let Self(state) = self;
        let _: bool = state.unreachable.lock().unwrap().insert(dst);
    }

    /// Advances the table's modification epoch.
    pub fn bump_generation(&self) {
        let Self(state) = self;
        let _: u64 = state.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// The number of `lookup` calls served.
    pub fn lookups(&self) -> usize {
        let Self(state) = self;
        state.lookups.load(Ordering::SeqCst)
    }

    /// The number of route references taken.
    pub fn route_acquires(&self) -> usize {
        let Self(state) = self;
        state.acquires.load(Ordering::SeqCst)
    }

    /// The number of route references released.
    pub fn route_releases(&self) -> usize {
        let Self(state) = self;
        state.releases.load(Ordering::SeqCst)
    }

    fn devices(&self) -> Vec<FakeDevice> {
        let Self(state) = self;
        let mut devices = vec![state.default_device.clone()];
        devices.extend(state.extra_devices.lock().unwrap().iter().cloned());
        devices
    }
}

impl RouteTable for FakeRouteTable {
    type Dev = FakeDevice;

    fn lookup(
        &self,
        dst: SpecifiedAddr<Ipv4Addr>,
    ) -> Result<ResolvedRoute<FakeDevice>, ResolveRouteError> {
        let Self(state) = self;
        let _: usize = state.lookups.fetch_add(1, Ordering::SeqCst);
        if state.unreachable.lock().unwrap().contains(&dst.get()) {
            return Err(ResolveRouteError::Unreachable);
        }
        Ok(ResolvedRoute {
            device: state.default_device.clone(),
            next_hop: None,
            path_mtu: None,
        })
    }

    fn acquire(&self, _route: &ResolvedRoute<FakeDevice>) {
        let Self(state) = self;
        let _: usize = state.acquires.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self, _route: &ResolvedRoute<FakeDevice>) {
        let Self(state) = self;
        let _: usize = state.releases.fetch_add(1, Ordering::SeqCst);
    }

    fn generation(&self) -> RouteGeneration {
        let Self(state) = self;
        RouteGeneration(state.generation.load(Ordering::SeqCst))
    }

    fn device_by_index(&self, index: u32) -> Option<FakeDevice> {
        self.devices().into_iter().find(|d| d.index() == index)
    }

    fn device_with_local_addr(&self, addr: SpecifiedAddr<Ipv4Addr>) -> Option<FakeDevice> {
        self.devices().into_iter().find(|d| d.primary_addr() == Some(addr))
    }

    fn on_link_device(&self, _dst: SpecifiedAddr<Ipv4Addr>) -> Option<FakeDevice> {
        let Self(state) = self;
        Some(state.default_device.clone())
    }
}

/// A local-delivery sink recording looped-back datagrams.
#[derive(Debug, Default)]
pub struct FakeDelivery(Mutex<Vec<SentFrame>>);

impl FakeDelivery {
    /// Drains the recorded datagrams.
    pub fn taken(&self) -> Vec<SentFrame> {
        let Self(frames) = self;
        core::mem::take(&mut *frames.lock().unwrap())
    }
}

impl LocalDelivery<FakeDevice> for FakeDelivery {
    fn deliver(&self, _device: &FakeDevice, packet: PacketBuf) {
        let Self(frames) = self;
        frames.lock().unwrap().push(SentFrame::capture(packet, None));
    }
}
