// Copyright 2025 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The IPv4 egress pipeline.
//!
//! [`OutputPipeline::send`] carries a datagram from the transport seam to
//! the link layer: option splicing, route resolution through the caller's
//! [`RouteCache`], header finalization, the security policy and filter
//! hooks, the checksum-offload decision, and fragmentation. Interface and
//! route references taken for a send are scoped to the call and released
//! on every exit path.

use core::num::NonZeroU16;

use log::{debug, trace};
use net_types::ip::{Ipv4, Ipv4Addr};
use net_types::{MulticastAddr, SpecifiedAddr, Witness as _};
use rand::Rng;

use crate::internal::base::{IpPktOpts, Mtu, PacketIdAllocator, SendFlags};
use crate::internal::buffer::PacketBuf;
use crate::internal::checksum::{
    partition, ChecksumKinds, ChecksumPartition, TransportChecksumHelper,
};
use crate::internal::counters::IpCounters;
use crate::internal::device::{
    AddressStatus, Device, DeviceGuard, DeviceSendFrameError,
};
use crate::internal::error::IpError;
use crate::internal::filter::{FilterDirection, FilterHook, PolicyDecision, PolicyOutcome, SecurityPolicy};
use crate::internal::fragmentation::{fragment, FragmentationError};
use crate::internal::ipv4::{header_len_of, Ipv4HeaderMut, HDR_PREFIX_LEN};
use crate::internal::multicast::SocketMulticastOptions;
use crate::internal::routes::{RouteCache, RouteGuard, RouteTable};
use crate::internal::socket::IpSocketOptions;

/// The local input seam for multicast loopback.
pub trait LocalDelivery<D: Device> {
    /// Hands `packet` to the local receive path as if it arrived on
    /// `device`.
    fn deliver(&self, device: &D, packet: PacketBuf);
}

/// A delivery seam for stacks without local multicast receivers.
impl<D: Device> LocalDelivery<D> for () {
    fn deliver(&self, _device: &D, _packet: PacketBuf) {}
}

/// The egress pipeline: the routing seam plus the hooks a send traverses.
///
/// Hook type parameters default to the unit no-ops so a plain pipeline is
/// `OutputPipeline<R>`.
#[derive(Debug)]
pub struct OutputPipeline<R, P = (), F = (), T = (), L = ()> {
    routes: R,
    policy: P,
    filter: F,
    transport_csum: T,
    local_delivery: L,
    counters: IpCounters,
    id_alloc: PacketIdAllocator,
}

impl<R: RouteTable> OutputPipeline<R> {
    /// Creates a pipeline with no policy, filter, checksum helper, or local
    /// delivery.
    pub fn new<G: Rng>(routes: R, rng: &mut G) -> Self {
        Self::with_hooks(routes, (), (), (), (), rng)
    }
}

impl<R, P, F, T, L> OutputPipeline<R, P, F, T, L>
where
    R: RouteTable,
    P: SecurityPolicy<R::Dev>,
    F: FilterHook<R::Dev>,
    T: TransportChecksumHelper,
    L: LocalDelivery<R::Dev>,
{
    /// Creates a pipeline around `routes` with the given hooks.
    pub fn with_hooks<G: Rng>(
        routes: R,
        policy: P,
        filter: F,
        transport_csum: T,
        local_delivery: L,
        rng: &mut G,
    ) -> Self {
        Self {
            routes,
            policy,
            filter,
            transport_csum,
            local_delivery,
            counters: IpCounters::default(),
            id_alloc: PacketIdAllocator::new(rng),
        }
    }

    /// The pipeline's counters.
    pub fn counters(&self) -> &IpCounters {
        &self.counters
    }

    /// The injected routing table.
    pub fn routes(&self) -> &R {
        &self.routes
    }

    /// Sends one datagram through the pipeline using the per-socket
    /// options in `socket_opts`.
    pub fn send_with_socket(
        &self,
        packet: PacketBuf,
        options: Option<&[u8]>,
        route_cache: &mut RouteCache<R::Dev>,
        flags: SendFlags,
        socket_opts: &IpSocketOptions<R::Dev>,
    ) -> Result<(), IpError> {
        self.send(
            packet,
            options,
            route_cache,
            flags,
            &socket_opts.multicast,
            socket_opts.pktinfo.as_ref(),
        )
    }

    /// Sends one datagram.
    ///
    /// `packet` holds a complete datagram whose header may leave the
    /// source address unspecified, the identifier unassigned, and the
    /// checksum unset; the pipeline finalizes all three. `options`, when
    /// present, is a padded options region spliced in behind the fixed
    /// header before anything else happens. `pkt_opts` carries ephemeral
    /// per-call overrides.
    ///
    /// An `Ok(())` return means the datagram was handed to the link layer,
    /// consumed by a hook, or intentionally dropped where silence is the
    /// contract; an error return means nothing was transmitted.
    pub fn send(
        &self,
        mut packet: PacketBuf,
        options: Option<&[u8]>,
        route_cache: &mut RouteCache<R::Dev>,
        flags: SendFlags,
        multicast_opts: &SocketMulticastOptions<R::Dev>,
        pkt_opts: Option<&IpPktOpts>,
    ) -> Result<(), IpError> {
        if let Some(options) = options.filter(|o| !o.is_empty()) {
            packet = splice_packet_options(packet, options)?;
        }

        // First read-only pass over the header.
        let header_len = {
            let prefix = packet.pull_up(HDR_PREFIX_LEN).ok_or(IpError::InvalidArgument)?;
            header_len_of(prefix)?
        };
        let (dst, src_ip) = {
            let bytes = packet.pull_up(header_len).ok_or(IpError::InvalidArgument)?;
            let header = Ipv4HeaderMut::parse(bytes)?;
            (
                SpecifiedAddr::new(header.dst_ip()).ok_or(IpError::InvalidArgument)?,
                header.src_ip(),
            )
        };
        let dst_group = MulticastAddr::new(dst.get());
        let is_limited_broadcast = dst == Ipv4::LIMITED_BROADCAST_ADDRESS;

        // Interface selection. A multicast or limited-broadcast send honors
        // the socket's outgoing-interface override; explicit flags bypass
        // the routing table; everything else resolves through the caller's
        // route cache.
        let direct_device = if (dst_group.is_some() || is_limited_broadcast)
            && multicast_opts.outgoing_interface().is_some()
        {
            multicast_opts.outgoing_interface().cloned()
        } else if flags.contains(SendFlags::ROUTE_BY_INTERFACE_INDEX) {
            let index = pkt_opts
                .and_then(|opts| opts.interface_index)
                .ok_or(IpError::InvalidArgument)?;
            Some(self.routes.device_by_index(index).ok_or(IpError::AddressUnavailable)?)
        } else if flags.contains(SendFlags::ROUTE_TO_INTERFACE) {
            Some(self.routes.on_link_device(dst).ok_or_else(|| {
                self.counters.tx_no_route.increment();
                IpError::NetworkUnreachable
            })?)
        } else {
            None
        };

        let mut route_guard: Option<RouteGuard<'_, R>> = None;
        let (device, next_hop, mtu): (R::Dev, SpecifiedAddr<Ipv4Addr>, Mtu) = match direct_device {
            Some(device) => {
                if !device.is_up() {
                    self.counters.tx_no_route.increment();
                    return Err(IpError::NetworkUnreachable);
                }
                let mtu = device.mtu();
                (device, dst, mtu)
            }
            None => {
                let guard = route_cache.resolve(&self.routes, dst).map_err(|err| {
                    self.counters.tx_no_route.increment();
                    debug!("no route to {dst}: {err}");
                    IpError::from(err)
                })?;
                let route = guard.route();
                let picked = (route.device.clone(), route.link_destination(dst), route.mtu());
                route_guard = Some(guard);
                picked
            }
        };
        let _route_guard = route_guard;
        let device_guard = DeviceGuard::new(device);
        let device = device_guard.device();
        let caps = device.capabilities();

        let is_broadcast =
            is_limited_broadcast || (dst_group.is_none() && device.broadcast_addr() == Some(dst));

        if dst_group.is_some() {
            if !caps.multicast {
                return Err(IpError::NetworkUnreachable);
            }
            packet.meta_mut().multicast = true;
        } else if is_broadcast {
            if !caps.broadcast {
                self.counters.tx_broadcast_denied.increment();
                return Err(IpError::AddressUnavailable);
            }
            if !flags.contains(SendFlags::ALLOW_BROADCAST) {
                self.counters.tx_broadcast_denied.increment();
                return Err(IpError::PermissionDenied);
            }
            // Broadcasts are never fragmented.
            if packet.len() > usize::from(mtu) {
                self.counters.tx_mtu_exceeded.increment();
                return Err(IpError::MessageTooLarge { mtu });
            }
            packet.meta_mut().broadcast = true;
        }

        // Pick the source address to fill into an unspecified header: the
        // per-call override wins, then the interface's primary address.
        let fill_src = if SpecifiedAddr::new(src_ip).is_none() {
            let src = pkt_opts
                .and_then(|opts| opts.src_addr)
                .or_else(|| device.primary_addr())
                .ok_or(IpError::AddressUnavailable)?;
            Some(src)
        } else {
            if MulticastAddr::new(src_ip).is_some() {
                return Err(IpError::AddressUnavailable);
            }
            None
        };

        let id_count =
            packet.meta().gso_segments.map_or(1, NonZeroU16::get);
        let assign_id =
            !flags.intersects(SendFlags::SUPPRESS_NEW_IDENTIFIER | SendFlags::FORWARDING);

        // Header finalization.
        let ttl = {
            let bytes = packet.pull_up(header_len).ok_or(IpError::InvalidArgument)?;
            let mut header = Ipv4HeaderMut::parse(bytes)?;
            if let Some(src) = fill_src {
                header.set_src_ip(src.get());
            }
            if dst_group.is_some()
                && !flags.intersects(SendFlags::RAW_OUTPUT | SendFlags::FORWARDING)
            {
                header.set_ttl(multicast_opts.ttl());
            }
            if flags.contains(SendFlags::PATH_MTU_DISCOVERY) {
                header.set_df_flag(true);
            }
            if assign_id {
                header.set_id(self.id_alloc.reserve(id_count));
            }
            header.ttl()
        };

        if let Some(group) = dst_group {
            if multicast_opts.loopback_enabled() && device.is_group_member(&group) {
                let mut copy = packet.duplicate();
                finish_header_checksum(&mut copy, header_len)?;
                self.counters.tx_loopback_copies.increment();
                self.local_delivery.deliver(device, copy);
            }
            // A zero TTL confines the datagram to the host, and a loopback
            // interface has nowhere further to send it.
            if ttl == 0 || device.is_loopback() {
                return Ok(());
            }
        }

        let PolicyDecision { outcome, reinject_after_fragmentation } =
            self.policy.transform(packet, device);
        let packet = match outcome {
            PolicyOutcome::Unchanged(packet) | PolicyOutcome::Replaced(packet) => packet,
            PolicyOutcome::Dropped => {
                self.counters.tx_policy_drop.increment();
                return Ok(());
            }
            PolicyOutcome::Deferred => {
                self.counters.tx_policy_deferred.increment();
                return Ok(());
            }
        };

        let mut packet = match self.filter.run(packet, device, FilterDirection::Egress) {
            Some(packet) => packet,
            None => {
                self.counters.tx_filter_drop.increment();
                return Ok(());
            }
        };

        // The hooks may have replaced the buffer; re-derive the header view
        // before trusting any field again.
        let header_len = {
            let prefix = packet.pull_up(HDR_PREFIX_LEN).ok_or(IpError::InvalidArgument)?;
            header_len_of(prefix)?
        };
        let (src_ip, df) = {
            let bytes = packet.pull_up(header_len).ok_or(IpError::InvalidArgument)?;
            let header = Ipv4HeaderMut::parse(bytes)?;
            // The route and next hop were resolved for the original
            // destination; a replacement that rewrites it must carry its
            // own routing.
            if header.dst_ip() != dst.get() {
                return Err(IpError::InvalidArgument);
            }
            (header.src_ip(), header.df_flag())
        };

        if let Some(src) = SpecifiedAddr::new(src_ip) {
            match device.addr_status(src) {
                Some(AddressStatus::Duplicated) => {
                    // Transmitting from an address another host also holds
                    // would only add to the conflict; drop without telling
                    // the caller.
                    self.counters.tx_dropped_duplicate_addr.increment();
                    debug!("{device:?} dropping packet from duplicated address {src}");
                    return Ok(());
                }
                Some(AddressStatus::Tentative) => return Err(IpError::AddressUnavailable),
                Some(AddressStatus::Assigned) | None => {}
            }
        }

        let fits = packet.len() <= usize::from(mtu)
            || (packet.meta().gso_segments.is_some() && caps.segmentation_offload);
        let will_fragment = !fits;

        // Checksum-offload decision. The header checksum is always owed;
        // fragmentation forces everything to software since offload engines
        // see only whole transport payloads.
        let requested = packet.meta().checksum_requests | ChecksumKinds::IPV4_HEADER;
        let ChecksumPartition { offload, software } = if will_fragment {
            ChecksumPartition { offload: ChecksumKinds::empty(), software: requested }
        } else {
            partition(&caps, requested)
        };
        let transport_software = software & (ChecksumKinds::TCP | ChecksumKinds::UDP);
        if !transport_software.is_empty() {
            self.transport_csum.finalize(&mut packet, transport_software);
        }
        {
            let bytes = packet.pull_up(header_len).ok_or(IpError::InvalidArgument)?;
            let mut header = Ipv4HeaderMut::parse(bytes)?;
            header.zero_checksum();
            // Fragmentation writes per-fragment header checksums later.
            if software.contains(ChecksumKinds::IPV4_HEADER) && !will_fragment {
                header.compute_checksum();
            }
        }
        let meta = packet.meta_mut();
        meta.checksum_requests = ChecksumKinds::empty();
        meta.checksum_offload = offload;

        if !will_fragment {
            if device.tx_available() < 1 {
                self.counters.tx_queue_full.increment();
                return Err(IpError::ResourceExhausted);
            }
            return self.transmit(device, packet, next_hop);
        }

        if df || flags.contains(SendFlags::PATH_MTU_DISCOVERY) {
            self.counters.tx_mtu_exceeded.increment();
            return Err(IpError::MessageTooLarge { mtu });
        }

        self.counters.fragmentation.fragmentation_required.increment();
        trace!("fragmenting {} bytes to fit mtu {mtu}", packet.len());
        let chain = fragment(packet, mtu).map_err(|err| {
            self.counters.fragmentation.error_counter(&err).increment();
            debug!("cannot fragment for {dst}: {err}");
            match err {
                FragmentationError::InvalidHeader => IpError::InvalidArgument,
                FragmentationError::MtuTooSmall | FragmentationError::BodyTooLong => {
                    IpError::MessageTooLarge { mtu }
                }
            }
        })?;

        let mut fragments = Vec::with_capacity(chain.len());
        for frame in chain {
            if !reinject_after_fragmentation {
                fragments.push(frame);
                continue;
            }
            let PolicyDecision { outcome, reinject_after_fragmentation: _ } =
                self.policy.transform(frame, device);
            match outcome {
                PolicyOutcome::Unchanged(frame) | PolicyOutcome::Replaced(frame) => {
                    fragments.push(frame)
                }
                PolicyOutcome::Dropped => self.counters.tx_policy_drop.increment(),
                PolicyOutcome::Deferred => self.counters.tx_policy_deferred.increment(),
            }
        }

        // All-or-nothing admission: transmitting a partial chain only burns
        // reassembly buffers at the receiver until its timer fires.
        if device.tx_available() < fragments.len() {
            self.counters.tx_queue_full.increment();
            return Err(IpError::ResourceExhausted);
        }
        for frame in fragments {
            self.transmit(device, frame, next_hop)?;
            self.counters.fragmentation.fragments.increment();
        }
        Ok(())
    }

    fn transmit(
        &self,
        device: &R::Dev,
        frame: PacketBuf,
        next_hop: SpecifiedAddr<Ipv4Addr>,
    ) -> Result<(), IpError> {
        match device.output(frame, next_hop) {
            Ok(()) => {
                self.counters.tx_sent.increment();
                Ok(())
            }
            Err(DeviceSendFrameError::QueueFull) => {
                self.counters.tx_queue_full.increment();
                Err(IpError::ResourceExhausted)
            }
            Err(err) => {
                self.counters.tx_device_errors.increment();
                debug!("{device:?} failed to send frame: {err}");
                Err(IpError::Io)
            }
        }
    }
}

/// Splices a padded options region into the header of `packet`, flattening
/// it in the process.
fn splice_packet_options(mut packet: PacketBuf, options: &[u8]) -> Result<PacketBuf, IpError> {
    let meta = core::mem::take(packet.meta_mut());
    let mut bytes = packet.into_contiguous();
    crate::internal::ipv4::splice_options(&mut bytes, options)?;
    let mut packet = PacketBuf::new(bytes);
    *packet.meta_mut() = meta;
    Ok(packet)
}

fn finish_header_checksum(packet: &mut PacketBuf, header_len: usize) -> Result<(), IpError> {
    let bytes = packet.pull_up(header_len).ok_or(IpError::InvalidArgument)?;
    let mut header = Ipv4HeaderMut::parse(bytes)?;
    header.compute_checksum();
    Ok(())
}
