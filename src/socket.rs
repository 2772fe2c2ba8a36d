// Copyright 2025 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-socket IP-level options and the get/set option protocol.
//!
//! Option payloads use fixed encodings: addresses are 4 network-order
//! bytes, scalar options are a single byte, membership requests are the
//! 8-byte group-plus-interface pair. Malformed lengths and out-of-range
//! values fail with [`IpError::InvalidArgument`] before any state changes.

use net_types::ip::Ipv4Addr;
use net_types::{SpecifiedAddr, Witness as _};

use crate::internal::base::{IpPktOpts, DEFAULT_TTL};
use crate::internal::device::Device;
use crate::internal::error::IpError;
use crate::internal::multicast::{InterfaceSelector, SocketMulticastOptions};
use crate::internal::routes::RouteTable;

/// The local port allocation range requested by a socket.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum PortRange {
    /// The system default ephemeral range.
    #[default]
    Default,
    /// The high (traditional ephemeral) range.
    High,
    /// The low (privileged-adjacent) range.
    Low,
}

impl PortRange {
    fn to_byte(self) -> u8 {
        match self {
            Self::Default => 0,
            Self::High => 1,
            Self::Low => 2,
        }
    }

    fn from_byte(b: u8) -> Result<Self, IpError> {
        match b {
            0 => Ok(Self::Default),
            1 => Ok(Self::High),
            2 => Ok(Self::Low),
            _ => Err(IpError::InvalidArgument),
        }
    }
}

/// IP-level option names understood by [`IpSocketOptions::set`] and
/// [`IpSocketOptions::get`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OptionName {
    /// Unicast hop limit.
    Ttl,
    /// Type-of-service byte stamped into outgoing headers.
    Tos,
    /// Deliver the received TTL as ancillary data.
    RecvTtl,
    /// Deliver the received TOS as ancillary data.
    RecvTos,
    /// Deliver the arrival interface as ancillary data.
    RecvIf,
    /// Deliver the original destination address as ancillary data.
    RecvDstAddr,
    /// Sticky source address and interface for outgoing datagrams.
    PktInfo,
    /// Local port allocation range.
    PortRange,
    /// Outgoing interface for multicast datagrams.
    MulticastIf,
    /// Hop limit for multicast datagrams.
    MulticastTtl,
    /// Loop outgoing multicast back to local members.
    MulticastLoop,
    /// Join a multicast group.
    AddMembership,
    /// Leave a multicast group.
    DropMembership,
}

/// The IP-level options of one socket.
#[derive(Debug)]
pub struct IpSocketOptions<D: Device> {
    /// Unicast TTL for datagrams this socket sends.
    pub ttl: u8,
    /// Type-of-service byte for datagrams this socket sends.
    pub tos: u8,
    /// Whether received TTL is reported as ancillary data.
    pub recv_ttl: bool,
    /// Whether received TOS is reported as ancillary data.
    pub recv_tos: bool,
    /// Whether the arrival interface is reported as ancillary data.
    pub recv_if: bool,
    /// Whether the original destination address is reported as ancillary
    /// data.
    pub recv_dst_addr: bool,
    /// Sticky packet metadata applied to sends that carry none of their
    /// own.
    pub pktinfo: Option<IpPktOpts>,
    /// Requested local port allocation range.
    pub portrange: PortRange,
    /// Multicast options and memberships.
    pub multicast: SocketMulticastOptions<D>,
}

impl<D: Device> Default for IpSocketOptions<D> {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            tos: 0,
            recv_ttl: false,
            recv_tos: false,
            recv_if: false,
            recv_dst_addr: false,
            pktinfo: None,
            portrange: PortRange::default(),
            multicast: SocketMulticastOptions::new(),
        }
    }
}

fn one_byte(value: &[u8]) -> Result<u8, IpError> {
    match value {
        [b] => Ok(*b),
        _ => Err(IpError::InvalidArgument),
    }
}

fn boolean(value: &[u8]) -> Result<bool, IpError> {
    match one_byte(value)? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(IpError::InvalidArgument),
    }
}

fn addr4(value: &[u8]) -> Result<Ipv4Addr, IpError> {
    let bytes: [u8; 4] = value.try_into().map_err(|_| IpError::InvalidArgument)?;
    Ok(Ipv4Addr::new(bytes))
}

/// Decodes the 8-byte membership request: group address followed by the
/// selecting interface address.
fn membership(value: &[u8]) -> Result<(Ipv4Addr, InterfaceSelector), IpError> {
    if value.len() != 8 {
        return Err(IpError::InvalidArgument);
    }
    let group = addr4(&value[..4])?;
    let selector = match SpecifiedAddr::new(addr4(&value[4..])?) {
        None => InterfaceSelector::Any,
        Some(addr) => InterfaceSelector::LocalAddr(addr),
    };
    Ok((group, selector))
}

/// Decodes the 8-byte packet-info payload: interface index followed by the
/// source address. An all-zero payload clears the sticky state.
fn pktinfo(value: &[u8]) -> Result<Option<IpPktOpts>, IpError> {
    if value.len() != 8 {
        return Err(IpError::InvalidArgument);
    }
    let index = u32::from_be_bytes(value[..4].try_into().unwrap());
    let src_addr = SpecifiedAddr::new(addr4(&value[4..])?);
    let opts = IpPktOpts {
        src_addr,
        interface_index: (index != 0).then_some(index),
    };
    let IpPktOpts { src_addr, interface_index } = &opts;
    Ok((src_addr.is_some() || interface_index.is_some()).then_some(opts))
}

impl<D: Device> IpSocketOptions<D> {
    /// Applies a set-option request.
    ///
    /// Multicast interface selection and membership changes consult
    /// `table` to resolve addresses to interfaces.
    pub fn set<R: RouteTable<Dev = D>>(
        &mut self,
        table: &R,
        name: OptionName,
        value: &[u8],
    ) -> Result<(), IpError> {
        match name {
            OptionName::Ttl => self.ttl = one_byte(value)?,
            OptionName::Tos => self.tos = one_byte(value)?,
            OptionName::RecvTtl => self.recv_ttl = boolean(value)?,
            OptionName::RecvTos => self.recv_tos = boolean(value)?,
            OptionName::RecvIf => self.recv_if = boolean(value)?,
            OptionName::RecvDstAddr => self.recv_dst_addr = boolean(value)?,
            OptionName::PktInfo => self.pktinfo = pktinfo(value)?,
            OptionName::PortRange => self.portrange = PortRange::from_byte(one_byte(value)?)?,
            OptionName::MulticastIf => {
                self.multicast.set_outgoing_interface(table, addr4(value)?)?
            }
            OptionName::MulticastTtl => self.multicast.set_ttl(one_byte(value)?),
            OptionName::MulticastLoop => self.multicast.set_loopback(boolean(value)?),
            OptionName::AddMembership => {
                let (group, selector) = membership(value)?;
                self.multicast.add_membership(table, group, selector)?;
            }
            OptionName::DropMembership => {
                let (group, selector) = membership(value)?;
                self.multicast.drop_membership(table, group, selector)?;
            }
        }
        Ok(())
    }

    /// Encodes the current value of `name`.
    ///
    /// Membership options are write-only and fail with
    /// [`IpError::InvalidArgument`].
    pub fn get(&self, name: OptionName) -> Result<Vec<u8>, IpError> {
        let encoded = match name {
            OptionName::Ttl => vec![self.ttl],
            OptionName::Tos => vec![self.tos],
            OptionName::RecvTtl => vec![self.recv_ttl as u8],
            OptionName::RecvTos => vec![self.recv_tos as u8],
            OptionName::RecvIf => vec![self.recv_if as u8],
            OptionName::RecvDstAddr => vec![self.recv_dst_addr as u8],
            OptionName::PktInfo => {
                let (index, addr) = self.pktinfo.as_ref().map_or((0, Ipv4Addr::new([0; 4])), |p| {
                    (
                        p.interface_index.unwrap_or(0),
                        p.src_addr.map_or(Ipv4Addr::new([0; 4]), |a| a.get()),
                    )
                });
                let mut out = index.to_be_bytes().to_vec();
                out.extend_from_slice(&addr.ipv4_bytes());
                out
            }
            OptionName::PortRange => vec![self.portrange.to_byte()],
            OptionName::MulticastIf => {
                let addr = self
                    .multicast
                    .outgoing_interface()
                    .and_then(|d| d.primary_addr())
                    .map_or(Ipv4Addr::new([0; 4]), |a| a.get());
                addr.ipv4_bytes().to_vec()
            }
            OptionName::MulticastTtl => vec![self.multicast.ttl()],
            OptionName::MulticastLoop => vec![self.multicast.loopback_enabled() as u8],
            OptionName::AddMembership | OptionName::DropMembership => {
                return Err(IpError::InvalidArgument)
            }
        };
        Ok(encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use test_case::test_case;

    use crate::internal::testutil::{FakeDevice, FakeRouteTable, MULTICAST_GROUP};

    fn setup() -> (FakeDevice, FakeRouteTable, IpSocketOptions<FakeDevice>) {
        let device = FakeDevice::new_ethernet();
        let table = FakeRouteTable::with_default_route(device.clone());
        (device, table, IpSocketOptions::default())
    }

    #[test_case(OptionName::Ttl, &[17], &[17]; "ttl")]
    #[test_case(OptionName::Tos, &[0xb8], &[0xb8]; "tos")]
    #[test_case(OptionName::RecvTtl, &[1], &[1]; "recv ttl")]
    #[test_case(OptionName::RecvDstAddr, &[1], &[1]; "recv dst addr")]
    #[test_case(OptionName::PortRange, &[2], &[2]; "portrange low")]
    #[test_case(OptionName::MulticastTtl, &[5], &[5]; "multicast ttl")]
    #[test_case(OptionName::MulticastLoop, &[0], &[0]; "multicast loop off")]
    fn set_then_get(name: OptionName, value: &[u8], expect: &[u8]) {
        let (_device, table, mut opts) = setup();
        opts.set(&table, name, value).expect("set");
        assert_eq!(opts.get(name).expect("get"), expect);
    }

    #[test_case(OptionName::Ttl, &[]; "empty ttl")]
    #[test_case(OptionName::Ttl, &[1, 2]; "oversized ttl")]
    #[test_case(OptionName::RecvTtl, &[2]; "non boolean")]
    #[test_case(OptionName::PortRange, &[3]; "unknown portrange")]
    #[test_case(OptionName::MulticastIf, &[192, 0, 2]; "short address")]
    #[test_case(OptionName::AddMembership, &[224, 0, 0, 1]; "short membership")]
    #[test_case(OptionName::PktInfo, &[0; 7]; "short pktinfo")]
    fn malformed_payload_rejected(name: OptionName, value: &[u8]) {
        let (_device, table, mut opts) = setup();
        assert_matches!(opts.set(&table, name, value), Err(IpError::InvalidArgument));
    }

    #[test]
    fn membership_roundtrip_through_options() {
        let (device, table, mut opts) = setup();
        let mut req = MULTICAST_GROUP.ipv4_bytes().to_vec();
        req.extend_from_slice(&[0; 4]);

        opts.set(&table, OptionName::AddMembership, &req).expect("join");
        assert!(opts
            .multicast
            .is_member(&device, net_types::MulticastAddr::new(MULTICAST_GROUP).unwrap()));
        assert_matches!(
            opts.set(&table, OptionName::AddMembership, &req),
            Err(IpError::AddressInUse)
        );
        opts.set(&table, OptionName::DropMembership, &req).expect("drop");
        assert_matches!(
            opts.set(&table, OptionName::DropMembership, &req),
            Err(IpError::AddressUnavailable)
        );
    }

    #[test]
    fn pktinfo_sticky_and_clearable() {
        let (_device, table, mut opts) = setup();
        let mut req = 7u32.to_be_bytes().to_vec();
        req.extend_from_slice(&[192, 0, 2, 1]);
        opts.set(&table, OptionName::PktInfo, &req).expect("set");
        let info = opts.pktinfo.as_ref().expect("sticky state present");
        assert_eq!(info.interface_index, Some(7));
        assert_eq!(info.src_addr.unwrap().get(), Ipv4Addr::new([192, 0, 2, 1]));
        assert_eq!(opts.get(OptionName::PktInfo).expect("get"), req);

        opts.set(&table, OptionName::PktInfo, &[0; 8]).expect("clear");
        assert_eq!(opts.pktinfo, None);
    }

    #[test]
    fn membership_options_are_write_only() {
        let (_device, _table, opts) = setup();
        assert_matches!(opts.get(OptionName::AddMembership), Err(IpError::InvalidArgument));
        assert_matches!(opts.get(OptionName::DropMembership), Err(IpError::InvalidArgument));
    }
}
