// Copyright 2025 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! IPv4 header wire format.
//!
//! Parsing and serialization of the fixed header and the options region,
//! plus the helpers the pipeline uses to finalize headers in place: option
//! splicing, fragment flag/offset encoding, and checksum insertion.

use zerocopy::byteorder::network_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use net_types::ip::Ipv4Addr;

use crate::internal::checksum::header_checksum;
use crate::internal::error::IpError;

/// The length of the fixed IPv4 header.
pub const HDR_PREFIX_LEN: usize = 20;
/// The maximum length of the options region.
pub const MAX_OPTIONS_LEN: usize = 40;
/// The maximum total header length.
pub const MAX_HDR_LEN: usize = HDR_PREFIX_LEN + MAX_OPTIONS_LEN;
/// The maximum total datagram length.
pub const MAX_TOTAL_LEN: usize = 65535;

const IP_VERSION: u8 = 4;

const FLAG_DF: u16 = 0x4000;
const FLAG_MF: u16 = 0x2000;
const FRAG_OFF_MASK: u16 = 0x1fff;

const OPT_KIND_EOL: u8 = 0;
const OPT_KIND_NOP: u8 = 1;
// The MSB of an option kind marks it as copied into every fragment.
const OPT_COPIED: u8 = 0x80;

/// A fragment offset, stored in 8-byte units.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct FragmentOffset(u16);

impl FragmentOffset {
    /// The zero offset.
    pub const ZERO: FragmentOffset = FragmentOffset(0);

    /// Creates a new offset from 8-byte units, if representable in 13 bits.
    pub const fn new(units: u16) -> Option<Self> {
        if units <= FRAG_OFF_MASK {
            Some(Self(units))
        } else {
            None
        }
    }

    /// Creates a new offset from a byte count, which must be a multiple of 8.
    pub const fn new_with_bytes(bytes: u16) -> Option<Self> {
        if bytes & 0x7 != 0 {
            return None;
        }
        Self::new(bytes >> 3)
    }

    /// The offset in 8-byte units.
    pub const fn units(self) -> u16 {
        let Self(units) = self;
        units
    }

    /// The offset in bytes.
    pub const fn into_bytes(self) -> u32 {
        let Self(units) = self;
        (units as u32) << 3
    }
}

#[derive(FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned, Copy, Clone, Debug)]
#[repr(C)]
struct HeaderPrefix {
    version_ihl: u8,
    dscp_ecn: u8,
    total_len: U16,
    id: U16,
    flags_frag_off: U16,
    ttl: u8,
    proto: u8,
    checksum: [u8; 2],
    src_ip: [u8; 4],
    dst_ip: [u8; 4],
}

/// A mutable view over an IPv4 header at the front of a contiguous byte
/// slice.
///
/// The view borrows the full header (fixed prefix plus options). It is the
/// pipeline's tool for finalizing headers in place; packet construction
/// goes through [`Ipv4HeaderBuilder`].
pub struct Ipv4HeaderMut<'a> {
    prefix: &'a mut HeaderPrefix,
    options: &'a mut [u8],
}

impl<'a> Ipv4HeaderMut<'a> {
    /// Parses the header at the front of `bytes`.
    ///
    /// `bytes` must hold at least the full header named by the
    /// header-length field; the caller pulls the header up into one segment
    /// first. Returns `InvalidArgument` for a bad version, header length
    /// out of `[20, 60]`, or a total length smaller than the header.
    pub fn parse(bytes: &'a mut [u8]) -> Result<Self, IpError> {
        let header_len = header_len_of(bytes)?;
        if bytes.len() < header_len {
            return Err(IpError::InvalidArgument);
        }
        let (prefix, rest) =
            HeaderPrefix::mut_from_prefix(bytes).map_err(|_| IpError::InvalidArgument)?;
        if prefix.version_ihl >> 4 != IP_VERSION {
            return Err(IpError::InvalidArgument);
        }
        let options = &mut rest[..header_len - HDR_PREFIX_LEN];
        let this = Self { prefix, options };
        if usize::from(this.prefix.total_len.get()) < header_len {
            return Err(IpError::InvalidArgument);
        }
        Ok(this)
    }

    /// The header length in bytes.
    pub fn header_len(&self) -> usize {
        usize::from(self.prefix.version_ihl & 0x0f) * 4
    }

    /// The total-length field.
    pub fn total_len(&self) -> usize {
        usize::from(self.prefix.total_len.get())
    }

    pub(crate) fn set_total_len(&mut self, len: u16) {
        self.prefix.total_len.set(len);
    }

    /// The identification field.
    pub fn id(&self) -> u16 {
        self.prefix.id.get()
    }

    pub(crate) fn set_id(&mut self, id: u16) {
        self.prefix.id.set(id);
    }

    /// The time-to-live field.
    pub fn ttl(&self) -> u8 {
        self.prefix.ttl
    }

    pub(crate) fn set_ttl(&mut self, ttl: u8) {
        self.prefix.ttl = ttl;
    }

    /// The protocol field.
    pub fn proto(&self) -> u8 {
        self.prefix.proto
    }

    /// The don't-fragment flag.
    pub fn df_flag(&self) -> bool {
        self.prefix.flags_frag_off.get() & FLAG_DF != 0
    }

    pub(crate) fn set_df_flag(&mut self, df: bool) {
        let mut bits = self.prefix.flags_frag_off.get();
        if df {
            bits |= FLAG_DF;
        } else {
            bits &= !FLAG_DF;
        }
        self.prefix.flags_frag_off.set(bits);
    }

    /// The more-fragments flag.
    pub fn mf_flag(&self) -> bool {
        self.prefix.flags_frag_off.get() & FLAG_MF != 0
    }

    pub(crate) fn set_mf_flag(&mut self, mf: bool) {
        let mut bits = self.prefix.flags_frag_off.get();
        if mf {
            bits |= FLAG_MF;
        } else {
            bits &= !FLAG_MF;
        }
        self.prefix.flags_frag_off.set(bits);
    }

    /// The fragment offset.
    pub fn fragment_offset(&self) -> FragmentOffset {
        FragmentOffset(self.prefix.flags_frag_off.get() & FRAG_OFF_MASK)
    }

    pub(crate) fn set_fragment_offset(&mut self, offset: FragmentOffset) {
        let bits = self.prefix.flags_frag_off.get() & !FRAG_OFF_MASK;
        self.prefix.flags_frag_off.set(bits | offset.units());
    }

    /// The source address.
    pub fn src_ip(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.prefix.src_ip)
    }

    pub(crate) fn set_src_ip(&mut self, addr: Ipv4Addr) {
        self.prefix.src_ip = addr.ipv4_bytes();
    }

    /// The destination address.
    pub fn dst_ip(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.prefix.dst_ip)
    }

    /// The options region.
    pub fn options(&self) -> &[u8] {
        self.options
    }

    pub(crate) fn zero_checksum(&mut self) {
        self.prefix.checksum = [0, 0];
    }

    /// Zeroes the checksum field and writes a freshly computed software
    /// checksum over the header.
    pub(crate) fn compute_checksum(&mut self) {
        self.prefix.checksum = [0, 0];
        let mut sum = internet_checksum::Checksum::new();
        sum.add_bytes(self.prefix.as_bytes());
        sum.add_bytes(self.options);
        self.prefix.checksum = sum.checksum();
    }
}

/// Reads the header length field from the front of `bytes` without a full
/// parse.
pub(crate) fn header_len_of(bytes: &[u8]) -> Result<usize, IpError> {
    let version_ihl = *bytes.first().ok_or(IpError::InvalidArgument)?;
    let header_len = usize::from(version_ihl & 0x0f) * 4;
    if (HDR_PREFIX_LEN..=MAX_HDR_LEN).contains(&header_len) {
        Ok(header_len)
    } else {
        Err(IpError::InvalidArgument)
    }
}

/// Verifies the checksum over an emitted header; a valid header sums to
/// zero.
pub fn verify_header_checksum(header: &[u8]) -> bool {
    header_checksum(header) == [0, 0]
}

/// Splices `options` into the header at the front of `header_and_payload`,
/// after the fixed prefix and before any existing options, recomputing the
/// header-length and total-length fields.
///
/// `options` must be padded to a multiple of 4 bytes. Fails with
/// `InvalidArgument` if the resulting options region exceeds
/// [`MAX_OPTIONS_LEN`] or the total length would exceed [`MAX_TOTAL_LEN`].
pub(crate) fn splice_options(bytes: &mut Vec<u8>, options: &[u8]) -> Result<(), IpError> {
    if options.is_empty() {
        return Ok(());
    }
    if options.len() % 4 != 0 {
        return Err(IpError::InvalidArgument);
    }
    let header_len = header_len_of(bytes)?;
    if header_len - HDR_PREFIX_LEN + options.len() > MAX_OPTIONS_LEN {
        return Err(IpError::InvalidArgument);
    }
    if bytes.len() + options.len() > MAX_TOTAL_LEN {
        return Err(IpError::InvalidArgument);
    }
    let mut spliced = Vec::with_capacity(bytes.len() + options.len());
    spliced.extend_from_slice(&bytes[..HDR_PREFIX_LEN]);
    spliced.extend_from_slice(options);
    spliced.extend_from_slice(&bytes[HDR_PREFIX_LEN..]);
    *bytes = spliced;

    let new_header_len = header_len + options.len();
    bytes[0] = (IP_VERSION << 4) | (new_header_len / 4) as u8;
    let (prefix, _rest) =
        HeaderPrefix::mut_from_prefix(bytes.as_mut_slice()).map_err(|_| IpError::InvalidArgument)?;
    let total = usize::from(prefix.total_len.get()) + options.len();
    if total > MAX_TOTAL_LEN {
        return Err(IpError::InvalidArgument);
    }
    prefix.total_len.set(total as u16);
    Ok(())
}

/// Extracts the options that must be copied into non-first fragments,
/// padding the result to a multiple of 4 bytes with end-of-list octets.
///
/// Unparseable trailing option bytes are dropped rather than propagated.
pub(crate) fn copied_fragment_options(options: &[u8]) -> Vec<u8> {
    let mut copied = Vec::new();
    let mut rest = options;
    loop {
        let (&kind, after_kind) = match rest.split_first() {
            None => break,
            Some(split) => split,
        };
        match kind {
            OPT_KIND_EOL => break,
            OPT_KIND_NOP => {
                rest = after_kind;
            }
            kind => {
                let Some(&len) = after_kind.first() else { break };
                let len = usize::from(len);
                if len < 2 || len > rest.len() {
                    break;
                }
                if kind & OPT_COPIED != 0 {
                    copied.extend_from_slice(&rest[..len]);
                }
                rest = &rest[len..];
            }
        }
    }
    while copied.len() % 4 != 0 {
        copied.push(OPT_KIND_EOL);
    }
    copied
}

/// The fields a caller fills before handing a skeletal datagram to the
/// pipeline.
#[derive(Debug, Copy, Clone)]
pub struct Ipv4HeaderBuilder {
    /// Type-of-service byte.
    pub dscp_ecn: u8,
    /// Identification; usually left zero and assigned by the pipeline.
    pub id: u16,
    /// Don't-fragment flag.
    pub df: bool,
    /// More-fragments flag.
    pub mf: bool,
    /// Fragment offset.
    pub fragment_offset: FragmentOffset,
    /// Time-to-live.
    pub ttl: u8,
    /// Transport protocol number.
    pub proto: u8,
    /// Source address; may be unspecified for the pipeline to fill.
    pub src_ip: Ipv4Addr,
    /// Destination address.
    pub dst_ip: Ipv4Addr,
}

impl Ipv4HeaderBuilder {
    /// Creates a builder with the fields a transport caller always knows.
    pub fn new(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, ttl: u8, proto: u8) -> Self {
        Self {
            dscp_ecn: 0,
            id: 0,
            df: false,
            mf: false,
            fragment_offset: FragmentOffset::ZERO,
            ttl,
            proto,
            src_ip,
            dst_ip,
        }
    }

    /// Serializes a header (with optional `options`, padded by the caller)
    /// for a datagram whose payload is `payload_len` bytes, leaving the
    /// checksum zeroed.
    ///
    /// Fails with `InvalidArgument` if options are oversized/unpadded or
    /// the total length exceeds [`MAX_TOTAL_LEN`].
    pub fn serialize(&self, options: &[u8], payload_len: usize) -> Result<Vec<u8>, IpError> {
        if options.len() > MAX_OPTIONS_LEN || options.len() % 4 != 0 {
            return Err(IpError::InvalidArgument);
        }
        let header_len = HDR_PREFIX_LEN + options.len();
        let total_len = header_len + payload_len;
        if total_len > MAX_TOTAL_LEN {
            return Err(IpError::InvalidArgument);
        }
        let mut flags_frag_off = self.fragment_offset.units();
        if self.df {
            flags_frag_off |= FLAG_DF;
        }
        if self.mf {
            flags_frag_off |= FLAG_MF;
        }
        let prefix = HeaderPrefix {
            version_ihl: (IP_VERSION << 4) | (header_len / 4) as u8,
            dscp_ecn: self.dscp_ecn,
            total_len: U16::new(total_len as u16),
            id: U16::new(self.id),
            flags_frag_off: U16::new(flags_frag_off),
            ttl: self.ttl,
            proto: self.proto,
            checksum: [0, 0],
            src_ip: self.src_ip.ipv4_bytes(),
            dst_ip: self.dst_ip.ipv4_bytes(),
        };
        let mut bytes = Vec::with_capacity(header_len);
        bytes.extend_from_slice(prefix.as_bytes());
        bytes.extend_from_slice(options);
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;

    fn test_header(options: &[u8], payload_len: usize) -> Vec<u8> {
        Ipv4HeaderBuilder::new(
            Ipv4Addr::new([192, 0, 2, 1]),
            Ipv4Addr::new([192, 0, 2, 2]),
            64,
            17,
        )
        .serialize(options, payload_len)
        .expect("serialize header")
    }

    #[test]
    fn parse_round_trips_builder_fields() {
        let mut bytes = test_header(&[], 100);
        let header = Ipv4HeaderMut::parse(&mut bytes).expect("parse");
        assert_eq!(header.header_len(), HDR_PREFIX_LEN);
        assert_eq!(header.total_len(), HDR_PREFIX_LEN + 100);
        assert_eq!(header.ttl(), 64);
        assert_eq!(header.proto(), 17);
        assert!(!header.df_flag());
        assert!(!header.mf_flag());
        assert_eq!(header.fragment_offset(), FragmentOffset::ZERO);
        assert_eq!(header.src_ip(), Ipv4Addr::new([192, 0, 2, 1]));
        assert_eq!(header.dst_ip(), Ipv4Addr::new([192, 0, 2, 2]));
    }

    #[test]
    fn checksum_round_trip() {
        let mut bytes = test_header(&[7, 4, 1, 2, 1, 1, 1, 1], 32);
        let mut header = Ipv4HeaderMut::parse(&mut bytes).expect("parse");
        header.compute_checksum();
        assert!(verify_header_checksum(&bytes));
    }

    #[test]
    fn splice_grows_header_and_total() {
        let mut bytes = test_header(&[], 8);
        bytes.extend_from_slice(&[0xaa; 8]);
        splice_options(&mut bytes, &[0x87, 4, 0, 0]).expect("splice");
        let header = Ipv4HeaderMut::parse(&mut bytes).expect("parse");
        assert_eq!(header.header_len(), HDR_PREFIX_LEN + 4);
        assert_eq!(header.total_len(), HDR_PREFIX_LEN + 4 + 8);
        assert_eq!(header.options(), &[0x87, 4, 0, 0]);
        // Payload bytes moved back intact.
        assert_eq!(&bytes[HDR_PREFIX_LEN + 4..], &[0xaa; 8]);
    }

    #[test]
    fn splice_rejects_oversized_options() {
        let mut bytes = test_header(&[1; 40], 8);
        assert_matches!(
            splice_options(&mut bytes, &[0x87, 4, 0, 0]),
            Err(IpError::InvalidArgument)
        );
    }

    #[test]
    fn copied_options_filtered_and_padded() {
        // NOP, copied 3-byte option, non-copied 4-byte option, EOL.
        let options = &[
            OPT_KIND_NOP,
            0x83, 3, 0xff,
            0x07, 4, 0x01, 0x02,
            OPT_KIND_EOL,
        ];
        assert_eq!(copied_fragment_options(options), vec![0x83, 3, 0xff, OPT_KIND_EOL]);
        assert_eq!(copied_fragment_options(&[]), Vec::<u8>::new());
    }

    #[test]
    fn builder_rejects_oversized_total() {
        let builder = Ipv4HeaderBuilder::new(
            Ipv4Addr::new([192, 0, 2, 1]),
            Ipv4Addr::new([192, 0, 2, 2]),
            64,
            17,
        );
        assert_matches!(
            builder.serialize(&[], MAX_TOTAL_LEN),
            Err(IpError::InvalidArgument)
        );
    }
}
