// Copyright 2025 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! IPv4 fragmentation support.
//!
//! [`fragment`] splits a finalized datagram into a [`FragmentChain`] whose
//! members each fit the egress MTU. The first fragment reuses the original
//! buffer truncated in place; follow-on fragments carry a rebuilt header
//! holding only the options marked copy-on-fragment. A datagram that is
//! itself a fragment (nonzero offset or more-fragments set) is split the
//! same way, with offsets continuing from its base and the final piece
//! keeping the original more-fragments flag.
//!
//! Callers decide whether fragmentation is permitted; the don't-fragment
//! flag is not consulted here.

use thiserror::Error;

use crate::internal::base::Mtu;
use crate::internal::buffer::{FragmentChain, PacketBuf, PacketMeta};
use crate::internal::checksum::ChecksumKinds;
use crate::internal::counters::Counter;
use crate::internal::ipv4::{
    copied_fragment_options, header_len_of, FragmentOffset, Ipv4HeaderMut, HDR_PREFIX_LEN,
};

/// The maximum byte offset expressible in the 13-bit fragment offset field.
const MAX_FRAGMENT_OFFSET_BYTES: usize = ((1 << 13) - 1) * 8;

/// Fragmentation errors.
#[derive(Debug, Eq, PartialEq, Error)]
pub enum FragmentationError {
    /// MTU is too small, headers don't fit.
    #[error("MTU too small to carry a fragment body")]
    MtuTooSmall,
    /// Body is too long to be fragmented.
    #[error("body exceeds the maximum fragment offset")]
    BodyTooLong,
    /// The buffer does not hold a parseable IPv4 header.
    #[error("header could not be parsed")]
    InvalidHeader,
}

/// Returns the biggest fragment body that can fit in `mtu` with a given IP
/// `header` size.
///
/// The returned body size is rounded down to the nearest multiple of 8 to
/// fit the header representation of fragment offsets.
fn maximum_fragment_body_with_header_and_mtu(
    mtu: Mtu,
    header: usize,
) -> Result<usize, FragmentationError> {
    let v = usize::from(mtu).checked_sub(header).ok_or(FragmentationError::MtuTooSmall)?;
    let v = v & !0x07usize;
    if v == 0 {
        // Can't fragment without at least one 8-octet unit of space.
        return Err(FragmentationError::MtuTooSmall);
    }
    Ok(v)
}

struct FragmentPlan {
    header_len: usize,
    body_len: usize,
    base_offset_bytes: usize,
    original_mf: bool,
    first_take: usize,
    max_body_remaining: usize,
    // Prefix plus copy-on-fragment options, checksum zeroed; the header
    // template for every non-first fragment.
    remaining_header: Vec<u8>,
}

fn plan(packet: &mut PacketBuf, mtu: Mtu) -> Result<FragmentPlan, FragmentationError> {
    let total_len = packet.len();
    let prefix =
        packet.pull_up(HDR_PREFIX_LEN).ok_or(FragmentationError::InvalidHeader)?;
    let header_len = header_len_of(prefix).map_err(|_| FragmentationError::InvalidHeader)?;
    let header_bytes = packet.pull_up(header_len).ok_or(FragmentationError::InvalidHeader)?;
    let header =
        Ipv4HeaderMut::parse(header_bytes).map_err(|_| FragmentationError::InvalidHeader)?;

    let base_offset_bytes = header.fragment_offset().into_bytes() as usize;
    let original_mf = header.mf_flag();

    let mut remaining_header = header_bytes[..HDR_PREFIX_LEN].to_vec();
    remaining_header.extend_from_slice(&copied_fragment_options(&header_bytes[HDR_PREFIX_LEN..]));
    remaining_header[0] = (remaining_header[0] & 0xf0) | (remaining_header.len() / 4) as u8;

    let max_body_first = maximum_fragment_body_with_header_and_mtu(mtu, header_len)?;
    let max_body_remaining =
        maximum_fragment_body_with_header_and_mtu(mtu, remaining_header.len())?;

    let body_len = total_len - header_len;
    let first_take = max_body_first.min(body_len);
    // Each stride start, not just the end of the body, must fit the 13-bit
    // offset field once the base offset is added. An already-fragmented
    // datagram can carry a base that pushes a later stride past the limit
    // even though the body itself ends within it.
    let last_stride_start = if body_len > first_take {
        let tail = body_len - first_take;
        first_take + (tail - 1) / max_body_remaining * max_body_remaining
    } else {
        0
    };
    if base_offset_bytes + last_stride_start > MAX_FRAGMENT_OFFSET_BYTES {
        return Err(FragmentationError::BodyTooLong);
    }

    Ok(FragmentPlan {
        header_len,
        body_len,
        base_offset_bytes,
        original_mf,
        first_take,
        max_body_remaining,
        remaining_header,
    })
}

/// Splits `packet` into fragments no longer than `mtu`.
///
/// `packet` must be a finalized datagram whose length exceeds `mtu`; a
/// buffer without a parseable header is rejected. Transport checksums
/// must be final before the split; every fragment leaves with a freshly
/// computed header checksum, no offload requests, and no segmentation
/// state. Fragments come out in ascending offset order.
pub fn fragment(mut packet: PacketBuf, mtu: Mtu) -> Result<FragmentChain, FragmentationError> {
    let FragmentPlan {
        header_len,
        body_len,
        base_offset_bytes,
        original_mf,
        first_take,
        max_body_remaining,
        remaining_header,
    } = plan(&mut packet, mtu)?;

    let inherit_meta = |meta: &PacketMeta| PacketMeta {
        multicast: meta.multicast,
        broadcast: meta.broadcast,
        checksum_requests: ChecksumKinds::empty(),
        checksum_offload: ChecksumKinds::empty(),
        gso_segments: None,
    };

    let mut chain = FragmentChain::new();

    // Non-first fragments are assembled from the template header and a copy
    // of their body range before the original buffer is truncated into the
    // first fragment.
    let mut tail = Vec::new();
    let mut consumed = first_take;
    while consumed < body_len {
        let take = max_body_remaining.min(body_len - consumed);
        let last = consumed + take == body_len;

        let mut bytes = remaining_header.clone();
        packet.copy_range_into(header_len + consumed, take, &mut bytes);

        let offset = FragmentOffset::new_with_bytes(
            u16::try_from(base_offset_bytes + consumed).expect("offset bounds checked"),
        )
        .expect("offsets advance in 8-byte units");
        let mut header = Ipv4HeaderMut::parse(&mut bytes).expect("template header is valid");
        header.set_total_len((remaining_header.len() + take) as u16);
        header.set_fragment_offset(offset);
        header.set_mf_flag(!last || original_mf);
        header.compute_checksum();

        let mut fragment = PacketBuf::new(bytes);
        *fragment.meta_mut() = inherit_meta(packet.meta());
        tail.push(fragment);
        consumed += take;
    }

    // The original buffer becomes the first fragment.
    packet.truncate(header_len + first_take);
    let header_bytes = packet.pull_up(header_len).expect("validated header");
    let mut header = Ipv4HeaderMut::parse(header_bytes).expect("validated header");
    header.set_total_len((header_len + first_take) as u16);
    header.set_mf_flag(true);
    header.compute_checksum();
    let meta = inherit_meta(packet.meta());
    *packet.meta_mut() = meta;

    chain.push(packet);
    for fragment in tail {
        chain.push(fragment);
    }
    Ok(chain)
}

/// Counters kept by the pipeline pertaining to fragmentation.
#[derive(Default, Debug)]
pub struct FragmentationCounters {
    /// The number of datagrams requiring fragmentation on egress.
    pub fragmentation_required: Counter,
    /// The total number of fragments sent.
    pub fragments: Counter,
    /// The number of `MtuTooSmall` errors encountered.
    pub error_mtu_too_small: Counter,
    /// The number of `BodyTooLong` errors encountered.
    pub error_body_too_long: Counter,
    /// The number of `InvalidHeader` errors encountered.
    pub error_invalid_header: Counter,
}

impl FragmentationCounters {
    pub(crate) fn error_counter(&self, error: &FragmentationError) -> &Counter {
        match error {
            FragmentationError::MtuTooSmall => &self.error_mtu_too_small,
            FragmentationError::BodyTooLong => &self.error_body_too_long,
            FragmentationError::InvalidHeader => &self.error_invalid_header,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use net_types::ip::Ipv4Addr;
    use test_case::test_case;

    use crate::internal::ipv4::{verify_header_checksum, Ipv4HeaderBuilder};

    const TEST_MTU: Mtu = Mtu::new(1280);

    fn gen_body(len: usize) -> Vec<u8> {
        // Cycle bytes until 251 which is the largest prime that can fit in a
        // u8. Unlikely this aligns poorly and hides fragmentation bugs.
        (0u8..=251).cycle().take(len).collect::<Vec<u8>>()
    }

    fn new_datagram(options: &[u8], body: &[u8]) -> PacketBuf {
        let builder = Ipv4HeaderBuilder {
            id: 0x1234,
            ..Ipv4HeaderBuilder::new(
                Ipv4Addr::new([192, 0, 2, 1]),
                Ipv4Addr::new([192, 0, 2, 2]),
                1,
                17,
            )
        };
        let mut bytes = builder.serialize(options, body.len()).expect("serialize header");
        bytes.extend_from_slice(body);
        PacketBuf::new(bytes)
    }

    struct ParsedFragment {
        header_len: usize,
        total_len: usize,
        offset_bytes: usize,
        mf: bool,
        options: Vec<u8>,
        body: Vec<u8>,
    }

    fn parse_fragment(fragment: &PacketBuf) -> ParsedFragment {
        let mut bytes = fragment.duplicate().into_contiguous();
        let header_len = header_len_of(&bytes).expect("fragment header length");
        assert!(verify_header_checksum(&bytes[..header_len]));
        let header = Ipv4HeaderMut::parse(&mut bytes).expect("parse fragment");
        assert_eq!(header.id(), 0x1234);
        assert_eq!(header.ttl(), 1);
        assert_eq!(header.proto(), 17);
        let parsed = ParsedFragment {
            header_len: header.header_len(),
            total_len: header.total_len(),
            offset_bytes: header.fragment_offset().into_bytes() as usize,
            mf: header.mf_flag(),
            options: header.options().to_vec(),
            body: Vec::new(),
        };
        let body = bytes[parsed.header_len..].to_vec();
        assert_eq!(parsed.total_len, parsed.header_len + body.len());
        ParsedFragment { body, ..parsed }
    }

    /// Reassembles fragments and checks they tile the body contiguously.
    fn check_tiling(chain: &FragmentChain, expected_body: &[u8], trailing_mf: bool) {
        let mut reassembled = Vec::new();
        let mut last_mf = None;
        for fragment in chain.iter() {
            assert!(fragment.len() <= usize::from(TEST_MTU));
            let parsed = parse_fragment(fragment);
            assert_eq!(parsed.offset_bytes, reassembled.len());
            reassembled.extend_from_slice(&parsed.body);
            last_mf = Some(parsed.mf);
        }
        assert_eq!(reassembled, expected_body);
        assert_eq!(last_mf, Some(trailing_mf));
    }

    #[test_case(2000; "two fragments")]
    #[test_case(4000; "four fragments")]
    #[test_case(1281; "barely over")]
    fn fragments_tile_body(body_len: usize) {
        let body = gen_body(body_len);
        let chain = fragment(new_datagram(&[], &body), TEST_MTU).expect("fragment");
        assert!(chain.len() > 1);
        check_tiling(&chain, &body, false);

        // Every fragment but the last carries a full 8-byte-aligned stride.
        let sizes: Vec<_> = chain.iter().map(|f| parse_fragment(f).body.len()).collect();
        for size in &sizes[..sizes.len() - 1] {
            assert_eq!(size % 8, 0);
        }
    }

    #[test]
    fn only_copied_options_propagate() {
        // A copied 4-byte option followed by a non-copied 4-byte option.
        let options = &[0x87, 4, 0, 0, 0x07, 4, 0, 0];
        let body = gen_body(3000);
        let chain = fragment(new_datagram(options, &body), TEST_MTU).expect("fragment");
        let mut fragments = chain.iter();

        let first = parse_fragment(fragments.next().expect("first fragment"));
        assert_eq!(first.options, options);
        for fragment in fragments {
            assert_eq!(parse_fragment(fragment).options, &[0x87, 4, 0, 0]);
        }
        check_tiling(&chain, &body, false);
    }

    #[test]
    fn refragmenting_preserves_offset_base_and_trailing_mf() {
        let body = gen_body(2400);
        let mut packet = new_datagram(&[], &body);
        {
            let header_bytes = packet.pull_up(HDR_PREFIX_LEN).unwrap();
            let mut header = Ipv4HeaderMut::parse(header_bytes).unwrap();
            header.set_fragment_offset(FragmentOffset::new_with_bytes(1480).unwrap());
            header.set_mf_flag(true);
        }
        let chain = fragment(packet, TEST_MTU).expect("fragment");
        let first = parse_fragment(chain.iter().next().expect("first fragment"));
        assert_eq!(first.offset_bytes, 1480);
        // The datagram was itself a middle fragment, so the final piece
        // still promises more.
        let last = parse_fragment(chain.iter().last().expect("last fragment"));
        assert!(last.mf);
        let mut reassembled = Vec::new();
        for fragment in chain.iter() {
            reassembled.extend_from_slice(&parse_fragment(fragment).body);
        }
        assert_eq!(reassembled, body);
    }

    #[test]
    fn mtu_smaller_than_header_rejected() {
        let body = gen_body(256);
        assert_matches!(
            fragment(new_datagram(&[], &body), Mtu::new(24)),
            Err(FragmentationError::MtuTooSmall)
        );
        assert_matches!(
            fragment(new_datagram(&[], &body), Mtu::new(12)),
            Err(FragmentationError::MtuTooSmall)
        );
    }

    #[test]
    fn offset_overflow_rejected() {
        let body = gen_body(60000);
        let mut packet = new_datagram(&[], &body);
        {
            let header_bytes = packet.pull_up(HDR_PREFIX_LEN).unwrap();
            let mut header = Ipv4HeaderMut::parse(header_bytes).unwrap();
            header.set_fragment_offset(FragmentOffset::new(0x1f00).unwrap());
            header.set_mf_flag(true);
        }
        assert_matches!(fragment(packet, TEST_MTU), Err(FragmentationError::BodyTooLong));
    }

    #[test]
    fn stride_past_offset_limit_rejected() {
        let new_middle_fragment = |offset_units: u16| {
            let mut packet = new_datagram(&[], &gen_body(2950));
            let header_bytes = packet.pull_up(HDR_PREFIX_LEN).unwrap();
            let mut header = Ipv4HeaderMut::parse(header_bytes).unwrap();
            header.set_fragment_offset(FragmentOffset::new(offset_units).unwrap());
            header.set_mf_flag(true);
            packet
        };

        // The body ends inside the offset space, but the second stride
        // would start at byte 65536.
        assert_matches!(
            fragment(new_middle_fragment(8007), Mtu::new(1500)),
            Err(FragmentationError::BodyTooLong)
        );

        // One unit lower puts the final stride start at exactly the limit.
        let chain = fragment(new_middle_fragment(8006), Mtu::new(1500)).expect("fragment");
        let last = parse_fragment(chain.iter().last().expect("last fragment"));
        assert_eq!(last.offset_bytes, MAX_FRAGMENT_OFFSET_BYTES);
        assert!(last.mf);
    }

    #[test]
    fn headerless_buffer_rejected() {
        assert_matches!(
            fragment(PacketBuf::new(Vec::new()), Mtu::new(1500)),
            Err(FragmentationError::InvalidHeader)
        );
        assert_matches!(
            fragment(PacketBuf::new(vec![0u8; 12]), Mtu::new(1500)),
            Err(FragmentationError::InvalidHeader)
        );
    }

    #[test]
    fn fragment_meta_inherited_and_offload_cleared() {
        let body = gen_body(2000);
        let mut packet = new_datagram(&[], &body);
        {
            let meta = packet.meta_mut();
            meta.multicast = true;
            meta.checksum_offload = ChecksumKinds::IPV4_HEADER;
            meta.gso_segments = core::num::NonZeroU16::new(3);
        }
        let chain = fragment(packet, TEST_MTU).expect("fragment");
        for fragment in chain.iter() {
            let meta = fragment.meta();
            assert!(meta.multicast);
            assert!(!meta.broadcast);
            assert_eq!(meta.checksum_offload, ChecksumKinds::empty());
            assert_eq!(meta.gso_segments, None);
        }
    }
}
