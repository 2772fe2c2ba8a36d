// Copyright 2025 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Owned packet buffers.
//!
//! A [`PacketBuf`] is an owned, possibly multi-segment byte buffer with
//! attached transmit metadata. Ownership moves with the value: the caller
//! hands the buffer to the pipeline, which hands it to the link layer or
//! drops it. There is no sharing and no `Clone`; the one deliberate copy
//! point is [`PacketBuf::duplicate`], used for multicast loopback.

use core::num::NonZeroU16;

use crate::internal::checksum::ChecksumKinds;

/// Transmit metadata attached to a [`PacketBuf`].
#[derive(Debug, Default, PartialEq)]
pub struct PacketMeta {
    /// The datagram is destined to a multicast group.
    pub multicast: bool,
    /// The datagram is destined to a broadcast address.
    pub broadcast: bool,
    /// Transport checksum kinds the caller wants finalized on transmit.
    pub checksum_requests: ChecksumKinds,
    /// Checksum kinds left for the interface to compute in hardware.
    pub checksum_offload: ChecksumKinds,
    /// Segment count for segmentation-offloaded datagrams.
    pub gso_segments: Option<NonZeroU16>,
}

/// An owned, possibly multi-segment packet buffer.
#[derive(Debug, Default, PartialEq)]
pub struct PacketBuf {
    segments: Vec<Vec<u8>>,
    meta: PacketMeta,
}

impl PacketBuf {
    /// Creates a single-segment buffer from `bytes`.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { segments: vec![bytes], meta: PacketMeta::default() }
    }

    /// Creates a buffer from an ordered list of segments.
    ///
    /// Empty segments are permitted and contribute no bytes.
    pub fn from_segments(segments: Vec<Vec<u8>>) -> Self {
        Self { segments, meta: PacketMeta::default() }
    }

    /// Total byte length across all segments.
    pub fn len(&self) -> usize {
        self.segments.iter().map(Vec::len).sum()
    }

    /// Returns true if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The transmit metadata.
    pub fn meta(&self) -> &PacketMeta {
        &self.meta
    }

    /// Mutable access to the transmit metadata.
    pub fn meta_mut(&mut self) -> &mut PacketMeta {
        &mut self.meta
    }

    /// Ensures the first `n` bytes are contiguous in the first segment,
    /// merging segments as needed.
    ///
    /// Returns `None` if the buffer holds fewer than `n` bytes.
    pub fn pull_up(&mut self, n: usize) -> Option<&mut [u8]> {
        if self.len() < n {
            return None;
        }
        while self.segments.first().map_or(0, Vec::len) < n {
            // Merge the second segment into the first; empty leading
            // segments collapse on the way.
            let second = self.segments.remove(1);
            self.segments[0].extend_from_slice(&second);
        }
        Some(&mut self.segments[0][..n])
    }

    /// A view of the first segment.
    pub(crate) fn first_segment(&self) -> &[u8] {
        self.segments.first().map_or(&[], Vec::as_slice)
    }

    /// Copies `len` bytes starting at absolute offset `start` into `out`.
    ///
    /// # Panics
    ///
    /// Panics if the range extends past the end of the buffer.
    pub(crate) fn copy_range_into(&self, start: usize, len: usize, out: &mut Vec<u8>) {
        let mut skip = start;
        let mut remaining = len;
        for segment in &self.segments {
            if remaining == 0 {
                break;
            }
            if skip >= segment.len() {
                skip -= segment.len();
                continue;
            }
            let take = (segment.len() - skip).min(remaining);
            out.extend_from_slice(&segment[skip..skip + take]);
            skip = 0;
            remaining -= take;
        }
        assert_eq!(remaining, 0, "copy range extends past end of buffer");
    }

    /// Shortens the buffer to `len` bytes, dropping trailing segments and
    /// bytes.
    pub(crate) fn truncate(&mut self, len: usize) {
        let mut kept = 0;
        self.segments.retain_mut(|segment| {
            if kept >= len {
                return false;
            }
            let take = segment.len().min(len - kept);
            segment.truncate(take);
            kept += take;
            true
        });
    }

    /// Deep-copies the buffer's bytes and metadata.
    ///
    /// This is the single sanctioned copy point, used to build the loopback
    /// copy of a multicast datagram.
    pub(crate) fn duplicate(&self) -> PacketBuf {
        let PacketMeta { multicast, broadcast, checksum_requests, checksum_offload, gso_segments } =
            self.meta;
        PacketBuf {
            segments: self.segments.clone(),
            meta: PacketMeta {
                multicast,
                broadcast,
                checksum_requests,
                checksum_offload,
                gso_segments,
            },
        }
    }

    /// Flattens the buffer into one contiguous byte vector, consuming it.
    pub fn into_contiguous(self) -> Vec<u8> {
        let Self { mut segments, meta: _ } = self;
        if segments.len() == 1 {
            return segments.pop().unwrap_or_default();
        }
        let mut out = Vec::with_capacity(segments.iter().map(Vec::len).sum());
        for segment in segments {
            out.extend_from_slice(&segment);
        }
        out
    }
}

/// An owned sequence of fragments in strictly ascending offset order.
///
/// Move-only: the chain is transmitted whole or dropped whole, never
/// partially shared.
#[derive(Debug, Default)]
pub struct FragmentChain(Vec<PacketBuf>);

impl FragmentChain {
    pub(crate) fn new() -> Self {
        Self(Vec::new())
    }

    pub(crate) fn push(&mut self, fragment: PacketBuf) {
        let Self(fragments) = self;
        fragments.push(fragment);
    }

    /// The number of fragments in the chain.
    pub fn len(&self) -> usize {
        let Self(fragments) = self;
        fragments.len()
    }

    /// Returns true if the chain holds no fragments.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over the fragments without giving up ownership.
    pub fn iter(&self) -> impl Iterator<Item = &PacketBuf> {
        let Self(fragments) = self;
        fragments.iter()
    }
}

impl IntoIterator for FragmentChain {
    type Item = PacketBuf;
    type IntoIter = std::vec::IntoIter<PacketBuf>;

    fn into_iter(self) -> Self::IntoIter {
        let Self(fragments) = self;
        fragments.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_up_merges_segments() {
        let mut buf =
            PacketBuf::from_segments(vec![vec![1, 2], vec![3, 4, 5], vec![6, 7, 8, 9, 10]]);
        assert_eq!(buf.pull_up(4).map(|b| b.to_vec()), Some(vec![1, 2, 3, 4]));
        assert_eq!(buf.first_segment(), &[1, 2, 3, 4, 5]);
        assert_eq!(buf.len(), 10);
        assert_eq!(buf.pull_up(11), None);
    }

    #[test]
    fn copy_range_spans_segments() {
        let buf = PacketBuf::from_segments(vec![vec![1, 2, 3], vec![], vec![4, 5], vec![6]]);
        let mut out = Vec::new();
        buf.copy_range_into(2, 3, &mut out);
        assert_eq!(out, vec![3, 4, 5]);
    }

    #[test]
    fn truncate_drops_trailing_segments() {
        let mut buf = PacketBuf::from_segments(vec![vec![1, 2, 3], vec![4, 5], vec![6]]);
        buf.truncate(4);
        assert_eq!(buf.len(), 4);
        let mut out = Vec::new();
        buf.copy_range_into(0, 4, &mut out);
        assert_eq!(out, vec![1, 2, 3, 4]);
    }
}
