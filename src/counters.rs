// Copyright 2025 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Egress statistics.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::internal::fragmentation::FragmentationCounters;

/// An atomic counter for packet statistics.
///
/// Values are incremented and read with relaxed ordering; counters carry no
/// synchronization meaning.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub(crate) fn increment(&self) {
        let Self(v) = self;
        let _: u64 = v.fetch_add(1, Ordering::Relaxed);
    }

    /// Atomically retrieves the counter value.
    pub fn get(&self) -> u64 {
        let Self(v) = self;
        v.load(Ordering::Relaxed)
    }
}

/// Counters kept by the egress pipeline.
#[derive(Default, Debug)]
pub struct IpCounters {
    /// The number of datagrams handed to the link layer (fragments count
    /// individually).
    pub tx_sent: Counter,
    /// The number of datagrams copied back through the local input path for
    /// multicast loopback.
    pub tx_loopback_copies: Counter,
    /// Datagrams silently dropped because the source address is in the
    /// duplicated state.
    pub tx_dropped_duplicate_addr: Counter,
    /// Datagrams consumed by the security policy hook.
    pub tx_policy_drop: Counter,
    /// Datagrams deferred to the security policy engine.
    pub tx_policy_deferred: Counter,
    /// Datagrams consumed by the filter chain.
    pub tx_filter_drop: Counter,
    /// Sends that failed route resolution.
    pub tx_no_route: Counter,
    /// Broadcast sends refused for missing capability or permission.
    pub tx_broadcast_denied: Counter,
    /// Sends rejected with `MessageTooLarge` because don't-fragment was set.
    pub tx_mtu_exceeded: Counter,
    /// Sends or fragment chains dropped at transmit queue admission.
    pub tx_queue_full: Counter,
    /// Link-layer transmit failures.
    pub tx_device_errors: Counter,
    /// Fragmentation statistics.
    pub fragmentation: FragmentationCounters,
}
