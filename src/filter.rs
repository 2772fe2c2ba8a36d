// Copyright 2025 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Hook seams the egress pipeline calls into.
//!
//! Both hooks take the datagram by value; a hook that keeps it has
//! consumed it and the pipeline reports success to the caller. The unit
//! type implements both traits as the no-op used when a stack is built
//! without filtering or a security policy.

use crate::internal::buffer::PacketBuf;
use crate::internal::device::Device;

/// The traversal direction presented to a [`FilterHook`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FilterDirection {
    /// Leaving the stack towards `device`.
    Egress,
    /// Entering the stack from `device`.
    Ingress,
}

/// A packet filter invoked once per datagram before transmission.
pub trait FilterHook<D: Device> {
    /// Runs the filter. Returning `None` drops the datagram.
    ///
    /// The returned buffer may be a modified replacement; the pipeline
    /// re-validates the header after this call. The replacement must keep
    /// the destination address, as the route was resolved before the hook
    /// ran; a send whose destination changed fails with
    /// `InvalidArgument`.
    fn run(&self, packet: PacketBuf, device: &D, direction: FilterDirection)
        -> Option<PacketBuf>;
}

impl<D: Device> FilterHook<D> for () {
    fn run(
        &self,
        packet: PacketBuf,
        _device: &D,
        _direction: FilterDirection,
    ) -> Option<PacketBuf> {
        Some(packet)
    }
}

/// What a [`SecurityPolicy`] did with a datagram.
#[derive(Debug)]
pub enum PolicyOutcome {
    /// The datagram passed through untouched.
    Unchanged(PacketBuf),
    /// The policy substituted a transformed datagram. The replacement
    /// must keep the destination address; an encapsulation that changes
    /// it belongs behind [`PolicyOutcome::Deferred`].
    Replaced(PacketBuf),
    /// The policy discarded the datagram.
    Dropped,
    /// The policy took ownership for deferred processing; the send is
    /// complete from the caller's point of view.
    Deferred,
}

/// A policy decision together with its fragmentation interaction.
#[derive(Debug)]
pub struct PolicyDecision {
    /// What happened to the datagram.
    pub outcome: PolicyOutcome,
    /// Whether fragments produced later from this datagram must each be
    /// presented to the policy again before transmission.
    pub reinject_after_fragmentation: bool,
}

/// A transform applied to every datagram before the egress filter.
pub trait SecurityPolicy<D: Device> {
    /// Examines and possibly transforms `packet` bound for `device`.
    fn transform(&self, packet: PacketBuf, device: &D) -> PolicyDecision;
}

impl<D: Device> SecurityPolicy<D> for () {
    fn transform(&self, packet: PacketBuf, _device: &D) -> PolicyDecision {
        PolicyDecision {
            outcome: PolicyOutcome::Unchanged(packet),
            reinject_after_fragmentation: false,
        }
    }
}
