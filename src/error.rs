// Copyright 2025 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Common error types for the egress pipeline.

use thiserror::Error;

use crate::internal::base::Mtu;

/// The error taxonomy surfaced by [`OutputPipeline::send`] and the socket
/// option handlers.
///
/// All variants are recoverable at the call site; the pipeline performs no
/// retries and leaves no partial work observable when returning an error.
///
/// [`OutputPipeline::send`]: crate::OutputPipeline::send
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IpError {
    /// No route to the destination.
    #[error("no route to destination")]
    NoRoute,

    /// The route to the destination rejects the host.
    #[error("host unreachable")]
    HostUnreachable,

    /// The route to the destination rejects the network.
    #[error("network unreachable")]
    NetworkUnreachable,

    /// The source address or interface binding is invalid.
    #[error("address unavailable")]
    AddressUnavailable,

    /// A multicast operation was given a non-multicast group address.
    #[error("address not in multicast range")]
    AddressNotInMulticastRange,

    /// The (interface, group) membership already exists.
    #[error("address in use")]
    AddressInUse,

    /// The membership table is at capacity.
    #[error("too many references")]
    TooManyReferences,

    /// The datagram exceeds the path MTU and don't-fragment is set.
    ///
    /// Carries the discovered MTU back to the caller for path MTU discovery.
    #[error("message too large for path MTU {mtu}")]
    MessageTooLarge {
        /// The egress path MTU the datagram exceeded.
        mtu: Mtu,
    },

    /// Malformed options or an out-of-range socket option value.
    #[error("invalid argument")]
    InvalidArgument,

    /// Broadcast transmission was not permitted by the caller's flags.
    #[error("permission denied")]
    PermissionDenied,

    /// Buffer allocation or transmit queue admission failed.
    #[error("resource exhausted")]
    ResourceExhausted,

    /// A link-layer transmit failure not otherwise classified.
    #[error("i/o error")]
    Io,
}
