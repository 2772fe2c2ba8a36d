// Copyright 2025 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Route resolution and the per-socket route cache.
//!
//! The routing table itself lives outside this crate; the pipeline consumes
//! it through [`RouteTable`]. Staleness is detected with a generation
//! check rather than locking on the hot path: a cached route is reused only
//! while the table's generation matches the one observed at resolution and
//! its egress interface is still up.

use derivative::Derivative;
use net_types::ip::Ipv4Addr;
use net_types::SpecifiedAddr;
use thiserror::Error;

use crate::internal::base::Mtu;
use crate::internal::device::Device;
use crate::internal::error::IpError;

/// The routing table's modification epoch.
///
/// Any table mutation bumps the generation, invalidating every cached
/// route resolved under an older one.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RouteGeneration(pub u64);

/// Errors resolving a route to a destination.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ResolveRouteError {
    /// No table entry covers the destination.
    #[error("destination unreachable")]
    Unreachable,
    /// The covering entry rejects the host.
    #[error("route rejects host")]
    RejectHost,
    /// The covering entry rejects the network.
    #[error("route rejects network")]
    RejectNetwork,
}

impl From<ResolveRouteError> for IpError {
    fn from(err: ResolveRouteError) -> Self {
        match err {
            ResolveRouteError::Unreachable => IpError::NoRoute,
            ResolveRouteError::RejectHost => IpError::HostUnreachable,
            ResolveRouteError::RejectNetwork => IpError::NetworkUnreachable,
        }
    }
}

/// A resolved route: the egress interface, the optional gateway, and the
/// cached path MTU if the table learned one smaller than the interface's.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRoute<D> {
    /// The egress interface.
    pub device: D,
    /// The next-hop gateway; `None` for an on-link destination.
    pub next_hop: Option<SpecifiedAddr<Ipv4Addr>>,
    /// A path MTU learned for this route, if smaller than the interface
    /// MTU.
    pub path_mtu: Option<Mtu>,
}

impl<D: Device> ResolvedRoute<D> {
    /// The effective path MTU: the learned one, else the interface's.
    pub fn mtu(&self) -> Mtu {
        self.path_mtu.unwrap_or_else(|| self.device.mtu())
    }

    /// The address the link layer should resolve: the gateway if present,
    /// else the destination itself.
    pub fn link_destination(&self, dst: SpecifiedAddr<Ipv4Addr>) -> SpecifiedAddr<Ipv4Addr> {
        self.next_hop.unwrap_or(dst)
    }
}

/// The injected routing/interface table service.
///
/// `lookup` performs resolution only; reference accounting is explicit via
/// `acquire`/`release` so [`RouteGuard`] can pair them structurally, and
/// so a cached route can be re-acquired without a fresh lookup. `lookup`
/// also increments the route's use counter.
pub trait RouteTable {
    /// The device type returned in resolved routes.
    type Dev: Device;

    /// Resolves a route to `dst`.
    fn lookup(&self, dst: SpecifiedAddr<Ipv4Addr>)
        -> Result<ResolvedRoute<Self::Dev>, ResolveRouteError>;

    /// Notes a new holder of `route`.
    fn acquire(&self, route: &ResolvedRoute<Self::Dev>);

    /// Releases a reference taken with [`RouteTable::acquire`].
    fn release(&self, route: &ResolvedRoute<Self::Dev>);

    /// The table's current modification epoch.
    fn generation(&self) -> RouteGeneration;

    /// Finds the interface with the given index.
    fn device_by_index(&self, index: u32) -> Option<Self::Dev>;

    /// Finds the interface owning the given local address.
    fn device_with_local_addr(&self, addr: SpecifiedAddr<Ipv4Addr>) -> Option<Self::Dev>;

    /// Finds an interface whose attached subnet contains `dst`, for
    /// route-to-interface-only resolution.
    fn on_link_device(&self, dst: SpecifiedAddr<Ipv4Addr>) -> Option<Self::Dev>;
}

#[derive(Debug, Clone, PartialEq)]
struct CachedRoute<D> {
    dst: SpecifiedAddr<Ipv4Addr>,
    route: ResolvedRoute<D>,
    generation: RouteGeneration,
}

/// A per-destination route cache, typically embedded in a connection's
/// control block.
///
/// The cache stores the last resolution as a hint; every send re-acquires
/// a scoped reference through [`RouteGuard`], so cache hits and misses
/// follow the same acquire/release discipline.
#[derive(Derivative)]
#[derivative(Debug(bound = "D: core::fmt::Debug"), Default(bound = ""))]
pub struct RouteCache<D> {
    cached: Option<CachedRoute<D>>,
}

impl<D: Device> RouteCache<D> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self { cached: None }
    }

    /// Drops any cached resolution.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// Returns the cached route for `dst` if it is still valid under
    /// `table`'s current generation, discarding it otherwise.
    fn valid_for<R: RouteTable<Dev = D>>(
        &mut self,
        table: &R,
        dst: SpecifiedAddr<Ipv4Addr>,
    ) -> Option<ResolvedRoute<D>> {
        let CachedRoute { dst: cached_dst, route, generation } = self.cached.as_ref()?;
        let stale = *cached_dst != dst
            || *generation != table.generation()
            || !route.device.is_up();
        if stale {
            self.cached = None;
            return None;
        }
        Some(route.clone())
    }

    /// Resolves a route to `dst`, reusing the cached resolution when it is
    /// fresh, and returns it wrapped in a scoped guard.
    pub fn resolve<'a, R: RouteTable<Dev = D>>(
        &mut self,
        table: &'a R,
        dst: SpecifiedAddr<Ipv4Addr>,
    ) -> Result<RouteGuard<'a, R>, ResolveRouteError> {
        if let Some(route) = self.valid_for(table, dst) {
            return Ok(RouteGuard::new(table, route));
        }
        let generation = table.generation();
        let route = table.lookup(dst)?;
        self.cached = Some(CachedRoute { dst, route: route.clone(), generation });
        Ok(RouteGuard::new(table, route))
    }
}

/// A scoped route reference, released against the table on drop.
///
/// Holding the release in a destructor means every control-flow exit of a
/// send, including error paths, performs exactly one release per acquire.
pub struct RouteGuard<'a, R: RouteTable> {
    table: &'a R,
    route: ResolvedRoute<R::Dev>,
}

impl<'a, R: RouteTable> RouteGuard<'a, R> {
    fn new(table: &'a R, route: ResolvedRoute<R::Dev>) -> Self {
        table.acquire(&route);
        Self { table, route }
    }

    /// The resolved route.
    pub fn route(&self) -> &ResolvedRoute<R::Dev> {
        &self.route
    }
}

impl<'a, R: RouteTable> Drop for RouteGuard<'a, R> {
    fn drop(&mut self) {
        self.table.release(&self.route);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::internal::testutil::{FakeDevice, FakeRouteTable};

    const DST: [u8; 4] = [198, 51, 100, 7];

    fn dst() -> SpecifiedAddr<Ipv4Addr> {
        SpecifiedAddr::new(Ipv4Addr::new(DST)).unwrap()
    }

    #[test]
    fn cache_reuses_until_generation_bump() {
        let device = FakeDevice::new_ethernet();
        let table = FakeRouteTable::with_default_route(device.clone());
        let mut cache = RouteCache::new();

        let guard = cache.resolve(&table, dst()).expect("resolve");
        assert_eq!(guard.route().device, device);
        drop(guard);
        assert_eq!(table.lookups(), 1);

        // A second resolve hits the cache; no new lookup.
        drop(cache.resolve(&table, dst()).expect("resolve"));
        assert_eq!(table.lookups(), 1);

        // Bumping the table generation forces re-resolution.
        table.bump_generation();
        drop(cache.resolve(&table, dst()).expect("resolve"));
        assert_eq!(table.lookups(), 2);

        assert_eq!(table.route_acquires(), 3);
        assert_eq!(table.route_releases(), 3);
    }

    #[test]
    fn cache_invalidated_by_destination_change() {
        let device = FakeDevice::new_ethernet();
        let table = FakeRouteTable::with_default_route(device.clone());
        let mut cache = RouteCache::new();

        drop(cache.resolve(&table, dst()).expect("resolve"));
        let other = SpecifiedAddr::new(Ipv4Addr::new([198, 51, 100, 8])).unwrap();
        drop(cache.resolve(&table, other).expect("resolve"));
        assert_eq!(table.lookups(), 2);
    }

    #[test]
    fn cache_invalidated_by_interface_teardown() {
        let device = FakeDevice::new_ethernet();
        let table = FakeRouteTable::with_default_route(device.clone());
        let mut cache = RouteCache::new();

        drop(cache.resolve(&table, dst()).expect("resolve"));
        device.set_down();
        // The cached route's interface is mid-teardown; resolution must go
        // back to the table.
        drop(cache.resolve(&table, dst()).expect("resolve"));
        assert_eq!(table.lookups(), 2);
    }
}
