//! Adjacency End.X SID management.
//!
//! Tracks the End.X SIDs this node binds to its link-state
//! adjacencies. SIDs are allocated from the area's first locator
//! chunk when an adjacency first has an IPv6 address, and torn down
//! on adjacency loss or locator release. SIDs reference their chunk
//! and adjacency through stable identifiers, never pointers.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv6Addr;

use tracing::debug;

use crate::behavior::Behavior;
use crate::error::{Error, Result};
use crate::local_sid::LocalSid;
use crate::locator::{ChunkId, LocatorRegistry, SidOwner};
use crate::sid::{SidStructure, transpose};

/// Circuit type of an adjacency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitType {
    /// Point-to-point link.
    PointToPoint,
    /// Broadcast LAN.
    Broadcast,
}

/// Stable adjacency identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AdjacencyId(pub u64);

/// A link-state adjacency, as far as SID management cares.
#[derive(Debug, Clone)]
pub struct Adjacency {
    /// Stable identifier.
    pub id: AdjacencyId,
    /// Interface the adjacency runs on.
    pub ifname: String,
    /// Interface index.
    pub ifindex: u32,
    /// Circuit type; selects the point-to-point or LAN End.X variant.
    pub circuit: CircuitType,
    /// Neighbor IPv6 link-local address, once known.
    pub neighbor: Option<Ipv6Addr>,
}

/// An End.X SID bound to one adjacency.
#[derive(Debug, Clone)]
pub struct AdjSid {
    /// The installable descriptor (behavior End.X or uA).
    pub sid: LocalSid,
    /// Owning adjacency.
    pub adjacency: AdjacencyId,
    /// Chunk the address was carved from.
    pub chunk: ChunkId,
    /// Backup (TI-LFA) discriminator; this node allocates primaries.
    pub backup: bool,
}

/// Search the function-bit index space for the first free SID.
///
/// Indices run from 1 up to but excluding `2^function_len - 1`: index
/// zero is the locator node SID itself and the all-ones index is
/// reserved. Deterministic first-fit given the occupied set.
pub fn auto_index_alloc(
    base: Ipv6Addr,
    structure: &SidStructure,
    in_use: impl Fn(Ipv6Addr) -> bool,
) -> Result<(u32, Ipv6Addr)> {
    let offset = structure.function_offset();
    let func_len = structure.function_len;
    let top = if func_len >= 32 {
        u32::MAX
    } else {
        (1u32 << func_len) - 1
    };

    for index in 1..top {
        let candidate = transpose(base, index, offset, func_len)?;
        if !in_use(candidate) {
            return Ok((index, candidate));
        }
    }
    Err(Error::config(format!(
        "function space of {}/{} bits exhausted",
        base, func_len
    )))
}

/// Compose the SID for an operator-specified index. Fails if the
/// resulting address is already in use or the index does not fit the
/// function field.
pub fn index_alloc(
    base: Ipv6Addr,
    structure: &SidStructure,
    index: u32,
    in_use: impl Fn(Ipv6Addr) -> bool,
) -> Result<Ipv6Addr> {
    let func_len = structure.function_len;
    if func_len < 32 && index >= (1u32 << func_len) {
        return Err(Error::config(format!(
            "index {} does not fit a {}-bit function field",
            index, func_len
        )));
    }
    let sid = transpose(base, index, structure.function_offset(), func_len)?;
    if in_use(sid) {
        return Err(Error::config(format!("SID {} is already in use", sid)));
    }
    Ok(sid)
}

/// Per-area catalogue of adjacencies and their End.X SIDs.
#[derive(Debug, Default)]
pub struct AdjSidManager {
    adjacencies: BTreeMap<AdjacencyId, Adjacency>,
    sids: Vec<AdjSid>,
}

impl AdjSidManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh adjacency. Nothing is allocated until IPv6
    /// addresses are known.
    pub fn adj_up(&mut self, adj: Adjacency) {
        debug!(adj = adj.id.0, ifname = %adj.ifname, "adjacency up");
        self.adjacencies.insert(adj.id, adj);
    }

    /// Look up an adjacency.
    pub fn adjacency(&self, id: AdjacencyId) -> Option<&Adjacency> {
        self.adjacencies.get(&id)
    }

    /// The adjacency learned its neighbor's IPv6 link-local address:
    /// allocate one End.X SID from the area's first chunk and bind
    /// it. `extra_in_use` carries the declared-SID addresses of the
    /// area so allocation avoids them.
    ///
    /// Returns the new SID descriptor, or `None` if the adjacency
    /// already carries one.
    pub fn adj_ipv6_enabled(
        &mut self,
        id: AdjacencyId,
        neighbor: Ipv6Addr,
        registry: &LocatorRegistry,
        extra_in_use: &BTreeSet<Ipv6Addr>,
    ) -> Result<Option<&AdjSid>> {
        let adj = self
            .adjacencies
            .get_mut(&id)
            .ok_or_else(|| Error::Internal(format!("IPv6 event for unknown adjacency {}", id.0)))?;
        adj.neighbor = Some(neighbor);

        if self.sids.iter().any(|s| s.adjacency == id && !s.backup) {
            return Ok(None);
        }

        let chunk = registry
            .first_chunk(SidOwner::Isis)
            .ok_or_else(|| Error::config("no locator chunk allocated to IS-IS"))?;
        let locator = registry
            .get(&chunk.locator)
            .ok_or_else(|| Error::Internal(format!("chunk of vanished locator {}", chunk.locator)))?;

        let occupied: BTreeSet<Ipv6Addr> = self.sids.iter().map(|s| s.sid.addr).collect();
        let (index, addr) = auto_index_alloc(chunk.prefix, &locator.structure, |a| {
            occupied.contains(&a) || extra_in_use.contains(&a)
        })?;

        let adj = &self.adjacencies[&id];
        let behavior = if locator.usid {
            Behavior::UA
        } else {
            Behavior::EndX
        };
        let mut sid = LocalSid::new(addr, behavior);
        sid.nexthop = Some(neighbor);
        sid.ifname = Some(adj.ifname.clone());
        sid.structure = Some(locator.structure);

        debug!(adj = id.0, sid = %addr, index, "End.X SID allocated");
        self.sids.push(AdjSid {
            sid,
            adjacency: id,
            chunk: chunk.id(),
            backup: false,
        });
        Ok(self.sids.last())
    }

    /// Tear down every End.X SID on an adjacency and forget it.
    /// Returns the removed SIDs so the caller can withdraw each one.
    pub fn adj_down(&mut self, id: AdjacencyId) -> Vec<AdjSid> {
        self.adjacencies.remove(&id);
        self.take_sids(|s| s.adjacency == id)
    }

    /// The adjacency lost its IPv6 addresses but stays up: tear down
    /// its SIDs only.
    pub fn adj_ipv6_disabled(&mut self, id: AdjacencyId) -> Vec<AdjSid> {
        if let Some(adj) = self.adjacencies.get_mut(&id) {
            adj.neighbor = None;
        }
        self.take_sids(|s| s.adjacency == id)
    }

    /// A locator chunk is being released: tear down every SID carved
    /// from it first. Returns the removed SIDs.
    pub fn release_chunk(&mut self, chunk: &ChunkId) -> Vec<AdjSid> {
        self.take_sids(|s| &s.chunk == chunk)
    }

    fn take_sids(&mut self, mut pred: impl FnMut(&AdjSid) -> bool) -> Vec<AdjSid> {
        let mut removed = Vec::new();
        let mut i = 0;
        while i < self.sids.len() {
            if pred(&self.sids[i]) {
                removed.push(self.sids.remove(i));
            } else {
                i += 1;
            }
        }
        for sid in &removed {
            debug!(sid = %sid.sid.addr, adj = sid.adjacency.0, "End.X SID released");
        }
        removed
    }

    /// Addresses currently held by the area's End.X SIDs.
    pub fn occupied(&self) -> BTreeSet<Ipv6Addr> {
        self.sids.iter().map(|s| s.sid.addr).collect()
    }

    /// Iterate the area End.X list.
    pub fn iter(&self) -> impl Iterator<Item = &AdjSid> {
        self.sids.iter()
    }

    /// Iterate mutably, for installation sync.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut AdjSid> {
        self.sids.iter_mut()
    }

    /// End.X SIDs of one adjacency.
    pub fn sids_of(&self, id: AdjacencyId) -> impl Iterator<Item = &AdjSid> {
        self.sids.iter().filter(move |s| s.adjacency == id)
    }

    /// Number of live End.X SIDs.
    pub fn len(&self) -> usize {
        self.sids.len()
    }

    /// Whether the area has no End.X SIDs.
    pub fn is_empty(&self) -> bool {
        self.sids.is_empty()
    }
}
