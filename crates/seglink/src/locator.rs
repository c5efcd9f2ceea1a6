//! SRv6 locator registry.
//!
//! A locator is a named IPv6 prefix from which SIDs are allocated.
//! Protocol clients receive the locator as a chunk; every owner gets
//! the identical whole-prefix chunk and is expected to carve a
//! disjoint function range out of it.

use std::collections::BTreeMap;
use std::net::Ipv6Addr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sid::SidStructure;

/// Protocol identifier owning a chunk. Zero means free.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum SidOwner {
    /// No owner.
    #[default]
    None = 0,
    /// Static configuration.
    Static = 1,
    /// IS-IS.
    Isis = 2,
    /// BGP.
    Bgp = 3,
}

/// Stable identifier of a chunk: SIDs reference chunks through this,
/// never through pointers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkId {
    /// Name of the owning locator.
    pub locator: String,
    /// Protocol the chunk was handed to.
    pub owner: SidOwner,
}

/// A sub-prefix of a locator handed out to one protocol client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Chunk prefix.
    pub prefix: Ipv6Addr,
    /// Chunk prefix length in bits.
    pub prefix_len: u8,
    /// Owning protocol, `SidOwner::None` when free.
    pub owner: SidOwner,
    /// Name of the locator this chunk was carved from.
    pub locator: String,
}

impl Chunk {
    /// Stable identifier for this chunk.
    pub fn id(&self) -> ChunkId {
        ChunkId {
            locator: self.locator.clone(),
            owner: self.owner,
        }
    }
}

/// Administrative status of a locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LocatorStatus {
    /// Usable for allocation and advertisement.
    #[default]
    Up,
    /// Present in configuration but withdrawn.
    Down,
}

/// Declared form of a locator, as it appears in daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorDef {
    /// Locator name, unique within an area.
    pub name: String,
    /// Locator prefix.
    pub prefix: Ipv6Addr,
    /// Prefix length in bits.
    pub prefix_len: u8,
    /// Bit-field structure of SIDs allocated from this locator.
    #[serde(flatten)]
    pub structure: SidStructure,
    /// Whether SIDs from this locator use the compressed (uSID) form.
    #[serde(default)]
    pub usid: bool,
}

/// A named locator with its outstanding chunks.
#[derive(Debug, Clone)]
pub struct Locator {
    /// Locator name.
    pub name: String,
    /// Locator prefix.
    pub prefix: Ipv6Addr,
    /// Prefix length in bits.
    pub prefix_len: u8,
    /// SID bit-field structure.
    pub structure: SidStructure,
    /// Compressed-SID locator.
    pub usid: bool,
    /// Administrative status.
    pub status: LocatorStatus,
    /// Outstanding chunks, in hand-out order.
    pub chunks: Vec<Chunk>,
}

impl Locator {
    fn from_def(def: &LocatorDef) -> Self {
        Self {
            name: def.name.clone(),
            prefix: def.prefix,
            prefix_len: def.prefix_len,
            structure: def.structure,
            usid: def.usid,
            status: LocatorStatus::Up,
            chunks: Vec::new(),
        }
    }

    fn matches_def(&self, def: &LocatorDef) -> bool {
        self.prefix == def.prefix
            && self.prefix_len == def.prefix_len
            && self.structure == def.structure
            && self.usid == def.usid
    }

    /// Chunk outstanding for `owner`, if any.
    pub fn chunk_for(&self, owner: SidOwner) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.owner == owner)
    }
}

/// Outcome of [`LocatorRegistry::create`].
#[derive(Debug)]
pub enum LocatorCreate {
    /// A new locator was registered.
    Created,
    /// An identical locator already existed; nothing changed.
    Unchanged,
    /// The parameters changed: the old locator was deleted first and
    /// these chunks were released. The caller must tear down every
    /// SID sourced from them before using the new locator.
    Recreated(Vec<Chunk>),
}

/// Per-area catalogue of locators.
#[derive(Debug, Default)]
pub struct LocatorRegistry {
    locators: BTreeMap<String, Locator>,
}

impl LocatorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a locator.
    ///
    /// Constraints: `block_len + node_len` must equal the prefix
    /// length, `function_len >= 1`, and the four field lengths must
    /// fit in 128 bits. Re-creating an identical locator is a no-op;
    /// re-creating with different parameters behaves as
    /// delete-then-recreate and reports the released chunks.
    pub fn create(&mut self, def: &LocatorDef) -> Result<LocatorCreate> {
        let s = &def.structure;
        if s.total_len() > 128 {
            return Err(Error::config(format!(
                "locator {}: SID structure exceeds 128 bits",
                def.name
            )));
        }
        if s.block_len as u16 + s.node_len as u16 != def.prefix_len as u16 {
            return Err(Error::config(format!(
                "locator {}: block ({}) + node ({}) must equal prefix length {}",
                def.name, s.block_len, s.node_len, def.prefix_len
            )));
        }
        if s.function_len == 0 {
            return Err(Error::config(format!(
                "locator {}: function length must be at least 1",
                def.name
            )));
        }

        if let Some(existing) = self.locators.get(&def.name) {
            if existing.matches_def(def) {
                return Ok(LocatorCreate::Unchanged);
            }
            let released = self.delete(&def.name).unwrap_or_default();
            self.locators
                .insert(def.name.clone(), Locator::from_def(def));
            return Ok(LocatorCreate::Recreated(released));
        }

        self.locators
            .insert(def.name.clone(), Locator::from_def(def));
        Ok(LocatorCreate::Created)
    }

    /// Delete a locator, releasing all of its chunks.
    ///
    /// Returns the released chunks so the caller can walk dependents
    /// (every SID sourced from a released chunk must be withdrawn).
    /// Returns `None` if no such locator exists.
    pub fn delete(&mut self, name: &str) -> Option<Vec<Chunk>> {
        self.locators.remove(name).map(|loc| loc.chunks)
    }

    /// Look up a locator by name.
    pub fn get(&self, name: &str) -> Option<&Locator> {
        self.locators.get(name)
    }

    /// Iterate locators in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Locator> {
        self.locators.values()
    }

    /// Hand out a chunk of `locator_name` to `owner`.
    ///
    /// The whole locator prefix is available as a single chunk per
    /// owner; different owners receive identical chunks. At most one
    /// chunk is outstanding per (locator, owner): repeated calls
    /// return the existing chunk.
    pub fn chunk_alloc(&mut self, locator_name: &str, owner: SidOwner) -> Result<Chunk> {
        if owner == SidOwner::None {
            return Err(Error::config("chunks cannot be allocated to no owner"));
        }
        let loc = self
            .locators
            .get_mut(locator_name)
            .ok_or_else(|| Error::config(format!("unknown locator {}", locator_name)))?;

        if let Some(existing) = loc.chunks.iter().find(|c| c.owner == owner) {
            return Ok(existing.clone());
        }

        let chunk = Chunk {
            prefix: loc.prefix,
            prefix_len: loc.prefix_len,
            owner,
            locator: loc.name.clone(),
        };
        loc.chunks.push(chunk.clone());
        Ok(chunk)
    }

    /// Return `owner`'s chunk of `locator_name`.
    pub fn chunk_release(&mut self, locator_name: &str, owner: SidOwner) -> Result<()> {
        let loc = self
            .locators
            .get_mut(locator_name)
            .ok_or_else(|| Error::config(format!("unknown locator {}", locator_name)))?;
        let before = loc.chunks.len();
        loc.chunks.retain(|c| c.owner != owner);
        if loc.chunks.len() == before {
            return Err(Error::config(format!(
                "no chunk of {} outstanding for {:?}",
                locator_name, owner
            )));
        }
        Ok(())
    }

    /// First chunk outstanding for `owner` across all locators, in
    /// locator name order. Adjacency SIDs are allocated from this.
    pub fn first_chunk(&self, owner: SidOwner) -> Option<&Chunk> {
        self.locators
            .values()
            .flat_map(|l| l.chunks.iter())
            .find(|c| c.owner == owner)
    }
}
