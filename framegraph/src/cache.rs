//! Compiled graph cache.
//!
//! Each graph name owns one cache slot holding the last successfully compiled
//! graph and the key it was compiled under. A frame whose key matches byte for
//! byte reuses the resident graph and skips declaration and compilation
//! entirely; a different key replaces it.
//!
//! The key is whatever the caller decides the graph's structure depends on:
//! which optional passes are enabled, surface extent and format, starting
//! layouts of imported resources, and so on. [`CacheKeyBuilder`] serializes
//! such state into bytes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::compiler::CompiledGraph;
use crate::graph::ImageLayout;
use crate::types::TextureFormat;

/// Byte-exact cache key.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct CacheKey {
    bytes: Vec<u8>,
}

impl CacheKey {
    /// Empty key.
    pub fn new() -> Self {
        Self::default()
    }

    /// Key from raw bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Start serializing caller state into a key.
    pub fn builder() -> CacheKeyBuilder {
        CacheKeyBuilder::default()
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// 64-bit FNV-1a digest of the key, for logging.
    ///
    /// Lookups never compare fingerprints, only the full bytes.
    pub fn fingerprint(&self) -> u64 {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;
        self.bytes
            .iter()
            .fold(OFFSET, |hash, &byte| (hash ^ byte as u64).wrapping_mul(PRIME))
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheKey({} bytes, {:016x})",
            self.bytes.len(),
            self.fingerprint()
        )
    }
}

impl From<&[u8]> for CacheKey {
    fn from(bytes: &[u8]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for CacheKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<&str> for CacheKey {
    fn from(text: &str) -> Self {
        Self::from_bytes(text.as_bytes())
    }
}

/// Serializes caller state into a [`CacheKey`].
///
/// Variable-length values are length-prefixed so that different sequences of
/// pushes never produce the same bytes.
#[derive(Debug, Clone, Default)]
pub struct CacheKeyBuilder {
    bytes: Vec<u8>,
}

impl CacheKeyBuilder {
    /// Append a flag, such as whether an optional pass is enabled.
    pub fn push_bool(mut self, value: bool) -> Self {
        self.bytes.push(value as u8);
        self
    }

    /// Append a 32-bit value.
    pub fn push_u32(mut self, value: u32) -> Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Append a 64-bit value.
    pub fn push_u64(mut self, value: u64) -> Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Append a string.
    pub fn push_str(mut self, value: &str) -> Self {
        self = self.push_u32(value.len() as u32);
        self.bytes.extend_from_slice(value.as_bytes());
        self
    }

    /// Append a 2D extent.
    pub fn push_extent(self, width: u32, height: u32) -> Self {
        self.push_u32(width).push_u32(height)
    }

    /// Append a texture format.
    pub fn push_format(self, format: TextureFormat) -> Self {
        self.push_u32(format as u32)
    }

    /// Append an image layout, such as an imported resource's starting layout.
    pub fn push_layout(self, layout: ImageLayout) -> Self {
        self.push_u32(layout as u32)
    }

    /// Finish the key.
    pub fn build(self) -> CacheKey {
        CacheKey { bytes: self.bytes }
    }
}

/// Hit/miss counters of a [`GraphCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Lookups served from a resident graph.
    pub hits: u64,
    /// Lookups that required a new declaration.
    pub misses: u64,
}

#[derive(Debug)]
struct CacheEntry {
    key: CacheKey,
    graph: Arc<CompiledGraph>,
}

/// One resident compiled graph per slot.
#[derive(Debug, Default)]
pub struct GraphCache {
    slots: HashMap<String, CacheEntry>,
    stats: CacheStats,
}

impl GraphCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the resident graph of `slot` if it was compiled under `key`.
    pub fn lookup(&mut self, slot: &str, key: &CacheKey) -> Option<Arc<CompiledGraph>> {
        match self.slots.get(slot) {
            Some(entry) if entry.key == *key => {
                self.stats.hits += 1;
                log::trace!("GraphCache: hit '{slot}' {key:?}");
                Some(Arc::clone(&entry.graph))
            }
            Some(entry) => {
                self.stats.misses += 1;
                log::debug!(
                    "GraphCache: miss '{slot}', key changed {:?} -> {key:?}",
                    entry.key
                );
                None
            }
            None => {
                self.stats.misses += 1;
                log::debug!("GraphCache: miss '{slot}', empty slot");
                None
            }
        }
    }

    /// The resident graph of `slot`, whatever its key.
    pub fn resident(&self, slot: &str) -> Option<&Arc<CompiledGraph>> {
        self.slots.get(slot).map(|entry| &entry.graph)
    }

    /// Make `graph` the resident graph of `slot`, returning the one it replaces.
    pub fn store(
        &mut self,
        slot: &str,
        key: CacheKey,
        graph: Arc<CompiledGraph>,
    ) -> Option<Arc<CompiledGraph>> {
        self.slots
            .insert(slot.to_string(), CacheEntry { key, graph })
            .map(|old| old.graph)
    }

    /// Drop the resident graph of `slot`.
    pub fn evict(&mut self, slot: &str) -> Option<Arc<CompiledGraph>> {
        self.slots.remove(slot).map(|entry| entry.graph)
    }

    /// Drop every resident graph.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

static_assertions::assert_impl_all!(GraphCache: Send, Sync);
