//! Content-hash keyed pipeline cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{ComputePipelineDesc, GraphicsPipelineDesc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Graphics,
    Compute,
}

#[derive(Debug, Clone)]
struct CachedPipeline {
    kind: PipelineKind,
    name: String,
}

/// Counters of a [`PipelineCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Compiled pipeline states of a device, keyed by content hash.
#[derive(Debug, Default)]
pub struct PipelineCache {
    entries: Mutex<HashMap<u64, CachedPipeline>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the hash of the graphics state, compiling it on first use.
    pub fn get_or_create_graphics(&self, desc: &GraphicsPipelineDesc) -> u64 {
        self.get_or_create(desc.content_hash(), PipelineKind::Graphics, &desc.name)
    }

    /// Returns the hash of the compute state, compiling it on first use.
    pub fn get_or_create_compute(&self, desc: &ComputePipelineDesc) -> u64 {
        self.get_or_create(desc.content_hash(), PipelineKind::Compute, &desc.name)
    }

    fn get_or_create(&self, hash: u64, kind: PipelineKind, name: &str) -> u64 {
        let mut entries = self.entries.lock();
        if entries.contains_key(&hash) {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            log::debug!("PipelineCache: compiled {kind:?} pipeline '{name}' ({hash:#018x})");
            entries.insert(
                hash,
                CachedPipeline {
                    kind,
                    name: name.to_string(),
                },
            );
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        hash
    }

    pub fn contains(&self, hash: u64) -> bool {
        self.entries.lock().contains_key(&hash)
    }

    pub fn kind(&self, hash: u64) -> Option<PipelineKind> {
        self.entries.lock().get(&hash).map(|p| p.kind)
    }

    pub fn name(&self, hash: u64) -> Option<String> {
        self.entries.lock().get(&hash).map(|p| p.name.clone())
    }

    pub fn stats(&self) -> PipelineCacheStats {
        PipelineCacheStats {
            entries: self.entries.lock().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ShaderRef;

    #[test]
    fn test_second_lookup_hits() {
        let cache = PipelineCache::new();
        let desc = ComputePipelineDesc::new("cull", ShaderRef::compute("Cull.hlsl"));
        let a = cache.get_or_create_compute(&desc);
        let b = cache.get_or_create_compute(&desc);
        assert_eq!(a, b);
        assert_eq!(cache.kind(a), Some(PipelineKind::Compute));
        assert_eq!(
            cache.stats(),
            PipelineCacheStats {
                entries: 1,
                hits: 1,
                misses: 1
            }
        );
    }
}
