//! Pipeline cache keyed by material and topology.

use std::collections::HashMap;

use crate::error::RhiError;
use crate::types::{PipelineHandle, PrimitiveTopology};

/// Identifier of the material a pipeline was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub u64);

impl MaterialId {
    /// Create an identifier.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Cache key: one pipeline per material and topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineKey {
    pub material: MaterialId,
    pub topology: PrimitiveTopology,
}

impl PipelineKey {
    /// Create a key.
    pub fn new(material: MaterialId, topology: PrimitiveTopology) -> Self {
        Self { material, topology }
    }
}

/// Maps (material, topology) to a pipeline handle.
///
/// The cache stores handles only; destroying a cached pipeline is the
/// owner's job, followed by [`clear`](Self::clear) or
/// [`remove_pipeline`](Self::remove_pipeline).
#[derive(Debug, Default)]
pub struct PipelineCache {
    pipelines: HashMap<PipelineKey, PipelineHandle>,
}

impl PipelineCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a cached pipeline.
    pub fn get_pipeline(&self, key: &PipelineKey) -> Option<PipelineHandle> {
        self.pipelines.get(key).copied()
    }

    /// Store a pipeline, returning the handle it replaced.
    pub fn store_pipeline(
        &mut self,
        key: PipelineKey,
        pipeline: PipelineHandle,
    ) -> Option<PipelineHandle> {
        self.pipelines.insert(key, pipeline)
    }

    /// Return the cached pipeline for `key`, building and storing it first
    /// if there is none.
    pub fn get_or_create<F>(&mut self, key: PipelineKey, create: F) -> Result<PipelineHandle, RhiError>
    where
        F: FnOnce() -> Result<PipelineHandle, RhiError>,
    {
        if let Some(pipeline) = self.get_pipeline(&key) {
            return Ok(pipeline);
        }
        let pipeline = create()?;
        log::debug!(
            "cached pipeline {pipeline} for material {} ({:?})",
            key.material.0,
            key.topology
        );
        self.pipelines.insert(key, pipeline);
        Ok(pipeline)
    }

    /// Forget one entry.
    pub fn remove_pipeline(&mut self, key: &PipelineKey) -> Option<PipelineHandle> {
        self.pipelines.remove(key)
    }

    /// Number of cached pipelines.
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Forget every entry and return the handles that were cached.
    pub fn clear(&mut self) -> Vec<PipelineHandle> {
        self.pipelines.drain().map(|(_, pipeline)| pipeline).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Handle;

    const MATERIAL: MaterialId = MaterialId::new(7);

    #[test]
    fn test_get_or_create_builds_once() {
        let mut cache = PipelineCache::new();
        let key = PipelineKey::new(MATERIAL, PrimitiveTopology::TriangleList);
        let mut builds = 0;

        for _ in 0..3 {
            let handle = cache
                .get_or_create(key, || {
                    builds += 1;
                    Ok(PipelineHandle::from_raw(1))
                })
                .unwrap();
            assert_eq!(handle, PipelineHandle::from_raw(1));
        }
        assert_eq!(builds, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failed_build_is_not_cached() {
        let mut cache = PipelineCache::new();
        let key = PipelineKey::new(MATERIAL, PrimitiveTopology::LineList);
        let err = cache
            .get_or_create(key, || Err(RhiError::InvalidArgument("bad".to_string())))
            .unwrap_err();
        assert!(matches!(err, RhiError::InvalidArgument(_)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_store_replaces_and_clear_returns_handles() {
        let mut cache = PipelineCache::new();
        let key = PipelineKey::new(MATERIAL, PrimitiveTopology::TriangleStrip);
        assert_eq!(cache.store_pipeline(key, PipelineHandle::from_raw(2)), None);
        assert_eq!(
            cache.store_pipeline(key, PipelineHandle::from_raw(3)),
            Some(PipelineHandle::from_raw(2))
        );
        assert_eq!(cache.clear(), vec![PipelineHandle::from_raw(3)]);
        assert_eq!(cache.get_pipeline(&key), None);
    }
}
