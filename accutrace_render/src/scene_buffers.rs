use accutrace_gpu::{Device, StructuredBuffer};
use accutrace_scene::{GeometryRegistry, MeshObjectRecord};
use anyhow::{anyhow, Context};

use crate::accumulator::ConvergenceAccumulator;

/// Packs every registered mesh object into three flat GPU buffers: per-object
/// records, vertex positions and triangle indices.
///
/// Indices are rebased so they address the shared vertex buffer directly, and
/// each record points at its own slice of the index buffer.
pub struct SceneBufferBuilder<D: Device> {
    records:  Vec<MeshObjectRecord>,
    vertices: Vec<[f32; 3]>,
    indices:  Vec<u32>,

    mesh_object_buffer: StructuredBuffer<D>,
    vertex_buffer:      StructuredBuffer<D>,
    index_buffer:       StructuredBuffer<D>,
}

impl<D: Device> Default for SceneBufferBuilder<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Device> SceneBufferBuilder<D> {
    pub fn new() -> Self {
        Self {
            records:            Vec::new(),
            vertices:           Vec::new(),
            indices:            Vec::new(),
            mesh_object_buffer: StructuredBuffer::new(),
            vertex_buffer:      StructuredBuffer::new(),
            index_buffer:       StructuredBuffer::new(),
        }
    }

    /// Repacks the buffers if the registry changed since the last rebuild.
    /// Returns whether a rebuild happened; a rebuild restarts accumulation.
    ///
    /// Objects whose mesh fails [`Mesh::validate`] are left out. If an upload
    /// fails, all three buffers are released and the registry stays dirty.
    ///
    /// [`Mesh::validate`]: accutrace_scene::Mesh::validate
    pub fn rebuild_if_dirty(
        &mut self,
        device: &D,
        registry: &mut GeometryRegistry,
        accumulator: &mut ConvergenceAccumulator<D>,
    ) -> anyhow::Result<bool> {
        if !registry.is_dirty() {
            return Ok(false);
        }

        if let Err(e) = self.repack(device, registry) {
            // Records must never describe vertices or indices that are not uploaded.
            self.clear(device);
            return Err(e);
        }

        registry.take_dirty();
        accumulator.reset();
        log::debug!(
            "Rebuilt scene buffers: {} objects, {} vertices, {} indices",
            self.records.len(),
            self.vertices.len(),
            self.indices.len()
        );
        Ok(true)
    }

    fn repack(&mut self, device: &D, registry: &GeometryRegistry) -> anyhow::Result<()> {
        self.records.clear();
        self.vertices.clear();
        self.indices.clear();

        for object in registry.objects() {
            let object = object.read().map_err(|_| anyhow!("Mesh object lock is poisoned"))?;
            if let Err(e) = object.mesh.validate() {
                log::warn!("Skipping malformed mesh object: {e}");
                continue;
            }

            let vertex_offset = u32::try_from(self.vertices.len()).context("Too many vertices for u32 indices")?;
            u32::try_from(self.vertices.len() + object.mesh.vertex_count())
                .context("Too many vertices for u32 indices")?;
            let record = MeshObjectRecord::new(&object.local_to_world(), self.indices.len(), object.mesh.index_count())?;

            self.vertices.extend(object.mesh.positions.iter().map(|p| [p.x, p.y, p.z]));
            self.indices.extend(object.mesh.indices.iter().map(|&i| i + vertex_offset));
            self.records.push(record);
        }

        self.mesh_object_buffer.reconcile(device, &self.records).context("Cannot upload mesh objects")?;
        self.vertex_buffer.reconcile(device, &self.vertices).context("Cannot upload vertices")?;
        self.index_buffer.reconcile(device, &self.indices).context("Cannot upload indices")?;
        Ok(())
    }

    fn clear(&mut self, device: &D) {
        self.records.clear();
        self.vertices.clear();
        self.indices.clear();
        self.destroy(device);
    }

    pub fn records(&self) -> &[MeshObjectRecord] {
        &self.records
    }

    pub fn vertices(&self) -> &[[f32; 3]] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn mesh_object_buffer(&self) -> Option<&D::Buffer> {
        self.mesh_object_buffer.get()
    }

    pub fn vertex_buffer(&self) -> Option<&D::Buffer> {
        self.vertex_buffer.get()
    }

    pub fn index_buffer(&self) -> Option<&D::Buffer> {
        self.index_buffer.get()
    }

    pub fn destroy(&mut self, device: &D) {
        self.mesh_object_buffer.release(device);
        self.vertex_buffer.release(device);
        self.index_buffer.release(device);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, RwLock};

    use accutrace_gpu::{Extent, HeadlessDevice};
    use accutrace_scene::{Mesh, MeshObject, SharedMeshObject};
    use nalgebra_glm as glm;

    use super::*;

    fn mesh(vertex_count: usize, index_count: usize) -> Arc<Mesh> {
        let positions = (0..vertex_count).map(|i| glm::vec3(i as f32, 0.0, 0.0)).collect();
        let indices = (0..index_count).map(|i| (i % vertex_count) as u32).collect();
        Arc::new(Mesh::new(positions, indices))
    }

    fn object(mesh: Arc<Mesh>) -> SharedMeshObject {
        Arc::new(RwLock::new(MeshObject::new(mesh, glm::identity())))
    }

    struct Fixture {
        device:      HeadlessDevice,
        registry:    GeometryRegistry,
        builder:     SceneBufferBuilder<HeadlessDevice>,
        accumulator: ConvergenceAccumulator<HeadlessDevice>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                device:      HeadlessDevice::new(),
                registry:    GeometryRegistry::new(),
                builder:     SceneBufferBuilder::new(),
                accumulator: ConvergenceAccumulator::new(),
            }
        }

        fn rebuild(&mut self) -> bool {
            self.builder.rebuild_if_dirty(&self.device, &mut self.registry, &mut self.accumulator).unwrap()
        }
    }

    #[test]
    fn test_offsets_are_cumulative() {
        let mut fx = Fixture::new();
        fx.registry.register(object(mesh(4, 6)));
        fx.registry.register(object(mesh(3, 3)));
        fx.registry.register(object(mesh(5, 9)));

        assert!(fx.rebuild());
        assert_eq!(fx.builder.vertices().len(), 12);
        assert_eq!(fx.builder.indices().len(), 18);

        let records = fx.builder.records();
        assert_eq!(records.len(), 3);
        assert_eq!((records[0].indices_offset, records[0].indices_count), (0, 6));
        assert_eq!((records[1].indices_offset, records[1].indices_count), (6, 3));
        assert_eq!((records[2].indices_offset, records[2].indices_count), (9, 9));

        // Second object's indices are rebased past the first mesh's four vertices.
        assert_eq!(&fx.builder.indices()[6..9], &[4, 5, 6]);
        assert_eq!(fx.builder.indices()[9], 7);
    }

    #[test]
    fn test_buffers_match_lists() {
        let mut fx = Fixture::new();
        fx.registry.register(object(mesh(4, 6)));
        fx.registry.register(object(mesh(3, 3)));
        fx.rebuild();

        let vertices = fx.builder.vertex_buffer().unwrap();
        assert_eq!((vertices.count(), vertices.stride()), (7, 12));
        let indices = fx.builder.index_buffer().unwrap();
        assert_eq!((indices.count(), indices.stride()), (9, 4));
        let records = fx.builder.mesh_object_buffer().unwrap();
        assert_eq!((records.count(), records.stride()), (2, 72));

        assert_eq!(fx.device.buffer_data::<u32>(indices), fx.builder.indices());
        let uploaded: Vec<MeshObjectRecord> = fx.device.buffer_data(records);
        assert_eq!(uploaded, fx.builder.records());
    }

    #[test]
    fn test_clean_registry_does_nothing() {
        let mut fx = Fixture::new();
        fx.registry.register(object(mesh(4, 6)));
        assert!(fx.rebuild());
        let stats = fx.device.stats();

        assert!(!fx.rebuild());
        assert_eq!(fx.device.stats(), stats);
    }

    #[test]
    fn test_indices_stay_in_bounds() {
        let mut fx = Fixture::new();
        let objects = [object(mesh(4, 6)), object(mesh(3, 3)), object(mesh(5, 9)), object(mesh(8, 12))];
        for o in &objects {
            fx.registry.register(o.clone());
        }
        fx.registry.unregister(&objects[1]);
        fx.registry.register(object(mesh(2, 6)));
        fx.registry.unregister(&objects[3]);
        fx.rebuild();

        assert_eq!(fx.builder.vertices().len(), 4 + 5 + 2);
        let vertex_count = fx.builder.vertices().len() as u32;
        assert!(fx.builder.indices().iter().all(|&i| i < vertex_count));
    }

    #[test]
    fn test_empty_registry_releases_buffers() {
        let mut fx = Fixture::new();
        let o = object(mesh(4, 6));
        fx.registry.register(o.clone());
        fx.rebuild();
        assert_eq!(fx.device.live_buffers(), 3);

        fx.registry.unregister(&o);
        assert!(fx.rebuild());
        assert!(fx.builder.mesh_object_buffer().is_none());
        assert!(fx.builder.vertex_buffer().is_none());
        assert!(fx.builder.index_buffer().is_none());
        assert_eq!(fx.device.live_buffers(), 0);
    }

    #[test]
    fn test_rebuild_resets_accumulation() {
        let mut fx = Fixture::new();
        fx.accumulator.ensure_targets(&fx.device, Extent::new(2, 2)).unwrap();
        fx.accumulator.accumulate(&fx.device).unwrap();
        assert_eq!(fx.accumulator.sample_count(), 1);

        fx.registry.register(object(mesh(3, 3)));
        fx.rebuild();
        assert_eq!(fx.accumulator.sample_count(), 0);
        assert!(!fx.registry.is_dirty());
    }

    #[test]
    fn test_shared_mesh_with_transforms() {
        let mut fx = Fixture::new();
        let shared = mesh(3, 3);
        let moved = glm::translation(&glm::vec3(0.0, 5.0, 0.0));
        fx.registry.register(object(shared.clone()));
        fx.registry.register(Arc::new(RwLock::new(MeshObject::new(shared, moved))));
        fx.rebuild();

        assert_eq!(fx.builder.vertices().len(), 6);
        assert_eq!(fx.builder.records()[1].transform(), moved);
        assert_eq!(&fx.builder.indices()[3..], &[3, 4, 5]);
    }

    #[test]
    fn test_malformed_mesh_is_skipped() {
        let mut fx = Fixture::new();
        let broken = Arc::new(Mesh::new(vec![glm::vec3(0.0, 0.0, 0.0); 3], vec![0, 1, 7]));
        fx.registry.register(object(mesh(4, 6)));
        fx.registry.register(object(broken));
        fx.registry.register(object(mesh(3, 3)));

        assert!(fx.rebuild());
        let records = fx.builder.records();
        assert_eq!(records.len(), 2);
        assert_eq!((records[1].indices_offset, records[1].indices_count), (6, 3));
        assert_eq!(fx.builder.vertices().len(), 7);
        assert_eq!(&fx.builder.indices()[6..], &[4, 5, 6]);
    }

    #[test]
    fn test_failed_upload_releases_all_buffers() {
        let mut fx = Fixture::new();
        fx.registry.register(object(mesh(4, 6)));
        fx.rebuild();

        fx.registry.register(object(mesh(3, 3)));
        fx.device.limit_buffer_allocations(Some(1));
        let result = fx.builder.rebuild_if_dirty(&fx.device, &mut fx.registry, &mut fx.accumulator);
        assert!(result.is_err());
        assert!(fx.builder.mesh_object_buffer().is_none());
        assert!(fx.builder.vertex_buffer().is_none());
        assert!(fx.builder.index_buffer().is_none());
        assert!(fx.builder.records().is_empty());
        assert_eq!(fx.device.live_buffers(), 0);
        assert!(fx.registry.is_dirty());

        fx.device.limit_buffer_allocations(None);
        assert!(fx.rebuild());
        assert_eq!(fx.builder.records().len(), 2);
        assert_eq!(fx.device.live_buffers(), 3);
    }

    #[test]
    fn test_edit_in_place_needs_mark_dirty() {
        let mut fx = Fixture::new();
        let o = object(mesh(3, 3));
        fx.registry.register(o.clone());
        fx.rebuild();

        o.write().unwrap().transform = glm::translation(&glm::vec3(1.0, 0.0, 0.0));
        assert!(!fx.rebuild());
        fx.registry.mark_dirty();
        assert!(fx.rebuild());
        assert_eq!(fx.builder.records()[0].local_to_world[3], [1.0, 0.0, 0.0, 1.0]);
    }
}
