use accutrace_gpu::{Device, Extent, FrameParams, KernelBindings, StructuredBuffer, WorkGroups};
use accutrace_scene::{Camera, GeometryRegistry, Pcg32, SceneConfig, SharedMeshObject, SphereSceneGenerator};
use anyhow::{anyhow, Context};
use nalgebra_glm as glm;

use crate::{accumulator::ConvergenceAccumulator, scene_buffers::SceneBufferBuilder};

/// Random stream used for per-frame jitter, separate from scene generation.
const FRAME_STREAM: u64 = 1;

/// Drives one progressive rendering session.
///
/// Each frame traces one sample per pixel into the raw target, folds it into
/// the converged target and then picks up any geometry registered during the
/// frame. New geometry is therefore first traced on the following frame.
pub struct FrameOrchestrator<D: Device> {
    config:        SceneConfig,
    registry:      GeometryRegistry,
    scene_buffers: SceneBufferBuilder<D>,
    spheres:       StructuredBuffer<D>,
    accumulator:   ConvergenceAccumulator<D>,
    rng:           Pcg32,
}

impl<D: Device> FrameOrchestrator<D> {
    pub fn new(device: &D, config: SceneConfig) -> anyhow::Result<Self> {
        let spheres = SphereSceneGenerator::from(&config).generate(config.seed);
        let spheres = StructuredBuffer::with_data(device, &spheres).context("Cannot upload spheres")?;
        Ok(Self {
            config,
            registry: GeometryRegistry::new(),
            scene_buffers: SceneBufferBuilder::new(),
            spheres,
            accumulator: ConvergenceAccumulator::new(),
            rng: Pcg32::new(FRAME_STREAM, config.seed),
        })
    }

    /// Regenerates the sphere set from `config` and restarts accumulation.
    /// Registered mesh objects are kept.
    pub fn reinitialize(&mut self, device: &D, config: SceneConfig) -> anyhow::Result<()> {
        let spheres = SphereSceneGenerator::from(&config).generate(config.seed);
        self.spheres.release(device);
        self.spheres.reconcile(device, &spheres).context("Cannot upload spheres")?;
        self.config = config;
        self.rng = Pcg32::new(FRAME_STREAM, config.seed);
        self.accumulator.reset();
        Ok(())
    }

    /// Traces and accumulates one frame, returning the converged image.
    pub fn render_frame(&mut self, device: &D, camera: &mut Camera, extent: Extent) -> anyhow::Result<&D::Image> {
        if camera.take_changed() {
            self.accumulator.reset();
        }

        let params = FrameParams {
            camera_to_world:    camera.camera_to_world(),
            inverse_projection: camera.inverse_projection(extent.aspect()),
            pixel_offset:       glm::vec2(self.rng.next_f32(), self.rng.next_f32()),
            seed:               self.rng.next_f32(),
        };

        self.accumulator.ensure_targets(device, extent).context("Cannot allocate render targets")?;

        let groups = WorkGroups::covering(extent);
        log::trace!("Dispatching {}x{} groups, sample {}", groups.x, groups.y, self.accumulator.sample_count());
        let target = self.accumulator.raw_target_mut().ok_or_else(|| anyhow!("Raw render target is missing"))?;
        device
            .dispatch(
                KernelBindings {
                    spheres: self.spheres.get(),
                    mesh_objects: self.scene_buffers.mesh_object_buffer(),
                    vertices: self.scene_buffers.vertex_buffer(),
                    indices: self.scene_buffers.index_buffer(),
                    params: &params,
                    target,
                },
                groups,
            )
            .context("Kernel dispatch failed")?;

        self.accumulator.accumulate(device).context("Blend pass failed")?;

        self.scene_buffers.rebuild_if_dirty(device, &mut self.registry, &mut self.accumulator)?;

        self.accumulator.converged_target().ok_or_else(|| anyhow!("Converged render target is missing"))
    }

    pub fn register(&mut self, object: SharedMeshObject) {
        self.registry.register(object);
    }

    pub fn unregister(&mut self, object: &SharedMeshObject) -> bool {
        self.registry.unregister(object)
    }

    pub fn registry(&self) -> &GeometryRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut GeometryRegistry {
        &mut self.registry
    }

    pub fn scene_buffers(&self) -> &SceneBufferBuilder<D> {
        &self.scene_buffers
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    pub fn sample_count(&self) -> u32 {
        self.accumulator.sample_count()
    }

    pub fn sphere_count(&self) -> usize {
        self.spheres.count()
    }

    pub fn destroy(&mut self, device: &D) {
        self.spheres.release(device);
        self.scene_buffers.destroy(device);
        self.accumulator.destroy(device);
    }
}
