pub mod config;
pub mod fly_cam;
pub mod logging;

use std::{
    fs,
    path::Path,
    sync::{Arc, RwLock},
};

use accutrace_gpu::{
    vulkan::{debug::debug_callback, FrameContext, TextureData, VulkanContext, VulkanDevice, VulkanDeviceCreateInfo},
    Device,
    Extent,
};
use accutrace_render::FrameOrchestrator;
use accutrace_scene::{Camera, MeshObject, SceneConfig, SharedMeshObject};
use anyhow::{anyhow, Context};
use erupt::{utils::surface, vk, DeviceLoader, EntryLoader, ExtendableFrom, InstanceLoader};
use erupt_bootstrap as vkb;
use vk_mem_erupt as vma;
use winit::window::Window;

use crate::{config::AppConfig, fly_cam::FlyCam};

pub struct App {
    _entry:          EntryLoader,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    instance:        Arc<InstanceLoader>,
    device:          Arc<DeviceLoader>,
    _device_meta:    vkb::DeviceMetadata,
    queue:           vk::Queue,
    surface:         vk::SurfaceKHR,
    swapchain:       vkb::Swapchain,
    frame_pool:      vk::CommandPool,
    upload_pool:     vk::CommandPool,
    frames:          Vec<FrameContext>,
    upload_fence:    vk::Fence,
    allocator:       Arc<RwLock<vma::Allocator>>,
    extent:          Extent,
    gpu:             VulkanDevice,
    orchestrator:    FrameOrchestrator<VulkanDevice>,
    scene_config:    SceneConfig,
    meshes:          Vec<SharedMeshObject>,
    pub camera:      Camera,
    pub fly_cam:     FlyCam,
}

impl App {
    pub fn new(window: &Window, config: AppConfig) -> anyhow::Result<Self> {
        let entry = EntryLoader::new()?;
        let (instance, debug_messenger, instance_meta) = {
            let builder = vkb::InstanceBuilder::new()
                .request_api_version(1, 3)
                .require_surface_extensions(window)
                .ok_or_else(|| anyhow!("Cannot get surface extensions"))?
                .app_name("AccuTrace")?
                .validation_layers(vkb::ValidationLayers::Request)
                .request_debug_messenger(vkb::DebugMessenger::Custom {
                    callback:          debug_callback as _,
                    user_data_pointer: std::ptr::null_mut(),
                });
            let (instance, debug_messenger, instance_meta) = unsafe { builder.build(&entry)? };
            (Arc::new(instance), debug_messenger, instance_meta)
        };

        let surface = unsafe { surface::create_surface(&instance, window, None) }
            .result()
            .map_err(|e| anyhow!("Cannot create surface: {e:?}"))?;

        let (device, device_meta, queue, queue_family) = {
            let graphics_present = vkb::QueueFamilyCriteria::graphics_present();
            let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13FeaturesBuilder::new().synchronization2(true);
            let device_features = vk::PhysicalDeviceFeatures2Builder::new().extend_from(&mut vulkan_1_3_features);
            let device_builder = vkb::DeviceBuilder::new()
                .require_version(1, 3)
                .require_extension(vk::KHR_SWAPCHAIN_EXTENSION_NAME)
                .queue_family(graphics_present)
                .for_surface(surface)
                .require_features(&device_features);
            let (device, device_meta) = unsafe { device_builder.build(&instance, &instance_meta)? };
            let (queue, queue_family) = device_meta
                .device_queue(&instance, &device, graphics_present, 0)?
                .context("Cannot get graphics present queue")?;
            (Arc::new(device), device_meta, queue, queue_family)
        };
        log::info!("Using queue family {queue_family}");

        let format = {
            let surface_formats = unsafe {
                instance.get_physical_device_surface_formats_khr(device_meta.physical_device(), surface, None)
            }
            .result()
            .map_err(|e| anyhow!("Cannot get surface formats: {e:?}"))?;
            let desirable_formats = [vk::Format::B8G8R8A8_UNORM, vk::Format::R8G8B8A8_UNORM];
            match surface_formats.as_slice() {
                [] => return Err(anyhow!("Surface reports no formats")),
                [f] if f.format == vk::Format::UNDEFINED => {
                    vk::SurfaceFormatKHR { format: vk::Format::B8G8R8A8_UNORM, color_space: f.color_space }
                }
                formats => *formats.iter().find(|f| desirable_formats.contains(&f.format)).unwrap_or(&formats[0]),
            }
        };

        let [width, height]: [u32; 2] = window.inner_size().into();
        let swapchain = {
            let mut swapchain_options = vkb::SwapchainOptions::default();
            swapchain_options.format_preference(&[format]);
            swapchain_options.present_mode_preference(&[vk::PresentModeKHR::MAILBOX_KHR, vk::PresentModeKHR::FIFO_KHR]);
            swapchain_options.usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST);
            vkb::Swapchain::new(
                swapchain_options,
                surface,
                device_meta.physical_device(),
                &device,
                vk::Extent2D { width, height },
            )
        };

        let create_pool = |flags: vk::CommandPoolCreateFlags| {
            let create_info = vk::CommandPoolCreateInfoBuilder::new().flags(flags).queue_family_index(queue_family);
            unsafe { device.create_command_pool(&create_info, None) }
                .result()
                .map_err(|e| anyhow!("Cannot create command pool: {e:?}"))
        };
        let frame_pool = create_pool(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)?;
        let upload_pool = create_pool(vk::CommandPoolCreateFlags::TRANSIENT)?;

        let command_buffers = {
            let allocate_info = vk::CommandBufferAllocateInfoBuilder::new()
                .command_pool(frame_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(swapchain.frames_in_flight() as u32);
            unsafe { device.allocate_command_buffers(&allocate_info) }
                .result()
                .map_err(|e| anyhow!("Cannot allocate command buffers: {e:?}"))?
        };

        let frames = command_buffers
            .iter()
            .map(|&command_buffer| {
                let create_info = vk::SemaphoreCreateInfoBuilder::new();
                let complete = unsafe { device.create_semaphore(&create_info, None) }
                    .result()
                    .map_err(|e| anyhow!("Cannot create frame semaphore: {e:?}"))?;
                Ok(FrameContext { command_buffer, complete })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let upload_fence = unsafe { device.create_fence(&vk::FenceCreateInfoBuilder::new(), None) }
            .result()
            .map_err(|e| anyhow!("Cannot create fence: {e:?}"))?;

        let allocator = {
            let create_info = vma::AllocatorCreateInfo {
                physical_device:                 device_meta.physical_device(),
                device:                          device.clone(),
                instance:                        instance.clone(),
                flags:                           vma::AllocatorCreateFlags::empty(),
                preferred_large_heap_block_size: 0,
                frame_in_use_count:              0,
                heap_size_limits:                None,
            };
            let allocator =
                vma::Allocator::new(&create_info).map_err(|e| anyhow!("Cannot create memory allocator: {e:?}"))?;
            Arc::new(RwLock::new(allocator))
        };

        let vk_ctx = VulkanContext {
            device: device.clone(),
            allocator: allocator.clone(),
            queue,
            command_pool: upload_pool,
            upload_fence,
        };

        let trace_kernel = read_kernel(&config.trace_kernel_path)?;
        let blend_kernel = read_kernel(&config.blend_kernel_path)?;
        let (skybox_extent, skybox_rgba) = load_skybox(&config.skybox_path);
        let gpu = VulkanDevice::new(vk_ctx, VulkanDeviceCreateInfo {
            trace_kernel: &trace_kernel,
            blend_kernel: &blend_kernel,
            skybox:       TextureData { extent: skybox_extent, rgba: &skybox_rgba },
        })?;

        let mut orchestrator = FrameOrchestrator::new(&gpu, config.scene)?;
        let meshes = register_meshes(&mut orchestrator, config.meshes);
        log::info!("Registered {} mesh objects", meshes.len());
        let fly_cam = FlyCam::new(
            config.fly_cam.yaw,
            config.fly_cam.pitch,
            config.fly_cam.speed,
            config.fly_cam.look_sensitivity,
        );

        Ok(Self {
            _entry: entry,
            debug_messenger,
            instance,
            device,
            _device_meta: device_meta,
            queue,
            surface,
            swapchain,
            frame_pool,
            upload_pool,
            frames,
            upload_fence,
            allocator,
            extent: Extent::new(width, height),
            gpu,
            orchestrator,
            scene_config: config.scene,
            meshes,
            camera: config.camera,
            fly_cam,
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.extent = Extent::new(width, height);
        if !self.extent.is_empty() {
            self.swapchain.update(vk::Extent2D { width, height });
        }
    }

    pub fn update(&mut self, dt: f32) {
        self.fly_cam.update(&mut self.camera, dt);
    }

    /// Regenerates the sphere scene with the next seed.
    pub fn reseed(&mut self) -> anyhow::Result<()> {
        self.scene_config.seed = self.scene_config.seed.wrapping_add(1);
        unsafe { self.device.device_wait_idle() }
            .result()
            .map_err(|e| anyhow!("Cannot wait for device: {e:?}"))?;
        self.orchestrator.reinitialize(&self.gpu, self.scene_config)?;
        log::info!("Scene reseeded with {}", self.scene_config.seed);
        Ok(())
    }

    pub fn sample_count(&self) -> u32 {
        self.orchestrator.sample_count()
    }

    pub fn render(&mut self) -> anyhow::Result<()> {
        if self.extent.is_empty() {
            return Ok(());
        }

        let acquired_frame = unsafe { self.swapchain.acquire(&self.instance, &self.device, u64::MAX) }
            .result()
            .map_err(|e| anyhow!("Cannot acquire swapchain image: {e:?}"))?;

        let extent = self.swapchain.extent();
        let converged = self.orchestrator.render_frame(
            &self.gpu,
            &mut self.camera,
            Extent::new(extent.width, extent.height),
        )?;
        let (converged_image, converged_extent) = (converged.image, converged.extent);

        let frame = self.frames[acquired_frame.frame_index];
        let swapchain_image = self.swapchain.images()[acquired_frame.image_index];
        let colour_layers = vk::ImageSubresourceLayersBuilder::new()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(0)
            .base_array_layer(0)
            .layer_count(1)
            .build();
        let subresource_range = vk::ImageSubresourceRangeBuilder::new()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .base_mip_level(0)
            .level_count(1)
            .base_array_layer(0)
            .layer_count(1)
            .build();

        unsafe {
            let begin_info =
                vk::CommandBufferBeginInfoBuilder::new().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .begin_command_buffer(frame.command_buffer, &begin_info)
                .result()
                .map_err(|e| anyhow!("Cannot begin command buffer: {e:?}"))?;

            let to_transfer = [
                vk::ImageMemoryBarrier2Builder::new()
                    .src_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
                    .src_access_mask(vk::AccessFlags2::SHADER_STORAGE_WRITE)
                    .dst_stage_mask(vk::PipelineStageFlags2::BLIT)
                    .dst_access_mask(vk::AccessFlags2::TRANSFER_READ)
                    .old_layout(vk::ImageLayout::GENERAL)
                    .new_layout(vk::ImageLayout::GENERAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(converged_image)
                    .subresource_range(subresource_range),
                vk::ImageMemoryBarrier2Builder::new()
                    .src_stage_mask(vk::PipelineStageFlags2::NONE)
                    .src_access_mask(vk::AccessFlags2::NONE)
                    .dst_stage_mask(vk::PipelineStageFlags2::BLIT)
                    .dst_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(swapchain_image)
                    .subresource_range(subresource_range),
            ];
            self.device.cmd_pipeline_barrier2(
                frame.command_buffer,
                &vk::DependencyInfoBuilder::new().image_memory_barriers(&to_transfer),
            );

            let corner = |w: u32, h: u32| vk::Offset3D { x: w as i32, y: h as i32, z: 1 };
            let blit = vk::ImageBlitBuilder::new()
                .src_subresource(colour_layers)
                .src_offsets([vk::Offset3D::default(), corner(converged_extent.width, converged_extent.height)])
                .dst_subresource(colour_layers)
                .dst_offsets([vk::Offset3D::default(), corner(extent.width, extent.height)]);
            self.device.cmd_blit_image(
                frame.command_buffer,
                converged_image,
                vk::ImageLayout::GENERAL,
                swapchain_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );

            let to_present = vk::ImageMemoryBarrier2Builder::new()
                .src_stage_mask(vk::PipelineStageFlags2::BLIT)
                .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
                .dst_stage_mask(vk::PipelineStageFlags2::NONE)
                .dst_access_mask(vk::AccessFlags2::NONE)
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(swapchain_image)
                .subresource_range(subresource_range);
            self.device.cmd_pipeline_barrier2(
                frame.command_buffer,
                &vk::DependencyInfoBuilder::new().image_memory_barriers(std::slice::from_ref(&to_present)),
            );

            self.device
                .end_command_buffer(frame.command_buffer)
                .result()
                .map_err(|e| anyhow!("Cannot end command buffer: {e:?}"))?;
        }

        let wait_semaphore = vk::SemaphoreSubmitInfoBuilder::new()
            .semaphore(acquired_frame.ready)
            .stage_mask(vk::PipelineStageFlags2::BLIT);
        let signal_semaphore = vk::SemaphoreSubmitInfoBuilder::new()
            .semaphore(frame.complete)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS);
        let command_buffer_info = vk::CommandBufferSubmitInfoBuilder::new().command_buffer(frame.command_buffer);
        let submit_info = vk::SubmitInfo2Builder::new()
            .wait_semaphore_infos(std::slice::from_ref(&wait_semaphore))
            .signal_semaphore_infos(std::slice::from_ref(&signal_semaphore))
            .command_buffer_infos(std::slice::from_ref(&command_buffer_info));
        unsafe {
            self.device
                .queue_submit2(self.queue, &[submit_info], acquired_frame.complete)
                .result()
                .map_err(|e| anyhow!("Cannot submit commands to queue: {e:?}"))?;
            self.swapchain
                .queue_present(&self.device, self.queue, frame.complete, acquired_frame.image_index)
                .result()
                .map_err(|e| anyhow!("Cannot present: {e:?}"))?;
        }

        Ok(())
    }
}

impl Drop for App {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle().result() {
                log::error!("Cannot wait for device before shutdown: {e:?}");
            }

            for mesh in self.meshes.drain(..) {
                self.orchestrator.unregister(&mesh);
            }
            self.orchestrator.destroy(&self.gpu);
            self.gpu.destroy();

            for frame in self.frames.iter() {
                self.device.destroy_semaphore(frame.complete, None);
            }
            self.device.destroy_fence(self.upload_fence, None);
            self.device.destroy_command_pool(self.frame_pool, None);
            self.device.destroy_command_pool(self.upload_pool, None);

            self.swapchain.destroy(&self.device);

            match self.allocator.write() {
                Ok(mut allocator) => allocator.destroy(),
                Err(_) => log::error!("Memory allocator lock is poisoned, leaking it"),
            }

            self.instance.destroy_surface_khr(self.surface, None);
            self.device.destroy_device(None);

            if let Some(debug_messenger) = self.debug_messenger {
                if !debug_messenger.is_null() {
                    self.instance.destroy_debug_utils_messenger_ext(debug_messenger, None);
                }
            }

            self.instance.destroy_instance(None);
        }
    }
}

/// Hands every object to the orchestrator and returns the handles that keep
/// them registered. They reach the kernel from the frame after the next one.
pub fn register_meshes<D: Device>(
    orchestrator: &mut FrameOrchestrator<D>,
    meshes: Vec<MeshObject>,
) -> Vec<SharedMeshObject> {
    meshes
        .into_iter()
        .map(|mesh| {
            let handle: SharedMeshObject = Arc::new(RwLock::new(mesh));
            orchestrator.register(handle.clone());
            handle
        })
        .collect()
}

fn read_kernel(path: &Path) -> anyhow::Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Cannot read compute kernel {}", path.display()))
}

/// A missing or unreadable sky texture falls back to a flat grey sky.
fn load_skybox(path: &Path) -> (Extent, Vec<u8>) {
    match image::open(path) {
        Ok(image) => {
            let rgba = image.to_rgba8();
            let extent = Extent::new(rgba.width(), rgba.height());
            log::info!("Loaded skybox {} ({}x{})", path.display(), extent.width, extent.height);
            (extent, rgba.into_raw())
        }
        Err(e) => {
            log::warn!("Cannot load skybox {}: {e}; using a flat sky", path.display());
            (Extent::new(1, 1), vec![128, 128, 128, 255])
        }
    }
}

#[cfg(test)]
mod tests {
    use accutrace_gpu::HeadlessDevice;
    use serde_json as js;

    use super::*;

    const EXTENT: Extent = Extent::new(32, 32);

    fn config_with_meshes() -> AppConfig {
        AppConfig::from_json(&js::json!({
            "scene": { "max_spheres": 4, "seed": 3 },
            "meshes": [
                { "positions": [[0, 0, 0], [1, 0, 0], [0, 1, 0]], "indices": [0, 1, 2] },
                {
                    "positions": [[0, 0, 0], [1, 0, 0], [0, 1, 0], [1, 1, 0]],
                    "indices": [0, 1, 2, 2, 1, 3],
                    "position": [0, 0, -10]
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_configured_meshes_reach_second_frame() {
        let device = HeadlessDevice::new();
        let config = config_with_meshes();
        let mut orchestrator = FrameOrchestrator::new(&device, config.scene).unwrap();
        let mut camera = config.camera;

        let meshes = register_meshes(&mut orchestrator, config.meshes);
        assert_eq!(meshes.len(), 2);
        assert_eq!(orchestrator.registry().len(), 2);

        orchestrator.render_frame(&device, &mut camera, EXTENT).unwrap();
        assert_eq!(device.last_dispatch().unwrap().mesh_object_count, 0);

        orchestrator.render_frame(&device, &mut camera, EXTENT).unwrap();
        let dispatch = device.last_dispatch().unwrap();
        assert_eq!(dispatch.mesh_object_count, 2);
        assert_eq!(dispatch.vertex_count, 7);
        assert_eq!(dispatch.index_count, 9);
    }

    #[test]
    fn test_unregistered_meshes_leave_the_scene() {
        let device = HeadlessDevice::new();
        let config = config_with_meshes();
        let mut orchestrator = FrameOrchestrator::new(&device, config.scene).unwrap();
        let mut camera = config.camera;
        let meshes = register_meshes(&mut orchestrator, config.meshes);
        orchestrator.render_frame(&device, &mut camera, EXTENT).unwrap();

        for mesh in &meshes {
            assert!(orchestrator.unregister(mesh));
        }
        orchestrator.render_frame(&device, &mut camera, EXTENT).unwrap();
        orchestrator.render_frame(&device, &mut camera, EXTENT).unwrap();
        assert_eq!(device.last_dispatch().unwrap().mesh_object_count, 0);

        orchestrator.destroy(&device);
        assert_eq!(device.live_buffers(), 0);
    }
}
