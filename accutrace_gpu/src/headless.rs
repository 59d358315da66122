//! CPU stand-in for a GPU.
//!
//! Buffers are byte vectors and images are pixel vectors. New images start out
//! as NaN, like uninitialised device memory can. The tracing kernel is
//! replaced by a closure that produces one colour per dispatch, which is
//! written to every pixel of the target. Every dispatch is recorded so callers
//! can inspect what the kernel would have seen.

use std::cell::{Cell, RefCell};

use bytemuck::Pod;

use crate::{
    device::{Device, DeviceError, Extent},
    kernel::{FrameParams, KernelBindings, WorkGroups},
};

pub type Pixel = [f32; 4];

type KernelFn = dyn FnMut(&FrameParams, usize) -> Pixel;

pub struct HeadlessBuffer {
    id:     u64,
    count:  usize,
    stride: usize,
    bytes:  Vec<u8>,
}

impl HeadlessBuffer {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn stride(&self) -> usize {
        self.stride
    }
}

pub struct HeadlessImage {
    id:     u64,
    extent: Extent,
    pixels: Vec<Pixel>,
}

impl HeadlessImage {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    pub fn fill(&mut self, pixel: Pixel) {
        self.pixels.fill(pixel);
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub buffers_created:   usize,
    pub buffers_destroyed: usize,
    pub buffer_writes:     usize,
    pub images_created:    usize,
    pub images_destroyed:  usize,
    pub blends:            usize,
}

/// What the kernel was given for one dispatch.
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchRecord {
    pub groups:            WorkGroups,
    pub extent:            Extent,
    pub params:            FrameParams,
    pub sphere_count:      usize,
    pub mesh_object_count: usize,
    pub vertex_count:      usize,
    pub index_count:       usize,
}

pub struct HeadlessDevice {
    next_id:                Cell<u64>,
    stats:                  Cell<HeadlessStats>,
    dispatches:             RefCell<Vec<DispatchRecord>>,
    kernel:                 RefCell<Box<KernelFn>>,
    fail_image_allocations: Cell<bool>,
    buffer_allocations:     Cell<Option<usize>>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    /// A device whose kernel writes the frame seed into every channel.
    pub fn new() -> Self {
        Self::with_kernel(|params, _| [params.seed; 4])
    }

    /// `kernel` receives the frame parameters and the index of the dispatch.
    pub fn with_kernel<F>(kernel: F) -> Self
    where
        F: FnMut(&FrameParams, usize) -> Pixel + 'static,
    {
        Self {
            next_id:                Cell::new(1),
            stats:                  Cell::new(HeadlessStats::default()),
            dispatches:             RefCell::new(Vec::new()),
            kernel:                 RefCell::new(Box::new(kernel)),
            fail_image_allocations: Cell::new(false),
            buffer_allocations:     Cell::new(None),
        }
    }

    /// Makes every following image allocation report out-of-memory.
    pub fn fail_image_allocations(&self, fail: bool) {
        self.fail_image_allocations.set(fail);
    }

    /// Lets only `limit` more buffer allocations succeed; `None` lifts the limit.
    pub fn limit_buffer_allocations(&self, limit: Option<usize>) {
        self.buffer_allocations.set(limit);
    }

    pub fn stats(&self) -> HeadlessStats {
        self.stats.get()
    }

    pub fn live_buffers(&self) -> usize {
        let stats = self.stats.get();
        stats.buffers_created - stats.buffers_destroyed
    }

    pub fn live_images(&self) -> usize {
        let stats = self.stats.get();
        stats.images_created - stats.images_destroyed
    }

    pub fn dispatches(&self) -> Vec<DispatchRecord> {
        self.dispatches.borrow().clone()
    }

    pub fn last_dispatch(&self) -> Option<DispatchRecord> {
        self.dispatches.borrow().last().cloned()
    }

    /// Reads a buffer back as records of `T`.
    pub fn buffer_data<T: Pod>(&self, buffer: &HeadlessBuffer) -> Vec<T> {
        bytemuck::pod_collect_to_vec(&buffer.bytes)
    }

    fn next_id(&self) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        id
    }

    fn update_stats(&self, update: impl FnOnce(&mut HeadlessStats)) {
        let mut stats = self.stats.get();
        update(&mut stats);
        self.stats.set(stats);
    }
}

impl Device for HeadlessDevice {
    type Buffer = HeadlessBuffer;
    type Image = HeadlessImage;

    fn create_buffer(&self, count: usize, stride: usize) -> Result<HeadlessBuffer, DeviceError> {
        if count == 0 || stride == 0 {
            return Err(DeviceError::ZeroSized { what: "buffer" });
        }
        match self.buffer_allocations.get() {
            Some(0) => return Err(DeviceError::OutOfMemory { what: "buffer" }),
            Some(left) => self.buffer_allocations.set(Some(left - 1)),
            None => {}
        }
        self.update_stats(|s| s.buffers_created += 1);
        Ok(HeadlessBuffer { id: self.next_id(), count, stride, bytes: vec![0; count * stride] })
    }

    fn write_buffer(&self, buffer: &mut HeadlessBuffer, data: &[u8]) -> Result<(), DeviceError> {
        if data.len() != buffer.bytes.len() {
            return Err(DeviceError::SizeMismatch { expected: buffer.bytes.len(), actual: data.len() });
        }
        buffer.bytes.copy_from_slice(data);
        self.update_stats(|s| s.buffer_writes += 1);
        Ok(())
    }

    fn destroy_buffer(&self, _buffer: HeadlessBuffer) {
        self.update_stats(|s| s.buffers_destroyed += 1);
    }

    fn create_image(&self, extent: Extent) -> Result<HeadlessImage, DeviceError> {
        if extent.is_empty() {
            return Err(DeviceError::ZeroSized { what: "image" });
        }
        if self.fail_image_allocations.get() {
            return Err(DeviceError::OutOfMemory { what: "render target" });
        }
        self.update_stats(|s| s.images_created += 1);
        Ok(HeadlessImage { id: self.next_id(), extent, pixels: vec![[f32::NAN; 4]; extent.pixel_count()] })
    }

    fn image_extent(&self, image: &HeadlessImage) -> Extent {
        image.extent
    }

    fn destroy_image(&self, _image: HeadlessImage) {
        self.update_stats(|s| s.images_destroyed += 1);
    }

    fn dispatch(&self, bindings: KernelBindings<'_, Self>, groups: WorkGroups) -> Result<(), DeviceError> {
        let index = self.dispatches.borrow().len();
        let colour = {
            let mut kernel = self.kernel.borrow_mut();
            (*kernel)(bindings.params, index)
        };
        bindings.target.pixels.fill(colour);

        let count = |buffer: Option<&HeadlessBuffer>| buffer.map_or(0, |b| b.count);
        self.dispatches.borrow_mut().push(DispatchRecord {
            groups,
            extent: bindings.target.extent,
            params: *bindings.params,
            sphere_count: count(bindings.spheres),
            mesh_object_count: count(bindings.mesh_objects),
            vertex_count: count(bindings.vertices),
            index_count: count(bindings.indices),
        });
        Ok(())
    }

    fn blend(&self, raw: &HeadlessImage, converged: &mut HeadlessImage, sample: u32) -> Result<(), DeviceError> {
        if raw.extent != converged.extent {
            return Err(DeviceError::Backend(format!(
                "cannot blend {:?} into {:?}",
                raw.extent, converged.extent
            )));
        }
        if sample == 0 {
            converged.pixels.copy_from_slice(&raw.pixels);
            self.update_stats(|s| s.blends += 1);
            return Ok(());
        }
        let alpha = 1.0 / (sample as f32 + 1.0);
        for (dst, src) in converged.pixels.iter_mut().zip(raw.pixels.iter()) {
            for (d, s) in dst.iter_mut().zip(src.iter()) {
                *d = *d * (1.0 - alpha) + *s * alpha;
            }
        }
        self.update_stats(|s| s.blends += 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_must_match_allocation() {
        let device = HeadlessDevice::new();
        let mut buffer = device.create_buffer(2, 4).unwrap();
        let result = device.write_buffer(&mut buffer, &[0u8; 12]);
        assert!(matches!(result, Err(DeviceError::SizeMismatch { expected: 8, actual: 12 })));
    }

    #[test]
    fn test_blend_first_sample_replaces() {
        let device = HeadlessDevice::new();
        let mut raw = device.create_image(Extent::new(2, 2)).unwrap();
        let mut converged = device.create_image(Extent::new(2, 2)).unwrap();
        raw.pixels.fill([0.25, 0.5, 0.75, 1.0]);
        converged.pixels.fill([9.0; 4]);

        device.blend(&raw, &mut converged, 0).unwrap();
        assert!(converged.pixels().iter().all(|p| *p == [0.25, 0.5, 0.75, 1.0]));
    }

    #[test]
    fn test_first_blend_ignores_uninitialised_target() {
        let device = HeadlessDevice::new();
        let mut raw = device.create_image(Extent::new(2, 1)).unwrap();
        let mut converged = device.create_image(Extent::new(2, 1)).unwrap();
        assert!(converged.pixels().iter().all(|p| p[0].is_nan()));

        raw.pixels.fill([0.5; 4]);
        device.blend(&raw, &mut converged, 0).unwrap();
        raw.pixels.fill([1.5; 4]);
        device.blend(&raw, &mut converged, 1).unwrap();
        assert!(converged.pixels().iter().all(|p| *p == [1.0; 4]));
    }

    #[test]
    fn test_buffer_allocation_limit() {
        let device = HeadlessDevice::new();
        device.limit_buffer_allocations(Some(1));
        assert!(device.create_buffer(1, 4).is_ok());
        assert!(matches!(device.create_buffer(1, 4), Err(DeviceError::OutOfMemory { .. })));
        device.limit_buffer_allocations(None);
        assert!(device.create_buffer(1, 4).is_ok());
    }

    #[test]
    fn test_blend_weights_by_sample() {
        let device = HeadlessDevice::new();
        let mut raw = device.create_image(Extent::new(1, 1)).unwrap();
        let mut converged = device.create_image(Extent::new(1, 1)).unwrap();
        converged.pixels.fill([1.0; 4]);
        raw.pixels.fill([4.0; 4]);

        device.blend(&raw, &mut converged, 2).unwrap();
        assert!((converged.pixels()[0][0] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_failed_image_allocation() {
        let device = HeadlessDevice::new();
        device.fail_image_allocations(true);
        let result = device.create_image(Extent::new(4, 4));
        assert!(matches!(result, Err(DeviceError::OutOfMemory { .. })));
        assert_eq!(device.live_images(), 0);
    }
}
