use bytemuck::Pod;

use crate::device::{Device, DeviceError};

/// A device buffer of fixed-stride records that is kept in step with a host-side list.
///
/// The allocation's element count and stride always match the last data
/// reconciled into it. An empty list leaves the buffer released.
pub struct StructuredBuffer<D: Device> {
    buffer: Option<D::Buffer>,
    count:  usize,
    stride: usize,
}

impl<D: Device> Default for StructuredBuffer<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Device> StructuredBuffer<D> {
    pub fn new() -> Self {
        Self { buffer: None, count: 0, stride: 0 }
    }

    /// Allocates a buffer sized exactly to `data` and uploads it.
    pub fn with_data<T: Pod>(device: &D, data: &[T]) -> Result<Self, DeviceError> {
        let mut this = Self::new();
        this.reconcile(device, data)?;
        Ok(this)
    }

    /// Makes the device buffer hold exactly `data`.
    ///
    /// A buffer whose count or stride no longer matches is released first. A new
    /// one is allocated only when there is something to upload.
    pub fn reconcile<T: Pod>(&mut self, device: &D, data: &[T]) -> Result<(), DeviceError> {
        let stride = std::mem::size_of::<T>();

        if self.buffer.is_some() && (data.is_empty() || self.count != data.len() || self.stride != stride) {
            self.release(device);
        }

        if data.is_empty() {
            return Ok(());
        }

        if self.buffer.is_none() {
            self.buffer = Some(device.create_buffer(data.len(), stride)?);
            self.count = data.len();
            self.stride = stride;
        }

        match self.buffer.as_mut() {
            Some(buffer) => device.write_buffer(buffer, bytemuck::cast_slice(data)),
            None => Ok(()),
        }
    }

    pub fn release(&mut self, device: &D) {
        if let Some(buffer) = self.buffer.take() {
            device.destroy_buffer(buffer);
        }
        self.count = 0;
        self.stride = 0;
    }

    pub fn get(&self) -> Option<&D::Buffer> {
        self.buffer.as_ref()
    }

    pub fn is_allocated(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn stride(&self) -> usize {
        self.stride
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HeadlessDevice;

    #[test]
    fn test_empty_data_allocates_nothing() {
        let device = HeadlessDevice::new();
        let mut buffer = StructuredBuffer::<HeadlessDevice>::new();
        buffer.reconcile::<u32>(&device, &[]).unwrap();
        assert!(!buffer.is_allocated());
        assert_eq!(device.stats().buffers_created, 0);
    }

    #[test]
    fn test_same_shape_reuses_allocation() {
        let device = HeadlessDevice::new();
        let mut buffer = StructuredBuffer::new();
        buffer.reconcile(&device, &[1u32, 2, 3]).unwrap();
        buffer.reconcile(&device, &[4u32, 5, 6]).unwrap();

        let stats = device.stats();
        assert_eq!(stats.buffers_created, 1);
        assert_eq!(stats.buffers_destroyed, 0);
        assert_eq!(stats.buffer_writes, 2);
        assert_eq!(device.buffer_data::<u32>(buffer.get().unwrap()), vec![4, 5, 6]);
    }

    #[test]
    fn test_count_change_reallocates() {
        let device = HeadlessDevice::new();
        let mut buffer = StructuredBuffer::new();
        buffer.reconcile(&device, &[1u32, 2, 3]).unwrap();
        buffer.reconcile(&device, &[1u32, 2, 3, 4]).unwrap();

        let stats = device.stats();
        assert_eq!(stats.buffers_created, 2);
        assert_eq!(stats.buffers_destroyed, 1);
        assert_eq!(buffer.count(), 4);
        assert_eq!(device.live_buffers(), 1);
    }

    #[test]
    fn test_stride_change_reallocates() {
        let device = HeadlessDevice::new();
        let mut buffer = StructuredBuffer::new();
        buffer.reconcile(&device, &[1u32, 2]).unwrap();
        buffer.reconcile(&device, &[[1.0f32; 3], [2.0; 3]]).unwrap();

        assert_eq!(buffer.stride(), 12);
        assert_eq!(buffer.count(), 2);
        assert_eq!(device.stats().buffers_created, 2);
        assert_eq!(device.live_buffers(), 1);
    }

    #[test]
    fn test_emptying_releases_buffer() {
        let device = HeadlessDevice::new();
        let mut buffer = StructuredBuffer::new();
        buffer.reconcile(&device, &[7u32]).unwrap();
        buffer.reconcile::<u32>(&device, &[]).unwrap();

        assert!(!buffer.is_allocated());
        assert_eq!(buffer.count(), 0);
        assert_eq!(device.live_buffers(), 0);
    }
}
