use std::sync::{Arc, RwLock};

use erupt::vk;
use vk_mem_erupt as vma;

use crate::DeviceError;

/// Host-visible buffer of `count` records, `stride` bytes each.
#[derive(Clone)]
pub struct AllocatedBuffer {
    pub buffer: vk::Buffer,
    pub size:   vk::DeviceSize,
    pub count:  usize,
    pub stride: usize,

    allocator:           Arc<RwLock<vma::Allocator>>,
    allocation:          vma::Allocation,
    pub allocation_info: vma::AllocationInfo,
}

impl AllocatedBuffer {
    pub fn new(
        allocator: Arc<RwLock<vma::Allocator>>,
        usage: vk::BufferUsageFlags,
        count: usize,
        stride: usize,
    ) -> Result<Self, DeviceError> {
        if count == 0 || stride == 0 {
            return Err(DeviceError::ZeroSized { what: "buffer" });
        }

        let buffer_info = vk::BufferCreateInfoBuilder::new()
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .size((count * stride) as vk::DeviceSize);
        let allocation_create_info =
            vma::AllocationCreateInfo { usage: vma::MemoryUsage::CpuToGpu, ..Default::default() };

        let (buffer, allocation, allocation_info) = allocator
            .read()
            .map_err(|_| DeviceError::Backend("Memory allocator lock is poisoned".to_string()))?
            .create_buffer(&buffer_info, &allocation_create_info)
            .map_err(|e| {
                log::error!("Cannot allocate {count} x {stride} byte buffer: {e:?}");
                DeviceError::OutOfMemory { what: "buffer" }
            })?;

        Ok(Self {
            buffer,
            size: buffer_info.size,
            count,
            stride,
            allocator,
            allocation,
            allocation_info,
        })
    }

    pub fn with_data(
        allocator: Arc<RwLock<vma::Allocator>>,
        usage: vk::BufferUsageFlags,
        stride: usize,
        data: &[u8],
    ) -> Result<Self, DeviceError> {
        let this = Self::new(allocator, usage, data.len() / stride.max(1), stride)?;
        this.set_data(data)?;
        Ok(this)
    }

    pub fn set_data(&self, data: &[u8]) -> Result<(), DeviceError> {
        if data.len() as vk::DeviceSize != self.size {
            return Err(DeviceError::SizeMismatch { expected: self.size as usize, actual: data.len() });
        }

        let allocator = self
            .allocator
            .read()
            .map_err(|_| DeviceError::Backend("Memory allocator lock is poisoned".to_string()))?;
        let buffer_addr = allocator
            .map_memory(&self.allocation)
            .map_err(|e| DeviceError::Backend(format!("Cannot map allocated memory: {e:?}")))?;
        if buffer_addr.is_null() {
            return Err(DeviceError::Backend("Mapped buffer address is null".to_string()));
        }
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), buffer_addr, data.len());
        }
        allocator.unmap_memory(&self.allocation);
        allocator.flush_allocation(&self.allocation, 0, data.len());
        Ok(())
    }

    pub fn destroy(&self) {
        if let Ok(allocator) = self.allocator.read() {
            allocator.destroy_buffer(self.buffer, &self.allocation);
        }
    }
}
