use crate::kernel::{KernelBindings, WorkGroups};

/// Size of a render target in pixels.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Extent {
    pub width:  u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("out of device memory while allocating {what}")]
    OutOfMemory { what: &'static str },

    #[error("cannot allocate zero-sized {what}")]
    ZeroSized { what: &'static str },

    #[error("upload of {actual} bytes does not fit a buffer of {expected} bytes")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("{0}")]
    Backend(String),
}

/// Everything the renderer needs from a GPU.
///
/// Buffers are flat arrays of `count` records of `stride` bytes each; images are
/// RGBA32F storage targets. `dispatch` and `blend` are scoped: when they return,
/// the work they describe is complete and every resource they read may be
/// released.
pub trait Device {
    type Buffer;
    type Image;

    fn create_buffer(&self, count: usize, stride: usize) -> Result<Self::Buffer, DeviceError>;
    fn write_buffer(&self, buffer: &mut Self::Buffer, data: &[u8]) -> Result<(), DeviceError>;
    fn destroy_buffer(&self, buffer: Self::Buffer);

    fn create_image(&self, extent: Extent) -> Result<Self::Image, DeviceError>;
    fn image_extent(&self, image: &Self::Image) -> Extent;
    fn destroy_image(&self, image: Self::Image);

    /// Runs the ray tracing kernel, writing one sample per pixel into `bindings.target`.
    fn dispatch(&self, bindings: KernelBindings<'_, Self>, groups: WorkGroups) -> Result<(), DeviceError>;

    /// Folds `raw` into `converged` with weight `1 / (sample + 1)`.
    fn blend(&self, raw: &Self::Image, converged: &mut Self::Image, sample: u32) -> Result<(), DeviceError>;
}
