pub mod device;
pub mod headless;
pub mod kernel;
pub mod structured;
pub mod vulkan;

pub use device::{Device, DeviceError, Extent};
pub use headless::HeadlessDevice;
pub use kernel::{FrameParams, KernelBindings, WorkGroups};
pub use structured::StructuredBuffer;
