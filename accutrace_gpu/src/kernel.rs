use nalgebra_glm as glm;
use num_integer::Integer;

use crate::device::{Device, Extent};

/// Local size of the tracing and blending kernels in both dimensions.
pub const WORKGROUP_SIZE: u32 = 8;

/// Per-frame kernel parameters that change every dispatch.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FrameParams {
    pub camera_to_world:    glm::Mat4,
    pub inverse_projection: glm::Mat4,
    /// Sub-pixel jitter, both components in `[0, 1)`.
    pub pixel_offset:       glm::Vec2,
    pub seed:               f32,
}

impl Default for FrameParams {
    fn default() -> Self {
        Self {
            camera_to_world:    glm::identity(),
            inverse_projection: glm::identity(),
            pixel_offset:       glm::vec2(0.5, 0.5),
            seed:               0.0,
        }
    }
}

/// Resources bound to the tracing kernel for one dispatch.
///
/// Scene buffers are `None` when the corresponding list is empty; the kernel
/// treats them as holding zero records.
pub struct KernelBindings<'a, D: Device + ?Sized> {
    pub spheres:      Option<&'a D::Buffer>,
    pub mesh_objects: Option<&'a D::Buffer>,
    pub vertices:     Option<&'a D::Buffer>,
    pub indices:      Option<&'a D::Buffer>,
    pub params:       &'a FrameParams,
    pub target:       &'a mut D::Image,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WorkGroups {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl WorkGroups {
    /// Smallest 2D grid of 8x8 groups that covers every pixel of `extent`.
    pub fn covering(extent: Extent) -> Self {
        Self {
            x: Integer::div_ceil(&extent.width, &WORKGROUP_SIZE),
            y: Integer::div_ceil(&extent.height, &WORKGROUP_SIZE),
            z: 1,
        }
    }
}
