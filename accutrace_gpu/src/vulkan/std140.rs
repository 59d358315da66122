#![allow(clippy::no_effect)]

use nalgebra_glm as glm;
use std140::*;

use crate::kernel::FrameParams;

/// Uniform block read by the tracing kernel at binding 5.
#[repr_std140]
#[derive(Copy, Clone, Debug)]
pub struct FrameUniforms {
    pub camera_to_world:    mat4x4,
    pub inverse_projection: mat4x4,
    pub pixel_offset:       vec2,
    pub seed:               float,
}

impl From<&FrameParams> for FrameUniforms {
    fn from(params: &FrameParams) -> Self {
        Self {
            camera_to_world:    to_mat4x4(&params.camera_to_world),
            inverse_projection: to_mat4x4(&params.inverse_projection),
            pixel_offset:       to_vec2(&params.pixel_offset),
            seed:               float(params.seed),
        }
    }
}

pub fn to_vec2(v: &glm::Vec2) -> vec2 {
    vec2(v[0], v[1])
}

pub fn to_mat4x4(m: &glm::Mat4) -> mat4x4 {
    mat4x4(
        vec4(m[(0, 0)], m[(1, 0)], m[(2, 0)], m[(3, 0)]),
        vec4(m[(0, 1)], m[(1, 1)], m[(2, 1)], m[(3, 1)]),
        vec4(m[(0, 2)], m[(1, 2)], m[(2, 2)], m[(3, 2)]),
        vec4(m[(0, 3)], m[(1, 3)], m[(2, 3)], m[(3, 3)]),
    )
}
