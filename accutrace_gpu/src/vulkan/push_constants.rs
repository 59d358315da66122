#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct TracePushConstants {
    pub sphere_count:      u32,
    pub mesh_object_count: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default)]
pub struct BlendPushConstants {
    pub sample: f32,
}
