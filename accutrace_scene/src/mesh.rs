use std::sync::Arc;

use anyhow::{bail, Context};
use bytemuck::{Pod, Zeroable};
use nalgebra_glm as glm;
use serde_json as js;

use crate::json::{f32_or, to_vec3};

/// Triangle mesh in object space.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    pub positions: Vec<glm::Vec3>,
    pub indices:   Vec<u32>,
}

impl Mesh {
    pub fn new(positions: Vec<glm::Vec3>, indices: Vec<u32>) -> Self {
        Self { positions, indices }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    /// Checks that the indices form whole triangles over this mesh's own vertices.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.index_count() % 3 != 0 {
            bail!("{} indices do not form whole triangles", self.index_count());
        }
        if let Some(&index) = self.indices.iter().find(|&&i| i as usize >= self.vertex_count()) {
            bail!("Index {index} is out of range for {} vertices", self.vertex_count());
        }
        Ok(())
    }

    /// `{ "positions": [[x, y, z], ...], "indices": [a, b, c, ...] }`
    pub fn from_json(object: &js::Value) -> anyhow::Result<Self> {
        let positions = object["positions"]
            .as_array()
            .context("'positions' must be an array of points")?
            .iter()
            .map(to_vec3)
            .collect::<anyhow::Result<Vec<_>>>()
            .context("Invalid mesh position")?;
        let indices = object["indices"]
            .as_array()
            .context("'indices' must be an array")?
            .iter()
            .map(|i| {
                i.as_u64()
                    .and_then(|i| u32::try_from(i).ok())
                    .with_context(|| format!("{i} is not a valid vertex index"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mesh = Self::new(positions, indices);
        mesh.validate()?;
        Ok(mesh)
    }
}

/// A placed instance of a mesh. Several objects may share one mesh.
#[derive(Clone, Debug)]
pub struct MeshObject {
    pub mesh:      Arc<Mesh>,
    pub transform: glm::Mat4,
}

impl MeshObject {
    pub fn new(mesh: Arc<Mesh>, transform: glm::Mat4) -> Self {
        Self { mesh, transform }
    }

    /// Mesh keys plus optional `position` (3 numbers), `yaw` in degrees and
    /// uniform `scale`.
    pub fn from_json(object: &js::Value) -> anyhow::Result<Self> {
        let mesh = Mesh::from_json(object)?;
        let position = match &object["position"] {
            js::Value::Null => glm::Vec3::zeros(),
            value => to_vec3(value).context("Invalid mesh object position")?,
        };
        let yaw = f32_or(object, "yaw", 0.0)?;
        let scale = f32_or(object, "scale", 1.0)?;
        if scale <= 0.0 {
            bail!("Mesh object scale must be positive, got {scale}");
        }

        let transform = glm::translation(&position)
            * glm::rotation(yaw.to_radians(), &glm::vec3(0.0, 1.0, 0.0))
            * glm::scaling(&glm::vec3(scale, scale, scale));
        Ok(Self::new(Arc::new(mesh), transform))
    }

    pub fn local_to_world(&self) -> glm::Mat4 {
        self.transform
    }
}

/// Per-object metadata the tracing kernel reads (72 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct MeshObjectRecord {
    /// Column-major.
    pub local_to_world: [[f32; 4]; 4],
    pub indices_offset: i32,
    pub indices_count:  i32,
}

impl MeshObjectRecord {
    pub fn new(local_to_world: &glm::Mat4, indices_offset: usize, indices_count: usize) -> anyhow::Result<Self> {
        let mut columns = [[0.0; 4]; 4];
        for (c, column) in columns.iter_mut().enumerate() {
            for (r, value) in column.iter_mut().enumerate() {
                *value = local_to_world[(r, c)];
            }
        }
        Ok(Self {
            local_to_world: columns,
            indices_offset: i32::try_from(indices_offset).context("Index offset does not fit the kernel's i32")?,
            indices_count:  i32::try_from(indices_count).context("Index count does not fit the kernel's i32")?,
        })
    }

    pub fn transform(&self) -> glm::Mat4 {
        glm::make_mat4(bytemuck::cast_slice::<[f32; 4], f32>(&self.local_to_world))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Mesh {
        Mesh::new(vec![glm::vec3(0.0, 0.0, 0.0), glm::vec3(1.0, 0.0, 0.0), glm::vec3(0.0, 1.0, 0.0)], vec![0, 1, 2])
    }

    #[test]
    fn test_record_layout() {
        assert_eq!(std::mem::size_of::<MeshObjectRecord>(), 72);
    }

    #[test]
    fn test_validate() {
        assert!(triangle().validate().is_ok());
        assert!(Mesh::default().validate().is_ok());

        let out_of_range = Mesh::new(triangle().positions, vec![0, 1, 3]);
        assert!(out_of_range.validate().is_err());
        let partial = Mesh::new(triangle().positions, vec![0, 1, 2, 2]);
        assert!(partial.validate().is_err());
    }

    #[test]
    fn test_record_is_column_major() {
        let transform = glm::translation(&glm::vec3(1.0, 2.0, 3.0));
        let record = MeshObjectRecord::new(&transform, 9, 6).unwrap();
        assert_eq!(record.local_to_world[3], [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(record.indices_offset, 9);
        assert_eq!(record.indices_count, 6);
        assert_eq!(record.transform(), transform);
    }

    #[test]
    fn test_record_rejects_offsets_past_i32() {
        let transform: glm::Mat4 = glm::identity();
        assert!(MeshObjectRecord::new(&transform, i32::MAX as usize + 1, 3).is_err());
        assert!(MeshObjectRecord::new(&transform, 0, i32::MAX as usize + 1).is_err());
    }

    #[test]
    fn test_object_from_json() {
        let object = MeshObject::from_json(&js::json!({
            "positions": [[0, 0, 0], [1, 0, 0], [0, 1, 0]],
            "indices": [0, 1, 2],
            "position": [5, 0, -2],
            "scale": 2
        }))
        .unwrap();
        assert_eq!(*object.mesh, triangle());
        let moved = object.local_to_world() * glm::vec4(1.0, 0.0, 0.0, 1.0);
        assert!(glm::distance(&moved.xyz(), &glm::vec3(7.0, 0.0, -2.0)) < 1e-5);
    }

    #[test]
    fn test_malformed_json_mesh_is_rejected() {
        let bad_index = js::json!({ "positions": [[0, 0, 0], [1, 0, 0], [0, 1, 0]], "indices": [0, 1, 5] });
        assert!(MeshObject::from_json(&bad_index).is_err());
        let negative = js::json!({ "positions": [[0, 0, 0]], "indices": [0, 0, -1] });
        assert!(MeshObject::from_json(&negative).is_err());
        assert!(MeshObject::from_json(&js::json!({ "indices": [] })).is_err());
        let flat = js::json!({ "positions": [[0, 0, 0], [1, 0, 0], [0, 1, 0]], "indices": [0, 1, 2], "scale": 0 });
        assert!(MeshObject::from_json(&flat).is_err());
    }
}
