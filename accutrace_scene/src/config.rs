use anyhow::{bail, Context};
use serde_json as js;

use crate::json::{f32_or, to_vec2, u64_or};

/// Settings for procedural scene generation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SceneConfig {
    /// Minimum and maximum sphere radius.
    pub sphere_radius:    [f32; 2],
    pub max_spheres:      usize,
    pub placement_radius: f32,
    pub seed:             u64,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self { sphere_radius: [3.0, 8.0], max_spheres: 100, placement_radius: 100.0, seed: 0 }
    }
}

impl SceneConfig {
    /// Reads the `"scene"` section shape: every key is optional.
    ///
    /// ```json
    /// { "sphere_radius": [3, 8], "max_spheres": 100, "placement_radius": 100, "seed": 0 }
    /// ```
    pub fn from_json(object: &js::Value) -> anyhow::Result<Self> {
        let defaults = Self::default();
        let sphere_radius = match &object["sphere_radius"] {
            js::Value::Null => defaults.sphere_radius,
            value => {
                let range = to_vec2(value).context("Invalid 'sphere_radius'")?;
                [range.x, range.y]
            }
        };

        let config = Self {
            sphere_radius,
            max_spheres: u64_or(object, "max_spheres", defaults.max_spheres as u64)? as usize,
            placement_radius: f32_or(object, "placement_radius", defaults.placement_radius)?,
            seed: u64_or(object, "seed", defaults.seed)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let [min, max] = self.sphere_radius;
        if !(min > 0.0 && min <= max) {
            bail!("Sphere radius range [{min}, {max}] must be positive and ordered");
        }
        if self.placement_radius < 0.0 {
            bail!("Placement radius must not be negative, got {}", self.placement_radius);
        }
        Ok(())
    }
}
