use bytemuck::{Pod, Zeroable};
use nalgebra_glm as glm;

use crate::{config::SceneConfig, rng::Pcg32};

/// One sphere as the tracing kernel reads it (56 bytes, std430 compatible).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Sphere {
    pub position:   [f32; 3],
    pub radius:     f32,
    pub albedo:     [f32; 3],
    pub specular:   [f32; 3],
    pub smoothness: f32,
    pub emission:   [f32; 3],
}

impl Sphere {
    pub fn centre(&self) -> glm::Vec3 {
        glm::make_vec3(&self.position)
    }

    pub fn overlaps(&self, other: &Sphere) -> bool {
        let min_distance = self.radius + other.radius;
        glm::distance2(&self.centre(), &other.centre()) < min_distance * min_distance
    }
}

/// Scatters non-overlapping spheres on the ground plane inside a disk.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SphereSceneGenerator {
    pub count:            usize,
    pub radius_range:     [f32; 2],
    pub placement_radius: f32,
}

impl From<&SceneConfig> for SphereSceneGenerator {
    fn from(config: &SceneConfig) -> Self {
        Self {
            count:            config.max_spheres,
            radius_range:     config.sphere_radius,
            placement_radius: config.placement_radius,
        }
    }
}

impl SphereSceneGenerator {
    /// Produces at most `count` spheres. Candidates that would intersect an
    /// already accepted sphere are dropped without retrying, so the result is
    /// often shorter. The output depends only on `seed` and the settings.
    pub fn generate(&self, seed: u64) -> Vec<Sphere> {
        let mut rng = Pcg32::new(0, seed);
        let [min_radius, max_radius] = self.radius_range;
        let mut spheres: Vec<Sphere> = Vec::with_capacity(self.count);

        for _ in 0..self.count {
            let disk = sample_disk(&mut rng, self.placement_radius);
            let radius = rng.range(min_radius, max_radius);
            let candidate = Sphere { position: [disk.x, radius, disk.y], radius, ..Default::default() };

            if spheres.iter().any(|accepted| accepted.overlaps(&candidate)) {
                continue;
            }

            spheres.push(with_material(candidate, &mut rng));
        }

        log::info!("Generated {} of {} spheres (seed {seed})", spheres.len(), self.count);
        spheres
    }
}

pub fn generate(seed: u64, count: usize, radius_range: [f32; 2], placement_radius: f32) -> Vec<Sphere> {
    SphereSceneGenerator { count, radius_range, placement_radius }.generate(seed)
}

fn sample_disk(rng: &mut Pcg32, radius: f32) -> glm::Vec2 {
    let r = radius * rng.next_f32().sqrt();
    let theta = 2.0 * std::f32::consts::PI * rng.next_f32();
    glm::vec2(r * theta.cos(), r * theta.sin())
}

fn with_material(mut sphere: Sphere, rng: &mut Pcg32) -> Sphere {
    let hue = rng.next_f32();
    let saturation = rng.next_f32();
    let value = rng.next_f32();
    let colour = hsv_to_rgb(hue, saturation, value);

    let metal = rng.next_f32() < 0.5;
    if metal {
        sphere.albedo = [0.0; 3];
        sphere.specular = colour;
    } else {
        sphere.albedo = colour;
        sphere.specular = [0.04; 3];
    }

    sphere.smoothness = if rng.next_f32() < 0.1 { 0.0 } else { rng.next_f32() };
    sphere.emission = if rng.next_f32() < 0.35 { sphere.albedo } else { [0.05; 3] };
    sphere
}

/// `h`, `s` and `v` in `[0, 1]`.
pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [f32; 3] {
    let sector = (h.fract() * 6.0).floor();
    let f = h.fract() * 6.0 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - f * s);
    let t = v * (1.0 - (1.0 - f) * s);
    match sector as u32 {
        0 => [v, t, p],
        1 => [q, v, p],
        2 => [p, v, t],
        3 => [p, q, v],
        4 => [t, p, v],
        _ => [v, p, q],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: [f32; 3], b: [f32; 3]) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-5)
    }

    #[test]
    fn test_sphere_layout() {
        assert_eq!(std::mem::size_of::<Sphere>(), 56);
    }

    #[test]
    fn test_generation_is_deterministic() {
        let a = generate(42, 10, [3.0, 8.0], 100.0);
        let b = generate(42, 10, [3.0, 8.0], 100.0);
        assert!(!a.is_empty());
        assert_eq!(bytemuck::cast_slice::<Sphere, u8>(&a), bytemuck::cast_slice::<Sphere, u8>(&b));
    }

    #[test]
    fn test_seeds_differ() {
        let a = generate(1, 20, [3.0, 8.0], 100.0);
        let b = generate(2, 20, [3.0, 8.0], 100.0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_spheres_never_overlap() {
        let spheres = generate(7, 500, [3.0, 8.0], 60.0);
        assert!(spheres.len() < 500);
        for (i, a) in spheres.iter().enumerate() {
            for b in &spheres[i + 1..] {
                let distance = glm::distance(&a.centre(), &b.centre());
                assert!(distance + 1e-4 >= a.radius + b.radius);
            }
        }
    }

    #[test]
    fn test_placement_and_radius() {
        for sphere in generate(3, 100, [3.0, 8.0], 100.0) {
            assert!((3.0..8.0).contains(&sphere.radius));
            assert_eq!(sphere.position[1], sphere.radius);
            let [x, _, z] = sphere.position;
            assert!(x * x + z * z <= 100.0 * 100.0 + 1e-2);
        }
    }

    #[test]
    fn test_materials_follow_rules() {
        for sphere in generate(11, 200, [1.0, 2.0], 200.0) {
            let metal = sphere.albedo == [0.0; 3];
            if !metal {
                assert_eq!(sphere.specular, [0.04; 3]);
            }
            assert!((0.0..1.0).contains(&sphere.smoothness));
            assert!(sphere.emission == sphere.albedo || sphere.emission == [0.05; 3]);
        }
    }

    #[test]
    fn test_zero_count_is_empty() {
        assert!(generate(0, 0, [3.0, 8.0], 100.0).is_empty());
    }

    #[test]
    fn test_hsv_primaries() {
        assert!(approx(hsv_to_rgb(0.0, 1.0, 1.0), [1.0, 0.0, 0.0]));
        assert!(approx(hsv_to_rgb(1.0 / 3.0, 1.0, 1.0), [0.0, 1.0, 0.0]));
        assert!(approx(hsv_to_rgb(2.0 / 3.0, 1.0, 1.0), [0.0, 0.0, 1.0]));
        assert!(approx(hsv_to_rgb(0.5, 0.0, 0.25), [0.25, 0.25, 0.25]));
    }
}
