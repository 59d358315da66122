pub mod camera;
pub mod config;
pub mod json;
pub mod mesh;
pub mod registry;
pub mod rng;
pub mod sphere;

pub use camera::Camera;
pub use config::SceneConfig;
pub use mesh::{Mesh, MeshObject, MeshObjectRecord};
pub use registry::{GeometryRegistry, SharedMeshObject};
pub use rng::Pcg32;
pub use sphere::{Sphere, SphereSceneGenerator};
