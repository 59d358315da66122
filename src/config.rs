use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use accutrace_scene::{json::f32_or, Camera, MeshObject, SceneConfig};
use anyhow::{bail, Context};
use serde_json as js;

/// Command line overrides.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Args {
    pub config:  Option<PathBuf>,
    pub seed:    Option<u64>,
    pub spheres: Option<usize>,
    pub log:     Option<String>,
}

impl Args {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::parse(pico_args::Arguments::from_env())
    }

    pub fn from_vec(args: Vec<OsString>) -> anyhow::Result<Self> {
        Self::parse(pico_args::Arguments::from_vec(args))
    }

    fn parse(mut args: pico_args::Arguments) -> anyhow::Result<Self> {
        let parsed = Self {
            config:  args.opt_value_from_str::<_, String>("--config")?.map(PathBuf::from),
            seed:    args.opt_value_from_str("--seed")?,
            spheres: args.opt_value_from_str("--spheres")?,
            log:     args.opt_value_from_str("--log")?,
        };
        let remaining = args.finish();
        if !remaining.is_empty() {
            bail!("Unexpected arguments: {remaining:?}");
        }
        Ok(parsed)
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FlyCamConfig {
    /// Degrees.
    pub yaw:              f32,
    /// Degrees.
    pub pitch:            f32,
    pub speed:            f32,
    /// Degrees per pixel.
    pub look_sensitivity: f32,
}

impl Default for FlyCamConfig {
    fn default() -> Self {
        Self { yaw: 0.0, pitch: -10.0, speed: 20.0, look_sensitivity: 0.25 }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub scene:             SceneConfig,
    pub skybox_path:       PathBuf,
    pub trace_kernel_path: PathBuf,
    pub blend_kernel_path: PathBuf,
    pub window_size:       [u32; 2],
    pub camera:            Camera,
    pub fly_cam:           FlyCamConfig,
    /// Registered with the renderer at startup.
    pub meshes:            Vec<MeshObject>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            scene:             SceneConfig::default(),
            skybox_path:       PathBuf::from("textures/sky.png"),
            trace_kernel_path: PathBuf::from("shaders/trace.spv"),
            blend_kernel_path: PathBuf::from("shaders/converge.spv"),
            window_size:       [1280, 720],
            camera:            Camera::default(),
            fly_cam:           FlyCamConfig::default(),
            meshes:            Vec::new(),
        }
    }
}

impl AppConfig {
    /// Builds the configuration from the optional config file, then applies
    /// command line overrides.
    pub fn load(args: &Args) -> anyhow::Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(seed) = args.seed {
            config.scene.seed = seed;
        }
        if let Some(spheres) = args.spheres {
            config.scene.max_spheres = spheres;
        }
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file_contents =
            fs::read_to_string(path).with_context(|| format!("Cannot read config file {}", path.display()))?;
        let json: js::Value =
            js::from_str(&file_contents).with_context(|| format!("Invalid JSON in {}", path.display()))?;
        Self::from_json(&json)
    }

    /// Every section and key is optional:
    ///
    /// ```json
    /// {
    ///   "scene": { "sphere_radius": [3, 8], "max_spheres": 100, "placement_radius": 100, "seed": 0 },
    ///   "skybox": "textures/sky.png",
    ///   "kernels": { "trace": "shaders/trace.spv", "blend": "shaders/converge.spv" },
    ///   "window": { "width": 1280, "height": 720 },
    ///   "camera": { "position": [0, 30, 120], "yaw": 0, "pitch": -10, "fov": 60 },
    ///   "fly_cam": { "speed": 20, "look_sensitivity": 0.25 },
    ///   "meshes": [
    ///     {
    ///       "positions": [[0, 0, 0], [10, 0, 0], [0, 10, 0]],
    ///       "indices": [0, 1, 2],
    ///       "position": [0, 5, 0], "yaw": 30, "scale": 2
    ///     }
    ///   ]
    /// }
    /// ```
    pub fn from_json(json: &js::Value) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let path_or = |value: &js::Value, default: &PathBuf| -> anyhow::Result<PathBuf> {
            match value {
                js::Value::Null => Ok(default.clone()),
                js::Value::String(path) => Ok(PathBuf::from(path)),
                other => bail!("Expected a path string, got {other}"),
            }
        };

        let scene = SceneConfig::from_json(&json["scene"]).context("Invalid 'scene' section")?;
        let skybox_path = path_or(&json["skybox"], &defaults.skybox_path)?;
        let trace_kernel_path = path_or(&json["kernels"]["trace"], &defaults.trace_kernel_path)?;
        let blend_kernel_path = path_or(&json["kernels"]["blend"], &defaults.blend_kernel_path)?;

        let window = &json["window"];
        let window_size = [
            f32_or(window, "width", defaults.window_size[0] as f32)? as u32,
            f32_or(window, "height", defaults.window_size[1] as f32)? as u32,
        ];
        if window_size.contains(&0) {
            bail!("Window size must not be zero, got {window_size:?}");
        }

        let camera = Camera::from_json(&json["camera"]).context("Invalid 'camera' section")?;
        let fly_cam = FlyCamConfig {
            yaw:              f32_or(&json["camera"], "yaw", defaults.fly_cam.yaw)?,
            pitch:            f32_or(&json["camera"], "pitch", defaults.fly_cam.pitch)?,
            speed:            f32_or(&json["fly_cam"], "speed", defaults.fly_cam.speed)?,
            look_sensitivity: f32_or(&json["fly_cam"], "look_sensitivity", defaults.fly_cam.look_sensitivity)?,
        };

        let meshes = match &json["meshes"] {
            js::Value::Null => Vec::new(),
            js::Value::Array(list) => list
                .iter()
                .enumerate()
                .map(|(i, object)| MeshObject::from_json(object).with_context(|| format!("Invalid mesh {i}")))
                .collect::<anyhow::Result<_>>()?,
            other => bail!("Expected an array of meshes, got {other}"),
        };

        Ok(Self { scene, skybox_path, trace_kernel_path, blend_kernel_path, window_size, camera, fly_cam, meshes })
    }
}

#[cfg(test)]
mod tests {
    use nalgebra_glm as glm;

    use super::*;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn test_empty_json_gives_defaults() {
        let config = AppConfig::from_json(&js::json!({})).unwrap();
        assert_eq!(config.scene, SceneConfig::default());
        assert_eq!(config.window_size, [1280, 720]);
        assert_eq!(config.trace_kernel_path, PathBuf::from("shaders/trace.spv"));
        assert_eq!(config.blend_kernel_path, PathBuf::from("shaders/converge.spv"));
        assert_eq!(config.skybox_path, PathBuf::from("textures/sky.png"));
        assert_eq!(config.fly_cam, FlyCamConfig::default());
        assert_eq!(config.camera.vertical_fov(), 60.0);
        assert!(config.meshes.is_empty());
    }

    #[test]
    fn test_sections_are_read() {
        let config = AppConfig::from_json(&js::json!({
            "scene": { "max_spheres": 5, "seed": 9 },
            "skybox": "sky/night.png",
            "kernels": { "trace": "k/trace.spv" },
            "window": { "width": 640, "height": 480 },
            "camera": { "position": [1, 2, 3], "yaw": 45 },
            "fly_cam": { "speed": 3.5 }
        }))
        .unwrap();
        assert_eq!(config.scene.max_spheres, 5);
        assert_eq!(config.scene.seed, 9);
        assert_eq!(config.skybox_path, PathBuf::from("sky/night.png"));
        assert_eq!(config.trace_kernel_path, PathBuf::from("k/trace.spv"));
        assert_eq!(config.window_size, [640, 480]);
        assert_eq!(config.fly_cam.yaw, 45.0);
        assert_eq!(config.fly_cam.speed, 3.5);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(AppConfig::from_json(&js::json!({ "skybox": 4 })).is_err());
        assert!(AppConfig::from_json(&js::json!({ "window": { "width": 0 } })).is_err());
        assert!(AppConfig::from_json(&js::json!({ "scene": { "sphere_radius": [5, 1] } })).is_err());
    }

    #[test]
    fn test_meshes_are_read() {
        let config = AppConfig::from_json(&js::json!({
            "meshes": [
                { "positions": [[0, 0, 0], [1, 0, 0], [0, 1, 0]], "indices": [0, 1, 2] },
                {
                    "positions": [[0, 0, 0], [1, 0, 0], [0, 1, 0], [1, 1, 0]],
                    "indices": [0, 1, 2, 2, 1, 3],
                    "position": [0, 4, 0]
                }
            ]
        }))
        .unwrap();
        assert_eq!(config.meshes.len(), 2);
        assert_eq!(config.meshes[0].mesh.index_count(), 3);
        assert_eq!(config.meshes[1].mesh.vertex_count(), 4);
        let origin = config.meshes[1].local_to_world() * glm::vec4(0.0, 0.0, 0.0, 1.0);
        assert_eq!(origin, glm::vec4(0.0, 4.0, 0.0, 1.0));
    }

    #[test]
    fn test_malformed_meshes_are_rejected() {
        let out_of_range = js::json!({
            "meshes": [{ "positions": [[0, 0, 0], [1, 0, 0], [0, 1, 0]], "indices": [0, 1, 3] }]
        });
        let error = AppConfig::from_json(&out_of_range).unwrap_err();
        assert!(format!("{error:#}").contains("Invalid mesh 0"));

        assert!(AppConfig::from_json(&js::json!({ "meshes": { "positions": [] } })).is_err());
        assert!(AppConfig::from_json(&js::json!({ "meshes": [{ "indices": [0, 1, 2] }] })).is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let parsed = Args::from_vec(args(&["--seed", "42", "--spheres", "10", "--log", "debug"])).unwrap();
        assert_eq!(parsed.seed, Some(42));
        assert_eq!(parsed.spheres, Some(10));
        assert_eq!(parsed.log.as_deref(), Some("debug"));

        let config = AppConfig::load(&parsed).unwrap();
        assert_eq!(config.scene.seed, 42);
        assert_eq!(config.scene.max_spheres, 10);
    }

    #[test]
    fn test_unknown_arguments_fail() {
        assert!(Args::from_vec(args(&["--bogus"])).is_err());
        assert!(Args::from_vec(args(&["--seed", "many"])).is_err());
    }
}
