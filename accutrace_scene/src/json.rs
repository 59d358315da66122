use anyhow::{anyhow, Context};
use nalgebra_glm as glm;
use serde_json as js;

fn to_floats(value: &js::Value, len: usize) -> anyhow::Result<Vec<f32>> {
    let coords = value
        .as_array()
        .with_context(|| format!("expected an array of {len} numbers, got {value}"))?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32).ok_or_else(|| anyhow!("{v} is not a number")))
        .collect::<anyhow::Result<Vec<f32>>>()?;
    if coords.len() != len {
        return Err(anyhow!("expected {len} components, got {}", coords.len()));
    }
    Ok(coords)
}

pub fn to_vec3(value: &js::Value) -> anyhow::Result<glm::Vec3> {
    Ok(glm::make_vec3(&to_floats(value, 3)?))
}

pub fn to_vec2(value: &js::Value) -> anyhow::Result<glm::Vec2> {
    Ok(glm::make_vec2(&to_floats(value, 2)?))
}

/// `object[key]` as a float, or `default` when the key is missing.
pub fn f32_or(object: &js::Value, key: &str, default: f32) -> anyhow::Result<f32> {
    match &object[key] {
        js::Value::Null => Ok(default),
        value => value.as_f64().map(|f| f as f32).with_context(|| format!("'{key}' must be a number")),
    }
}

/// `object[key]` as an unsigned integer, or `default` when the key is missing.
pub fn u64_or(object: &js::Value, key: &str, default: u64) -> anyhow::Result<u64> {
    match &object[key] {
        js::Value::Null => Ok(default),
        value => value.as_u64().with_context(|| format!("'{key}' must be a non-negative integer")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vectors() {
        assert_eq!(to_vec3(&js::json!([1, 2.5, -3])).unwrap(), glm::vec3(1.0, 2.5, -3.0));
        assert_eq!(to_vec2(&js::json!([4, 5])).unwrap(), glm::vec2(4.0, 5.0));
    }

    #[test]
    fn test_wrong_shape_is_an_error() {
        assert!(to_vec3(&js::json!([1, 2])).is_err());
        assert!(to_vec2(&js::json!("nope")).is_err());
        assert!(to_vec2(&js::json!([1, "2"])).is_err());
    }

    #[test]
    fn test_scalar_defaults() {
        let object = js::json!({ "a": 2.0, "n": 7 });
        assert_eq!(f32_or(&object, "a", 1.0).unwrap(), 2.0);
        assert_eq!(f32_or(&object, "b", 1.0).unwrap(), 1.0);
        assert_eq!(u64_or(&object, "n", 0).unwrap(), 7);
        assert!(u64_or(&js::json!({ "n": -1 }), "n", 0).is_err());
    }
}
