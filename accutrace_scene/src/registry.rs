use std::sync::{Arc, RwLock};

use crate::mesh::MeshObject;

pub type SharedMeshObject = Arc<RwLock<MeshObject>>;

/// The live set of mesh objects, in registration order.
///
/// Any registration change raises the dirty flag, which stays raised until a
/// buffer rebuild consumes it with [`GeometryRegistry::take_dirty`].
#[derive(Default)]
pub struct GeometryRegistry {
    objects: Vec<SharedMeshObject>,
    dirty:   bool,
}

impl GeometryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, object: SharedMeshObject) {
        self.objects.push(object);
        self.dirty = true;
    }

    /// Removes the first entry that is the same handle as `object`. The dirty
    /// flag is raised whether or not anything was removed.
    pub fn unregister(&mut self, object: &SharedMeshObject) -> bool {
        self.dirty = true;
        match self.objects.iter().position(|o| Arc::ptr_eq(o, object)) {
            Some(index) => {
                self.objects.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn objects(&self) -> impl Iterator<Item = &SharedMeshObject> {
        self.objects.iter()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// For edits made through a handle that the registry cannot observe.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Mesh;
    use nalgebra_glm as glm;

    fn object() -> SharedMeshObject {
        Arc::new(RwLock::new(MeshObject::new(Arc::new(Mesh::default()), glm::identity())))
    }

    #[test]
    fn test_new_registry_is_clean() {
        let registry = GeometryRegistry::new();
        assert!(!registry.is_dirty());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_marks_dirty() {
        let mut registry = GeometryRegistry::new();
        registry.register(object());
        assert!(registry.is_dirty());
        assert!(registry.take_dirty());
        assert!(!registry.is_dirty());
        assert!(!registry.take_dirty());
    }

    #[test]
    fn test_unregister_uses_identity() {
        let mut registry = GeometryRegistry::new();
        let a = object();
        let b = object();
        registry.register(a.clone());
        registry.register(b.clone());
        registry.take_dirty();

        assert!(registry.unregister(&a));
        assert!(registry.is_dirty());
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(registry.objects().next().unwrap(), &b));
    }

    #[test]
    fn test_unregister_unknown_still_marks_dirty() {
        let mut registry = GeometryRegistry::new();
        registry.register(object());
        registry.take_dirty();

        assert!(!registry.unregister(&object()));
        assert_eq!(registry.len(), 1);
        assert!(registry.is_dirty());
    }

    #[test]
    fn test_duplicate_handle_removed_once() {
        let mut registry = GeometryRegistry::new();
        let a = object();
        registry.register(a.clone());
        registry.register(a.clone());
        assert!(registry.unregister(&a));
        assert_eq!(registry.len(), 1);
    }
}
