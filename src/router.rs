use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// The live set of port -> document root mappings.
///
/// The control layer mutates the table while request workers read it, so
/// the map sits behind an `RwLock`. A request observes one consistent root
/// for a port; a folder change concurrent with an in-flight request may be
/// seen or not, never partially.
///
/// Clones share the same underlying table.
#[derive(Clone, Default)]
pub struct PortRouter {
    mappings: Arc<RwLock<HashMap<u16, PathBuf>>>,
}

impl PortRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upserts the document root for a port.
    pub fn set_mapping(&self, port: u16, root: impl AsRef<Path>) {
        let mut map = self.mappings.write().unwrap();
        map.insert(port, root.as_ref().to_path_buf());
    }

    /// `None` means the dispatcher answers 404 without touching the
    /// filesystem; an unmapped port is not an error here.
    pub fn get_mapping(&self, port: u16) -> Option<PathBuf> {
        let map = self.mappings.read().unwrap();
        map.get(&port).cloned()
    }

    /// Removes every mapping.
    pub fn clear_all(&self) {
        let mut map = self.mappings.write().unwrap();
        map.clear();
    }
}
