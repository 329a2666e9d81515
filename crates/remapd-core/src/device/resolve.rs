// Stable identity → event node path

use std::fs;
use std::path::{Path, PathBuf};

use super::DeviceError;

/// Check if a device is our own virtual device, by name.
///
/// Grabbing it would feed our output back into our input.
pub fn is_virtual_device(name: &str, virtual_name: &str) -> bool {
    name.contains(virtual_name)
}

/// Maps stable device identities to `/dev/input/event*` paths.
///
/// An identity is tried as an existing path, then as an entry in the
/// by-id and by-path symlink directories, then as an exact device name.
#[derive(Debug, Clone)]
pub struct DeviceResolver {
    by_id: PathBuf,
    by_path: PathBuf,
}

impl Default for DeviceResolver {
    fn default() -> Self {
        Self::new("/dev/input/by-id", "/dev/input/by-path")
    }
}

impl DeviceResolver {
    pub fn new(by_id: impl Into<PathBuf>, by_path: impl Into<PathBuf>) -> Self {
        Self {
            by_id: by_id.into(),
            by_path: by_path.into(),
        }
    }

    /// Resolve `id`, falling back to a name match over `named` (path, device name) pairs
    pub fn resolve<I>(&self, id: &str, named: I) -> Result<PathBuf, DeviceError>
    where
        I: IntoIterator<Item = (PathBuf, String)>,
    {
        let direct = Path::new(id);
        if direct.is_absolute() && direct.exists() {
            return Ok(direct.to_path_buf());
        }

        for dir in [&self.by_id, &self.by_path] {
            let link = dir.join(id);
            if link.exists() {
                return Ok(fs::canonicalize(&link).unwrap_or(link));
            }
        }

        named
            .into_iter()
            .find(|(_, name)| name == id)
            .map(|(path, _)| path)
            .ok_or_else(|| DeviceError::DeviceUnavailable {
                id: id.to_string(),
                reason: "not connected".to_string(),
            })
    }

    /// Stable identities (by-id link names) that point at `path`
    pub fn stable_ids_for(&self, path: &Path) -> Vec<String> {
        let target = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let Ok(entries) = fs::read_dir(&self.by_id) else {
            return Vec::new();
        };
        let mut ids: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| fs::canonicalize(entry.path()).ok().as_deref() == Some(target.as_path()))
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        ids.sort();
        ids
    }
}
