// Remapd Profile Loader
// Reads and writes profile documents under the config directory

use std::fs;
use std::path::{Path, PathBuf};

use super::{ProfileDocument, ProfileError};

const PROFILES_DIR: &str = "profiles";
const ACTIVE_PROFILE_FILE: &str = "active_profile";
const PROFILE_EXT: &str = "toml";

/// Profile store rooted at a config directory
///
/// Layout:
///   <config_dir>/profiles/<id>.toml
///   <config_dir>/active_profile
#[derive(Debug, Clone)]
pub struct ProfileLoader {
    config_dir: PathBuf,
    profiles_dir: PathBuf,
}

impl ProfileLoader {
    /// Loader over `config_dir`, or the default `~/.config/remapd`
    pub fn new(config_dir: Option<PathBuf>) -> Self {
        let config_dir = config_dir.unwrap_or_else(Self::default_config_dir);
        let profiles_dir = config_dir.join(PROFILES_DIR);
        Self {
            config_dir,
            profiles_dir,
        }
    }

    /// Use a profiles directory other than `<config_dir>/profiles`
    pub fn with_profiles_dir(mut self, profiles_dir: PathBuf) -> Self {
        self.profiles_dir = profiles_dir;
        self
    }

    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("remapd")
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn profiles_dir(&self) -> &Path {
        &self.profiles_dir
    }

    fn profile_path(&self, id: &str) -> Result<PathBuf, ProfileError> {
        validate_id(id)?;
        Ok(self.profiles_dir.join(format!("{id}.{PROFILE_EXT}")))
    }

    /// Sorted ids of every profile file
    pub fn list_profiles(&self) -> Result<Vec<String>, ProfileError> {
        let entries = match fs::read_dir(&self.profiles_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PROFILE_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_id(stem).is_ok() {
                    ids.push(stem.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn load_profile(&self, id: &str) -> Result<ProfileDocument, ProfileError> {
        let path = self.profile_path(id)?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProfileError::NotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let doc = ProfileDocument::from_toml(&content)?;
        if doc.id != id {
            log::warn!(
                "Profile file {} declares id '{}', using file name '{}'",
                path.display(),
                doc.id,
                id
            );
            return Ok(ProfileDocument {
                id: id.to_string(),
                ..doc
            });
        }
        Ok(doc)
    }

    /// Id stored in the `active_profile` file, if any
    pub fn active_profile_id(&self) -> Result<Option<String>, ProfileError> {
        match fs::read_to_string(self.config_dir.join(ACTIVE_PROFILE_FILE)) {
            Ok(content) => {
                let id = content.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn load_active_profile(&self) -> Result<ProfileDocument, ProfileError> {
        let id = self.active_profile_id()?.ok_or(ProfileError::NoActiveProfile)?;
        self.load_profile(&id)
    }

    pub fn set_active_profile(&self, id: &str) -> Result<(), ProfileError> {
        validate_id(id)?;
        fs::create_dir_all(&self.config_dir)?;
        write_atomic(&self.config_dir.join(ACTIVE_PROFILE_FILE), id.as_bytes())
    }

    pub fn save_profile(&self, doc: &ProfileDocument) -> Result<PathBuf, ProfileError> {
        let path = self.profile_path(&doc.id)?;
        fs::create_dir_all(&self.profiles_dir)?;
        write_atomic(&path, doc.to_toml()?.as_bytes())?;
        Ok(path)
    }
}

/// Profile ids double as file names, so only a safe alphabet is accepted
pub fn validate_id(id: &str) -> Result<(), ProfileError> {
    let ok = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(ProfileError::InvalidId(id.to_string()))
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), ProfileError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
