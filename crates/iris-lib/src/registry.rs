//! File-backed model registry
//!
//! Layout under the registry root:
//! - `registry.json`: index of every registered name and its versions
//! - `<name>/<version>/model.json`: the artifact of one version
//!
//! Artifacts are verified against their SHA-256 checksum on load. Index
//! writes go through a temp file and rename, so readers never observe a
//! partially written index.

use crate::models::{ModelScores, RegisteredModelVersion, Stage};
use crate::training::TrainedModel;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{info, warn};

const INDEX_FILE: &str = "registry.json";
const ARTIFACT_FILE: &str = "model.json";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registered model '{0}' not found")]
    ModelNotFound(String),

    #[error("version {version} of '{name}' not found")]
    VersionNotFound { name: String, version: u32 },

    #[error("invalid model name '{0}'")]
    InvalidName(String),

    #[error("checksum mismatch for {name} v{version}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        version: u32,
        expected: String,
        actual: String,
    },

    #[error("invalid artifact: {0}")]
    Artifact(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index error: {0}")]
    Index(#[from] serde_json::Error),
}

/// Summary of one registered model name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub name: String,
    pub versions: usize,
    pub latest_version: u32,
    pub production_version: Option<u32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryIndex {
    models: BTreeMap<String, Vec<RegisteredModelVersion>>,
    /// Highest version ever issued per name, so deleted numbers are not reused
    #[serde(default)]
    last_versions: BTreeMap<String, u32>,
}

impl RegistryIndex {
    fn versions_mut(
        &mut self,
        name: &str,
    ) -> Result<&mut Vec<RegisteredModelVersion>, RegistryError> {
        self.models
            .get_mut(name)
            .ok_or_else(|| RegistryError::ModelNotFound(name.to_string()))
    }

    fn version(&self, name: &str, version: u32) -> Result<&RegisteredModelVersion, RegistryError> {
        self.models
            .get(name)
            .ok_or_else(|| RegistryError::ModelNotFound(name.to_string()))?
            .iter()
            .find(|v| v.version == version)
            .ok_or_else(|| RegistryError::VersionNotFound {
                name: name.to_string(),
                version,
            })
    }
}

/// Compute the hex SHA-256 of an artifact
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn validate_name(name: &str) -> Result<(), RegistryError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(RegistryError::InvalidName(name.to_string()))
    }
}

/// Write `data` to `path` via a sibling temp file
fn write_atomic(path: &Path, data: &[u8]) -> Result<(), RegistryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension("tmp");
    let mut file = File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Registry of named, versioned model artifacts with lifecycle stages
pub struct ModelRegistry {
    root: PathBuf,
    lock: Mutex<()>,
}

impl ModelRegistry {
    /// Open a registry rooted at `root`. The directory is created on first write.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    fn version_dir(&self, name: &str, version: u32) -> PathBuf {
        self.root.join(name).join(version.to_string())
    }

    fn artifact_path(&self, name: &str, version: u32) -> PathBuf {
        self.version_dir(name, version).join(ARTIFACT_FILE)
    }

    fn read_index(&self) -> Result<RegistryIndex, RegistryError> {
        match fs::read(self.index_path()) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RegistryIndex::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_index(&self, index: &RegistryIndex) -> Result<(), RegistryError> {
        write_atomic(&self.index_path(), &serde_json::to_vec_pretty(index)?)
    }

    /// Run a read-modify-write of the index under the registry lock
    fn update<T>(
        &self,
        op: impl FnOnce(&mut RegistryIndex) -> Result<T, RegistryError>,
    ) -> Result<T, RegistryError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut index = self.read_index()?;
        let out = op(&mut index)?;
        self.write_index(&index)?;
        Ok(out)
    }

    /// Register `artifact` as the next version of `name`, in stage None
    pub fn register(
        &self,
        name: &str,
        artifact: &TrainedModel,
        run_id: Option<&str>,
        scores: Option<ModelScores>,
    ) -> Result<RegisteredModelVersion, RegistryError> {
        validate_name(name)?;
        let bytes = artifact
            .to_json_bytes()
            .map_err(|e| RegistryError::Artifact(e.to_string()))?;
        let checksum = compute_checksum(&bytes);

        let registered = self.update(|index| {
            let versions = index.models.entry(name.to_string()).or_default();
            let issued = index.last_versions.get(name).copied().unwrap_or(0);
            let version = versions.iter().map(|v| v.version).fold(issued, u32::max) + 1;
            index.last_versions.insert(name.to_string(), version);

            write_atomic(&self.artifact_path(name, version), &bytes)?;

            let now = Utc::now();
            let registered = RegisteredModelVersion {
                registry_name: name.to_string(),
                version,
                stage: Stage::None,
                run_id: run_id.map(str::to_string),
                checksum: checksum.clone(),
                scores,
                created_at: now,
                last_updated_at: now,
            };
            versions.push(registered.clone());
            Ok(registered)
        })?;

        info!(
            event = "model_registered",
            registry_name = %name,
            version = registered.version,
            checksum = %registered.checksum,
            "Model version registered"
        );
        Ok(registered)
    }

    /// Move a version to `stage`. With `archive_existing`, other versions
    /// currently in the same stage are archived.
    pub fn transition_stage(
        &self,
        name: &str,
        version: u32,
        stage: Stage,
        archive_existing: bool,
    ) -> Result<RegisteredModelVersion, RegistryError> {
        let updated = self.update(|index| {
            let versions = index.versions_mut(name)?;
            if !versions.iter().any(|v| v.version == version) {
                return Err(RegistryError::VersionNotFound {
                    name: name.to_string(),
                    version,
                });
            }

            let now = Utc::now();
            let archivable = matches!(stage, Stage::Staging | Stage::Production);
            let mut updated = None;
            for v in versions.iter_mut() {
                if v.version == version {
                    v.stage = stage;
                    v.last_updated_at = now;
                    updated = Some(v.clone());
                } else if archive_existing && archivable && v.stage == stage {
                    v.stage = Stage::Archived;
                    v.last_updated_at = now;
                }
            }
            updated.ok_or_else(|| RegistryError::VersionNotFound {
                name: name.to_string(),
                version,
            })
        })?;

        info!(
            event = "model_stage_transition",
            registry_name = %name,
            version = version,
            stage = %stage,
            archive_existing = archive_existing,
            "Model version transitioned"
        );
        Ok(updated)
    }

    pub fn get_version(
        &self,
        name: &str,
        version: u32,
    ) -> Result<RegisteredModelVersion, RegistryError> {
        self.read_index()?.version(name, version).cloned()
    }

    /// Highest version of `name`, optionally restricted to one stage
    pub fn latest_version(
        &self,
        name: &str,
        stage: Option<Stage>,
    ) -> Result<Option<RegisteredModelVersion>, RegistryError> {
        let index = self.read_index()?;
        let versions = index
            .models
            .get(name)
            .ok_or_else(|| RegistryError::ModelNotFound(name.to_string()))?;

        Ok(versions
            .iter()
            .filter(|v| stage.map_or(true, |s| v.stage == s))
            .max_by_key(|v| v.version)
            .cloned())
    }

    /// All versions of `name`, oldest first
    pub fn list_versions(&self, name: &str) -> Result<Vec<RegisteredModelVersion>, RegistryError> {
        let index = self.read_index()?;
        let mut versions = index
            .models
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::ModelNotFound(name.to_string()))?;
        versions.sort_by_key(|v| v.version);
        Ok(versions)
    }

    pub fn list_models(&self) -> Result<Vec<ModelSummary>, RegistryError> {
        let index = self.read_index()?;
        Ok(index
            .models
            .iter()
            .map(|(name, versions)| ModelSummary {
                name: name.clone(),
                versions: versions.len(),
                latest_version: versions.iter().map(|v| v.version).max().unwrap_or(0),
                production_version: versions
                    .iter()
                    .filter(|v| v.stage == Stage::Production)
                    .map(|v| v.version)
                    .max(),
            })
            .collect())
    }

    /// Load and checksum-verify the artifact of one version
    pub fn load_artifact(&self, name: &str, version: u32) -> Result<TrainedModel, RegistryError> {
        let entry = self.get_version(name, version)?;
        let bytes = fs::read(self.artifact_path(name, version))?;

        let actual = compute_checksum(&bytes);
        if actual != entry.checksum {
            warn!(
                registry_name = %name,
                version = version,
                expected = %entry.checksum,
                actual = %actual,
                "Artifact checksum mismatch"
            );
            return Err(RegistryError::ChecksumMismatch {
                name: name.to_string(),
                version,
                expected: entry.checksum,
                actual,
            });
        }

        TrainedModel::from_json_bytes(&bytes).map_err(|e| RegistryError::Artifact(e.to_string()))
    }

    /// Delete one version and its artifact. A name left with no versions is removed.
    pub fn delete_version(&self, name: &str, version: u32) -> Result<(), RegistryError> {
        self.update(|index| {
            let versions = index.versions_mut(name)?;
            let before = versions.len();
            versions.retain(|v| v.version != version);
            if versions.len() == before {
                return Err(RegistryError::VersionNotFound {
                    name: name.to_string(),
                    version,
                });
            }
            if versions.is_empty() {
                index.models.remove(name);
            }
            Ok(())
        })?;

        self.remove_dir(&self.version_dir(name, version));
        info!(
            event = "model_version_deleted",
            registry_name = %name,
            version = version,
            "Model version deleted"
        );
        Ok(())
    }

    /// Delete every version of `name`
    pub fn delete_model(&self, name: &str) -> Result<(), RegistryError> {
        validate_name(name)?;
        self.update(|index| {
            index.last_versions.remove(name);
            index
                .models
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| RegistryError::ModelNotFound(name.to_string()))
        })?;

        self.remove_dir(&self.root.join(name));
        info!(event = "model_deleted", registry_name = %name, "Registered model deleted");
        Ok(())
    }

    /// Best-effort artifact cleanup; the index is authoritative
    fn remove_dir(&self, dir: &Path) {
        if let Err(e) = fs::remove_dir_all(dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %dir.display(), error = %e, "Failed to remove artifact directory");
            }
        }
    }
}
