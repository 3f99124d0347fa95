//! Model registry client for versioned model artifacts.
//!
//! Models are addressed with `models:/<name>/<version>`, `models:/<name>/latest`,
//! `models:/<name>/<alias>` or `models:/<name>@<alias>`. The filesystem store keeps
//! one directory per model with numbered version directories, each holding an
//! `MLmodel` manifest, plus an optional `aliases.yaml` mapping aliases to versions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

pub const MODELS_SCHEME: &str = "models:/";
pub const MANIFEST_FILE: &str = "MLmodel";
pub const ALIASES_FILE: &str = "aliases.yaml";
const LATEST: &str = "latest";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid model uri `{uri}`: {reason}")]
    InvalidUri { uri: String, reason: &'static str },
    #[error("invalid model name `{name}`: {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("model `{0}` not found in registry")]
    ModelNotFound(String),
    #[error("model `{name}` has no version {version}")]
    VersionNotFound { name: String, version: u64 },
    #[error("model `{name}` has no alias `{alias}`")]
    AliasNotFound { name: String, alias: String },
    #[error("alias `{0}` is reserved")]
    ReservedAlias(String),
    #[error("malformed manifest {path}")]
    Manifest { path: PathBuf, #[source] source: serde_yaml::Error },
    #[error("registry io at {path}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> RegistryError + '_ {
    move |source| RegistryError::Io { path: path.to_path_buf(), source }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelReference { Version(u64), Latest, Alias(String) }

/// Parsed `models:/` URI. `Display` yields the string it was parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelUri {
    raw: String,
    name: String,
    reference: ModelReference,
}

impl ModelUri {
    pub fn name(&self) -> &str { &self.name }
    pub fn reference(&self) -> &ModelReference { &self.reference }
}

impl fmt::Display for ModelUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.raw) }
}

impl FromStr for ModelUri {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &'static str| RegistryError::InvalidUri { uri: s.to_string(), reason };
        let rest = s.strip_prefix(MODELS_SCHEME).ok_or_else(|| invalid("expected `models:/` scheme"))?;
        let (name, reference) = if let Some((name, alias)) = rest.split_once('@') {
            validate_segment(alias).map_err(invalid)?;
            let reference = if alias.eq_ignore_ascii_case(LATEST) { ModelReference::Latest } else { ModelReference::Alias(alias.to_string()) };
            (name, reference)
        } else {
            let (name, tail) = rest.split_once('/').ok_or_else(|| invalid("expected `<name>/<version>` or `<name>@<alias>`"))?;
            validate_segment(tail).map_err(invalid)?;
            (name, parse_reference(tail).map_err(invalid)?)
        };
        validate_segment(name).map_err(invalid)?;
        Ok(Self { raw: s.to_string(), name: name.to_string(), reference })
    }
}

fn parse_reference(tail: &str) -> Result<ModelReference, &'static str> {
    if tail.bytes().all(|b| b.is_ascii_digit()) {
        match tail.parse::<u64>() {
            Ok(0) => Err("versions start at 1"),
            Ok(v) => Ok(ModelReference::Version(v)),
            Err(_) => Err("version out of range"),
        }
    } else if tail.eq_ignore_ascii_case(LATEST) {
        Ok(ModelReference::Latest)
    } else {
        Ok(ModelReference::Alias(tail.to_string()))
    }
}

// Names and aliases become path components in the filesystem store.
fn validate_segment(seg: &str) -> Result<(), &'static str> {
    if seg.is_empty() { return Err("empty segment"); }
    if seg == "." || seg == ".." { return Err("relative path segment"); }
    if seg.contains(['/', '\\', '@']) { return Err("segment contains a separator"); }
    Ok(())
}

/// Contents of an `MLmodel` file. Flavor configs stay untyped; each loader
/// deserializes its own section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utc_time_created: Option<String>,
    #[serde(default)]
    pub flavors: BTreeMap<String, serde_yaml::Value>,
}

impl ModelManifest {
    pub fn with_flavor(mut self, flavor: &str, conf: serde_yaml::Value) -> Self {
        self.flavors.insert(flavor.to_string(), conf);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedModel {
    pub name: String,
    pub version: u64,
    pub path: PathBuf,
    pub manifest: ModelManifest,
}

pub trait ModelRegistry: Send + Sync {
    fn resolve(&self, uri: &ModelUri) -> Result<ResolvedModel, RegistryError>;
}

/// Directory-backed registry: `<root>/<name>/<version>/MLmodel`.
#[derive(Debug, Clone)]
pub struct FsModelRegistry { root: PathBuf }

impl FsModelRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into() } }

    pub fn root(&self) -> &Path { &self.root }

    fn model_path(&self, name: &str) -> Result<PathBuf, RegistryError> {
        validate_segment(name).map_err(|reason| RegistryError::InvalidName { name: name.to_string(), reason })?;
        Ok(self.root.join(name))
    }

    fn existing_model_dir(&self, name: &str) -> Result<PathBuf, RegistryError> {
        let dir = self.model_path(name)?;
        if !dir.is_dir() { return Err(RegistryError::ModelNotFound(name.to_string())); }
        Ok(dir)
    }

    /// Registered versions, ascending. Only canonical decimal directory names
    /// count, so `01` or `+1` never shadow the `1` that `resolve` looks up.
    pub fn list_versions(&self, name: &str) -> Result<Vec<u64>, RegistryError> {
        let dir = self.existing_model_dir(name)?;
        let mut versions = Vec::new();
        for entry in fs::read_dir(&dir).map_err(io_err(&dir))? {
            let entry = entry.map_err(io_err(&dir))?;
            if !entry.file_type().map_err(io_err(&dir))?.is_dir() { continue; }
            if let Some(v) = entry.file_name().to_str().and_then(|n| n.parse::<u64>().ok().filter(|v| *v > 0 && v.to_string() == n)) {
                versions.push(v);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    pub fn latest(&self, name: &str) -> Result<Option<u64>, RegistryError> {
        Ok(self.list_versions(name)?.last().copied())
    }

    pub fn aliases(&self, name: &str) -> Result<BTreeMap<String, u64>, RegistryError> {
        let path = self.existing_model_dir(name)?.join(ALIASES_FILE);
        if !path.exists() { return Ok(BTreeMap::new()); }
        let text = fs::read_to_string(&path).map_err(io_err(&path))?;
        serde_yaml::from_str(&text).map_err(|source| RegistryError::Manifest { path, source })
    }

    /// Stores `manifest` as the next version of `name` and returns that version.
    pub fn register(&self, name: &str, mut manifest: ModelManifest) -> Result<u64, RegistryError> {
        let dir = self.model_path(name)?;
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;
        let version = self.latest(name)?.unwrap_or(0) + 1;
        let version_dir = dir.join(version.to_string());
        fs::create_dir(&version_dir).map_err(io_err(&version_dir))?;

        if manifest.model_uuid.is_none() { manifest.model_uuid = Some(uuid::Uuid::new_v4().simple().to_string()); }
        if manifest.utc_time_created.is_none() { manifest.utc_time_created = Some(chrono::Utc::now().to_rfc3339()); }
        let path = version_dir.join(MANIFEST_FILE);
        let text = serde_yaml::to_string(&manifest).map_err(|source| RegistryError::Manifest { path: path.clone(), source })?;
        fs::write(&path, text).map_err(io_err(&path))?;
        info!(model = name, version, "registered model version");
        Ok(version)
    }

    pub fn set_alias(&self, name: &str, alias: &str, version: u64) -> Result<(), RegistryError> {
        if alias.eq_ignore_ascii_case(LATEST) { return Err(RegistryError::ReservedAlias(alias.to_string())); }
        validate_segment(alias).map_err(|reason| RegistryError::InvalidName { name: alias.to_string(), reason })?;
        if !self.list_versions(name)?.contains(&version) {
            return Err(RegistryError::VersionNotFound { name: name.to_string(), version });
        }
        let mut aliases = self.aliases(name)?;
        aliases.insert(alias.to_string(), version);
        let path = self.existing_model_dir(name)?.join(ALIASES_FILE);
        let text = serde_yaml::to_string(&aliases).map_err(|source| RegistryError::Manifest { path: path.clone(), source })?;
        fs::write(&path, text).map_err(io_err(&path))?;
        Ok(())
    }
}

impl ModelRegistry for FsModelRegistry {
    fn resolve(&self, uri: &ModelUri) -> Result<ResolvedModel, RegistryError> {
        let name = uri.name();
        let dir = self.existing_model_dir(name)?;
        let version = match uri.reference() {
            ModelReference::Version(v) => *v,
            ModelReference::Latest => self.latest(name)?.ok_or_else(|| RegistryError::ModelNotFound(name.to_string()))?,
            ModelReference::Alias(alias) => self.aliases(name)?.get(alias).copied()
                .ok_or_else(|| RegistryError::AliasNotFound { name: name.to_string(), alias: alias.clone() })?,
        };
        let path = dir.join(version.to_string());
        if !path.is_dir() { return Err(RegistryError::VersionNotFound { name: name.to_string(), version }); }
        let manifest_path = path.join(MANIFEST_FILE);
        let text = fs::read_to_string(&manifest_path).map_err(io_err(&manifest_path))?;
        let manifest: ModelManifest = serde_yaml::from_str(&text).map_err(|source| RegistryError::Manifest { path: manifest_path.clone(), source })?;
        debug!(%uri, version, "resolved model");
        Ok(ResolvedModel { name: name.to_string(), version, path, manifest })
    }
}
