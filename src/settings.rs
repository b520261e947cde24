use crate::error::{Error, Result};
use directories::BaseDirs;
use glob::MatchOptions;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Supported releases of the Allen common coordinate framework.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AtlasVersion {
    #[serde(rename = "ccf_2015")]
    Ccf2015,
    #[serde(rename = "ccf_2016")]
    Ccf2016,
    #[serde(rename = "ccf_2017")]
    #[default]
    Ccf2017,
}
impl AtlasVersion {
    pub const ALL: [AtlasVersion; 3] = [AtlasVersion::Ccf2015, AtlasVersion::Ccf2016, AtlasVersion::Ccf2017];

    pub fn tag(&self) -> &'static str {
        match self {
            AtlasVersion::Ccf2015 => "ccf_2015",
            AtlasVersion::Ccf2016 => "ccf_2016",
            AtlasVersion::Ccf2017 => "ccf_2017",
        }
    }
}
impl fmt::Display for AtlasVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.tag()) }
}
impl FromStr for AtlasVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        AtlasVersion::ALL
            .into_iter()
            .find(|v| v.tag() == s)
            .ok_or_else(|| Error::Configuration(format!("unsupported atlas version {s:?}")))
    }
}

/// Voxel edge length of the reference volumes, in micrometers.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(try_from = "u32", into = "u32")]
pub enum Resolution {
    R10,
    R25,
    R50,
    #[default]
    R100,
}
impl Resolution {
    pub const ALL: [Resolution; 4] = [Resolution::R10, Resolution::R25, Resolution::R50, Resolution::R100];

    pub fn micrometers(&self) -> u32 {
        match self {
            Resolution::R10 => 10,
            Resolution::R25 => 25,
            Resolution::R50 => 50,
            Resolution::R100 => 100,
        }
    }
    pub fn as_f64(&self) -> f64 { self.micrometers() as f64 }
}
impl TryFrom<u32> for Resolution {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        Resolution::ALL
            .into_iter()
            .find(|r| r.micrometers() == value)
            .ok_or_else(|| Error::Configuration(format!("unsupported resolution {value}, expected 10, 25, 50 or 100")))
    }
}
impl From<Resolution> for u32 {
    fn from(value: Resolution) -> Self { value.micrometers() }
}
impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.micrometers()) }
}

/// A compartment named in the include/exclude lists, either by structure id or by acronym/name.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum CompartmentRef {
    Id(u32),
    Name(String),
}
impl fmt::Display for CompartmentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompartmentRef::Id(id) => write!(f, "{id}"),
            CompartmentRef::Name(name) => write!(f, "{name:?}"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompartmentSettings {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default)]
    pub include: Vec<CompartmentRef>,
    #[serde(default)]
    pub exclude: Vec<CompartmentRef>,
}
impl Default for CompartmentSettings {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

fn default_max_depth() -> usize { 10 }

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemSettings {
    #[serde(default)]
    pub atlas_version: AtlasVersion,
    #[serde(default = "default_cache_directory")]
    pub cache_directory: PathBuf,
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default)]
    pub data_files: Vec<String>,
}
impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            atlas_version: AtlasVersion::default(),
            cache_directory: default_cache_directory(),
            resolution: Resolution::default(),
            data_files: Vec::new(),
        }
    }
}

fn default_cache_directory() -> PathBuf {
    BaseDirs::new()
        .map(|dirs| dirs.cache_dir().join("activity-viewer"))
        .unwrap_or_else(|| PathBuf::from(".activity-viewer-cache"))
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub compartment: CompartmentSettings,
    #[serde(default)]
    pub system: SystemSettings,
}
impl Settings {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Configuration(e.to_string()))
    }
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| Error::Configuration(format!("{}: {}", path.display(), e)))
    }
    pub fn to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
    /// Location of the settings file when none is given explicitly.
    pub fn default_path() -> PathBuf {
        BaseDirs::new()
            .map(|dirs| dirs.config_dir().join("activity-viewer").join("settings.json"))
            .unwrap_or_else(|| PathBuf::from("settings.json"))
    }

    pub fn atlas_version(&self) -> AtlasVersion { self.system.atlas_version }
    pub fn resolution(&self) -> Resolution { self.system.resolution }
    pub fn versioned_cache_directory(&self) -> PathBuf {
        self.system.cache_directory.join(self.system.atlas_version.tag())
    }

    /// Expands the `dataFiles` glob patterns into the sorted list of existing files they match.
    pub fn resolve_data_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for pattern in &self.system.data_files {
            let matched = expand_glob(pattern)?;
            debug!("{} matched {} file(s)", pattern, matched.len());
            files.extend(matched);
        }
        files.sort();
        files.dedup();
        Ok(files)
    }
}

fn expand_glob(pattern: &str) -> Result<Vec<PathBuf>> {
    let options = MatchOptions {
        require_literal_leading_dot: true,
        ..MatchOptions::new()
    };
    let entries = glob::glob_with(pattern, options)
        .map_err(|e| Error::Configuration(format!("invalid data file pattern {pattern:?}: {e}")))?;

    let mut out = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) if path.is_file() => out.push(path),
            Ok(_) => {}
            Err(e) => warn!("Skipping {} while expanding {}: {}", e.path().display(), pattern, e.error()),
        }
    }
    Ok(out)
}
