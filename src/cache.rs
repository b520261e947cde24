use crate::{
    catalog::{Structure, StructureGraph},
    downloader::AtlasSource,
    error::{Error, Result},
    model::ROOT_ID,
    settings::Settings,
    volume::{nrrd, Volume},
};
use csv::{ReaderBuilder, Trim};
use dashmap::DashMap;
use log::{debug, info, warn};
use num::NumCast;
use serde::{Deserialize, Serialize};
use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use wavefront_obj::obj;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StructureCenter {
    pub structure_id: u32,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// On-disk cache of the reference atlas under `<cacheDirectory>/<atlasVersion>`.
pub struct VolumeCache {
    settings: Settings,
    source: Arc<dyn AtlasSource>,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}
impl VolumeCache {
    pub fn new(settings: Settings, source: Arc<dyn AtlasSource>) -> Self {
        Self {
            settings,
            source,
            locks: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &Settings { &self.settings }

    pub fn directory(&self) -> PathBuf { self.settings.versioned_cache_directory() }
    pub fn annotation_volume_path(&self) -> PathBuf {
        self.directory().join(format!("annotation_{}.nrrd", self.settings.resolution()))
    }
    pub fn template_volume_path(&self) -> PathBuf {
        self.directory().join(format!("average_template_{}.nrrd", self.settings.resolution()))
    }
    pub fn structure_graph_path(&self) -> PathBuf { self.directory().join("structure_graph.json") }
    pub fn structure_centers_path(&self) -> PathBuf { self.directory().join("structure_centers.csv") }
    pub fn structure_mesh_path(&self, id: u32) -> PathBuf { self.directory().join("meshes").join(format!("{id}.obj")) }

    pub fn annotation_volume_exists(&self) -> bool { self.annotation_volume_path().is_file() }
    pub fn template_volume_exists(&self) -> bool { self.template_volume_path().is_file() }
    pub fn structure_graph_exists(&self) -> bool { self.structure_graph_path().is_file() }
    pub fn structure_centers_exists(&self) -> bool { self.structure_centers_path().is_file() }
    pub fn structure_mesh_exists(&self, id: u32) -> bool { self.structure_mesh_path(id).is_file() }

    fn lock(&self, path: &Path) -> Arc<Mutex<()>> { self.locks.entry(path.to_path_buf()).or_default().clone() }

    // Writes go to a temporary file next to the target and are renamed into place.
    fn store(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(bytes)?;
        file.flush()?;
        file.persist(path).map_err(|e| Error::Io(e.error))?;
        debug!("Cached {} bytes at {}", bytes.len(), path.display());
        Ok(())
    }

    /// Parses a cached file, fetching it when missing and fetching it again once if it does not parse.
    fn load_healing<T>(
        &self,
        path: &Path,
        fetch: impl Fn() -> Result<Vec<u8>>,
        parse: impl Fn(&[u8]) -> Result<T, String>,
    ) -> Result<T> {
        let lock = self.lock(path);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        if !path.is_file() {
            info!("{} is not cached yet", path.display());
            self.store(path, &fetch()?)?;
        }
        match parse(&std::fs::read(path)?) {
            Ok(value) => Ok(value),
            Err(reason) => {
                warn!("Cached {} is unusable ({}), downloading it again", path.display(), reason);
                self.store(path, &fetch()?)?;
                parse(&std::fs::read(path)?).map_err(|reason| Error::CacheCorruption {
                    path: path.to_path_buf(),
                    reason,
                })
            }
        }
    }

    fn parse_volume<T: NumCast + Clone>(&self, bytes: &[u8]) -> Result<Volume<T>, String> {
        let (header, data) = nrrd::read::<T>(bytes).map_err(|e| e.to_string())?;
        let resolution = self.settings.resolution();
        if let Some(spacings) = header.spacings {
            if spacings.iter().any(|s| (s - resolution.as_f64()).abs() > 1e-6) {
                return Err(format!("voxel spacing {spacings:?} does not match resolution {resolution}"));
            }
        }
        Ok(Volume::new(data, resolution))
    }

    pub fn load_annotation_volume(&self) -> Result<Volume<u32>> {
        self.load_healing(
            &self.annotation_volume_path(),
            || self.fetch(CacheFile::Annotation),
            |bytes| self.parse_volume(bytes),
        )
    }

    pub fn load_template_volume(&self) -> Result<Volume<f32>> {
        self.load_healing(
            &self.template_volume_path(),
            || self.fetch(CacheFile::Template),
            |bytes| self.parse_volume(bytes),
        )
    }

    /// With `recache_on_error` unset, an unreadable cached graph is bypassed by fetching it directly.
    pub fn load_structure_graph(&self, recache_on_error: bool) -> Result<StructureGraph> {
        let parse = |bytes: &[u8]| -> Result<StructureGraph, String> {
            let structures: Vec<Structure> = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
            StructureGraph::new(structures).map_err(|e| e.to_string())
        };
        let path = self.structure_graph_path();
        if recache_on_error {
            return self.load_healing(&path, || self.fetch(CacheFile::Graph), parse);
        }

        let cached = {
            let lock = self.lock(&path);
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            if !path.is_file() {
                self.store(&path, &self.fetch(CacheFile::Graph)?)?;
            }
            std::fs::read(&path).map_err(|e| e.to_string()).and_then(|bytes| parse(&bytes))
        };
        match cached {
            Ok(graph) => Ok(graph),
            Err(reason) => {
                warn!("Cached structure graph is unusable ({}), fetching it without caching", reason);
                StructureGraph::new(self.source.structure_graph()?)
            }
        }
    }

    pub fn load_structure_centers(&self) -> Result<Vec<StructureCenter>> {
        self.load_healing(
            &self.structure_centers_path(),
            || self.fetch(CacheFile::Centers),
            parse_structure_centers,
        )
    }

    /// Mesh text in Wavefront OBJ format; an empty string if it cannot be downloaded.
    pub fn load_structure_mesh(&self, id: u32) -> Result<String> {
        let path = self.structure_mesh_path(id);
        let lock = self.lock(&path);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        if path.is_file() {
            let text = std::fs::read_to_string(&path)?;
            if obj::parse(text.clone()).is_ok() {
                return Ok(text);
            }
            warn!("Cached mesh {} does not parse, downloading it again", path.display());
        }
        match self.source.structure_mesh(id, self.settings.atlas_version()) {
            Ok(text) => {
                if obj::parse(text.clone()).is_err() {
                    warn!("Downloaded mesh for structure {} does not parse", id);
                    return Ok(String::new());
                }
                self.store(&path, text.as_bytes())?;
                Ok(text)
            }
            Err(e) => {
                warn!("Could not download mesh for structure {}: {}", id, e);
                Ok(String::new())
            }
        }
    }

    fn fetch(&self, file: CacheFile) -> Result<Vec<u8>> {
        let (version, resolution) = (self.settings.atlas_version(), self.settings.resolution());
        match file {
            CacheFile::Centers => Ok(self.source.structure_centers(version)?.into_bytes()),
            CacheFile::Graph => Ok(serde_json::to_vec(&self.source.structure_graph()?)?),
            CacheFile::RootMesh => Ok(self.source.structure_mesh(ROOT_ID, version)?.into_bytes()),
            CacheFile::Annotation => self.source.annotation_volume(version, resolution),
            CacheFile::Template => self.source.template_volume(resolution),
        }
    }
    fn path_of(&self, file: CacheFile) -> PathBuf {
        match file {
            CacheFile::Centers => self.structure_centers_path(),
            CacheFile::Graph => self.structure_graph_path(),
            CacheFile::RootMesh => self.structure_mesh_path(ROOT_ID),
            CacheFile::Annotation => self.annotation_volume_path(),
            CacheFile::Template => self.template_volume_path(),
        }
    }

    /// Fetches every cache file, skipping existing ones unless `force` is set. Returns the files written.
    pub fn download_all(&self, force: bool, mut progress: impl FnMut(&Path)) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        for file in CacheFile::ALL {
            let path = self.path_of(file);
            progress(&path);
            if path.is_file() && !force {
                debug!("{} already cached", path.display());
                continue;
            }
            let lock = self.lock(&path);
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            self.store(&path, &self.fetch(file)?)?;
            written.push(path);
        }
        Ok(written)
    }
}

#[derive(Debug, Clone, Copy)]
enum CacheFile {
    Centers,
    Graph,
    RootMesh,
    Annotation,
    Template,
}
impl CacheFile {
    const ALL: [CacheFile; 5] = [
        CacheFile::Centers,
        CacheFile::Graph,
        CacheFile::RootMesh,
        CacheFile::Annotation,
        CacheFile::Template,
    ];
}

/// One row of the centers CSV; columns are matched by header name, extra columns are ignored.
#[derive(Deserialize)]
struct CenterRow {
    structure_id: u32,
    x: f64,
    y: f64,
    z: f64,
}

fn parse_structure_centers(bytes: &[u8]) -> Result<Vec<StructureCenter>, String> {
    let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(bytes);
    if reader.headers().map_err(|e| e.to_string())?.is_empty() {
        return Err("empty file".to_string());
    }
    reader
        .deserialize::<CenterRow>()
        .map(|row| {
            row.map(|r| StructureCenter {
                structure_id: r.structure_id,
                x: r.x,
                y: r.y,
                z: r.z,
            })
            .map_err(|e| e.to_string())
        })
        .collect()
}
