//! Fixture builders shared by the unit tests.
use crate::{
    catalog::{Structure, StructureGraph},
    downloader::AtlasSource,
    error::{NetworkError, Result},
    penetration::{CCF_COORD, PROBE_INSERTION, TIMESERIES, UNIT_ID, UNIT_STATS},
    settings::{AtlasVersion, Resolution, Settings},
    volume::nrrd::{self, Encoding},
};
use ndarray::{Array1, Array2, Array3};
use ndarray_npy::WriteNpyExt;
use std::{
    collections::BTreeMap,
    io::{Cursor, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

pub fn structure(id: u32, acronym: &str, name: &str, path: &[u32], rgb: [u8; 3]) -> Structure {
    Structure {
        id,
        name: name.to_string(),
        acronym: acronym.to_string(),
        rgb_triplet: rgb,
        graph_id: 1,
        graph_order: 0,
        structure_id_path: path.to_vec(),
        structure_set_ids: Vec::new(),
    }
}

pub fn small_structures() -> Vec<Structure> {
    let mut structures = vec![
        structure(997, "root", "root", &[997], [255, 255, 255]),
        structure(8, "grey", "Basic cell groups and regions", &[997, 8], [191, 218, 227]),
        structure(315, "CTX", "Isocortex", &[997, 8, 315], [112, 255, 113]),
        structure(5, "LF", "leaf", &[997, 8, 315, 5], [10, 20, 30]),
        structure(1009, "fiber tracts", "fiber tracts", &[997, 1009], [204, 204, 204]),
        structure(1000, "eps", "extrapyramidal fiber systems", &[997, 1009, 1000], [204, 204, 205]),
    ];
    for (order, s) in structures.iter_mut().enumerate() {
        s.graph_order = order as u32;
    }
    structures
}

/// root ─┬─ 8 ── 315 ── 5
///       └─ 1009 ── 1000
pub fn small_graph() -> StructureGraph { StructureGraph::new(small_structures()).unwrap() }

pub fn cache_settings(dir: &Path) -> Settings {
    let mut settings = Settings::default();
    settings.system.cache_directory = dir.to_path_buf();
    settings
}

/// Labels depend on the DV index only, except for an unlabelled LR = 0 plane.
pub fn annotation_array(shape: [usize; 3]) -> Array3<u32> {
    Array3::from_shape_fn((shape[0], shape[1], shape[2]), |(_, dv, lr)| {
        if lr == 0 {
            0
        } else {
            [997, 315, 5, 1000][dv % 4]
        }
    })
}

pub fn template_array(shape: [usize; 3]) -> Array3<f32> {
    Array3::from_shape_fn((shape[0], shape[1], shape[2]), |(ap, dv, lr)| (ap + dv + lr) as f32)
}

pub const ROOT_MESH: &str = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";
pub const STRUCTURE_CENTERS: &str = "structure_id,x,y,z\n997,6600,4000,5700\n5,100.5,200,300\n";

/// In-memory stand-in for the Allen servers that counts what it serves.
pub struct FakeAtlas {
    shape: [usize; 3],
    annotation_downloads: AtomicUsize,
    graph_downloads: AtomicUsize,
    corrupt: AtomicBool,
    offline: AtomicBool,
}
impl FakeAtlas {
    pub fn new() -> Self { Self::with_shape([12, 8, 10]) }
    pub fn with_shape(shape: [usize; 3]) -> Self {
        Self {
            shape,
            annotation_downloads: AtomicUsize::new(0),
            graph_downloads: AtomicUsize::new(0),
            corrupt: AtomicBool::new(false),
            offline: AtomicBool::new(false),
        }
    }

    pub fn annotation_downloads(&self) -> usize { self.annotation_downloads.load(Ordering::SeqCst) }
    pub fn graph_downloads(&self) -> usize { self.graph_downloads.load(Ordering::SeqCst) }
    /// Every annotation volume served from now on is truncated.
    pub fn corrupt_annotation(&self) { self.corrupt.store(true, Ordering::SeqCst) }
    pub fn go_offline(&self) { self.offline.store(true, Ordering::SeqCst) }

    fn reachable(&self, url: &str) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetworkError::Status {
                url: url.to_string(),
                status: 503,
            }
            .into());
        }
        Ok(())
    }
}
impl AtlasSource for FakeAtlas {
    fn annotation_volume(&self, _version: AtlasVersion, _resolution: Resolution) -> Result<Vec<u8>> {
        self.reachable("annotation")?;
        self.annotation_downloads.fetch_add(1, Ordering::SeqCst);
        let mut bytes = nrrd::write(&annotation_array(self.shape), 100.0, Encoding::Gzip).unwrap();
        if self.corrupt.load(Ordering::SeqCst) {
            bytes.truncate(bytes.len() / 2);
        }
        Ok(bytes)
    }
    fn template_volume(&self, _resolution: Resolution) -> Result<Vec<u8>> {
        self.reachable("template")?;
        Ok(nrrd::write(&template_array(self.shape), 100.0, Encoding::Raw).unwrap())
    }
    fn structure_graph(&self) -> Result<Vec<Structure>> {
        self.reachable("graph")?;
        self.graph_downloads.fetch_add(1, Ordering::SeqCst);
        Ok(small_structures())
    }
    fn structure_mesh(&self, id: u32, _version: AtlasVersion) -> Result<String> {
        self.reachable("mesh")?;
        if id != 997 {
            return Err(NetworkError::Status {
                url: format!("mesh/{id}.obj"),
                status: 404,
            }
            .into());
        }
        Ok(ROOT_MESH.to_string())
    }
    fn structure_centers(&self, _version: AtlasVersion) -> Result<String> {
        self.reachable("centers")?;
        Ok(STRUCTURE_CENTERS.to_string())
    }
}

pub fn npy_bytes(array: &impl WriteNpyExt) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    array.write_npy(&mut out).unwrap();
    out.into_inner()
}

/// A 1-D little-endian UCS-4 (`<U`) array, which the npy writer cannot produce itself.
pub fn npy_strings(values: &[&str]) -> Vec<u8> {
    let width = values.iter().map(|s| s.chars().count()).max().unwrap_or(0).max(1);
    let mut header = format!(
        "{{'descr': '<U{}', 'fortran_order': False, 'shape': ({},), }}",
        width,
        values.len()
    );
    let total = 10 + header.len() + 1;
    header.push_str(&" ".repeat((64 - total % 64) % 64));
    header.push('\n');

    let mut out = b"\x93NUMPY\x01\x00".to_vec();
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for value in values {
        let mut code_points: Vec<u32> = value.chars().map(|c| c as u32).collect();
        code_points.resize(width, 0);
        for cp in code_points {
            out.extend_from_slice(&cp.to_le_bytes());
        }
    }
    out
}

pub fn write_npz(dir: &Path, file_name: &str, arrays: Vec<(String, Vec<u8>)>) -> PathBuf {
    let path = dir.join(file_name);
    let mut zip = zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
    let options = zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, bytes) in arrays {
        zip.start_file(format!("{name}.npy"), options).unwrap();
        zip.write_all(&bytes).unwrap();
    }
    zip.finish().unwrap();
    path
}

/// Builder for valid penetration files that individual tests then break or reshape.
pub struct PenetrationFixture {
    id: String,
    coordinates: Array2<f64>,
    timeseries: BTreeMap<String, Array2<f64>>,
    unit_stats: BTreeMap<String, Array1<f64>>,
    without: Vec<String>,
    file_name: Option<String>,
}
impl PenetrationFixture {
    /// `n` units spread over DV indices 0..8 of a 100um volume, with a "spikes" series and an "snr" stat.
    pub fn new(id: &str, n: usize) -> Self {
        let coordinates = Array2::from_shape_fn((n, 3), |(i, c)| {
            let k = (i % 8) as f64;
            [600.0 + 10.0 * k, 50.0 + 100.0 * k, 450.0][c]
        });
        let spikes = Array2::from_shape_fn((n + 1, 6), |(row, t)| {
            if row == 0 {
                t as f64 * 0.5
            } else {
                (row - 1) as f64 + t as f64
            }
        });
        let snr = Array1::from_shape_fn(n, |i| i as f64 * 1.5);
        Self {
            id: id.to_string(),
            coordinates,
            timeseries: BTreeMap::from([("spikes".to_string(), spikes)]),
            unit_stats: BTreeMap::from([("snr".to_string(), snr)]),
            without: Vec::new(),
            file_name: None,
        }
    }

    pub fn without(mut self, field: &str) -> Self {
        self.without.push(field.to_string());
        self
    }
    pub fn coordinate(mut self, row: usize, position: [f64; 3]) -> Self {
        for (c, v) in position.into_iter().enumerate() {
            self.coordinates[[row, c]] = v;
        }
        self
    }
    pub fn timeseries(mut self, name: &str, series: Array2<f64>) -> Self {
        self.timeseries.insert(name.to_string(), series);
        self
    }
    pub fn unit_stat(mut self, name: &str, values: Array1<f64>) -> Self {
        self.unit_stats.insert(name.to_string(), values);
        self
    }
    pub fn file_name(mut self, name: &str) -> Self {
        self.file_name = Some(name.to_string());
        self
    }

    pub fn write(&self, dir: &Path) -> PathBuf {
        let n = self.coordinates.nrows();
        let unit_ids = Array1::from_iter(0..n as i64);
        let series_names: Vec<&str> = self.timeseries.keys().map(String::as_str).collect();
        let stat_names: Vec<&str> = self.unit_stats.keys().map(String::as_str).collect();

        let mut arrays = vec![
            (PROBE_INSERTION.to_string(), npy_strings(&[&self.id])),
            (UNIT_ID.to_string(), npy_bytes(&unit_ids)),
            (CCF_COORD.to_string(), npy_bytes(&self.coordinates)),
            (TIMESERIES.to_string(), npy_strings(&series_names)),
            (UNIT_STATS.to_string(), npy_strings(&stat_names)),
        ];
        arrays.extend(self.timeseries.iter().map(|(name, a)| (name.clone(), npy_bytes(a))));
        arrays.extend(self.unit_stats.iter().map(|(name, a)| (name.clone(), npy_bytes(a))));
        arrays.retain(|(name, _)| !self.without.contains(name));

        let file_name = self.file_name.clone().unwrap_or_else(|| format!("{}.npz", self.id));
        write_npz(dir, &file_name, arrays)
    }
}
