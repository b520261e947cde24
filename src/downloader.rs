use crate::{
    catalog::Structure,
    error::{NetworkError, Result},
    settings::{AtlasVersion, Resolution},
};
use log::info;
use serde::Deserialize;
use std::time::Duration;

const ALLEN_CCF_BASE: &str = "http://download.alleninstitute.org/informatics-archive/current-release/mouse_ccf";
const ALLEN_STRUCTURE_QUERY: &str = "http://api.brain-map.org/api/v2/data/query.json?criteria=model::Structure,rma::criteria,[graph_id$eq1],rma::options[order$eq'structures.graph_order'][num_rows$eqall]";

/// Supplier of raw atlas data; the cache layer decides where it is stored.
pub trait AtlasSource: Send + Sync {
    fn annotation_volume(&self, version: AtlasVersion, resolution: Resolution) -> Result<Vec<u8>>;
    fn template_volume(&self, resolution: Resolution) -> Result<Vec<u8>>;
    fn structure_graph(&self) -> Result<Vec<Structure>>;
    fn structure_mesh(&self, id: u32, version: AtlasVersion) -> Result<String>;
    fn structure_centers(&self, version: AtlasVersion) -> Result<String>;
}

pub struct AllenApi {
    client: reqwest::blocking::Client,
}
impl AllenApi {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| NetworkError::Transport {
                url: ALLEN_CCF_BASE.to_string(),
                source,
            })?;
        Ok(Self { client })
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response> {
        info!("Downloading {}", url);
        let transport = |source| NetworkError::Transport {
            url: url.to_string(),
            source,
        };
        let response = self.client.get(url).send().map_err(transport)?;
        if !response.status().is_success() {
            return Err(NetworkError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            }
            .into());
        }
        Ok(response)
    }
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self.get(url)?.bytes().map_err(|source| NetworkError::Transport {
            url: url.to_string(),
            source,
        })?;
        info!("Downloaded {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }
    fn get_text(&self, url: &str) -> Result<String> {
        let text = self.get(url)?.text().map_err(|source| NetworkError::Transport {
            url: url.to_string(),
            source,
        })?;
        Ok(text)
    }
}
impl AtlasSource for AllenApi {
    fn annotation_volume(&self, version: AtlasVersion, resolution: Resolution) -> Result<Vec<u8>> {
        self.get_bytes(&format!(
            "{}/annotation/{}/annotation_{}.nrrd",
            ALLEN_CCF_BASE, version, resolution
        ))
    }
    fn template_volume(&self, resolution: Resolution) -> Result<Vec<u8>> {
        self.get_bytes(&format!("{}/average_template/average_template_{}.nrrd", ALLEN_CCF_BASE, resolution))
    }
    fn structure_graph(&self) -> Result<Vec<Structure>> {
        let text = self.get_text(ALLEN_STRUCTURE_QUERY)?;
        parse_structure_query(&text).map_err(|reason| {
            NetworkError::Malformed {
                url: ALLEN_STRUCTURE_QUERY.to_string(),
                reason,
            }
            .into()
        })
    }
    fn structure_mesh(&self, id: u32, version: AtlasVersion) -> Result<String> {
        self.get_text(&format!("{}/annotation/{}/structure_meshes/{}.obj", ALLEN_CCF_BASE, version, id))
    }
    fn structure_centers(&self, version: AtlasVersion) -> Result<String> {
        self.get_text(&format!("{}/annotation/{}/structure_centers.csv", ALLEN_CCF_BASE, version))
    }
}

#[derive(Deserialize)]
struct StructureQueryResponse {
    success: bool,
    msg: serde_json::Value,
}

/// Structure record as returned by the Allen API, before cleaning.
#[derive(Deserialize)]
struct RawStructure {
    id: u32,
    name: String,
    acronym: String,
    color_hex_triplet: String,
    #[serde(default)]
    graph_id: u32,
    #[serde(default)]
    graph_order: u32,
    structure_id_path: String,
}
impl RawStructure {
    fn clean(self) -> Result<Structure, String> {
        let hex = self.color_hex_triplet.trim_start_matches('#');
        let channel = |i: usize| {
            hex.get(i..i + 2)
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| format!("bad color {:?} for structure {}", self.color_hex_triplet, self.id))
        };
        let rgb_triplet = [channel(0)?, channel(2)?, channel(4)?];
        let structure_id_path = self
            .structure_id_path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<u32>().map_err(|e| format!("bad path of structure {}: {}", self.id, e)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Structure {
            id: self.id,
            name: self.name,
            acronym: self.acronym,
            rgb_triplet,
            graph_id: self.graph_id,
            graph_order: self.graph_order,
            structure_id_path,
            structure_set_ids: Vec::new(),
        })
    }
}

fn parse_structure_query(text: &str) -> Result<Vec<Structure>, String> {
    let response: StructureQueryResponse = serde_json::from_str(text).map_err(|e| e.to_string())?;
    if !response.success {
        return Err(format!("query failed: {}", response.msg));
    }
    let raw: Vec<RawStructure> = serde_json::from_value(response.msg).map_err(|e| e.to_string())?;
    raw.into_iter().map(RawStructure::clean).collect()
}
