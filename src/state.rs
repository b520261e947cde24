use crate::{
    cache::{StructureCenter, VolumeCache},
    catalog::{Compartment, CompartmentTreeNode, SettingsReport, StructureGraph},
    color::{normalize_intensity, rasterize_gray, rasterize_rgb, CompartmentColors, ImageBlob},
    downloader::AtlasSource,
    error::{Error, NotFound, Result},
    mapping::{AestheticMapping, AestheticParams, ColorLut, ColorMapping, ScalarMapping, TimeseriesSummary},
    model::{SliceAxis, NO_LABEL_ID},
    penetration::{AddOutcome, PenetrationData, PenetrationStore},
    settings::Settings,
    volume::{self, PlaneFit, Volume},
};
use fxhash::FxHashSet;
use image::{imageops, DynamicImage};
use log::{debug, info, warn};
use ndarray::{parallel::prelude::*, Array2};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::{
    path::PathBuf,
    sync::{Arc, RwLock},
};

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PenetrationCoordinates {
    pub penetration_id: String,
    pub ids: Vec<i64>,
    /// (AP, DV, LR) triples, one per unit
    pub coordinates: Vec<f64>,
    pub stride: usize,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnitCompartments {
    pub penetration_id: String,
    /// `None` for units outside any labelled compartment
    pub compartments: Vec<Option<Compartment>>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeseriesValues {
    pub penetration_id: String,
    /// the (N + 1)×T series, row by row
    pub data: Vec<f64>,
    pub stride: usize,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnitStatValues {
    pub penetration_id: String,
    pub data: Vec<f64>,
}

/// One penetration's share of an aggregate query; `value` is absent when it has nothing to offer.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AggregateEntry<T> {
    pub penetration_id: String,
    pub value: Option<T>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SliceImages {
    pub annotation: ImageBlob,
    pub template: ImageBlob,
}

/// Everything derived from one set of settings. Replaced wholesale on reconfiguration.
struct Session {
    settings: Settings,
    cache: VolumeCache,
    store: PenetrationStore,
    annotation: OnceCell<Volume<u32>>,
    template: OnceCell<Volume<f32>>,
    template_max: OnceCell<f32>,
    graph: OnceCell<StructureGraph>,
    colors: OnceCell<CompartmentColors>,
}
impl Session {
    fn new(settings: Settings, source: Arc<dyn AtlasSource>) -> Self {
        Self {
            cache: VolumeCache::new(settings.clone(), source),
            settings,
            store: PenetrationStore::new(),
            annotation: OnceCell::new(),
            template: OnceCell::new(),
            template_max: OnceCell::new(),
            graph: OnceCell::new(),
            colors: OnceCell::new(),
        }
    }

    fn annotation(&self) -> Result<&Volume<u32>> { self.annotation.get_or_try_init(|| self.cache.load_annotation_volume()) }
    fn template(&self) -> Result<&Volume<f32>> { self.template.get_or_try_init(|| self.cache.load_template_volume()) }
    fn graph(&self) -> Result<&StructureGraph> { self.graph.get_or_try_init(|| self.cache.load_structure_graph(true)) }
    fn colors(&self) -> Result<&CompartmentColors> {
        self.colors.get_or_try_init(|| Ok(CompartmentColors::from_graph(self.graph()?)))
    }
    fn template_max(&self) -> Result<f32> {
        self.template_max
            .get_or_try_init(|| Ok(self.template()?.data().par_iter().copied().reduce(|| 0.0, f32::max)))
            .copied()
    }

    fn penetration(&self, id: &str) -> Result<Arc<PenetrationData>> { self.store.activate(id) }

    fn render(&self, labels: &Array2<u32>, intensities: &Array2<f32>, rotate: bool) -> Result<SliceImages> {
        let mask = labels.mapv(|label| label != NO_LABEL_ID);
        let rgb = rasterize_rgb(&self.colors()?.colorize(labels)?, &mask)?;
        let gray = rasterize_gray(&normalize_intensity(intensities, self.template_max()?), &mask)?;
        let (annotation, template) = if rotate {
            (
                DynamicImage::ImageRgba8(imageops::rotate270(&rgb)),
                DynamicImage::ImageLumaA8(imageops::rotate270(&gray)),
            )
        } else {
            (DynamicImage::ImageRgba8(rgb), DynamicImage::ImageLumaA8(gray))
        };
        Ok(SliceImages {
            annotation: ImageBlob::png(&annotation)?,
            template: ImageBlob::png(&template)?,
        })
    }
}

/// Request-facing state: the active settings together with the atlas cache and loaded penetrations.
pub struct AppState {
    source: Arc<dyn AtlasSource>,
    session: RwLock<Option<Arc<Session>>>,
}
impl AppState {
    pub fn new(source: Arc<dyn AtlasSource>) -> Self {
        Self {
            source,
            session: RwLock::new(None),
        }
    }

    fn session(&self) -> Result<Arc<Session>> {
        self.session
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(Error::Unconfigured)
    }

    /// Replaces cache and penetration set in one step. When the data file patterns cannot be
    /// resolved, the previous state is left untouched; files that fail validation are reported
    /// in the outcomes and skipped.
    pub fn reconfigure(&self, settings: Settings) -> Result<Vec<AddOutcome>> {
        let files = settings.resolve_data_files()?;
        info!(
            "Applying settings: atlas {}, resolution {}um, {} data file(s)",
            settings.atlas_version(),
            settings.resolution(),
            files.len()
        );
        let session = Session::new(settings, self.source.clone());
        let outcomes = session.store.add_all(&files);
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(session));
        Ok(outcomes)
    }

    pub fn is_configured(&self) -> bool { self.session().is_ok() }
    pub fn settings(&self) -> Result<Settings> { Ok(self.session()?.settings.clone()) }

    pub fn penetration_ids(&self) -> Result<Vec<String>> { Ok(self.session()?.store.list()) }
    pub fn add_penetrations(&self, paths: &[PathBuf]) -> Result<Vec<AddOutcome>> {
        Ok(self.session()?.store.add_all(paths))
    }
    pub fn remove_penetrations(&self, ids: &[String]) -> Result<Vec<String>> { Ok(self.session()?.store.remove(ids)) }

    pub fn compartment_tree(&self) -> Result<Option<CompartmentTreeNode>> {
        let session = self.session()?;
        Ok(session.graph()?.compartment_tree(&session.settings.compartment))
    }
    pub fn settings_report(&self) -> Result<SettingsReport> {
        let session = self.session()?;
        Ok(session.graph()?.check_settings(&session.settings.compartment))
    }

    /// The compartment of every unit, coarsened to the deepest ancestor that survives pruning.
    pub fn compartments(&self, id: &str) -> Result<UnitCompartments> {
        let session = self.session()?;
        let data = session.penetration(id)?;
        let graph = session.graph()?;
        let annotation = session.annotation()?;
        let visible: FxHashSet<u32> = graph
            .compartment_tree(&session.settings.compartment)
            .map(|tree| tree.ids().into_iter().collect())
            .unwrap_or_default();

        let compartments = data
            .coordinates
            .rows()
            .into_iter()
            .map(|row| -> Result<Option<Compartment>> {
                let label = annotation.value_at([row[0], row[1], row[2]]).unwrap_or(NO_LABEL_ID);
                if label == NO_LABEL_ID {
                    return Ok(None);
                }
                let structure = graph.get(label).ok_or(Error::UnknownCompartment(label))?;
                let shown = structure
                    .structure_id_path
                    .iter()
                    .rev()
                    .find(|&&id| visible.contains(&id))
                    .and_then(|&id| graph.get(id))
                    .unwrap_or(structure);
                Ok(Some(Compartment::from(shown)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(UnitCompartments {
            penetration_id: id.to_string(),
            compartments,
        })
    }
    pub fn compartments_for_all(&self) -> Result<Vec<AggregateEntry<UnitCompartments>>> {
        self.for_all(|id| self.compartments(id))
    }

    pub fn coordinates(&self, id: &str) -> Result<PenetrationCoordinates> {
        let data = self.session()?.penetration(id)?;
        Ok(PenetrationCoordinates {
            penetration_id: id.to_string(),
            ids: data.unit_ids.clone(),
            coordinates: data.coordinates.iter().copied().collect(),
            stride: 3,
        })
    }

    /// Annotation and template sections along the plane fitted through a penetration.
    pub fn pseudocoronal_slice(&self, id: &str) -> Result<SliceImages> {
        let session = self.session()?;
        let data = session.penetration(id)?;
        let fit = PlaneFit::from_coordinates(data.coordinates.view(), session.settings.resolution())?;
        debug!("Plane for {}: AP = {} + {} * DV", id, fit.intercept, fit.slope);
        let labels = volume::pseudocoronal_slice(session.annotation()?, &fit);
        let intensities = volume::pseudocoronal_slice(session.template()?, &fit);
        session.render(&labels, &intensities, false)
    }

    /// The raw label section; coronal is (DV, LR), sagittal (AP, DV), horizontal (AP, LR).
    pub fn annotation_slice(&self, axis: SliceAxis, coordinate: f64) -> Result<Array2<u32>> {
        let session = self.session()?;
        let labels = session.annotation()?.axis_slice(axis, coordinate);
        labels.ok_or_else(|| NotFound::SliceCoordinate { axis, coordinate }.into())
    }

    /// Sagittal sections are turned a quarter counter-clockwise to sit like the coronal ones.
    pub fn axis_slice(&self, axis: SliceAxis, coordinate: f64) -> Result<SliceImages> {
        let session = self.session()?;
        let not_found = || NotFound::SliceCoordinate { axis, coordinate };
        let labels = session.annotation()?.axis_slice(axis, coordinate).ok_or_else(not_found)?;
        let intensities = session.template()?.axis_slice(axis, coordinate).ok_or_else(not_found)?;
        session.render(&labels, &intensities, axis == SliceAxis::Sagittal)
    }

    pub fn timeseries(&self, penetration_id: &str, timeseries_id: &str) -> Result<TimeseriesValues> {
        let data = self.session()?.penetration(penetration_id)?;
        let series = data
            .timeseries
            .get(timeseries_id)
            .ok_or_else(|| NotFound::Timeseries(timeseries_id.to_string()))?;
        Ok(TimeseriesValues {
            penetration_id: penetration_id.to_string(),
            data: series.iter().copied().collect(),
            stride: series.ncols(),
        })
    }
    pub fn timeseries_for_all(&self, timeseries_id: &str) -> Result<Vec<AggregateEntry<TimeseriesValues>>> {
        self.for_all(|id| self.timeseries(id, timeseries_id))
    }

    /// Folds the named series of every penetration that has one.
    pub fn timeseries_summary(&self, timeseries_id: &str) -> Result<TimeseriesSummary> {
        let session = self.session()?;
        let mut summary = TimeseriesSummary::new(timeseries_id);
        let mut found = false;
        for entry in session.store.entries() {
            if !entry.timeseries.iter().any(|t| t == timeseries_id) {
                continue;
            }
            let data = session.penetration(&entry.id)?;
            if let Some(series) = data.timeseries.get(timeseries_id) {
                summary.update(series.view());
                found = true;
            }
        }
        if !found {
            return Err(NotFound::Timeseries(timeseries_id.to_string()).into());
        }
        Ok(summary)
    }

    pub fn unit_stat(&self, penetration_id: &str, stat_id: &str) -> Result<UnitStatValues> {
        let data = self.session()?.penetration(penetration_id)?;
        let values = data
            .unit_stats
            .get(stat_id)
            .ok_or_else(|| NotFound::UnitStat(stat_id.to_string()))?;
        Ok(UnitStatValues {
            penetration_id: penetration_id.to_string(),
            data: values.to_vec(),
        })
    }
    pub fn unit_stats_for_all(&self, stat_id: &str) -> Result<Vec<AggregateEntry<UnitStatValues>>> {
        self.for_all(|id| self.unit_stat(id, stat_id))
    }

    pub fn aesthetic_mapping(&self, penetration_id: &str, params: &AestheticParams) -> Result<AestheticMapping> {
        let data = self.session()?.penetration(penetration_id)?;
        let scalar = |timeseries_id: &str, bounds: [f64; 2]| -> Result<ScalarMapping> {
            let series = data
                .timeseries
                .get(timeseries_id)
                .ok_or_else(|| NotFound::Timeseries(timeseries_id.to_string()))?;
            Ok(ScalarMapping::from_series(timeseries_id, series.view(), bounds))
        };

        let color = match &params.color {
            Some(p) => {
                let color_lut = ColorLut::named(&p.color_lut)?;
                let ScalarMapping {
                    timeseries_id,
                    times,
                    values,
                } = scalar(&p.timeseries_id, p.bounds)?;
                Some(ColorMapping {
                    timeseries_id,
                    times,
                    values,
                    color_lut,
                })
            }
            None => None,
        };
        let opacity = params.opacity.as_ref().map(|p| scalar(&p.timeseries_id, p.bounds)).transpose()?;
        let radius = params.radius.as_ref().map(|p| scalar(&p.timeseries_id, p.bounds)).transpose()?;

        Ok(AestheticMapping {
            penetration_id: penetration_id.to_string(),
            color,
            opacity,
            radius,
            visibility: params.visibility.clone(),
        })
    }

    pub fn color_lut(&self, name: &str) -> Result<ColorLut> { ColorLut::named(name) }

    /// Mesh of a known structure; empty when it cannot be downloaded.
    pub fn structure_mesh(&self, id: u32) -> Result<String> {
        let session = self.session()?;
        if session.graph()?.get(id).is_none() {
            return Err(NotFound::Structure(id).into());
        }
        session.cache.load_structure_mesh(id)
    }

    pub fn structure_centers(&self) -> Result<Vec<StructureCenter>> { self.session()?.cache.load_structure_centers() }

    fn for_all<T>(&self, query: impl Fn(&str) -> Result<T>) -> Result<Vec<AggregateEntry<T>>> {
        let ids = self.penetration_ids()?;
        Ok(ids
            .into_iter()
            .map(|id| {
                let value = match query(&id) {
                    Ok(value) => Some(value),
                    Err(e) if e.is_not_found() => None,
                    Err(e) => {
                        warn!("Leaving out penetration {}: {}", id, e);
                        None
                    }
                };
                AggregateEntry {
                    penetration_id: id,
                    value,
                }
            })
            .collect())
    }
}
