use crate::{
    error::{Error, Result},
    model::ROOT_ID,
    settings::{CompartmentRef, CompartmentSettings},
};
use fxhash::{FxHashMap, FxHashSet};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// One node of the Allen structure ontology, as cached on disk.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Structure {
    pub id: u32,
    pub name: String,
    pub acronym: String,
    pub rgb_triplet: [u8; 3],
    #[serde(default)]
    pub graph_id: u32,
    #[serde(default)]
    pub graph_order: u32,
    /// ids from the root down to and including this structure
    pub structure_id_path: Vec<u32>,
    #[serde(default)]
    pub structure_set_ids: Vec<u32>,
}
impl Structure {
    pub fn parent_id(&self) -> Option<u32> {
        let n = self.structure_id_path.len();
        (n >= 2).then(|| self.structure_id_path[n - 2])
    }
    pub fn depth(&self) -> usize { self.structure_id_path.len().saturating_sub(1) }
}

/// A compartment as reported for a single unit.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Compartment {
    pub id: u32,
    pub name: String,
    pub acronym: String,
    pub rgb_triplet: [u8; 3],
}
impl From<&Structure> for Compartment {
    fn from(s: &Structure) -> Self {
        Compartment {
            id: s.id,
            name: s.name.clone(),
            acronym: s.acronym.clone(),
            rgb_triplet: s.rgb_triplet,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompartmentTreeNode {
    pub id: u32,
    pub name: String,
    pub acronym: String,
    pub rgb_triplet: [u8; 3],
    pub children: Vec<CompartmentTreeNode>,
}
impl CompartmentTreeNode {
    pub fn ids(&self) -> Vec<u32> {
        let mut ids = vec![self.id];
        for child in &self.children {
            ids.extend(child.ids());
        }
        ids
    }
}

/// Problems found when checking compartment settings against the structure graph.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct SettingsReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}
impl SettingsReport {
    pub fn is_ok(&self) -> bool { self.errors.is_empty() }
}

pub struct StructureGraph {
    structures: Vec<Structure>,
    by_id: FxHashMap<u32, usize>,
    by_acronym: FxHashMap<String, u32>,
    by_name: FxHashMap<String, u32>,
    children: FxHashMap<u32, Vec<u32>>,
}
impl StructureGraph {
    /// Builds the graph, checking for a single root (997), known parents and no cycles.
    pub fn new(mut structures: Vec<Structure>) -> Result<Self> {
        structures.sort_by_key(|s| (s.graph_order, s.id));

        let mut by_id = FxHashMap::default();
        for (idx, s) in structures.iter().enumerate() {
            if by_id.insert(s.id, idx).is_some() {
                return Err(Error::MalformedGraph(format!("structure {} appears twice", s.id)));
            }
            if s.structure_id_path.last() != Some(&s.id) {
                return Err(Error::MalformedGraph(format!(
                    "path of structure {} does not end in its own id",
                    s.id
                )));
            }
        }

        let roots = structures.iter().filter(|s| s.parent_id().is_none()).map(|s| s.id).collect_vec();
        if roots != [ROOT_ID] {
            return Err(Error::MalformedGraph(format!("expected the single root {ROOT_ID}, found {roots:?}")));
        }

        let mut children: FxHashMap<u32, Vec<u32>> = FxHashMap::default();
        for s in &structures {
            if let Some(parent) = s.parent_id() {
                if !by_id.contains_key(&parent) {
                    return Err(Error::MalformedGraph(format!("parent {} of structure {} is missing", parent, s.id)));
                }
                children.entry(parent).or_default().push(s.id);
            }
        }

        let graph = StructureGraph {
            by_acronym: structures.iter().map(|s| (s.acronym.to_lowercase(), s.id)).collect(),
            by_name: structures.iter().map(|s| (s.name.to_lowercase(), s.id)).collect(),
            structures,
            by_id,
            children,
        };
        graph.check_reachable()?;
        Ok(graph)
    }

    // Every node must be reached exactly once when walking down from the root.
    fn check_reachable(&self) -> Result<()> {
        let mut seen = FxHashSet::default();
        let mut stack = vec![ROOT_ID];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                return Err(Error::MalformedGraph(format!("structure {id} is part of a cycle")));
            }
            stack.extend(self.children(id));
        }
        if seen.len() != self.structures.len() {
            return Err(Error::MalformedGraph(format!(
                "{} structure(s) are not reachable from the root",
                self.structures.len() - seen.len()
            )));
        }
        Ok(())
    }

    pub fn structures(&self) -> &[Structure] { &self.structures }
    pub fn len(&self) -> usize { self.structures.len() }
    pub fn is_empty(&self) -> bool { self.structures.is_empty() }
    pub fn get(&self, id: u32) -> Option<&Structure> { self.by_id.get(&id).map(|&idx| &self.structures[idx]) }
    pub fn children(&self, id: u32) -> &[u32] { self.children.get(&id).map(|c| c.as_slice()).unwrap_or(&[]) }

    /// Resolves a settings entry by id, or by case-insensitive acronym and then name.
    pub fn find(&self, reference: &CompartmentRef) -> Option<&Structure> {
        match reference {
            CompartmentRef::Id(id) => self.get(*id),
            CompartmentRef::Name(name) => {
                let key = name.to_lowercase();
                self.by_acronym
                    .get(&key)
                    .or_else(|| self.by_name.get(&key))
                    .and_then(|&id| self.get(id))
            }
        }
    }

    /// Depth of the deepest structure; the root has depth 0.
    pub fn height(&self) -> usize { self.structures.iter().map(|s| s.depth()).max().unwrap_or(0) }

    /// Prunes the ontology: nodes deeper than `max_depth` and excluded subtrees are dropped,
    /// while included nodes (and the ancestors connecting them to the root) are always kept.
    pub fn compartment_tree(&self, settings: &CompartmentSettings) -> Option<CompartmentTreeNode> {
        let include: FxHashSet<u32> = settings.include.iter().filter_map(|r| self.find(r)).map(|s| s.id).collect();
        let exclude: FxHashSet<u32> = settings.exclude.iter().filter_map(|r| self.find(r)).map(|s| s.id).collect();
        self.prune(ROOT_ID, settings.max_depth, &include, &exclude, false)
    }

    fn prune(
        &self,
        id: u32,
        max_depth: usize,
        include: &FxHashSet<u32>,
        exclude: &FxHashSet<u32>,
        excluded_above: bool,
    ) -> Option<CompartmentTreeNode> {
        let structure = self.get(id)?;
        let included = include.contains(&id);
        let excluded = !included && (excluded_above || exclude.contains(&id));

        let children = self
            .children(id)
            .iter()
            .filter_map(|&child| self.prune(child, max_depth, include, exclude, excluded))
            .collect_vec();

        let keep = id == ROOT_ID || included || !children.is_empty() || (!excluded && structure.depth() <= max_depth);
        keep.then(|| CompartmentTreeNode {
            id,
            name: structure.name.clone(),
            acronym: structure.acronym.clone(),
            rgb_triplet: structure.rgb_triplet,
            children,
        })
    }

    pub fn check_settings(&self, settings: &CompartmentSettings) -> SettingsReport {
        let mut report = SettingsReport::default();
        let height = self.height();
        if settings.max_depth > height {
            report.errors.push(format!(
                "maxDepth {} exceeds the height {} of the structure tree",
                settings.max_depth, height
            ));
        }

        let mut resolve = |list: &[CompartmentRef], what: &str| -> Vec<u32> {
            let mut ids = Vec::new();
            for reference in list {
                match self.find(reference) {
                    Some(s) if ids.contains(&s.id) => {
                        report
                            .warnings
                            .push(format!("{} {} is listed more than once", what, reference))
                    }
                    Some(s) => ids.push(s.id),
                    None => report.errors.push(format!("{} {} does not name a known compartment", what, reference)),
                }
            }
            ids
        };
        let include = resolve(&settings.include, "included compartment");
        let exclude = resolve(&settings.exclude, "excluded compartment");

        for id in include.iter().filter(|id| exclude.contains(id)) {
            report.warnings.push(format!(
                "compartment {id} is both included and excluded, it will be included"
            ));
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{small_graph, structure};

    #[test]
    fn builds_lookups() {
        let graph = small_graph();
        assert_eq!(graph.len(), 6);
        assert_eq!(graph.get(5).unwrap().rgb_triplet, [10, 20, 30]);
        assert_eq!(graph.get(5).unwrap().parent_id(), Some(315));
        assert_eq!(graph.children(997), &[8, 1009]);
        assert_eq!(graph.height(), 3);
        assert_eq!(graph.find(&CompartmentRef::Name("ctx".into())).unwrap().id, 315);
        assert_eq!(graph.find(&CompartmentRef::Name("Fiber Tracts".into())).unwrap().id, 1009);
        assert!(graph.find(&CompartmentRef::Id(12345)).is_none());
    }

    #[test]
    fn rejects_malformed_graphs() {
        let no_root = vec![structure(8, "grey", "Basic cell groups", &[997, 8], [1, 1, 1])];
        assert!(matches!(StructureGraph::new(no_root), Err(Error::MalformedGraph(_))));

        let two_roots = vec![
            structure(997, "root", "root", &[997], [1, 1, 1]),
            structure(8, "grey", "grey", &[8], [1, 1, 1]),
        ];
        assert!(matches!(StructureGraph::new(two_roots), Err(Error::MalformedGraph(_))));

        let orphan = vec![
            structure(997, "root", "root", &[997], [1, 1, 1]),
            structure(5, "x", "x", &[997, 4, 5], [1, 1, 1]),
        ];
        assert!(matches!(StructureGraph::new(orphan), Err(Error::MalformedGraph(_))));

        let cycle = vec![
            structure(997, "root", "root", &[997], [1, 1, 1]),
            structure(1, "a", "a", &[2, 1], [1, 1, 1]),
            structure(2, "b", "b", &[1, 2], [1, 1, 1]),
        ];
        assert!(matches!(StructureGraph::new(cycle), Err(Error::MalformedGraph(_))));
    }

    #[test]
    fn prunes_by_depth() {
        let graph = small_graph();
        let settings = CompartmentSettings {
            max_depth: 1,
            ..Default::default()
        };
        let tree = graph.compartment_tree(&settings).unwrap();
        assert_eq!(tree.ids(), vec![997, 8, 1009]);
    }

    #[test]
    fn include_wins_over_depth_and_exclude() {
        let graph = small_graph();
        let settings = CompartmentSettings {
            max_depth: 1,
            include: vec![CompartmentRef::Name("leaf".into())],
            exclude: vec![CompartmentRef::Id(8), CompartmentRef::Name("fiber tracts".into())],
        };
        let tree = graph.compartment_tree(&settings).unwrap();
        // 8 and 315 survive only as ancestors of the included leaf
        assert_eq!(tree.ids(), vec![997, 8, 315, 5]);
    }

    #[test]
    fn reports_settings_problems() {
        let graph = small_graph();
        let settings = CompartmentSettings {
            max_depth: 7,
            include: vec![CompartmentRef::Id(5), CompartmentRef::Name("LEAF".into()), CompartmentRef::Name("nope".into())],
            exclude: vec![CompartmentRef::Id(5)],
        };
        let report = graph.check_settings(&settings);
        assert_eq!(report.errors.len(), 2, "{:?}", report.errors);
        assert_eq!(report.warnings.len(), 2, "{:?}", report.warnings);
        assert!(!report.is_ok());

        assert!(graph.check_settings(&CompartmentSettings::default()).errors.len() == 1);
        let fine = CompartmentSettings {
            max_depth: 3,
            ..Default::default()
        };
        assert_eq!(graph.check_settings(&fine), SettingsReport::default());
    }
}
