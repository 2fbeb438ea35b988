//! Graph of aligned pairs between feature groups.

use itertools::Itertools;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{
    debug,
    info,
};

use crate::errors::{
    AlignmentError,
    Result,
    Stage,
};
use crate::models::{
    Feature,
    FeatureGroup,
    FeatureKey,
    Sample,
};
use crate::table::AlignmentRow;

/// Group part of a vertex key. Features without a group get a vertex of
/// their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum GroupKey {
    Group(u32),
    Feature(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct VertexKey {
    pub sample_id: usize,
    pub group: GroupKey,
}

impl VertexKey {
    pub fn of(feature: &Feature) -> Self {
        let group = match feature.group_id {
            Some(g) => GroupKey::Group(g),
            None => GroupKey::Feature(feature.id),
        };
        Self {
            sample_id: feature.sample_id,
            group,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Vertex {
    pub key: VertexKey,
    /// The group behind this vertex, absent for ungrouped features.
    pub group: Option<FeatureGroup>,
    pub members: Vec<FeatureKey>,
}

/// Two features of one row joined by an edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AlignedPair {
    pub row_id: usize,
    pub a: FeatureKey,
    pub b: FeatureKey,
    pub mass_delta: f64,
    pub rt_delta: f64,
    /// Inverse of the scaled distance `sqrt((dm/dmz)^2 + (drt/drt_tol)^2)`.
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Edge {
    pub source: VertexKey,
    pub target: VertexKey,
    pub pairs: Vec<AlignedPair>,
}

impl Edge {
    pub fn weight(&self) -> usize {
        self.pairs.len()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CorrespondenceGraph {
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    #[serde(skip)]
    vertex_index: HashMap<VertexKey, usize>,
    #[serde(skip)]
    edge_index: HashMap<(VertexKey, VertexKey), usize>,
}

fn ordered(a: VertexKey, b: VertexKey) -> (VertexKey, VertexKey) {
    if a <= b { (a, b) } else { (b, a) }
}

impl CorrespondenceGraph {
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn vertex(&self, key: &VertexKey) -> Option<&Vertex> {
        self.vertex_index.get(key).map(|&i| &self.vertices[i])
    }

    pub fn edges_between(&self, a: &VertexKey, b: &VertexKey) -> Option<&Edge> {
        self.edge_index
            .get(&ordered(*a, *b))
            .map(|&i| &self.edges[i])
    }

    /// Number of distinct neighbours of a vertex.
    pub fn degree(&self, key: &VertexKey) -> usize {
        self.edges
            .iter()
            .filter(|e| e.source == *key || e.target == *key)
            .count()
    }

    fn vertex_for(&mut self, feature: &Feature, sample: Option<&Sample>) -> VertexKey {
        let key = VertexKey::of(feature);
        if self.vertex_index.contains_key(&key) {
            return key;
        }
        let (group, members) = match (feature.group_id, sample) {
            (Some(g), Some(sample)) => {
                let members: Vec<FeatureKey> =
                    sample.group_members(g).iter().map(|f| f.key()).collect();
                let group = FeatureGroup {
                    group_id: g,
                    sample_id: feature.sample_id,
                    feature_ids: members.iter().map(|k| k.feature_id).collect(),
                };
                (Some(group), members)
            }
            _ => (None, vec![feature.key()]),
        };
        self.vertex_index.insert(key, self.vertices.len());
        self.vertices.push(Vertex {
            key,
            group,
            members,
        });
        key
    }

    fn add_pair(&mut self, a: VertexKey, b: VertexKey, pair: AlignedPair) {
        let key = ordered(a, b);
        match self.edge_index.get(&key) {
            Some(&i) => self.edges[i].pairs.push(pair),
            None => {
                self.edge_index.insert(key, self.edges.len());
                self.edges.push(Edge {
                    source: key.0,
                    target: key.1,
                    pairs: vec![pair],
                });
            }
        }
    }
}

/// Builds a [`CorrespondenceGraph`] from finished alignment rows.
#[derive(Debug, Clone, Copy)]
pub struct GraphEdgeConstructor {
    pub dmz: f64,
    pub drt: f64,
}

impl GraphEdgeConstructor {
    pub fn new(dmz: f64, drt: f64) -> Result<Self> {
        if !(dmz > 0.0 && drt > 0.0) {
            return Err(AlignmentError::backend(
                Stage::Graph,
                format!("pair scaling must be positive, got dmz={} drt={}", dmz, drt),
            ));
        }
        Ok(Self { dmz, drt })
    }

    /// Every row with at least two features contributes the clique over its
    /// features. Pairs from the same sample or the same vertex are skipped.
    ///
    /// Vertices are shared between rows, so a pair of vertices linked by
    /// several rows ends up with one edge holding several pairs.
    pub fn build(&self, rows: &[AlignmentRow], samples: &[Sample]) -> CorrespondenceGraph {
        let by_id: HashMap<usize, &Sample> = samples.iter().map(|s| (s.id, s)).collect();
        let mut graph = CorrespondenceGraph::default();
        let mut skipped = 0usize;

        for row in rows.iter().filter(|r| r.is_aligned()) {
            let keys: Vec<VertexKey> = row
                .features
                .iter()
                .map(|f| graph.vertex_for(f, by_id.get(&f.sample_id).copied()))
                .collect();

            for ((va, fa), (vb, fb)) in keys.iter().zip(row.features.iter()).tuple_combinations() {
                if fa.sample_id == fb.sample_id || va == vb {
                    skipped += 1;
                    continue;
                }
                let pair = self.pair(row.row_id, fa, fb);
                graph.add_pair(*va, *vb, pair);
            }
        }

        if skipped > 0 {
            debug!("Skipped {} same-sample pairs while building graph", skipped);
        }
        info!(
            "Built correspondence graph with {} vertices and {} edges",
            graph.vertices.len(),
            graph.edges.len()
        );
        graph
    }

    fn pair(&self, row_id: usize, fa: &Feature, fb: &Feature) -> AlignedPair {
        let (first, second) = if fa.key() <= fb.key() { (fa, fb) } else { (fb, fa) };
        let mass_delta = second.mass - first.mass;
        let rt_delta = second.rt - first.rt;
        let dist = ((mass_delta / self.dmz).powi(2) + (rt_delta / self.drt).powi(2)).sqrt();
        AlignedPair {
            row_id,
            a: first.key(),
            b: second.key(),
            mass_delta,
            rt_delta,
            score: 1.0 / dist.max(1e-6),
        }
    }
}
