use std::collections::BTreeMap;

use super::digi_hit::ScifiHit;
use super::hardware_id::DetectorID;

/// A run of SciFi channels with consecutive ids
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub first: DetectorID,
    pub n: usize,
    pub hits: Vec<ScifiHit>,
}

impl Cluster {
    pub fn last(&self) -> DetectorID {
        self.first + self.n as DetectorID - 1
    }

    pub fn total_charge(&self) -> f64 {
        self.hits.iter().map(|h| h.charge).sum()
    }

    /// Ask a geometry service where this cluster sits
    pub fn locate<G: ClusterGeometry>(&self, geometry: &G) -> G::Position {
        geometry.position(self.first, self.n)
    }
}

/// Detector geometry is owned by someone else; clusters only know their (first, n) key.
pub trait ClusterGeometry {
    type Position;
    fn position(&self, first: DetectorID, n: usize) -> Self::Position;
}

/// Group valid SciFi hits into runs of numerically adjacent ids.
///
/// Adjacency is purely numeric, so a run can cross a mat or plane boundary.
pub fn make_clusters(hits: &BTreeMap<DetectorID, ScifiHit>) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = Vec::new();
    for (id, hit) in hits.iter().filter(|(_, h)| h.is_valid()) {
        match clusters.last_mut() {
            Some(current) if current.last() + 1 == *id => {
                current.n += 1;
                current.hits.push(hit.clone());
            }
            _ => clusters.push(Cluster {
                first: *id,
                n: 1,
                hits: vec![hit.clone()],
            }),
        }
    }
    clusters
}
