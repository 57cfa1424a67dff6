//! Merging duplicate detections of the same physical object
//!
//! Overlapping frames see the same object more than once. Two polar
//! detections are the same object when their Cartesian distance is below the
//! merge threshold and their classes are compatible; clusters are the
//! connected components of that relation, so chains of near detections merge
//! even when no single pair spans the whole cluster.

use crate::error::VisionError;
use sortbot_core::{PolarDetection, PolarObject, SessionConfig};
use tracing::{debug, warn};
use uuid::Uuid;

/// Union-find over detection indices
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Path compression
        let mut current = i;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let root_a = self.find(a);
        let root_b = self.find(b);
        if root_a != root_b {
            // Smaller root wins, keeping components order-stable
            if root_a < root_b {
                self.parent[root_b] = root_a;
            } else {
                self.parent[root_a] = root_b;
            }
        }
    }
}

/// Collapses a session's polar detections into unique physical objects
pub struct Deduplicator {
    config: SessionConfig,
}

impl Deduplicator {
    pub fn new(config: SessionConfig) -> Result<Self, VisionError> {
        config
            .validate()
            .map_err(|e| VisionError::Core(sortbot_core::Error::Configuration(e)))?;
        Ok(Self { config })
    }

    /// Merge detections into one `PolarObject` per physical object.
    ///
    /// The partition is independent of input order, and re-merging an
    /// already collapsed set (one representative per cluster) returns it
    /// unchanged.
    pub fn merge(&self, detections: Vec<PolarDetection>) -> Vec<PolarObject> {
        let mut usable: Vec<PolarDetection> = Vec::with_capacity(detections.len());
        for det in detections {
            if det.angle_deg.is_finite() && det.radius_mm.is_finite() && det.radius_mm >= 0.0 {
                usable.push(det);
            } else {
                warn!(
                    "Dropping detection with non-finite polar coordinates ({}, {})",
                    det.angle_deg, det.radius_mm
                );
            }
        }

        if usable.is_empty() {
            return Vec::new();
        }

        // Sort first so cluster discovery is independent of arrival order
        usable.sort_by(|a, b| Self::position_key(a).partial_cmp(&Self::position_key(b)).unwrap_or(std::cmp::Ordering::Equal));

        let points: Vec<(f64, f64)> = usable.iter().map(|d| d.cartesian_mm()).collect();
        let mut components = UnionFind::new(usable.len());

        for i in 0..usable.len() {
            for j in (i + 1)..usable.len() {
                if !self
                    .config
                    .classes_compatible(&usable[i].class, &usable[j].class)
                {
                    continue;
                }
                let dx = points[i].0 - points[j].0;
                let dy = points[i].1 - points[j].1;
                if (dx * dx + dy * dy).sqrt() < self.config.merge_threshold_mm {
                    components.union(i, j);
                }
            }
        }

        let mut clusters: Vec<Vec<usize>> = vec![Vec::new(); usable.len()];
        for i in 0..usable.len() {
            let root = components.find(i);
            clusters[root].push(i);
        }

        let mut objects: Vec<PolarObject> = clusters
            .into_iter()
            .filter(|members| !members.is_empty())
            .map(|member_indices| self.collapse(&usable, member_indices))
            .collect();

        objects.sort_by(|a, b| {
            (a.angle_deg, a.radius_mm, a.class.as_str())
                .partial_cmp(&(b.angle_deg, b.radius_mm, b.class.as_str()))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        debug!(
            "Merged {} detections into {} objects",
            usable.len(),
            objects.len()
        );

        objects
    }

    /// Collapse one cluster into its representative object
    fn collapse(&self, detections: &[PolarDetection], mut member_indices: Vec<usize>) -> PolarObject {
        // Highest effective confidence wins; larger boxes are assumed less
        // occluded and break ties, position breaks any remainder
        member_indices.sort_by(|&a, &b| {
            let da = &detections[a];
            let db = &detections[b];
            db.effective_confidence(self.config.truncation_weight)
                .partial_cmp(&da.effective_confidence(self.config.truncation_weight))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    db.bbox
                        .area()
                        .partial_cmp(&da.bbox.area())
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(
                    Self::position_key(da)
                        .partial_cmp(&Self::position_key(db))
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });

        let members: Vec<PolarDetection> = member_indices
            .iter()
            .map(|&i| detections[i].clone())
            .collect();
        let class = self.majority_class(&members);
        let representative = members[0].clone();

        PolarObject {
            id: Uuid::new_v4(),
            angle_deg: representative.angle_deg,
            radius_mm: representative.radius_mm,
            class,
            image_idx: representative.image_idx,
            bbox: representative.bbox,
            members,
        }
    }

    /// Majority vote over member classes; vote ties go to the class with the
    /// most confident member, then lexicographic order
    fn majority_class(&self, members: &[PolarDetection]) -> String {
        let mut tallies: Vec<(&str, usize, f32)> = Vec::new();
        for member in members {
            match tallies
                .iter_mut()
                .find(|(class, _, _)| *class == member.class.as_str())
            {
                Some((_, count, best)) => {
                    *count += 1;
                    *best = best.max(member.confidence);
                }
                None => tallies.push((member.class.as_str(), 1, member.confidence)),
            }
        }

        tallies.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then(b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal))
                .then(a.0.cmp(b.0))
        });

        tallies[0].0.to_string()
    }

    fn position_key(det: &PolarDetection) -> (f64, f64, f64, f64) {
        (
            det.angle_deg,
            det.radius_mm,
            det.bbox.left as f64,
            det.bbox.top as f64,
        )
    }
}
