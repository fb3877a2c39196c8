use kerb_types::{ClusterParams, WorldPoint};

/// Label for points that belong to no cluster.
pub const NOISE_CLUSTER_ID: i32 = -1;

const UNCLASSIFIED: i32 = -2;

/// Axis-aligned bounding box over x, y, z.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Aabb {
    fn from_point(p: &WorldPoint) -> Self {
        Self {
            min: [p.x, p.y, p.z],
            max: [p.x, p.y, p.z],
        }
    }

    fn include(&mut self, p: &WorldPoint) {
        let coords = [p.x, p.y, p.z];
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(coords[axis]);
            self.max[axis] = self.max[axis].max(coords[axis]);
        }
    }

    fn extent(&self, axis: usize) -> f64 {
        self.max[axis] - self.min[axis]
    }

    /// Larger horizontal extent.
    pub fn length(&self) -> f64 {
        self.extent(0).max(self.extent(1))
    }

    /// Smaller horizontal extent.
    pub fn width(&self) -> f64 {
        self.extent(0).min(self.extent(1))
    }

    pub fn height(&self) -> f64 {
        self.extent(2)
    }
}

/// A spatial group of foreground points, live for one frame only.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub centroid_x: f64,
    pub centroid_y: f64,
    pub aabb: Aabb,
    /// Indices into the foreground point set this cluster was built
    /// from.
    pub point_indices: Vec<usize>,
    /// max ring − min ring over the members.
    pub ring_span: u8,
    pub azimuth_span_deg: f64,
}

impl Cluster {
    pub fn centroid_is_finite(&self) -> bool {
        self.centroid_x.is_finite() && self.centroid_y.is_finite()
    }
}

/// Density clustering of foreground points on their (x, y) projection.
///
/// A point is a core point when at least `min_points` *other* points
/// lie within `eps_m`; border points attach to the first core point
/// that reaches them. Output order and membership are deterministic
/// given input order.
pub fn extract_clusters(points: &[WorldPoint], params: &ClusterParams) -> Vec<Cluster> {
    let labels = assign_cluster_ids(points, params.eps_m, params.min_points);
    let num_clusters = labels.iter().copied().max().map_or(0, |m| (m + 1).max(0)) as usize;

    let mut members: Vec<Vec<usize>> = vec![Vec::new(); num_clusters];
    for (idx, &label) in labels.iter().enumerate() {
        if label >= 0 {
            members[label as usize].push(idx);
        }
    }

    members
        .into_iter()
        .filter(|m| !m.is_empty())
        .map(|indices| build_cluster(points, indices))
        .collect()
}

fn build_cluster(points: &[WorldPoint], indices: Vec<usize>) -> Cluster {
    let mut aabb = Aabb::from_point(&points[indices[0]]);
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut ring_min = u8::MAX;
    let mut ring_max = 0u8;
    let mut az_min = f64::INFINITY;
    let mut az_max = f64::NEG_INFINITY;
    for &i in &indices {
        let p = &points[i];
        aabb.include(p);
        sum_x += p.x;
        sum_y += p.y;
        ring_min = ring_min.min(p.ring);
        ring_max = ring_max.max(p.ring);
        let az = p.y.atan2(p.x).to_degrees().rem_euclid(360.0);
        az_min = az_min.min(az);
        az_max = az_max.max(az);
    }
    let n = indices.len() as f64;
    Cluster {
        centroid_x: sum_x / n,
        centroid_y: sum_y / n,
        aabb,
        ring_span: ring_max.saturating_sub(ring_min),
        azimuth_span_deg: az_max - az_min,
        point_indices: indices,
    }
}

/// DBSCAN labels: a cluster id per point or [`NOISE_CLUSTER_ID`].
fn assign_cluster_ids(points: &[WorldPoint], eps_m: f64, min_points: usize) -> Vec<i32> {
    let n = points.len();
    let mut labels = vec![UNCLASSIFIED; n];
    let eps_sq = eps_m * eps_m;
    let mut next_cluster = 0i32;

    for i in 0..n {
        if labels[i] != UNCLASSIFIED {
            continue;
        }
        let neighbors = region_query(points, i, eps_sq);
        if neighbors.len() < min_points {
            labels[i] = NOISE_CLUSTER_ID;
            continue;
        }

        let cluster_id = next_cluster;
        next_cluster += 1;
        labels[i] = cluster_id;

        let mut queue = neighbors;
        let mut head = 0;
        while head < queue.len() {
            let j = queue[head];
            head += 1;
            if labels[j] == NOISE_CLUSTER_ID {
                // Border point: reachable from a core point.
                labels[j] = cluster_id;
                continue;
            }
            if labels[j] != UNCLASSIFIED {
                continue;
            }
            labels[j] = cluster_id;
            let j_neighbors = region_query(points, j, eps_sq);
            if j_neighbors.len() >= min_points {
                queue.extend(j_neighbors);
            }
        }
    }
    labels
}

/// Indices of all *other* points within `eps` of `center`, in input
/// order.
fn region_query(points: &[WorldPoint], center: usize, eps_sq: f64) -> Vec<usize> {
    let c = &points[center];
    points
        .iter()
        .enumerate()
        .filter(|(i, p)| {
            if *i == center {
                return false;
            }
            let dx = p.x - c.x;
            let dy = p.y - c.y;
            dx * dx + dy * dy <= eps_sq
        })
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn wp(x: f64, y: f64, z: f64, ring: u8) -> WorldPoint {
        WorldPoint {
            x,
            y,
            z,
            ring,
            intensity: 0,
            timestamp_ns: 0,
            return_index: 0,
        }
    }

    fn blob(cx: f64, cy: f64, ring0: u8) -> Vec<WorldPoint> {
        (0..5)
            .map(|i| {
                wp(
                    cx + (i as f64) * 0.1,
                    cy,
                    0.5 + (i as f64) * 0.2,
                    ring0 + (i % 3) as u8,
                )
            })
            .collect()
    }

    fn params() -> ClusterParams {
        ClusterParams {
            eps_m: 0.5,
            min_points: 3,
        }
    }

    #[test]
    fn two_separated_blobs_form_two_clusters() {
        let mut points = blob(0.0, 0.0, 10);
        points.extend(blob(10.0, 10.0, 20));
        let clusters = extract_clusters(&points, &params());
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].point_indices, vec![0, 1, 2, 3, 4]);
        assert_relative_eq!(clusters[0].centroid_x, 0.2);
        assert_relative_eq!(clusters[1].centroid_x, 10.2);
        assert_eq!(clusters[0].ring_span, 2);
        assert_relative_eq!(clusters[0].aabb.height(), 0.8);
    }

    #[test]
    fn sparse_points_are_noise() {
        let points = vec![wp(0.0, 0.0, 0.0, 0), wp(5.0, 0.0, 0.0, 0), wp(0.0, 5.0, 0.0, 0)];
        assert!(extract_clusters(&points, &params()).is_empty());
    }

    #[test]
    fn blob_at_min_points_total_stays_empty() {
        // Exactly min_points coincident points: each has only
        // min_points − 1 neighbors, so none is core.
        let points = vec![wp(1.0, 1.0, 0.0, 0); 3];
        assert!(extract_clusters(&points, &params()).is_empty());
    }

    #[test]
    fn duplicate_coincident_points_cluster_without_crashing() {
        let points = vec![wp(2.0, 2.0, 0.0, 5); 10];
        let clusters = extract_clusters(&points, &params());
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].point_indices.len(), 10);
        assert_relative_eq!(clusters[0].centroid_x, 2.0);
        assert_eq!(clusters[0].ring_span, 0);
    }

    #[test]
    fn labels_are_deterministic_for_identical_input() {
        let mut points = blob(0.0, 0.0, 0);
        points.extend(blob(3.0, 3.0, 0));
        let a = extract_clusters(&points, &params());
        let b = extract_clusters(&points, &params());
        assert_eq!(a.len(), b.len());
        for (ca, cb) in a.iter().zip(&b) {
            assert_eq!(ca.point_indices, cb.point_indices);
        }
    }

    #[test]
    fn nan_points_become_noise() {
        let mut points = blob(0.0, 0.0, 0);
        points.push(wp(f64::NAN, f64::NAN, 0.0, 0));
        let clusters = extract_clusters(&points, &params());
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].point_indices.len(), 5);
    }
}
