use nalgebra::Vector2;

use super::{PoseAccumulator, RobotPose, share};
use crate::config::PoseSection;
use crate::particle::SampleSet;

/// K-means over the particle positions, recomputed from scratch every cycle.
///
/// Centers are seeded deterministically: the heaviest particle first, then repeatedly the
/// particle farthest from all centers chosen so far.
#[derive(Clone, Debug)]
pub struct KMeansClustering {
    num_clusters: usize,
    max_iterations: usize,
    centers: Vec<Vector2<f64>>,
    counts: Vec<usize>,
    validities: Vec<f64>,
    best: usize,
}

impl KMeansClustering {
    pub fn new(params: &PoseSection) -> KMeansClustering {
        KMeansClustering {
            num_clusters: params.kmeans_clusters.max(1),
            max_iterations: params.kmeans_max_iterations,
            centers: Vec::new(),
            counts: Vec::new(),
            validities: Vec::new(),
            best: 0,
        }
    }

    pub fn init(&mut self, samples: &mut SampleSet) {
        for particle in samples.particles_mut() {
            particle.cluster = 0;
        }
        self.centers.clear();
        self.counts.clear();
        self.validities.clear();
        self.best = 0;
    }

    pub fn index_of_best_cluster(&self) -> usize {
        self.best
    }

    pub fn clusters(&self) -> Vec<(usize, usize)> {
        self.counts
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(id, count)| (id, *count))
            .collect()
    }

    pub fn cluster_validity(&self, cluster: usize) -> f64 {
        self.validities.get(cluster).copied().unwrap_or(0.0)
    }

    fn seed_centers(&mut self, positions: &[Vector2<f64>], samples: &SampleSet) {
        self.centers.clear();
        let heaviest = samples
            .particles()
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, p)| {
                if p.weighting > best.1 { (i, p.weighting) } else { best }
            })
            .0;
        self.centers.push(positions[heaviest]);
        let k = self.num_clusters.min(positions.len());
        while self.centers.len() < k {
            let mut farthest = 0;
            let mut farthest_distance = -1.0;
            for (i, position) in positions.iter().enumerate() {
                let distance = self
                    .centers
                    .iter()
                    .map(|c| (position - c).norm_squared())
                    .fold(f64::INFINITY, f64::min);
                if distance > farthest_distance {
                    farthest = i;
                    farthest_distance = distance;
                }
            }
            self.centers.push(positions[farthest]);
        }
    }

    fn nearest_center(&self, position: &Vector2<f64>) -> usize {
        let mut nearest = 0;
        let mut nearest_distance = f64::INFINITY;
        for (i, center) in self.centers.iter().enumerate() {
            let distance = (position - center).norm_squared();
            if distance < nearest_distance {
                nearest = i;
                nearest_distance = distance;
            }
        }
        nearest
    }

    pub fn calc_pose(&mut self, samples: &mut SampleSet) -> RobotPose {
        let positions: Vec<Vector2<f64>> = samples.particles().iter().map(|p| p.position()).collect();
        self.seed_centers(&positions, samples);
        let k = self.centers.len();

        let mut assignment = vec![usize::MAX; positions.len()];
        let mut iterations = 0;
        while iterations < self.max_iterations.max(1) {
            iterations += 1;
            let mut changed = false;
            for (slot, position) in assignment.iter_mut().zip(&positions) {
                let nearest = self.nearest_center(position);
                if *slot != nearest {
                    *slot = nearest;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
            let mut sums = vec![(Vector2::<f64>::zeros(), 0usize); k];
            for (cluster, position) in assignment.iter().zip(&positions) {
                sums[*cluster].0 += position;
                sums[*cluster].1 += 1;
            }
            for (center, (sum, count)) in self.centers.iter_mut().zip(sums) {
                if count > 0 {
                    *center = sum / count as f64;
                }
            }
        }
        log::trace!("k-means converged after {iterations} iterations");

        for (particle, cluster) in samples.particles_mut().iter_mut().zip(&assignment) {
            particle.cluster = *cluster;
        }
        let mut accumulators = vec![PoseAccumulator::default(); k];
        for particle in samples.particles() {
            accumulators[particle.cluster].add(particle);
        }
        let total = samples.total_weighting();
        self.counts = accumulators.iter().map(|a| a.count()).collect();
        self.validities = accumulators
            .iter()
            .map(|a| share(a.weight(), total, a.count(), samples.len()))
            .collect();
        self.best = 0;
        for (i, validity) in self.validities.iter().enumerate() {
            if *validity > self.validities[self.best] {
                self.best = i;
            }
        }
        let (pose, deviation) = accumulators[self.best].mean().unwrap_or_default();
        RobotPose {
            pose,
            validity: self.validities[self.best],
            deviation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Pose2D;
    use crate::pose::tests::population;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_three_groups_are_found() {
        let mut poses = Vec::new();
        let centers = [(-2000.0, 0.0, 0.2), (0.0, 1500.0, 0.1), (2000.0, -1000.0, 0.7)];
        for (j, (x, y, w)) in centers.iter().enumerate() {
            for i in 0..(5 + j) {
                poses.push((Pose2D::new(x + i as f64 * 5.0, *y, 0.0), *w));
            }
        }
        let mut samples = population(&poses);
        let params = PoseSection {
            kmeans_clusters: 3,
            ..Default::default()
        };
        let mut kmeans = KMeansClustering::new(&params);
        kmeans.init(&mut samples);
        let robot_pose = kmeans.calc_pose(&mut samples);
        let mut counts: Vec<usize> = kmeans.clusters().iter().map(|(_, c)| *c).collect();
        counts.sort();
        assert_eq!(counts, vec![5, 6, 7]);
        assert_approx_eq!(robot_pose.pose.x, 2015.0, 1e-9);
        assert_approx_eq!(robot_pose.pose.y, -1000.0, 1e-9);
        let total = 5.0 * 0.2 + 6.0 * 0.1 + 7.0 * 0.7;
        assert_approx_eq!(robot_pose.validity, 4.9 / total, 1e-9);
        let validity_sum: f64 = (0..3).map(|c| kmeans.cluster_validity(c)).sum();
        assert_approx_eq!(validity_sum, 1.0, 1e-9);
    }

    #[test]
    fn test_more_clusters_than_particles() {
        let mut samples = population(&[(Pose2D::new(100.0, 100.0, 0.0), 1.0)]);
        let mut kmeans = KMeansClustering::new(&PoseSection::default());
        kmeans.init(&mut samples);
        let robot_pose = kmeans.calc_pose(&mut samples);
        assert_eq!(kmeans.clusters(), vec![(0, 1)]);
        assert_approx_eq!(robot_pose.pose.x, 100.0, 1e-9);
        assert_approx_eq!(robot_pose.validity, 1.0, 1e-12);
    }
}
