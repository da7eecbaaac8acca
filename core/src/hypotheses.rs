//! Ranked pose hypotheses with positional covariance, one per sufficiently large cluster.
use nalgebra::Matrix2;
use serde::{Deserialize, Serialize};

use crate::Pose2D;
use crate::particle::SampleSet;
use crate::pose::PoseCalculator;

/// Clusters with this many members or fewer are treated as noise.
pub const MIN_CLUSTER_MEMBERS: usize = 3;

/// One alternative pose of the robot.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoseHypothesis {
    pub pose: Pose2D,
    /// Covariance of the member positions in mm².
    pub position_covariance: Matrix2<f64>,
    pub validity: f64,
}

/// Extract up to `max_hypotheses` hypotheses from the calculator's clusters, largest first.
///
/// Only the clustering calculators produce hypotheses. The covariance is computed from the raw
/// member positions about the cluster pose and is unbiased (divided by `members - 1`).
pub fn extract_hypotheses(
    calculator: &PoseCalculator,
    samples: &SampleSet,
    max_hypotheses: usize,
) -> Vec<PoseHypothesis> {
    let mut clusters = calculator.clusters();
    // stable, so equal counts keep their id order
    clusters.sort_by(|a, b| b.1.cmp(&a.1));

    let mut hypotheses = Vec::with_capacity(max_hypotheses.min(clusters.len()));
    for (cluster, count) in clusters {
        if count <= MIN_CLUSTER_MEMBERS || hypotheses.len() >= max_hypotheses {
            break;
        }
        let Some(pose) = calculator.calc_pose_of_cluster(samples, cluster) else {
            continue;
        };
        let mean = pose.translation();
        let mut covariance = Matrix2::zeros();
        let mut members = 0usize;
        for particle in samples.particles().iter().filter(|p| p.cluster == cluster) {
            let d = particle.position() - mean;
            covariance[(0, 0)] += d.x * d.x;
            covariance[(1, 1)] += d.y * d.y;
            covariance[(0, 1)] += d.x * d.y;
            members += 1;
        }
        covariance /= (members.max(2) - 1) as f64;
        covariance[(1, 0)] = covariance[(0, 1)];
        hypotheses.push(PoseHypothesis {
            pose,
            position_covariance: covariance,
            validity: calculator.cluster_validity(cluster),
        });
    }
    hypotheses
}
