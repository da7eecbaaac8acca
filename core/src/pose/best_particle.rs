use super::{RobotPose, share};
use crate::particle::SampleSet;

/// Reports the single particle with the highest weighting.
#[derive(Clone, Copy, Debug, Default)]
pub struct BestParticle;

impl BestParticle {
    pub fn calc_pose(&self, samples: &SampleSet) -> RobotPose {
        let mut best = 0;
        let mut best_weighting = f64::NEG_INFINITY;
        for (i, particle) in samples.particles().iter().enumerate() {
            // NaN never wins
            if particle.weighting > best_weighting {
                best = i;
                best_weighting = particle.weighting;
            }
        }
        let particle = samples.at(best);
        RobotPose {
            pose: particle.pose(),
            validity: share(particle.weighting, samples.total_weighting(), 1, samples.len()),
            deviation: 0.0,
        }
    }
}
