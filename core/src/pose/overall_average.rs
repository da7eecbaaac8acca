use super::{PoseAccumulator, RobotPose};
use crate::particle::SampleSet;

/// Weighted mean over the whole population. Cheap, but meaningless for multi-modal beliefs.
#[derive(Clone, Copy, Debug, Default)]
pub struct OverallAverage;

impl OverallAverage {
    pub fn calc_pose(&self, samples: &SampleSet) -> RobotPose {
        let mut accumulator = PoseAccumulator::default();
        for particle in samples.particles() {
            accumulator.add(particle);
        }
        let (pose, deviation) = accumulator.mean().unwrap_or_default();
        RobotPose {
            pose,
            validity: 1.0,
            deviation,
        }
    }
}
