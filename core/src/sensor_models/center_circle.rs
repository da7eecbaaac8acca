//! Center circle sensor model.
use nalgebra::Vector2;

use super::{SensorModel, SensorModelResult, point_likelihood};
use crate::config::SensorSection;
use crate::measurements::{FramePercepts, ObservationKind};
use crate::particle::SampleSet;

/// Treats the seen center of the center circle like a landmark at the field origin.
#[derive(Clone, Debug)]
pub struct CenterCircleSensorModel {
    angle_std: f64,
    distance_std: f64,
}

impl CenterCircleSensorModel {
    pub fn new(params: &SensorSection) -> CenterCircleSensorModel {
        CenterCircleSensorModel {
            angle_std: params.center_circle_angle_std,
            distance_std: params.center_circle_distance_std,
        }
    }
}

impl SensorModel for CenterCircleSensorModel {
    fn kind(&self) -> ObservationKind {
        ObservationKind::CenterCircle
    }

    fn compute_weightings(
        &self,
        samples: &SampleSet,
        selected_indices: &[usize],
        percepts: &FramePercepts,
        weightings: &mut [Option<f64>],
    ) -> SensorModelResult {
        let circle = &percepts.lines.circle;
        if !circle.found {
            return SensorModelResult::NoUpdate;
        }
        let center = Vector2::zeros();
        for (particle, weighting) in samples.particles().iter().zip(weightings.iter_mut()) {
            let single = point_likelihood(
                particle,
                &circle.position_relative,
                &center,
                self.angle_std,
                self.distance_std,
            );
            *weighting = Some(single.powi(selected_indices.len() as i32));
        }
        SensorModelResult::FullUpdate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Pose2D;
    use crate::particle::Particle;

    #[test]
    fn test_circle_seen_ahead() {
        let model = CenterCircleSensorModel::new(&SensorSection::default());
        let mut percepts = FramePercepts::new(0);
        percepts.lines.circle.found = true;
        percepts.lines.circle.position_relative = Vector2::new(1000.0, 0.0);
        let mut samples = SampleSet::new(2);
        *samples.at_mut(0) = Particle::new(&Pose2D::new(-1000.0, 0.0, 0.0), 1.0);
        *samples.at_mut(1) = Particle::new(&Pose2D::new(1000.0, 0.0, 0.0), 1.0);
        let mut weightings = vec![None; 2];
        let result = model.compute_weightings(&samples, &[0, 0], &percepts, &mut weightings);
        assert_eq!(result, SensorModelResult::FullUpdate);
        assert!(weightings[0].unwrap() > 0.99);
        assert!(weightings[1].unwrap() < 1e-6);
    }

    #[test]
    fn test_not_found_is_no_update() {
        let model = CenterCircleSensorModel::new(&SensorSection::default());
        let samples = SampleSet::new(1);
        let mut weightings = vec![None; 1];
        let result = model.compute_weightings(&samples, &[0], &FramePercepts::new(0), &mut weightings);
        assert_eq!(result, SensorModelResult::NoUpdate);
    }
}
