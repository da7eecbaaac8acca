//! Line point sensor model.
use super::{SensorModel, SensorModelResult, gaussian_likelihood};
use crate::config::SensorSection;
use crate::field::{FieldDimensions, FieldModel};
use crate::measurements::{FramePercepts, ObservationKind};
use crate::particle::SampleSet;

/// Scores end points of seen lines by how far they land from the nearest field marking.
///
/// The error is measured as the angle under which the gap appears from the robot, so that
/// distant points, which perception places less precisely, are tolerated more. A point that
/// lands outside the carpet under some particle's pose says nothing about that particle and
/// leaves it unscored.
#[derive(Clone, Debug)]
pub struct LineSensorModel {
    field: FieldDimensions,
    field_model: FieldModel,
    angle_std: f64,
}

impl LineSensorModel {
    pub fn new(
        field: &FieldDimensions,
        field_model: FieldModel,
        params: &SensorSection,
    ) -> LineSensorModel {
        LineSensorModel {
            field: field.clone(),
            field_model,
            angle_std: params.line_point_angle_std,
        }
    }
}

impl SensorModel for LineSensorModel {
    fn kind(&self) -> ObservationKind {
        ObservationKind::LinePoint
    }

    fn compute_weightings(
        &self,
        samples: &SampleSet,
        selected_indices: &[usize],
        percepts: &FramePercepts,
        weightings: &mut [Option<f64>],
    ) -> SensorModelResult {
        let points: Vec<_> = selected_indices
            .iter()
            .filter_map(|&index| percepts.lines.line_point(index))
            .collect();
        if points.is_empty() {
            return SensorModelResult::NoUpdate;
        }
        let mut result = SensorModelResult::FullUpdate;
        for (particle, weighting) in samples.particles().iter().zip(weightings.iter_mut()) {
            let mut w = Some(1.0);
            for observed in &points {
                let on_field = particle.to_field(observed);
                if !self.field.is_inside_carpet(&on_field) {
                    w = None;
                    break;
                }
                let gap = self.field_model.distance_to_nearest_line(&on_field);
                let angle_error = gap.atan2(observed.norm().max(1.0));
                w = w.map(|w| w * gaussian_likelihood(angle_error, self.angle_std));
            }
            if w.is_none() {
                result = SensorModelResult::PartialUpdate;
            }
            *weighting = w;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Pose2D;
    use crate::measurements::PerceivedLine;
    use crate::particle::Particle;
    use assert_approx_eq::assert_approx_eq;
    use nalgebra::Vector2;

    #[test]
    fn test_point_on_halfway_line() {
        let field = FieldDimensions::default();
        let params = SensorSection::default();
        let model = LineSensorModel::new(&field, FieldModel::new(&field, 300.0), &params);
        let mut percepts = FramePercepts::new(0);
        percepts.lines.lines.push(PerceivedLine {
            first: Vector2::new(1000.0, 1000.0),
            last: Vector2::new(1000.0, -1000.0),
        });
        let mut samples = SampleSet::new(3);
        *samples.at_mut(0) = Particle::new(&Pose2D::new(-1000.0, 0.0, 0.0), 1.0);
        *samples.at_mut(1) = Particle::new(&Pose2D::new(-1300.0, 0.0, 0.0), 1.0);
        // projects the point beyond the carpet
        *samples.at_mut(2) = Particle::new(&Pose2D::new(3000.0, 2000.0, 0.0), 1.0);
        let mut weightings = vec![None; 3];
        let result = model.compute_weightings(&samples, &[0, 1], &percepts, &mut weightings);
        assert_eq!(result, SensorModelResult::PartialUpdate);
        assert_approx_eq!(weightings[0].unwrap(), 1.0, 1e-9);
        assert!(weightings[1].unwrap() < weightings[0].unwrap());
        assert!(weightings[2].is_none());
    }

    #[test]
    fn test_missing_line_is_no_update() {
        let field = FieldDimensions::default();
        let model = LineSensorModel::new(&field, FieldModel::new(&field, 300.0), &SensorSection::default());
        let samples = SampleSet::new(1);
        let mut weightings = vec![None; 1];
        let result = model.compute_weightings(&samples, &[4], &FramePercepts::new(0), &mut weightings);
        assert_eq!(result, SensorModelResult::NoUpdate);
    }
}
