//! Corner (line intersection) sensor model.
use super::{SensorModel, SensorModelResult, gaussian_likelihood};
use crate::config::SensorSection;
use crate::field::{FieldDimensions, FieldModel};
use crate::measurements::{FramePercepts, ObservationKind};
use crate::particle::SampleSet;

/// Matches seen intersections to the nearest field corner of the same shape. Particles for
/// which no corner of that shape lies within the crossing length stay unscored.
#[derive(Clone, Debug)]
pub struct CornersSensorModel {
    field: FieldDimensions,
    field_model: FieldModel,
    angle_std: f64,
}

impl CornersSensorModel {
    pub fn new(
        field: &FieldDimensions,
        field_model: FieldModel,
        params: &SensorSection,
    ) -> CornersSensorModel {
        CornersSensorModel {
            field: field.clone(),
            field_model,
            angle_std: params.corner_angle_std,
        }
    }
}

impl SensorModel for CornersSensorModel {
    fn kind(&self) -> ObservationKind {
        ObservationKind::Corner
    }

    fn compute_weightings(
        &self,
        samples: &SampleSet,
        selected_indices: &[usize],
        percepts: &FramePercepts,
        weightings: &mut [Option<f64>],
    ) -> SensorModelResult {
        let intersections: Vec<_> = selected_indices
            .iter()
            .filter_map(|&index| percepts.lines.intersections.get(index))
            .collect();
        if intersections.is_empty() {
            return SensorModelResult::NoUpdate;
        }
        let mut result = SensorModelResult::FullUpdate;
        for (particle, weighting) in samples.particles().iter().zip(weightings.iter_mut()) {
            let mut w = Some(1.0);
            for intersection in &intersections {
                let on_field = particle.to_field(&intersection.position_relative);
                let matched = if self.field.is_inside_carpet(&on_field) {
                    self.field_model.nearest_corner(&on_field, intersection.kind)
                } else {
                    None
                };
                match matched {
                    Some((_, distance)) => {
                        let range = intersection.position_relative.norm().max(1.0);
                        let angle_error = distance.atan2(range);
                        w = w.map(|w| w * gaussian_likelihood(angle_error, self.angle_std));
                    }
                    None => {
                        w = None;
                        break;
                    }
                }
            }
            if w.is_none() {
                result = SensorModelResult::PartialUpdate;
            }
            *weighting = w;
        }
        result
    }
}
