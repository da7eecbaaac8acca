//! Global landmark sensor model.
use super::{SensorModel, SensorModelResult};
use crate::config::SensorSection;
use crate::measurements::{FramePercepts, HeadDirection, ObservationKind};
use crate::particle::SampleSet;

/// Uses a positive match of the image based landmark matcher against the opponent goal area.
///
/// A match while looking left is only plausible from the left half of the field, while looking
/// right from the right half, and while looking ahead from the own half. Particles on the
/// implausible side are almost eliminated.
#[derive(Clone, Debug)]
pub struct NaturalLandmarkSensorModel {
    strong_weight: f64,
    weak_weight: f64,
}

impl NaturalLandmarkSensorModel {
    pub fn new(params: &SensorSection) -> NaturalLandmarkSensorModel {
        NaturalLandmarkSensorModel {
            strong_weight: params.landmark_strong_weight,
            weak_weight: params.landmark_weak_weight,
        }
    }
}

impl SensorModel for NaturalLandmarkSensorModel {
    fn kind(&self) -> ObservationKind {
        ObservationKind::GlobalLandmarkMatch
    }

    fn compute_weightings(
        &self,
        samples: &SampleSet,
        _selected_indices: &[usize],
        percepts: &FramePercepts,
        weightings: &mut [Option<f64>],
    ) -> SensorModelResult {
        let landmark = match percepts.landmark {
            Some(landmark) if landmark.match_found => landmark,
            _ => return SensorModelResult::NoUpdate,
        };
        for (particle, weighting) in samples.particles().iter().zip(weightings.iter_mut()) {
            let t = particle.translation;
            let plausible = match landmark.head_direction {
                HeadDirection::FacingLeft => t.y >= 0,
                HeadDirection::FacingRight => t.y <= 0,
                HeadDirection::FacingFront => t.x <= 0,
            };
            *weighting = Some(if plausible {
                self.strong_weight
            } else {
                self.weak_weight
            });
        }
        SensorModelResult::FullUpdate
    }
}
