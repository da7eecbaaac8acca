//! Sensor models and the fusion of their weightings into the particle population.
//!
//! Each sensor model consumes the observations of exactly one [ObservationKind] and produces a
//! multiplier per particle. A model may fail to score individual particles (for example when a
//! line point projects off the carpet under that particle's pose); such particles receive the
//! average of the valid multipliers so that an inapplicable observation is not mistaken for
//! evidence against the particle.
use nalgebra::Vector2;

use crate::config::SensorSection;
use crate::field::{FieldDimensions, FieldModel};
use crate::measurements::{FramePercepts, Observation, ObservationKind};
use crate::normalize_angle;
use crate::particle::{Particle, SampleSet};

pub mod center_circle;
pub mod corners;
pub mod goal_posts;
pub mod landmark;
pub mod lines;

pub use center_circle::CenterCircleSensorModel;
pub use corners::CornersSensorModel;
pub use goal_posts::GoalPostsSensorModel;
pub use landmark::NaturalLandmarkSensorModel;
pub use lines::LineSensorModel;

/// Outcome of one sensor model for one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SensorModelResult {
    /// The model had nothing to contribute.
    NoUpdate,
    /// Every particle received a multiplier.
    FullUpdate,
    /// Some particles could not be scored and were left as `None`.
    PartialUpdate,
}

/// Generic sensor model trait for all observation kinds
pub trait SensorModel {
    /// The observation kind this model consumes
    fn kind(&self) -> ObservationKind;
    /// Compute a weighting multiplier for every particle from the selected observations.
    ///
    /// `selected_indices` are the indices of the observations of this model's kind chosen for
    /// the frame (duplicates are intended and weigh the observation more). `weightings` has one
    /// entry per particle and arrives filled with `None`.
    fn compute_weightings(
        &self,
        samples: &SampleSet,
        selected_indices: &[usize],
        percepts: &FramePercepts,
        weightings: &mut [Option<f64>],
    ) -> SensorModelResult;
}

/// Unnormalized Gaussian likelihood of an error.
pub fn gaussian_likelihood(error: f64, standard_deviation: f64) -> f64 {
    if standard_deviation <= 0.0 {
        return if error == 0.0 { 1.0 } else { 0.0 };
    }
    let normalized = error / standard_deviation;
    (-0.5 * normalized * normalized).exp()
}

/// Likelihood of seeing a known field point at `observed` (robot relative) from the particle's
/// pose, scored by bearing error and relative distance error.
pub fn point_likelihood(
    particle: &Particle,
    observed: &Vector2<f64>,
    field_point: &Vector2<f64>,
    angle_std: f64,
    distance_std: f64,
) -> f64 {
    let expected = particle.to_relative(field_point);
    let angle_error = normalize_angle(observed.y.atan2(observed.x) - expected.y.atan2(expected.x));
    let expected_distance = expected.norm().max(1.0);
    let distance_error = (observed.norm() - expected_distance) / expected_distance;
    gaussian_likelihood(angle_error, angle_std) * gaussian_likelihood(distance_error, distance_std)
}

/// Runs all registered sensor models and multiplies their weightings into the particles.
pub struct SensorFusion {
    models: Vec<Box<dyn SensorModel>>,
    selected_indices: Vec<usize>,
    weightings: Vec<Option<f64>>,
}
impl SensorFusion {
    /// Fusion over the standard set of models: goal posts, center circle, line points, corners
    /// and the global landmark matcher.
    pub fn new(field: &FieldDimensions, params: &SensorSection) -> SensorFusion {
        let field_model = FieldModel::new(field, params.max_crossing_length);
        let mut fusion = SensorFusion::empty();
        fusion.register(Box::new(GoalPostsSensorModel::new(field, params)));
        fusion.register(Box::new(CenterCircleSensorModel::new(params)));
        fusion.register(Box::new(LineSensorModel::new(field, field_model.clone(), params)));
        fusion.register(Box::new(CornersSensorModel::new(field, field_model, params)));
        fusion.register(Box::new(NaturalLandmarkSensorModel::new(params)));
        fusion
    }

    /// Fusion without any model; use [SensorFusion::register] to add some.
    pub fn empty() -> SensorFusion {
        SensorFusion {
            models: Vec::new(),
            selected_indices: Vec::with_capacity(100),
            weightings: Vec::new(),
        }
    }

    pub fn register(&mut self, model: Box<dyn SensorModel>) {
        self.models.push(model);
    }

    pub fn num_models(&self) -> usize {
        self.models.len()
    }

    /// Apply every model to the population. Returns whether any model changed the weightings.
    pub fn apply(
        &mut self,
        samples: &mut SampleSet,
        selected: &[Observation],
        percepts: &FramePercepts,
    ) -> bool {
        let mut applied = false;
        for model in &self.models {
            self.selected_indices.clear();
            self.selected_indices.extend(
                selected
                    .iter()
                    .filter(|o| o.kind == model.kind())
                    .map(|o| o.index),
            );
            if self.selected_indices.is_empty() {
                continue;
            }
            self.weightings.clear();
            self.weightings.resize(samples.len(), None);
            let result =
                model.compute_weightings(samples, &self.selected_indices, percepts, &mut self.weightings);
            if result == SensorModelResult::NoUpdate {
                continue;
            }
            let (sum, valid) = self
                .weightings
                .iter()
                .flatten()
                .fold((0.0, 0usize), |(s, n), w| (s + w, n + 1));
            if valid == 0 {
                log::debug!("{:?} model could not score any particle", model.kind());
                continue;
            }
            let average = sum / valid as f64;
            if valid < samples.len() {
                log::trace!(
                    "{:?} model scored {} of {} particles",
                    model.kind(),
                    valid,
                    samples.len()
                );
            }
            for (particle, weighting) in samples.particles_mut().iter_mut().zip(&self.weightings) {
                particle.weighting *= weighting.unwrap_or(average);
            }
            applied = true;
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Pose2D;
    use assert_approx_eq::assert_approx_eq;

    /// Scores particle `i` with `values[i]`.
    struct FixedModel {
        values: Vec<Option<f64>>,
        result: SensorModelResult,
    }
    impl SensorModel for FixedModel {
        fn kind(&self) -> ObservationKind {
            ObservationKind::LinePoint
        }
        fn compute_weightings(
            &self,
            _samples: &SampleSet,
            _selected_indices: &[usize],
            _percepts: &FramePercepts,
            weightings: &mut [Option<f64>],
        ) -> SensorModelResult {
            weightings.copy_from_slice(&self.values);
            self.result
        }
    }

    fn line_point_selection() -> Vec<Observation> {
        vec![Observation::new(ObservationKind::LinePoint, 0)]
    }

    #[test]
    fn test_full_update_multiplies() {
        let mut samples = SampleSet::new(3);
        let mut fusion = SensorFusion::empty();
        fusion.register(Box::new(FixedModel {
            values: vec![Some(0.5), Some(0.25), Some(1.0)],
            result: SensorModelResult::FullUpdate,
        }));
        let applied = fusion.apply(&mut samples, &line_point_selection(), &FramePercepts::new(0));
        assert!(applied);
        let w: Vec<f64> = samples.particles().iter().map(|p| p.weighting).collect();
        assert_eq!(w, vec![0.5, 0.25, 1.0]);
    }

    #[test]
    fn test_partial_update_substitutes_average() {
        let mut samples = SampleSet::new(4);
        let mut fusion = SensorFusion::empty();
        fusion.register(Box::new(FixedModel {
            values: vec![Some(0.2), None, Some(0.6), None],
            result: SensorModelResult::PartialUpdate,
        }));
        assert!(fusion.apply(&mut samples, &line_point_selection(), &FramePercepts::new(0)));
        assert_approx_eq!(samples.at(0).weighting, 0.2, 1e-12);
        assert_approx_eq!(samples.at(1).weighting, 0.4, 1e-12);
        assert_approx_eq!(samples.at(2).weighting, 0.6, 1e-12);
        assert_approx_eq!(samples.at(3).weighting, 0.4, 1e-12);
        // never below the worst valid multiplier
        assert!(samples.particles().iter().all(|p| p.weighting >= 0.2));
    }

    #[test]
    fn test_partial_update_without_valid_entries_is_ignored() {
        let mut samples = SampleSet::new(2);
        let mut fusion = SensorFusion::empty();
        fusion.register(Box::new(FixedModel {
            values: vec![None, None],
            result: SensorModelResult::PartialUpdate,
        }));
        assert!(!fusion.apply(&mut samples, &line_point_selection(), &FramePercepts::new(0)));
        assert!(samples.particles().iter().all(|p| p.weighting == 1.0));
    }

    #[test]
    fn test_model_without_selected_observations_is_skipped() {
        let mut samples = SampleSet::new(2);
        let mut fusion = SensorFusion::empty();
        fusion.register(Box::new(FixedModel {
            values: vec![Some(0.0), Some(0.0)],
            result: SensorModelResult::FullUpdate,
        }));
        let selection = vec![Observation::new(ObservationKind::CenterCircle, 0)];
        assert!(!fusion.apply(&mut samples, &selection, &FramePercepts::new(0)));
        assert!(samples.particles().iter().all(|p| p.weighting == 1.0));
    }

    #[test]
    fn test_point_likelihood_peaks_at_truth() {
        let particle = Particle::new(&Pose2D::new(0.0, 0.0, 0.0), 1.0);
        let post = Vector2::new(3000.0, 700.0);
        let exact = point_likelihood(&particle, &post, &post, 0.15, 0.3);
        assert_approx_eq!(exact, 1.0, 1e-12);
        let off = point_likelihood(&particle, &Vector2::new(3000.0, -700.0), &post, 0.15, 0.3);
        assert!(off < 0.1);
    }

    #[test]
    fn test_standard_models_are_registered() {
        let fusion = SensorFusion::new(&FieldDimensions::default(), &SensorSection::default());
        assert_eq!(fusion.num_models(), 5);
    }
}
