//! Weighting adaptation and low variance resampling with template injection.
//!
//! Two exponentially smoothed averages of the mean particle weighting are tracked. When the
//! fast one drops below the slow one the observations fit the population worse than they used
//! to, and a matching fraction of the new population is drawn from the template source instead
//! of from the old population.
use rand::Rng;

use crate::config::ResamplingSection;
use crate::field::FieldDimensions;
use crate::particle::{Particle, SampleSet};
use crate::templates::TemplateSource;

/// Slow and fast running averages of the mean particle weighting.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WeightingAdaptation {
    slow: f64,
    fast: f64,
    total: f64,
}

impl WeightingAdaptation {
    pub fn new() -> WeightingAdaptation {
        WeightingAdaptation::default()
    }

    pub fn slow(&self) -> f64 {
        self.slow
    }

    pub fn fast(&self) -> f64 {
        self.fast
    }

    /// Total weighting seen by the last call to [WeightingAdaptation::adapt].
    pub fn total(&self) -> f64 {
        self.total
    }

    pub fn reset(&mut self) {
        *self = WeightingAdaptation::default();
    }

    /// Update the averages from the population's weightings. Returns `false` if the total
    /// weighting is zero (or not finite), in which case nothing is updated and resampling must
    /// be skipped.
    pub fn adapt(
        &mut self,
        samples: &SampleSet,
        params: &ResamplingSection,
        known_start_pose: bool,
    ) -> bool {
        self.total = samples.total_weighting();
        if self.total == 0.0 || !self.total.is_finite() {
            log::warn!(
                "total weighting of all {} particles is {}, skipping resampling",
                samples.len(),
                self.total
            );
            return false;
        }
        let average = self.total / samples.len() as f64;
        if self.slow == 0.0 {
            self.slow = average;
            // without a known start the first fused frame resets the whole population
            if known_start_pose {
                self.fast = average;
            }
        } else {
            self.slow += params.alpha_slow * (average - self.slow);
            self.fast += params.alpha_fast * (average - self.fast);
        }
        log::trace!(
            "average weighting {:.3e} slow {:.3e} fast {:.3e}",
            average,
            self.slow,
            self.fast
        );
        true
    }

    /// Fraction of the population to replace by templates, in [0, 1].
    pub fn recovery_fraction(&self, templates_available: bool) -> f64 {
        if !templates_available {
            return 0.0;
        }
        let fraction = 1.0 - self.fast / self.slow;
        if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// What a resampling step did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResamplingOutcome {
    /// Particles drawn from the previous generation.
    pub resampled: usize,
    /// Particles created from templates.
    pub injected: usize,
    /// Slots filled by duplicating already placed particles.
    pub duplicated: usize,
    /// Nothing could be placed and the population was spread over the field again.
    pub reinitialized: bool,
}

/// Draw a new generation.
///
/// `total` is the total weighting of the population and `recovery` the fraction of slots
/// reserved for templates. Template particles get weighting zero and a cluster id from
/// `new_cluster`. The population keeps its size in every case; if neither the old generation
/// nor the template source yields a particle the whole population is re-seeded uniformly, and
/// the caller has to re-initialize its pose calculator.
#[allow(clippy::too_many_arguments)]
pub fn resample<R: Rng, F: FnMut() -> usize>(
    samples: &mut SampleSet,
    total: f64,
    recovery: f64,
    params: &ResamplingSection,
    templates: &mut dyn TemplateSource,
    mut new_cluster: F,
    field: &FieldDimensions,
    rng: &mut R,
) -> ResamplingOutcome {
    samples.swap();
    let n = samples.len();
    let target = if params.disable_sensor_resetting {
        n
    } else {
        ((n as f64 * (1.0 - recovery.clamp(0.0, 1.0))).floor() as usize).min(n)
    };
    let threshold = params.resampling_threshold * total / n as f64;

    let mut outcome = ResamplingOutcome::default();
    let (old, new) = samples.generations();
    let mut j = 0;
    if target > 0 {
        let spacing = (total + threshold * n as f64) / target as f64;
        let mut next = rng.random::<f64>() * spacing;
        let mut sum = 0.0;
        for particle in old.iter() {
            sum += particle.weighting + threshold;
            while sum > next && j < target {
                new[j] = *particle;
                j += 1;
                next += spacing;
            }
        }
    }
    outcome.resampled = j;

    while j < n && templates.templates_available() {
        let Some(pose) = templates.take_template(&mut *rng) else {
            break;
        };
        let mut particle = Particle::new(&pose, 0.0);
        particle.cluster = new_cluster();
        new[j] = particle;
        j += 1;
        outcome.injected += 1;
    }

    if j > 0 {
        let placed = j;
        while j < n {
            new[j] = new[rng.random_range(0..placed)];
            j += 1;
            outcome.duplicated += 1;
        }
    } else {
        log::warn!("resampling placed no particle, spreading the population over the field");
        samples.init_at_poses(&[], field, rng);
        outcome.reinitialized = true;
    }

    if outcome.injected > 0 {
        log::debug!(
            "resampled {} particles, injected {} templates, duplicated {}",
            outcome.resampled,
            outcome.injected,
            outcome.duplicated
        );
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Pose2D;
    use assert_approx_eq::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    /// Template source handing out a fixed pose a limited number of times.
    struct FixedTemplates {
        pose: Pose2D,
        remaining: usize,
    }
    impl TemplateSource for FixedTemplates {
        fn buffer_new_perceptions(&mut self, _: &crate::measurements::FramePercepts, _: &Pose2D) {}
        fn templates_available(&self) -> bool {
            self.remaining > 0
        }
        fn take_template(&mut self, _rng: &mut dyn RngCore) -> Option<Pose2D> {
            if self.remaining == 0 {
                return None;
            }
            self.remaining -= 1;
            Some(self.pose)
        }
    }

    fn no_templates() -> FixedTemplates {
        FixedTemplates {
            pose: Pose2D::default(),
            remaining: 0,
        }
    }

    fn one_heavy_particle(n: usize, heavy: usize) -> SampleSet {
        let mut samples = SampleSet::new(n);
        for (i, particle) in samples.particles_mut().iter_mut().enumerate() {
            *particle = Particle::new(&Pose2D::new(i as f64 * 10.0, 0.0, 0.0), 0.0);
            particle.cluster = i;
        }
        samples.at_mut(heavy).weighting = 1.0;
        samples
    }

    #[test]
    fn test_adaptation_first_cycle() {
        let mut samples = SampleSet::new(4);
        for p in samples.particles_mut() {
            p.weighting = 0.5;
        }
        let params = ResamplingSection::default();
        let mut unknown_start = WeightingAdaptation::new();
        assert!(unknown_start.adapt(&samples, &params, false));
        assert_approx_eq!(unknown_start.slow(), 0.5, 1e-12);
        assert_eq!(unknown_start.fast(), 0.0);
        assert_approx_eq!(unknown_start.recovery_fraction(true), 1.0, 1e-12);

        let mut known_start = WeightingAdaptation::new();
        assert!(known_start.adapt(&samples, &params, true));
        assert_approx_eq!(known_start.fast(), 0.5, 1e-12);
        assert_approx_eq!(known_start.recovery_fraction(true), 0.0, 1e-12);

        for p in samples.particles_mut() {
            p.weighting = 0.1;
        }
        assert!(known_start.adapt(&samples, &params, true));
        assert_approx_eq!(known_start.slow(), 0.5 + 0.005 * (0.1 - 0.5), 1e-12);
        assert_approx_eq!(known_start.fast(), 0.5 + 0.1 * (0.1 - 0.5), 1e-12);
        assert!(known_start.recovery_fraction(true) > 0.0);
        assert_eq!(known_start.recovery_fraction(false), 0.0);
    }

    #[test]
    fn test_zero_total_skips_adaptation() {
        let mut samples = SampleSet::new(3);
        for p in samples.particles_mut() {
            p.weighting = 0.0;
        }
        let mut adaptation = WeightingAdaptation::new();
        assert!(!adaptation.adapt(&samples, &ResamplingSection::default(), true));
        assert_eq!(adaptation.slow(), 0.0);
    }

    #[test]
    fn test_recovery_fraction_is_clamped() {
        let adaptation = WeightingAdaptation {
            slow: 0.1,
            fast: 0.5,
            total: 1.0,
        };
        assert_eq!(adaptation.recovery_fraction(true), 0.0);
        let adaptation = WeightingAdaptation {
            slow: 0.1,
            fast: -0.5,
            total: 1.0,
        };
        assert_eq!(adaptation.recovery_fraction(true), 1.0);
        let adaptation = WeightingAdaptation {
            slow: 0.0,
            fast: 0.0,
            total: 1.0,
        };
        assert_eq!(adaptation.recovery_fraction(true), 0.0);
    }

    #[test]
    fn test_population_size_is_preserved() {
        let field = FieldDimensions::default();
        let params = ResamplingSection::default();
        let mut rng = StdRng::seed_from_u64(21);
        for n in [1, 2, 7, 100] {
            for recovery in [0.0, 0.3, 1.0] {
                let mut samples = one_heavy_particle(n, n / 2);
                let mut templates = FixedTemplates {
                    pose: Pose2D::new(-500.0, 0.0, 0.0),
                    remaining: 2,
                };
                let total = samples.total_weighting();
                let outcome = resample(
                    &mut samples,
                    total,
                    recovery,
                    &params,
                    &mut templates,
                    || 99,
                    &field,
                    &mut rng,
                );
                assert_eq!(samples.len(), n);
                assert_eq!(
                    outcome.resampled + outcome.injected + outcome.duplicated,
                    n,
                    "{outcome:?}"
                );
                assert!(!outcome.reinitialized);
            }
        }
    }

    #[test]
    fn test_heavy_particle_dominates() {
        let field = FieldDimensions::default();
        let params = ResamplingSection::default();
        let mut rng = StdRng::seed_from_u64(5);
        let mut descendants = 0;
        let trials = 200;
        let n = 50;
        for _ in 0..trials {
            let mut samples = one_heavy_particle(n, 17);
            let total = samples.total_weighting();
            resample(
                &mut samples,
                total,
                0.0,
                &params,
                &mut no_templates(),
                || 0,
                &field,
                &mut rng,
            );
            descendants += samples.particles().iter().filter(|p| p.cluster == 17).count();
        }
        let share = descendants as f64 / (trials * n) as f64;
        assert!(share > 0.9, "heavy particle share {share}");
    }

    #[test]
    fn test_templates_fill_recovery_slots() {
        let field = FieldDimensions::default();
        let params = ResamplingSection::default();
        let mut rng = StdRng::seed_from_u64(2);
        let mut samples = one_heavy_particle(10, 0);
        let mut templates = FixedTemplates {
            pose: Pose2D::new(-2000.0, 1000.0, 1.0),
            remaining: 100,
        };
        let mut next_id = 40;
        let outcome = resample(
            &mut samples,
            1.0,
            0.5,
            &params,
            &mut templates,
            || {
                next_id += 1;
                next_id
            },
            &field,
            &mut rng,
        );
        assert_eq!(outcome.resampled, 5);
        assert_eq!(outcome.injected, 5);
        let injected: Vec<&Particle> = samples.particles().iter().filter(|p| p.cluster > 40).collect();
        assert_eq!(injected.len(), 5);
        for p in injected {
            assert_eq!(p.weighting, 0.0);
            assert_eq!(p.translation.x, -2000);
            assert!(p.heading_is_consistent());
        }
    }

    #[test]
    fn test_disabled_sensor_resetting_ignores_recovery() {
        let field = FieldDimensions::default();
        let params = ResamplingSection {
            disable_sensor_resetting: true,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(2);
        let mut samples = one_heavy_particle(10, 3);
        let mut templates = FixedTemplates {
            pose: Pose2D::default(),
            remaining: 100,
        };
        let outcome = resample(&mut samples, 1.0, 1.0, &params, &mut templates, || 0, &field, &mut rng);
        assert_eq!(outcome.resampled, 10);
        assert_eq!(outcome.injected, 0);
    }

    #[test]
    fn test_degenerate_weightings_reinitialize() {
        let field = FieldDimensions::default();
        let params = ResamplingSection::default();
        let mut rng = StdRng::seed_from_u64(8);
        let mut samples = one_heavy_particle(20, 0);
        samples.at_mut(0).weighting = f64::NAN;
        let outcome = resample(
            &mut samples,
            f64::NAN,
            0.0,
            &params,
            &mut no_templates(),
            || 0,
            &field,
            &mut rng,
        );
        assert!(outcome.reinitialized);
        assert_eq!(samples.len(), 20);
        assert!(samples.particles().iter().all(|p| field.is_inside_field(&p.position())));
        assert!(samples.particles().iter().all(|p| p.weighting == 1.0));
    }
}
