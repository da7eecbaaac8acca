//! Odometry based motion model.
//!
//! Every particle is moved by the odometry offset accumulated since the previous cycle. The
//! error applied on top grows with the distance walked and the angle turned, not with time,
//! and the translational part is anisotropic: walking forward mostly blurs the forward
//! component.
use nalgebra::Vector2;
use rand::Rng;

use crate::config::MotionSection;
use crate::field::FieldDimensions;
use crate::particle::SampleSet;
use crate::{FIXED_POINT_ONE, FIXED_POINT_SHIFT, Pose2D, saturate_i32, saturate_i64};

const HALF: i64 = (FIXED_POINT_ONE / 2) as i64;
const RANDOM_MASK: i64 = (FIXED_POINT_ONE - 1) as i64;

/// Translational offset with triangular noise of half width `error` around `trans`, computed in
/// fixed point from the sum of two uniform 10 bit draws.
fn noisy_offset<R: Rng + ?Sized>(trans: i32, error: i32, rng: &mut R) -> i64 {
    let trans = trans as i64;
    let error = error as i64;
    if error == 0 {
        return trans;
    }
    let draws = (rng.random::<u32>() as i64 & RANDOM_MASK) + (rng.random::<u32>() as i64 & RANDOM_MASK);
    (((trans - error) << FIXED_POINT_SHIFT) + error * (draws + 2) + HALF) >> FIXED_POINT_SHIFT
}

#[derive(Clone, Debug, Default)]
pub struct MotionModel {
    last_odometry: Pose2D,
}

impl MotionModel {
    pub fn new(odometry: Pose2D) -> MotionModel {
        MotionModel {
            last_odometry: odometry,
        }
    }

    pub fn last_odometry(&self) -> &Pose2D {
        &self.last_odometry
    }

    /// Forget the accumulated offset, e.g. after the population has been re-seeded.
    pub fn reset(&mut self, odometry: Pose2D) {
        self.last_odometry = odometry;
    }

    /// Move all particles by the odometry offset since the last call.
    ///
    /// With `noise == false` only the deterministic offset is applied. Returns the offset that
    /// was consumed.
    pub fn update<R: Rng + ?Sized>(
        &mut self,
        samples: &mut SampleSet,
        odometry: &Pose2D,
        noise: bool,
        params: &MotionSection,
        field: &FieldDimensions,
        rng: &mut R,
    ) -> Pose2D {
        let offset = odometry.relative_to(&self.last_odometry);
        let trans_x = saturate_i32(offset.x);
        let trans_y = saturate_i32(offset.y);
        let dist = offset.translation().norm();
        let angle = offset.rotation.abs();

        // the sub-millimetre remainder stays in the next offset
        self.last_odometry = self.last_odometry.compose(&Pose2D::new(
            trans_x as f64,
            trans_y as f64,
            offset.rotation,
        ));

        let (rot_error, trans_x_error, trans_y_error) = if noise {
            let rot_error = params
                .rotation_noise
                .max(dist * params.moved_dist_weight)
                .max(angle * params.moved_angle_weight);
            let tx = trans_x as f64;
            let ty = trans_y as f64;
            let trans_x_error = params
                .translation_noise
                .max((tx * params.major_dir_trans_weight).abs())
                .max((ty * params.minor_dir_trans_weight).abs());
            let trans_y_error = params
                .translation_noise
                .max((ty * params.major_dir_trans_weight).abs())
                .max((tx * params.minor_dir_trans_weight).abs());
            (rot_error, saturate_i32(trans_x_error), saturate_i32(trans_y_error))
        } else {
            (0.0, 0, 0)
        };

        for particle in samples.particles_mut() {
            let offset_x = noisy_offset(trans_x, trans_x_error, rng);
            let offset_y = noisy_offset(trans_y, trans_y_error, rng);
            let rotation = particle.rotation();
            let (cos, sin) = (rotation.x as i64, rotation.y as i64);
            let x = ((particle.translation.x as i64) << FIXED_POINT_SHIFT) + offset_x * cos
                - offset_y * sin
                + HALF;
            let y = ((particle.translation.y as i64) << FIXED_POINT_SHIFT)
                + offset_x * sin
                + offset_y * cos
                + HALF;
            let moved = Vector2::new(
                saturate_i64(x >> FIXED_POINT_SHIFT),
                saturate_i64(y >> FIXED_POINT_SHIFT),
            );
            particle.translation = field.clip_to_carpet_fixed(&moved);
            let angular_noise = if rot_error > 0.0 {
                (rng.random::<f64>() * 2.0 - 1.0) * rot_error
            } else {
                0.0
            };
            particle.set_angle(particle.angle() + offset.rotation + angular_noise);
        }
        offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::Particle;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::f64::consts::PI;

    fn population(poses: &[Pose2D]) -> SampleSet {
        let mut set = SampleSet::new(poses.len());
        for (particle, pose) in set.particles_mut().iter_mut().zip(poses) {
            *particle = Particle::new(pose, 1.0);
        }
        set
    }

    #[test]
    fn test_noise_free_update_applies_exact_delta() {
        let field = FieldDimensions::default();
        let mut rng = StdRng::seed_from_u64(3);
        let start = [
            Pose2D::new(0.0, 0.0, 0.0),
            Pose2D::new(-1200.0, 800.0, 0.0),
            Pose2D::new(1500.0, -300.0, 0.0),
        ];
        let mut samples = population(&start);
        let mut model = MotionModel::new(Pose2D::default());
        let odometry = Pose2D::new(120.0, -40.0, 0.3);
        let params = MotionSection::default();
        model.update(&mut samples, &odometry, false, &params, &field, &mut rng);
        for (particle, pose) in samples.particles().iter().zip(start.iter()) {
            assert_eq!(particle.translation.x, pose.x as i32 + 120);
            assert_eq!(particle.translation.y, pose.y as i32 - 40);
            assert_approx_eq!(particle.angle(), 0.3, 1e-12);
            assert!(particle.heading_is_consistent());
        }
    }

    #[test]
    fn test_offset_is_rotated_into_particle_heading() {
        let field = FieldDimensions::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mut samples = population(&[Pose2D::new(0.0, 0.0, PI / 2.0)]);
        let mut model = MotionModel::new(Pose2D::default());
        let params = MotionSection::default();
        model.update(&mut samples, &Pose2D::new(100.0, 0.0, 0.0), false, &params, &field, &mut rng);
        assert_eq!(samples.at(0).translation, Vector2::new(0, 100));
    }

    #[test]
    fn test_positions_are_clipped_to_carpet() {
        let field = FieldDimensions::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mut samples = population(&[Pose2D::new(3600.0, 2600.0, 0.0)]);
        let mut model = MotionModel::new(Pose2D::default());
        let params = MotionSection::default();
        model.update(&mut samples, &Pose2D::new(500.0, 500.0, 0.0), true, &params, &field, &mut rng);
        assert_eq!(samples.at(0).translation, Vector2::new(3700, 2700));
    }

    #[test]
    fn test_noise_is_bounded_by_error_model() {
        let field = FieldDimensions::default();
        let mut rng = StdRng::seed_from_u64(11);
        let mut samples = population(&vec![Pose2D::default(); 500]);
        let mut model = MotionModel::new(Pose2D::default());
        let params = MotionSection::default();
        model.update(&mut samples, &Pose2D::new(200.0, 0.0, 0.0), true, &params, &field, &mut rng);
        // x error: max(8, 200 * 0.5) = 100, y error: max(8, 200 * 0.2) = 40
        let rot_error = params.rotation_noise.max(200.0 * params.moved_dist_weight);
        let mut spread = false;
        for particle in samples.particles() {
            assert!((particle.translation.x - 200).abs() <= 101);
            assert!(particle.translation.y.abs() <= 41);
            assert!(particle.angle().abs() <= rot_error + 1e-12);
            assert!(particle.heading_is_consistent());
            spread |= particle.translation.x != 200;
        }
        assert!(spread);
    }

    #[test]
    fn test_remainder_is_carried_to_next_cycle() {
        let field = FieldDimensions::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mut samples = population(&[Pose2D::default()]);
        let mut model = MotionModel::new(Pose2D::default());
        let params = MotionSection::default();
        model.update(&mut samples, &Pose2D::new(0.6, 0.0, 0.0), false, &params, &field, &mut rng);
        assert_eq!(samples.at(0).translation.x, 0);
        model.update(&mut samples, &Pose2D::new(1.2, 0.0, 0.0), false, &params, &field, &mut rng);
        assert_eq!(samples.at(0).translation.x, 1);
        assert_approx_eq!(model.last_odometry().x, 1.0, 1e-12);
    }
}
