//! Pose samples and the double buffered sample set.
use nalgebra::Vector2;
use rand::Rng;
use std::fmt::{self, Debug, Display};

use crate::field::FieldDimensions;
use crate::{FIXED_POINT_ONE, Pose2D, normalize_angle, saturate_i32};

/// Heading unit vector in fixed point for the given angle.
pub fn fixed_point_heading(angle: f64) -> Vector2<i32> {
    Vector2::new(
        saturate_i32(angle.cos() * FIXED_POINT_ONE as f64),
        saturate_i32(angle.sin() * FIXED_POINT_ONE as f64),
    )
}

/// Draw from a triangular distribution on `[-half_width, half_width]` as the sum of two
/// uniform draws.
pub fn sample_triangular<R: Rng + ?Sized>(rng: &mut R, half_width: f64) -> f64 {
    (rng.random::<f64>() + rng.random::<f64>() - 1.0) * half_width
}

/// One hypothesized robot pose.
///
/// `rotation` shadows `angle` as a fixed-point unit vector. It is private so that every heading
/// change goes through [Particle::set_angle] and the two can never disagree.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Particle {
    /// Position in whole millimetres.
    pub translation: Vector2<i32>,
    angle: f64,
    rotation: Vector2<i32>,
    pub weighting: f64,
    pub cluster: usize,
}
impl Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("x", &self.translation.x)
            .field("y", &self.translation.y)
            .field("angle_deg", &self.angle.to_degrees())
            .field("weighting", &self.weighting)
            .field("cluster", &self.cluster)
            .finish()
    }
}
impl Particle {
    pub fn new(pose: &Pose2D, weighting: f64) -> Particle {
        let mut particle = Particle {
            weighting,
            ..Default::default()
        };
        particle.set_pose(pose);
        particle
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }

    /// The fixed-point heading vector, `(cos, sin) * 1024`.
    pub fn rotation(&self) -> Vector2<i32> {
        self.rotation
    }

    /// Set the heading (normalized) and recompute the heading vector.
    pub fn set_angle(&mut self, angle: f64) {
        self.angle = normalize_angle(angle);
        self.rotation = fixed_point_heading(self.angle);
    }

    pub fn set_pose(&mut self, pose: &Pose2D) {
        self.translation = Vector2::new(saturate_i32(pose.x), saturate_i32(pose.y));
        self.set_angle(pose.rotation);
    }

    pub fn pose(&self) -> Pose2D {
        Pose2D::new(
            self.translation.x as f64,
            self.translation.y as f64,
            self.angle,
        )
    }

    pub fn position(&self) -> Vector2<f64> {
        Vector2::new(self.translation.x as f64, self.translation.y as f64)
    }

    /// Project a robot-relative point into the field using the fixed-point heading vector.
    pub fn to_field(&self, relative: &Vector2<f64>) -> Vector2<f64> {
        let one = FIXED_POINT_ONE as f64;
        let cos = self.rotation.x as f64 / one;
        let sin = self.rotation.y as f64 / one;
        Vector2::new(
            self.translation.x as f64 + cos * relative.x - sin * relative.y,
            self.translation.y as f64 + sin * relative.x + cos * relative.y,
        )
    }

    /// Express a field point relative to this particle's pose.
    pub fn to_relative(&self, field_point: &Vector2<f64>) -> Vector2<f64> {
        let one = FIXED_POINT_ONE as f64;
        let cos = self.rotation.x as f64 / one;
        let sin = self.rotation.y as f64 / one;
        let dx = field_point.x - self.translation.x as f64;
        let dy = field_point.y - self.translation.y as f64;
        Vector2::new(cos * dx + sin * dy, -sin * dx + cos * dy)
    }

    /// Whether the heading vector matches the heading angle.
    pub fn heading_is_consistent(&self) -> bool {
        self.rotation == fixed_point_heading(self.angle)
    }
}

/// The particle population with two backing buffers.
///
/// The resampler swaps the buffers and then reads the previous generation while writing the
/// new one through [SampleSet::generations].
#[derive(Clone)]
pub struct SampleSet {
    current: Vec<Particle>,
    old: Vec<Particle>,
}
impl Debug for SampleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total: f64 = self.current.iter().map(|p| p.weighting).sum();
        let max_weighting = self.current.iter().map(|p| p.weighting).fold(0.0, f64::max);
        f.debug_struct("SampleSet")
            .field("num_particles", &self.current.len())
            .field("total_weighting", &total)
            .field("max_weighting", &max_weighting)
            .finish()
    }
}
impl SampleSet {
    pub fn new(num_particles: usize) -> SampleSet {
        assert!(num_particles > 0, "Number of particles must be positive");
        SampleSet {
            current: vec![Particle::new(&Pose2D::default(), 1.0); num_particles],
            old: vec![Particle::default(); num_particles],
        }
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    pub fn particles(&self) -> &[Particle] {
        &self.current
    }

    pub fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.current
    }

    pub fn at(&self, index: usize) -> &Particle {
        &self.current[index]
    }

    pub fn at_mut(&mut self, index: usize) -> &mut Particle {
        &mut self.current[index]
    }

    pub fn total_weighting(&self) -> f64 {
        self.current.iter().map(|p| p.weighting).sum()
    }

    pub fn reset_weightings(&mut self) {
        for particle in &mut self.current {
            particle.weighting = 1.0;
        }
    }

    /// Exchange the buffers; the previous generation becomes the "old" buffer.
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.current, &mut self.old);
    }

    /// Read access to the old generation together with write access to the new one.
    pub fn generations(&mut self) -> (&[Particle], &mut [Particle]) {
        (&self.old, &mut self.current)
    }

    /// Seed every particle around one of the given poses with triangular noise of the given
    /// standard deviations. Without poses the particles are spread uniformly over the field.
    pub fn init_at_poses<R: Rng + ?Sized>(
        &mut self,
        poses: &[(Pose2D, Pose2D)],
        field: &FieldDimensions,
        rng: &mut R,
    ) {
        for particle in &mut self.current {
            let pose = if poses.is_empty() {
                field.random_pose_on_field(rng)
            } else {
                let (pose, std_dev) = poses[rng.random_range(0..poses.len())];
                Pose2D::new(
                    pose.x.trunc() + sample_triangular(rng, std_dev.x.trunc()).trunc(),
                    pose.y.trunc() + sample_triangular(rng, std_dev.y.trunc()).trunc(),
                    pose.rotation + sample_triangular(rng, std_dev.rotation),
                )
            };
            particle.set_pose(&pose);
            particle.weighting = 1.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::f64::consts::PI;

    #[test]
    fn test_heading_vector_follows_angle() {
        let mut particle = Particle::new(&Pose2D::new(10.0, 20.0, 0.0), 1.0);
        assert_eq!(particle.rotation(), Vector2::new(1024, 0));
        particle.set_angle(PI / 2.0);
        assert_eq!(particle.rotation(), Vector2::new(0, 1024));
        particle.set_angle(3.0 * PI / 2.0);
        assert_approx_eq!(particle.angle(), -PI / 2.0, 1e-12);
        assert!(particle.heading_is_consistent());
        particle.set_pose(&Pose2D::new(0.0, 0.0, 1.0));
        assert!(particle.heading_is_consistent());
    }

    #[test]
    fn test_field_projection_round_trip() {
        let particle = Particle::new(&Pose2D::new(1000.0, 500.0, PI / 2.0), 1.0);
        let field_point = particle.to_field(&Vector2::new(200.0, 0.0));
        assert_approx_eq!(field_point.x, 1000.0, 1e-9);
        assert_approx_eq!(field_point.y, 700.0, 1e-9);
        let relative = particle.to_relative(&field_point);
        assert_approx_eq!(relative.x, 200.0, 1e-9);
        assert_approx_eq!(relative.y, 0.0, 1e-9);
    }

    #[test]
    fn test_positions_saturate() {
        let particle = Particle::new(&Pose2D::new(1e20, -1e20, 0.0), 1.0);
        assert_eq!(particle.translation, Vector2::new(i32::MAX, i32::MIN));
    }

    #[test]
    fn test_init_uniform_and_at_pose() {
        let field = FieldDimensions::default();
        let mut rng = StdRng::seed_from_u64(1);
        for n in [1, 2, 17, 100] {
            let mut set = SampleSet::new(n);
            set.init_at_poses(&[], &field, &mut rng);
            assert_eq!(set.len(), n);
            assert!(set.particles().iter().all(|p| field.is_inside_field(&p.position())));
            assert!(set.particles().iter().all(|p| p.heading_is_consistent()));
        }
        let mut set = SampleSet::new(200);
        let std_dev = Pose2D::new(100.0, 100.0, 0.1);
        set.init_at_poses(&[(Pose2D::new(500.0, -500.0, 0.0), std_dev)], &field, &mut rng);
        for p in set.particles() {
            assert!((p.translation.x - 500).abs() <= 100);
            assert!((p.translation.y + 500).abs() <= 100);
            assert!(p.angle().abs() <= 0.1 + 1e-12);
        }
    }

    #[test]
    fn test_generations_after_swap() {
        let mut set = SampleSet::new(3);
        set.at_mut(0).weighting = 5.0;
        set.swap();
        let (old, new) = set.generations();
        assert_eq!(old.len(), new.len());
        assert_approx_eq!(old[0].weighting, 5.0, 1e-12);
        new[1] = old[0];
        assert_approx_eq!(set.at(1).weighting, 5.0, 1e-12);
    }
}
