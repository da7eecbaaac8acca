//! Pose calculators turning the particle population into a reported pose.
//!
//! The set of strategies is closed; [PoseCalculator] dispatches over them with a `match`.
//! The clustering strategies additionally keep cluster ids in the particles and can report
//! every cluster, which the multi-hypothesis extractor builds on.
use std::fmt::{self, Display};
use std::str::FromStr;

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::config::PoseSection;
use crate::error::LocatorError;
use crate::field::FieldDimensions;
use crate::particle::{Particle, SampleSet};
use crate::Pose2D;

mod best_particle;
mod binning;
mod kmeans;
mod overall_average;
mod particle_history;

pub use best_particle::BestParticle;
pub use binning::Binning2D;
pub use kmeans::KMeansClustering;
pub use overall_average::OverallAverage;
pub use particle_history::ParticleHistory;

/// Selector for the pose calculator strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PoseCalculatorType {
    #[serde(rename = "best_particle")]
    BestParticle,
    #[serde(rename = "overall_average")]
    OverallAverage,
    #[serde(rename = "binning_2d")]
    Binning2D,
    #[serde(rename = "particle_history")]
    ParticleHistory,
    #[serde(rename = "kmeans_clustering")]
    KMeansClustering,
}
impl PoseCalculatorType {
    pub const ALL: [PoseCalculatorType; 5] = [
        PoseCalculatorType::BestParticle,
        PoseCalculatorType::OverallAverage,
        PoseCalculatorType::Binning2D,
        PoseCalculatorType::ParticleHistory,
        PoseCalculatorType::KMeansClustering,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PoseCalculatorType::BestParticle => "best_particle",
            PoseCalculatorType::OverallAverage => "overall_average",
            PoseCalculatorType::Binning2D => "binning_2d",
            PoseCalculatorType::ParticleHistory => "particle_history",
            PoseCalculatorType::KMeansClustering => "kmeans_clustering",
        }
    }

    /// Whether the strategy keeps clusters that can be reported as hypotheses.
    pub fn is_clustering(&self) -> bool {
        matches!(
            self,
            PoseCalculatorType::ParticleHistory | PoseCalculatorType::KMeansClustering
        )
    }
}
impl Display for PoseCalculatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
impl FromStr for PoseCalculatorType {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        PoseCalculatorType::ALL
            .into_iter()
            .find(|t| t.name() == normalized)
            .ok_or_else(|| LocatorError::UnknownPoseCalculator(s.to_string()))
    }
}

/// The estimator's primary output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RobotPose {
    pub pose: Pose2D,
    /// Share of the particle weighting that supports the pose, in [0, 1].
    pub validity: f64,
    /// Weighted RMS distance in mm of the contributing particles around the pose.
    pub deviation: f64,
}
impl Display for RobotPose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} validity {:.2} deviation {:.0} mm",
            self.pose, self.validity, self.deviation
        )
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Moments {
    weight: f64,
    x: f64,
    y: f64,
    squared_norm: f64,
    cos: f64,
    sin: f64,
}
impl Moments {
    fn add(&mut self, particle: &Particle, weight: f64) {
        let position = particle.position();
        let heading = particle.rotation();
        self.weight += weight;
        self.x += weight * position.x;
        self.y += weight * position.y;
        self.squared_norm += weight * position.norm_squared();
        self.cos += weight * heading.x as f64;
        self.sin += weight * heading.y as f64;
    }

    fn pose(&self) -> Option<(Pose2D, f64)> {
        if self.weight <= 0.0 || !self.weight.is_finite() {
            return None;
        }
        let mean = Vector2::new(self.x / self.weight, self.y / self.weight);
        let variance = (self.squared_norm / self.weight - mean.norm_squared()).max(0.0);
        let rotation = if self.cos == 0.0 && self.sin == 0.0 {
            0.0
        } else {
            self.sin.atan2(self.cos)
        };
        Some((Pose2D::new(mean.x, mean.y, rotation), variance.sqrt()))
    }
}

/// Weighted mean of a group of particles with a circular mean of the headings. Falls back to
/// equal weights when the group carries no weighting at all.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct PoseAccumulator {
    weighted: Moments,
    uniform: Moments,
}
impl PoseAccumulator {
    pub(crate) fn add(&mut self, particle: &Particle) {
        if particle.weighting.is_finite() {
            self.weighted.add(particle, particle.weighting);
        }
        self.uniform.add(particle, 1.0);
    }

    pub(crate) fn count(&self) -> usize {
        self.uniform.weight as usize
    }

    pub(crate) fn weight(&self) -> f64 {
        self.weighted.weight
    }

    /// Mean pose and RMS deviation of the accumulated particles.
    pub(crate) fn mean(&self) -> Option<(Pose2D, f64)> {
        self.weighted.pose().or_else(|| self.uniform.pose())
    }
}

/// Share of `part` in `total`, or of `count` in `n` when there is no weighting to share.
pub(crate) fn share(part: f64, total: f64, count: usize, n: usize) -> f64 {
    if total > 0.0 && total.is_finite() {
        (part / total).clamp(0.0, 1.0)
    } else if n > 0 {
        count as f64 / n as f64
    } else {
        0.0
    }
}

/// The active pose calculator.
#[derive(Clone, Debug)]
pub enum PoseCalculator {
    BestParticle(BestParticle),
    OverallAverage(OverallAverage),
    Binning2D(Binning2D),
    ParticleHistory(ParticleHistory),
    KMeansClustering(KMeansClustering),
}

impl PoseCalculator {
    pub fn new(kind: PoseCalculatorType, field: &FieldDimensions, params: &PoseSection) -> PoseCalculator {
        match kind {
            PoseCalculatorType::BestParticle => PoseCalculator::BestParticle(BestParticle),
            PoseCalculatorType::OverallAverage => PoseCalculator::OverallAverage(OverallAverage),
            PoseCalculatorType::Binning2D => PoseCalculator::Binning2D(Binning2D::new(field, params)),
            PoseCalculatorType::ParticleHistory => {
                PoseCalculator::ParticleHistory(ParticleHistory::new(params))
            }
            PoseCalculatorType::KMeansClustering => {
                PoseCalculator::KMeansClustering(KMeansClustering::new(params))
            }
        }
    }

    pub fn kind(&self) -> PoseCalculatorType {
        match self {
            PoseCalculator::BestParticle(_) => PoseCalculatorType::BestParticle,
            PoseCalculator::OverallAverage(_) => PoseCalculatorType::OverallAverage,
            PoseCalculator::Binning2D(_) => PoseCalculatorType::Binning2D,
            PoseCalculator::ParticleHistory(_) => PoseCalculatorType::ParticleHistory,
            PoseCalculator::KMeansClustering(_) => PoseCalculatorType::KMeansClustering,
        }
    }

    /// (Re)initialize against the given population. Cluster identity is discarded.
    pub fn init(&mut self, samples: &mut SampleSet) {
        match self {
            PoseCalculator::BestParticle(_) | PoseCalculator::OverallAverage(_) => {
                for particle in samples.particles_mut() {
                    particle.cluster = 0;
                }
            }
            PoseCalculator::Binning2D(c) => c.init(samples),
            PoseCalculator::ParticleHistory(c) => c.init(samples),
            PoseCalculator::KMeansClustering(c) => c.init(samples),
        }
    }

    /// Compute the pose for the current population.
    pub fn calc_pose(&mut self, samples: &mut SampleSet) -> RobotPose {
        match self {
            PoseCalculator::BestParticle(c) => c.calc_pose(samples),
            PoseCalculator::OverallAverage(c) => c.calc_pose(samples),
            PoseCalculator::Binning2D(c) => c.calc_pose(samples),
            PoseCalculator::ParticleHistory(c) => c.calc_pose(samples),
            PoseCalculator::KMeansClustering(c) => c.calc_pose(samples),
        }
    }

    /// Cluster id for a particle that does not descend from an existing one.
    pub fn new_cluster_index(&mut self) -> usize {
        match self {
            PoseCalculator::ParticleHistory(c) => c.new_cluster_index(),
            _ => 0,
        }
    }

    pub fn index_of_best_cluster(&self) -> usize {
        match self {
            PoseCalculator::ParticleHistory(c) => c.index_of_best_cluster(),
            PoseCalculator::KMeansClustering(c) => c.index_of_best_cluster(),
            _ => 0,
        }
    }

    /// `(cluster id, member count)` of every non-empty cluster in id order. Empty for the
    /// strategies that do not cluster.
    pub fn clusters(&self) -> Vec<(usize, usize)> {
        match self {
            PoseCalculator::ParticleHistory(c) => c.clusters(),
            PoseCalculator::KMeansClustering(c) => c.clusters(),
            _ => Vec::new(),
        }
    }

    pub fn calc_pose_of_cluster(&self, samples: &SampleSet, cluster: usize) -> Option<Pose2D> {
        let mut accumulator = PoseAccumulator::default();
        for particle in samples.particles().iter().filter(|p| p.cluster == cluster) {
            accumulator.add(particle);
        }
        accumulator.mean().map(|(pose, _)| pose)
    }

    pub fn cluster_validity(&self, cluster: usize) -> f64 {
        match self {
            PoseCalculator::ParticleHistory(c) => c.cluster_validity(cluster),
            PoseCalculator::KMeansClustering(c) => c.cluster_validity(cluster),
            _ => 0.0,
        }
    }
}
