use nalgebra::Vector2;

use super::{PoseAccumulator, RobotPose, share};
use crate::config::PoseSection;
use crate::normalize_angle;
use crate::particle::SampleSet;

/// Clustering that keeps cluster identity across cycles.
///
/// Cluster ids travel with the particles through motion and resampling, so a cluster is the
/// set of descendants of a common ancestor. Each cycle members that drifted too far from their
/// cluster are split off and clusters that converged are merged. Ids of empty clusters are
/// handed out again.
#[derive(Clone, Debug)]
pub struct ParticleHistory {
    split_distance: f64,
    merge_distance: f64,
    merge_angle: f64,
    counts: Vec<usize>,
    weightings: Vec<f64>,
    free_ids: Vec<usize>,
    best: usize,
    total: f64,
    num_particles: usize,
}

impl ParticleHistory {
    pub fn new(params: &PoseSection) -> ParticleHistory {
        ParticleHistory {
            split_distance: params.cluster_split_distance,
            merge_distance: params.cluster_merge_distance,
            merge_angle: params.cluster_merge_angle,
            counts: Vec::new(),
            weightings: Vec::new(),
            free_ids: Vec::new(),
            best: 0,
            total: 0.0,
            num_particles: 0,
        }
    }

    /// Put every particle into cluster 0.
    pub fn init(&mut self, samples: &mut SampleSet) {
        for particle in samples.particles_mut() {
            particle.cluster = 0;
        }
        self.counts = vec![samples.len()];
        self.weightings = vec![samples.total_weighting()];
        self.free_ids.clear();
        self.best = 0;
        self.total = samples.total_weighting();
        self.num_particles = samples.len();
    }

    pub fn new_cluster_index(&mut self) -> usize {
        if let Some(id) = self.free_ids.pop() {
            return id;
        }
        let id = self.counts.len();
        self.counts.push(0);
        self.weightings.push(0.0);
        id
    }

    pub fn index_of_best_cluster(&self) -> usize {
        self.best
    }

    pub fn clusters(&self) -> Vec<(usize, usize)> {
        self.counts
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(id, count)| (id, *count))
            .collect()
    }

    pub fn cluster_validity(&self, cluster: usize) -> f64 {
        match (self.weightings.get(cluster), self.counts.get(cluster)) {
            (Some(weighting), Some(count)) if *count > 0 => {
                share(*weighting, self.total, *count, self.num_particles)
            }
            _ => 0.0,
        }
    }

    /// Recompute membership statistics from the particles.
    fn recount(&mut self, samples: &SampleSet) -> Vec<PoseAccumulator> {
        let len = samples
            .particles()
            .iter()
            .map(|p| p.cluster + 1)
            .max()
            .unwrap_or(0)
            .max(self.counts.len());
        let mut accumulators = vec![PoseAccumulator::default(); len];
        for particle in samples.particles() {
            accumulators[particle.cluster].add(particle);
        }
        self.counts = accumulators.iter().map(|a| a.count()).collect();
        self.weightings = accumulators.iter().map(|a| a.weight()).collect();
        accumulators
    }

    fn split(&mut self, samples: &mut SampleSet, accumulators: &[PoseAccumulator]) {
        let means: Vec<Option<Vector2<f64>>> = accumulators
            .iter()
            .map(|a| a.mean().map(|(pose, _)| pose.translation()))
            .collect();
        let mut created: Vec<(usize, PoseAccumulator)> = Vec::new();
        for i in 0..samples.len() {
            let particle = *samples.at(i);
            let position = particle.position();
            let own = particle.cluster;
            let Some(own_mean) = means[own] else { continue };
            if (position - own_mean).norm() <= self.split_distance {
                continue;
            }
            let mut target: Option<(usize, f64)> = None;
            let existing = means
                .iter()
                .enumerate()
                .filter(|(id, _)| *id != own)
                .filter_map(|(id, mean)| mean.map(|m| (id, m)));
            let new = created
                .iter()
                .filter_map(|(id, a)| a.mean().map(|(pose, _)| (*id, pose.translation())));
            for (id, mean) in existing.chain(new) {
                let distance = (position - mean).norm();
                if distance <= self.merge_distance && target.is_none_or(|(_, d)| distance < d) {
                    target = Some((id, distance));
                }
            }
            let id = match target {
                Some((id, _)) => id,
                None => {
                    let id = self.new_cluster_index();
                    created.push((id, PoseAccumulator::default()));
                    id
                }
            };
            if let Some((_, accumulator)) = created.iter_mut().find(|(c, _)| *c == id) {
                accumulator.add(&particle);
            }
            samples.at_mut(i).cluster = id;
        }
        if !created.is_empty() {
            log::debug!("split off {} new clusters", created.len());
        }
    }

    fn merge(&mut self, samples: &mut SampleSet, accumulators: &[PoseAccumulator]) {
        let means: Vec<Option<_>> = accumulators.iter().map(|a| a.mean().map(|(p, _)| p)).collect();
        let mut parent: Vec<usize> = (0..means.len()).collect();
        fn root(parent: &[usize], mut id: usize) -> usize {
            while parent[id] != id {
                id = parent[id];
            }
            id
        }
        let mut merged = 0;
        for a in 0..means.len() {
            for b in (a + 1)..means.len() {
                let (Some(mean_a), Some(mean_b)) = (means[a], means[b]) else {
                    continue;
                };
                let close = (mean_a.translation() - mean_b.translation()).norm() <= self.merge_distance
                    && normalize_angle(mean_a.rotation - mean_b.rotation).abs() <= self.merge_angle;
                let (root_a, root_b) = (root(&parent, a), root(&parent, b));
                if !close || root_a == root_b {
                    continue;
                }
                if self.counts[root_b] > self.counts[root_a] {
                    parent[root_a] = root_b;
                    self.counts[root_b] += self.counts[root_a];
                } else {
                    parent[root_b] = root_a;
                    self.counts[root_a] += self.counts[root_b];
                }
                merged += 1;
            }
        }
        if merged > 0 {
            for particle in samples.particles_mut() {
                particle.cluster = root(&parent, particle.cluster);
            }
            log::debug!("merged {merged} clusters");
        }
    }

    pub fn calc_pose(&mut self, samples: &mut SampleSet) -> RobotPose {
        self.free_ids.clear();
        let accumulators = self.recount(samples);
        self.split(samples, &accumulators);
        let accumulators = self.recount(samples);
        self.merge(samples, &accumulators);
        let accumulators = self.recount(samples);

        while self.counts.last() == Some(&0) {
            self.counts.pop();
            self.weightings.pop();
        }
        self.free_ids = (0..self.counts.len())
            .rev()
            .filter(|id| self.counts[*id] == 0)
            .collect();

        self.total = samples.total_weighting();
        self.num_particles = samples.len();
        let weighted = self.total > 0.0 && self.total.is_finite();
        let score = |id: usize| {
            if weighted {
                self.weightings[id]
            } else {
                self.counts[id] as f64
            }
        };
        self.best = (0..self.counts.len())
            .filter(|id| self.counts[*id] > 0)
            .fold(None, |best: Option<usize>, id| match best {
                Some(b) if score(b) >= score(id) => Some(b),
                _ => Some(id),
            })
            .unwrap_or(0);

        let (pose, deviation) = accumulators
            .get(self.best)
            .and_then(|a| a.mean())
            .unwrap_or_default();
        RobotPose {
            pose,
            validity: self.cluster_validity(self.best),
            deviation,
        }
    }
}
