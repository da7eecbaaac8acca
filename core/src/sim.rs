//! Synthetic field world for driving the self locator and recording its results.
//!
//! The simulator walks a robot along a circle around the center spot, integrates noisy
//! odometry and produces the percepts a camera with a limited field of view and range would
//! deliver: goal posts, the center circle, visible parts of the field lines and their
//! intersections. An optional kidnap event teleports the robot without telling odometry.
//!
//! Results are stored as one [SimulationRecord] per frame and can be written to CSV.
use std::f64::consts::FRAC_PI_2;
use std::io::{self, Write};
use std::path::Path;

use nalgebra::Vector2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::field::{FieldDimensions, GoalPostId, LineSegment};
use crate::locator::{GameInfo, GameState, SelfLocator};
use crate::measurements::{FramePercepts, GoalPost, Intersection, PerceivedLine};
use crate::{Pose2D, normalize_angle};

/// Parameters of a simulated run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub frames: usize,
    /// Time between frames in ms.
    pub frame_interval: u64,
    pub seed: u64,
    /// Radius of the walked circle in mm.
    pub circle_radius: f64,
    /// Walking speed in mm per frame.
    pub speed: f64,
    /// Frame at which the robot is teleported to `kidnap_pose`.
    pub kidnap_at: Option<usize>,
    pub kidnap_pose: Pose2D,
    /// Relative standard deviation of the odometry translation.
    pub odometry_translation_std: f64,
    /// Standard deviation of the odometry rotation per frame in rad.
    pub odometry_rotation_std: f64,
    /// Half opening angle of the camera in rad.
    pub field_of_view: f64,
    /// Maximum distance at which features are seen in mm.
    pub max_range: f64,
    /// Relative standard deviation of perceived distances.
    pub percept_distance_std: f64,
    /// Standard deviation of perceived bearings in rad.
    pub percept_angle_std: f64,
    /// Probability that a visible feature is actually detected.
    pub detection_rate: f64,
}
impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            frames: 600,
            frame_interval: 33,
            seed: 42,
            circle_radius: 1200.0,
            speed: 5.0,
            kidnap_at: None,
            kidnap_pose: Pose2D::new(-1200.0, 0.0, -FRAC_PI_2),
            odometry_translation_std: 0.05,
            odometry_rotation_std: 0.002,
            field_of_view: 0.5,
            max_range: 4000.0,
            percept_distance_std: 0.05,
            percept_angle_std: 0.02,
            detection_rate: 0.9,
        }
    }
}

/// Inputs of one frame and the ground truth behind them.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulatedFrame {
    pub frame: usize,
    pub truth: Pose2D,
    pub odometry: Pose2D,
    pub percepts: FramePercepts,
}

fn gaussian<R: Rng + ?Sized>(rng: &mut R, std_dev: f64) -> f64 {
    if std_dev <= 0.0 {
        return 0.0;
    }
    match Normal::new(0.0, std_dev) {
        Ok(normal) => normal.sample(rng),
        Err(_) => 0.0,
    }
}

/// Ground truth robot on the field with noisy odometry and perception.
pub struct FieldSimulator {
    field: FieldDimensions,
    config: SimulationConfig,
    lines: Vec<LineSegment>,
    rng: StdRng,
    truth: Pose2D,
    odometry: Pose2D,
    frame: usize,
}

impl FieldSimulator {
    pub fn new(field: &FieldDimensions, config: &SimulationConfig) -> FieldSimulator {
        let radius = config.circle_radius;
        FieldSimulator {
            field: field.clone(),
            config: config.clone(),
            lines: field.field_lines(),
            rng: StdRng::seed_from_u64(config.seed),
            // on the circle, heading counterclockwise
            truth: Pose2D::new(0.0, -radius, 0.0),
            odometry: Pose2D::default(),
            frame: 0,
        }
    }

    pub fn truth(&self) -> &Pose2D {
        &self.truth
    }

    pub fn frame(&self) -> usize {
        self.frame
    }

    fn time(&self) -> u64 {
        self.frame as u64 * self.config.frame_interval
    }

    /// Advance the world by one frame and return what the robot knows about it.
    pub fn step(&mut self) -> SimulatedFrame {
        if self.frame > 0 {
            self.walk();
        }
        let percepts = self.perceive();
        let frame = SimulatedFrame {
            frame: self.frame,
            truth: self.truth,
            odometry: self.odometry,
            percepts,
        };
        self.frame += 1;
        frame
    }

    fn walk(&mut self) {
        let radius = self.config.circle_radius.max(1.0);
        let delta = Pose2D::new(self.config.speed, 0.0, self.config.speed / radius);
        self.truth = self.truth.compose(&delta);
        let mut position = self.truth.translation();
        self.field.clip_to_carpet(&mut position);
        self.truth.x = position.x;
        self.truth.y = position.y;

        let measured = Pose2D::new(
            delta.x * (1.0 + gaussian(&mut self.rng, self.config.odometry_translation_std)),
            delta.y + delta.x * gaussian(&mut self.rng, self.config.odometry_translation_std),
            delta.rotation + gaussian(&mut self.rng, self.config.odometry_rotation_std),
        );
        self.odometry = self.odometry.compose(&measured);

        if self.config.kidnap_at == Some(self.frame) {
            log::info!("kidnapping robot from {} to {}", self.truth, self.config.kidnap_pose);
            self.truth = self.config.kidnap_pose;
        }
    }

    /// Robot relative position of a field point with perception noise, if the camera sees it.
    fn observe(&mut self, field_point: &Vector2<f64>) -> Option<Vector2<f64>> {
        let relative = self.truth.inverse_transform_point(field_point);
        let distance = relative.norm();
        let bearing = relative.y.atan2(relative.x);
        if distance > self.config.max_range || bearing.abs() > self.config.field_of_view {
            return None;
        }
        let distance = distance * (1.0 + gaussian(&mut self.rng, self.config.percept_distance_std));
        let bearing = bearing + gaussian(&mut self.rng, self.config.percept_angle_std);
        Some(Vector2::new(distance * bearing.cos(), distance * bearing.sin()))
    }

    fn detected(&mut self) -> bool {
        self.rng.random::<f64>() < self.config.detection_rate
    }

    fn perceive(&mut self) -> FramePercepts {
        let mut percepts = FramePercepts::new(self.time());
        let time = percepts.time;

        let goals = [
            (GoalPostId::OpponentLeft, GoalPostId::OpponentRight, 0),
            (GoalPostId::OwnLeft, GoalPostId::OwnRight, 1),
        ];
        for (left, right, unknown_index) in goals {
            let (left_post, right_post) = (self.field.goal_post(left), self.field.goal_post(right));
            let seen_left = self.observe(&left_post);
            let seen_right = self.observe(&right_post);
            let fresh = |position_relative| GoalPost {
                position_relative,
                time_when_last_seen: time,
            };
            match (seen_left, seen_right) {
                (Some(l), Some(r)) => {
                    *percepts.goal.post_mut(left) = fresh(l);
                    *percepts.goal.post_mut(right) = fresh(r);
                }
                (Some(single), None) | (None, Some(single)) => {
                    percepts.goal.unknown_posts[unknown_index] = fresh(single);
                }
                (None, None) => {}
            }
        }

        if let Some(center) = self.observe(&Vector2::zeros())
            && self.detected()
        {
            percepts.lines.circle.found = true;
            percepts.lines.circle.position_relative = center;
        }

        for i in 0..self.lines.len() {
            let segment = self.lines[i];
            if let Some(line) = self.observe_line(&segment)
                && self.detected()
            {
                percepts.lines.lines.push(line);
            }
        }

        for corner in self.field.field_corners() {
            if let Some(position_relative) = self.observe(&corner.position)
                && self.detected()
            {
                percepts.lines.intersections.push(Intersection {
                    position_relative,
                    kind: corner.kind,
                });
            }
        }
        percepts
    }

    /// The visible part of a field line, found by sampling points along it.
    fn observe_line(&mut self, segment: &LineSegment) -> Option<PerceivedLine> {
        const SAMPLES: usize = 20;
        let mut first = None;
        let mut last = None;
        for k in 0..=SAMPLES {
            let point = segment.point_at(k as f64 / SAMPLES as f64);
            let relative = self.truth.inverse_transform_point(&point);
            let visible = relative.norm() <= self.config.max_range
                && relative.y.atan2(relative.x).abs() <= self.config.field_of_view;
            if visible {
                first.get_or_insert(point);
                last = Some(point);
            }
        }
        let (first, last) = (first?, last?);
        if (last - first).norm() < 200.0 {
            return None;
        }
        Some(PerceivedLine {
            first: self.observe(&first)?,
            last: self.observe(&last)?,
        })
    }
}

/// One row of simulation output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationRecord {
    pub frame: usize,
    /// Frame time in ms.
    pub time: u64,
    pub true_x: f64,
    pub true_y: f64,
    pub true_rotation: f64,
    pub estimated_x: f64,
    pub estimated_y: f64,
    pub estimated_rotation: f64,
    /// Distance between estimate and truth in mm.
    pub position_error: f64,
    /// Absolute heading error in rad.
    pub rotation_error: f64,
    pub validity: f64,
    pub deviation: f64,
    pub hypotheses: usize,
}
impl SimulationRecord {
    /// Reads records from a CSV file.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> crate::Result<Vec<Self>> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        for result in reader.deserialize() {
            let record: Self = result?;
            records.push(record);
        }
        Ok(records)
    }

    /// Writes records to a CSV file with a header row.
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> crate::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Error statistics of a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationSummary {
    pub frames: usize,
    pub mean_position_error: f64,
    pub final_position_error: f64,
    pub mean_rotation_error: f64,
}
impl SimulationSummary {
    pub fn from_records(records: &[SimulationRecord]) -> SimulationSummary {
        let Some(last) = records.last() else {
            return SimulationSummary::default();
        };
        let n = records.len() as f64;
        SimulationSummary {
            frames: records.len(),
            mean_position_error: records.iter().map(|r| r.position_error).sum::<f64>() / n,
            final_position_error: last.position_error,
            mean_rotation_error: records.iter().map(|r| r.rotation_error).sum::<f64>() / n,
        }
    }

    /// Write a short human readable report.
    pub fn write_report<W: Write>(&self, mut out: W) -> io::Result<()> {
        writeln!(out, "frames:               {}", self.frames)?;
        writeln!(out, "mean position error:  {:.1} mm", self.mean_position_error)?;
        writeln!(out, "final position error: {:.1} mm", self.final_position_error)?;
        writeln!(
            out,
            "mean rotation error:  {:.1} deg",
            self.mean_rotation_error.to_degrees()
        )
    }
}

/// Run the locator against the simulator for `frames` frames, one record per frame.
pub fn run_simulation(locator: &mut SelfLocator, simulator: &mut FieldSimulator, frames: usize) -> Vec<SimulationRecord> {
    let game = GameInfo {
        state: GameState::Playing,
        ..Default::default()
    };
    let mut records = Vec::with_capacity(frames);
    for _ in 0..frames {
        let frame = simulator.step();
        let estimate = locator.update(&frame.odometry, &frame.percepts, Some(&game));
        let hypotheses = locator.hypotheses(&frame.odometry, &frame.percepts, Some(&game));
        records.push(SimulationRecord {
            frame: frame.frame,
            time: frame.percepts.time,
            true_x: frame.truth.x,
            true_y: frame.truth.y,
            true_rotation: frame.truth.rotation,
            estimated_x: estimate.pose.x,
            estimated_y: estimate.pose.y,
            estimated_rotation: estimate.pose.rotation,
            position_error: (estimate.pose.translation() - frame.truth.translation()).norm(),
            rotation_error: normalize_angle(estimate.pose.rotation - frame.truth.rotation).abs(),
            validity: estimate.validity,
            deviation: estimate.deviation,
            hypotheses: hypotheses.len(),
        });
    }
    records
}
