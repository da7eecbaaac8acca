//! The self locator: one particle filter cycle per camera frame.
//!
//! ```text
//! motion update -> observation selection -> sensor fusion
//!     -> weighting adaptation -> resampling (+ templates) -> pose calculation
//! ```
//!
//! All state that survives between frames (last odometry, last computed pose, slow/fast
//! averages, game state of the previous frame) lives in [SelfLocator].
use std::f64::consts::FRAC_PI_2;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::config::SelfLocatorConfig;
use crate::error::Result;
use crate::hypotheses::{PoseHypothesis, extract_hypotheses};
use crate::measurements::{FramePercepts, ObservationSelector, SelectionMode};
use crate::motion::MotionModel;
use crate::particle::{Particle, SampleSet};
use crate::pose::{PoseCalculator, PoseCalculatorType, RobotPose};
use crate::resampling::{ResamplingOutcome, WeightingAdaptation, resample};
use crate::sensor_models::{SensorFusion, SensorModel};
use crate::templates::{TemplateBuffer, TemplateSource};
use crate::Pose2D;

/// What a cycle does.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// The full filter.
    #[default]
    Normal,
    /// Replace every particle by a template whenever templates are available. For checking
    /// template generation.
    TemplatesOnly,
    /// Move the last pose by odometry only. For checking odometry.
    OdometryOnly,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameState {
    #[default]
    Initial,
    Ready,
    Set,
    Playing,
    Finished,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecondaryState {
    #[default]
    Normal,
    PenaltyShoot,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeamColor {
    #[default]
    Red,
    Blue,
}

/// The part of the game controller state the locator reacts to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameInfo {
    pub state: GameState,
    pub secondary: SecondaryState,
    pub penalized: bool,
    pub team_color: TeamColor,
}

/// Spread used when re-seeding after game state transitions.
const GAME_STATE_STD_DEV: Pose2D = Pose2D {
    x: 200.0,
    y: 200.0,
    rotation: 0.2,
};

/// Particle filter self locator.
pub struct SelfLocator {
    config: SelfLocatorConfig,
    samples: SampleSet,
    motion: MotionModel,
    selector: ObservationSelector,
    fusion: SensorFusion,
    adaptation: WeightingAdaptation,
    templates: Box<dyn TemplateSource>,
    calculator: PoseCalculator,
    pending_calculator: Option<PoseCalculatorType>,
    mode: ExecutionMode,
    rng: StdRng,
    updated_by_sensors: bool,
    last_resampling: Option<ResamplingOutcome>,
    last_pose: RobotPose,
    last_time: Option<u64>,
    last_penalized: bool,
    last_game_state: Option<GameState>,
}

impl SelfLocator {
    /// Create a locator with a random seed.
    pub fn new(config: SelfLocatorConfig) -> Result<SelfLocator> {
        Self::new_with_seed(config, rand::random())
    }

    /// Create a locator with a specific random seed, for reproducible runs.
    pub fn new_with_seed(config: SelfLocatorConfig, seed: u64) -> Result<SelfLocator> {
        config.validate()?;
        let samples = SampleSet::new(config.number_of_samples);
        let fusion = SensorFusion::new(&config.field, &config.sensors);
        let templates = Box::new(TemplateBuffer::new(&config.field, &config.templates));
        let calculator = PoseCalculator::new(config.pose_calculator, &config.field, &config.pose);
        let mut locator = SelfLocator {
            samples,
            motion: MotionModel::default(),
            selector: ObservationSelector::new(),
            fusion,
            adaptation: WeightingAdaptation::new(),
            templates,
            calculator,
            pending_calculator: None,
            mode: ExecutionMode::Normal,
            rng: StdRng::seed_from_u64(seed),
            updated_by_sensors: false,
            last_resampling: None,
            last_pose: RobotPose::default(),
            last_time: None,
            last_penalized: false,
            last_game_state: None,
            config,
        };
        locator.reset();
        Ok(locator)
    }

    pub fn config(&self) -> &SelfLocatorConfig {
        &self.config
    }

    /// The population is rebuilt with the new size at the start of the next cycle.
    pub fn set_number_of_samples(&mut self, number_of_samples: usize) {
        self.config.number_of_samples = number_of_samples.max(1);
    }

    pub fn samples(&self) -> &SampleSet {
        &self.samples
    }

    pub fn adaptation(&self) -> &WeightingAdaptation {
        &self.adaptation
    }

    /// What the resampler did in the last cycle, if it ran.
    pub fn last_resampling(&self) -> Option<ResamplingOutcome> {
        self.last_resampling
    }

    pub fn last_pose(&self) -> &RobotPose {
        &self.last_pose
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn set_execution_mode(&mut self, mode: ExecutionMode) {
        self.mode = mode;
    }

    pub fn pose_calculator_type(&self) -> PoseCalculatorType {
        self.pending_calculator.unwrap_or(self.calculator.kind())
    }

    /// Switch the pose calculator at the start of the next cycle.
    pub fn set_pose_calculator(&mut self, kind: PoseCalculatorType) {
        if kind != self.calculator.kind() {
            self.pending_calculator = Some(kind);
        } else {
            self.pending_calculator = None;
        }
    }

    /// Replace the template source, e.g. by an external relocalization module.
    pub fn set_template_source(&mut self, source: Box<dyn TemplateSource>) {
        self.templates = source;
    }

    pub fn template_source_mut(&mut self) -> &mut dyn TemplateSource {
        self.templates.as_mut()
    }

    /// Replace the registered sensor models.
    pub fn set_sensor_fusion(&mut self, fusion: SensorFusion) {
        self.fusion = fusion;
    }

    pub fn register_sensor_model(&mut self, model: Box<dyn SensorModel>) {
        self.fusion.register(model);
    }

    /// Spread the particles again, around the known start pose if one is configured.
    pub fn reset(&mut self) {
        let poses: Vec<(Pose2D, Pose2D)> = self
            .config
            .known_start_pose
            .iter()
            .map(|start| (start.pose, start.standard_deviation))
            .collect();
        let odometry = *self.motion.last_odometry();
        self.init_samples_at(&poses, odometry);
        self.adaptation.reset();
        self.updated_by_sensors = false;
        self.last_time = None;
        log::info!(
            "self locator reset with {} particles{}",
            self.samples.len(),
            if poses.is_empty() { ", spread over the field" } else { " around the start pose" }
        );
    }

    /// Seed the population around `poses`. Odometry accumulated before `odometry` no longer
    /// applies to the new particles.
    fn init_samples_at(&mut self, poses: &[(Pose2D, Pose2D)], odometry: Pose2D) {
        self.samples
            .init_at_poses(poses, &self.config.field, &mut self.rng);
        self.motion.reset(odometry);
        self.calculator.init(&mut self.samples);
    }

    /// Select observations and fuse them. Returns whether any weighting changed.
    fn fuse(&mut self, percepts: &FramePercepts, mode: SelectionMode) -> bool {
        let target = self.config.number_of_observations;
        match self.selector.select(percepts, mode, target, &mut self.rng) {
            Some(selected) => self.fusion.apply(&mut self.samples, selected, percepts),
            None => false,
        }
    }

    /// Re-seed on penalty and kick-off transitions. Returns whether the landmark pass that
    /// follows leaving a penalty updated the weightings.
    fn apply_game_state(
        &mut self,
        game: &GameInfo,
        odometry: &Pose2D,
        percepts: &FramePercepts,
    ) -> bool {
        let penalty_ended = self.last_penalized && !game.penalized;
        let kick_off = self.last_game_state == Some(GameState::Set) && game.state == GameState::Playing;
        self.last_penalized = game.penalized;
        self.last_game_state = Some(game.state);

        match game.secondary {
            SecondaryState::PenaltyShoot if kick_off || penalty_ended => {
                let pose = match game.team_color {
                    TeamColor::Red => Pose2D::new(0.0, 0.0, 0.0),
                    TeamColor::Blue => Pose2D::new(self.config.field.x_pos_own_goalpost, 0.0, 0.0),
                };
                log::info!("penalty shoot-out: particles re-seeded at {pose}");
                self.init_samples_at(&[(pose, GAME_STATE_STD_DEV)], *odometry);
                false
            }
            SecondaryState::Normal if penalty_ended => {
                let field = &self.config.field;
                let poses = [
                    (Pose2D::new(0.0, field.y_pos_left_sideline, -FRAC_PI_2), GAME_STATE_STD_DEV),
                    (Pose2D::new(0.0, field.y_pos_right_sideline, FRAC_PI_2), GAME_STATE_STD_DEV),
                ];
                log::info!("penalty over: particles re-seeded at both sidelines");
                self.init_samples_at(&poses, *odometry);
                self.fuse(percepts, SelectionMode::LandmarksOnly)
            }
            _ => false,
        }
    }

    fn run_filter(&mut self, odometry: &Pose2D, percepts: &FramePercepts, landmark_update: bool) -> RobotPose {
        self.motion.update(
            &mut self.samples,
            odometry,
            self.updated_by_sensors,
            &self.config.motion,
            &self.config.field,
            &mut self.rng,
        );
        let geometric_update = self.fuse(percepts, SelectionMode::Geometric);
        self.updated_by_sensors = landmark_update || geometric_update;
        self.last_resampling = None;

        if self.updated_by_sensors
            && self.adaptation.adapt(
                &self.samples,
                &self.config.resampling,
                self.config.known_start_pose.is_some(),
            )
        {
            let recovery = self
                .adaptation
                .recovery_fraction(self.templates.templates_available());
            let calculator = &mut self.calculator;
            let outcome = resample(
                &mut self.samples,
                self.adaptation.total(),
                recovery,
                &self.config.resampling,
                self.templates.as_mut(),
                || calculator.new_cluster_index(),
                &self.config.field,
                &mut self.rng,
            );
            if outcome.reinitialized {
                self.calculator.init(&mut self.samples);
            }
            self.last_resampling = Some(outcome);
        }
        self.calculator.calc_pose(&mut self.samples)
    }

    fn run_templates_only(&mut self) -> RobotPose {
        if self.templates.templates_available() {
            for i in 0..self.samples.len() {
                let Some(pose) = self.templates.take_template(&mut self.rng) else {
                    break;
                };
                let mut particle = Particle::new(&pose, 0.0);
                particle.cluster = self.calculator.new_cluster_index();
                *self.samples.at_mut(i) = particle;
            }
        }
        self.calculator.calc_pose(&mut self.samples)
    }

    fn run_odometry_only(&mut self, odometry: &Pose2D) -> RobotPose {
        let offset = odometry.relative_to(self.motion.last_odometry());
        self.motion.reset(*odometry);
        RobotPose {
            pose: self.last_pose.pose.compose(&offset),
            ..self.last_pose
        }
    }

    /// Run one cycle for the frame described by `percepts`. `odometry` is the accumulated
    /// odometry pose. Calling twice for the same frame time returns the cached pose.
    pub fn update(
        &mut self,
        odometry: &Pose2D,
        percepts: &FramePercepts,
        game: Option<&GameInfo>,
    ) -> RobotPose {
        if self.samples.len() != self.config.number_of_samples {
            log::info!(
                "rebuilding population: {} -> {} particles",
                self.samples.len(),
                self.config.number_of_samples
            );
            self.samples = SampleSet::new(self.config.number_of_samples);
            self.reset();
        }
        if self.last_time == Some(percepts.time) {
            return self.last_pose;
        }
        if self.last_time.is_none() {
            self.motion.reset(*odometry);
        }

        self.templates.buffer_new_perceptions(percepts, odometry);
        self.samples.reset_weightings();
        if let Some(kind) = self.pending_calculator.take() {
            log::info!("switching pose calculator {} -> {}", self.calculator.kind(), kind);
            self.calculator = PoseCalculator::new(kind, &self.config.field, &self.config.pose);
            self.calculator.init(&mut self.samples);
        }
        let landmark_update = match game {
            Some(game) if self.config.consider_game_state => {
                self.apply_game_state(game, odometry, percepts)
            }
            _ => false,
        };

        let robot_pose = match self.mode {
            ExecutionMode::Normal => self.run_filter(odometry, percepts, landmark_update),
            ExecutionMode::TemplatesOnly => self.run_templates_only(),
            ExecutionMode::OdometryOnly => self.run_odometry_only(odometry),
        };
        log::debug!(
            "frame {}: {} (fused: {})",
            percepts.time,
            robot_pose,
            self.updated_by_sensors
        );
        self.last_pose = robot_pose;
        self.last_time = Some(percepts.time);
        robot_pose
    }

    /// Hypotheses for the frame, running the cycle first unless it already ran for this frame.
    pub fn hypotheses(
        &mut self,
        odometry: &Pose2D,
        percepts: &FramePercepts,
        game: Option<&GameInfo>,
    ) -> Vec<PoseHypothesis> {
        self.update(odometry, percepts, game);
        if !self.calculator.kind().is_clustering() {
            return Vec::new();
        }
        extract_hypotheses(&self.calculator, &self.samples, self.config.max_hypotheses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StartPose;
    use crate::field::GoalPostId;
    use crate::measurements::{HeadDirection, NaturalLandmarkPercept};
    use assert_approx_eq::assert_approx_eq;

    fn known_start_config() -> SelfLocatorConfig {
        SelfLocatorConfig {
            known_start_pose: Some(StartPose {
                pose: Pose2D::new(-1000.0, 0.0, 0.0),
                standard_deviation: Pose2D::new(50.0, 50.0, 0.05),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = SelfLocatorConfig {
            number_of_observations: 0,
            ..Default::default()
        };
        assert!(SelfLocator::new(config).is_err());
    }

    #[test]
    fn test_same_frame_is_cached() {
        let mut locator = SelfLocator::new_with_seed(known_start_config(), 1).unwrap();
        let first = locator.update(&Pose2D::default(), &FramePercepts::new(10), None);
        let second = locator.update(&Pose2D::new(500.0, 0.0, 0.0), &FramePercepts::new(10), None);
        assert_eq!(first, second);
    }

    #[test]
    fn test_odometry_moves_estimate_without_percepts() {
        let mut locator = SelfLocator::new_with_seed(known_start_config(), 2).unwrap();
        locator.update(&Pose2D::default(), &FramePercepts::new(0), None);
        let pose = locator.update(&Pose2D::new(300.0, 0.0, 0.0), &FramePercepts::new(33), None);
        assert!((pose.pose.x + 700.0).abs() < 60.0, "{pose}");
        assert!(pose.pose.y.abs() < 60.0);
    }

    #[test]
    fn test_sample_count_change_rebuilds_population() {
        let mut locator = SelfLocator::new_with_seed(known_start_config(), 3).unwrap();
        locator.update(&Pose2D::default(), &FramePercepts::new(0), None);
        locator.set_number_of_samples(37);
        locator.update(&Pose2D::default(), &FramePercepts::new(33), None);
        assert_eq!(locator.samples().len(), 37);
    }

    #[test]
    fn test_pose_calculator_switch() {
        let mut locator = SelfLocator::new_with_seed(known_start_config(), 4).unwrap();
        locator.set_pose_calculator(PoseCalculatorType::KMeansClustering);
        assert_eq!(locator.pose_calculator_type(), PoseCalculatorType::KMeansClustering);
        let hypotheses = locator.hypotheses(&Pose2D::default(), &FramePercepts::new(0), None);
        assert!(!hypotheses.is_empty());
        locator.set_pose_calculator(PoseCalculatorType::BestParticle);
        assert!(
            locator
                .hypotheses(&Pose2D::default(), &FramePercepts::new(33), None)
                .is_empty()
        );
    }

    #[test]
    fn test_odometry_only_mode() {
        let mut locator = SelfLocator::new_with_seed(known_start_config(), 5).unwrap();
        let start = locator.update(&Pose2D::default(), &FramePercepts::new(0), None);
        locator.set_execution_mode(ExecutionMode::OdometryOnly);
        let moved = locator.update(&Pose2D::new(100.0, 0.0, 0.5), &FramePercepts::new(33), None);
        let expected = start.pose.compose(&Pose2D::new(100.0, 0.0, 0.5));
        assert_approx_eq!(moved.pose.x, expected.x, 1e-9);
        assert_approx_eq!(moved.pose.rotation, expected.rotation, 1e-9);
    }

    #[test]
    fn test_penalty_shootout_reseeds_goalie() {
        let mut locator = SelfLocator::new_with_seed(known_start_config(), 6).unwrap();
        let mut game = GameInfo {
            state: GameState::Set,
            secondary: SecondaryState::PenaltyShoot,
            penalized: false,
            team_color: TeamColor::Blue,
        };
        locator.update(&Pose2D::default(), &FramePercepts::new(0), Some(&game));
        game.state = GameState::Playing;
        locator.update(&Pose2D::default(), &FramePercepts::new(33), Some(&game));
        for particle in locator.samples().particles() {
            assert!((particle.translation.x + 3000).abs() <= 200);
            assert!(particle.translation.y.abs() <= 200);
        }
    }

    #[test]
    fn test_reseed_discards_pending_odometry() {
        let mut locator = SelfLocator::new_with_seed(known_start_config(), 9).unwrap();
        let mut game = GameInfo {
            state: GameState::Set,
            secondary: SecondaryState::PenaltyShoot,
            penalized: false,
            team_color: TeamColor::Blue,
        };
        locator.update(&Pose2D::default(), &FramePercepts::new(0), Some(&game));
        // the robot was carried while the game was set; that offset predates the new seed
        game.state = GameState::Playing;
        locator.update(&Pose2D::new(1000.0, 0.0, 0.0), &FramePercepts::new(33), Some(&game));
        let particles = locator.samples().particles();
        let mean_x = particles.iter().map(|p| p.translation.x as f64).sum::<f64>() / particles.len() as f64;
        assert!((mean_x + 3000.0).abs() < 100.0, "mean x {mean_x}");
        for particle in particles {
            assert!((particle.translation.x + 3000).abs() <= 200);
        }

        // later odometry moves the re-seeded particles again
        locator.update(&Pose2D::new(1100.0, 0.0, 0.0), &FramePercepts::new(66), Some(&game));
        let particles = locator.samples().particles();
        let moved_x = particles.iter().map(|p| p.translation.x as f64).sum::<f64>() / particles.len() as f64;
        assert!((moved_x - mean_x - 100.0).abs() < 60.0, "moved from {mean_x} to {moved_x}");
    }

    #[test]
    fn test_returning_from_penalty_uses_landmark() {
        let mut locator = SelfLocator::new_with_seed(known_start_config(), 7).unwrap();
        let mut game = GameInfo {
            state: GameState::Playing,
            penalized: true,
            ..Default::default()
        };
        locator.update(&Pose2D::default(), &FramePercepts::new(0), Some(&game));
        game.penalized = false;
        let mut percepts = FramePercepts::new(33);
        percepts.landmark = Some(NaturalLandmarkPercept {
            match_found: true,
            head_direction: HeadDirection::FacingLeft,
        });
        let pose = locator.update(&Pose2D::default(), &percepts, Some(&game));
        assert!(locator.samples().particles().iter().all(|p| p.translation.x.abs() <= 200));
        // the matcher saw the goal area while looking left, so the left sideline wins
        assert!(pose.pose.y > 1500.0, "{pose}");
        assert!(locator.last_resampling().is_some());
    }

    #[test]
    fn test_templates_only_mode() {
        // a frame yields one template, so a single particle is fully replaced
        let config = SelfLocatorConfig {
            number_of_samples: 1,
            ..known_start_config()
        };
        let mut locator = SelfLocator::new_with_seed(config, 8).unwrap();
        locator.set_execution_mode(ExecutionMode::TemplatesOnly);
        let field = locator.config().field.clone();
        let robot = Pose2D::new(1000.0, 500.0, 0.2);
        let mut percepts = FramePercepts::new(100);
        for id in [GoalPostId::OpponentLeft, GoalPostId::OpponentRight] {
            let post = percepts.goal.post_mut(id);
            post.position_relative = robot.inverse_transform_point(&field.goal_post(id));
            post.time_when_last_seen = 100;
        }
        let pose = locator.update(&Pose2D::default(), &percepts, None);
        assert!((pose.pose.x - robot.x).abs() <= 100.0, "{pose}");
        assert!((pose.pose.y - robot.y).abs() <= 100.0, "{pose}");
    }
}
