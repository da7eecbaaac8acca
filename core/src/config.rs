//! Configuration of the self locator.
//!
//! All sections default to tuned values so a configuration file only has to name what it
//! changes. Files are read and written as JSON, YAML or TOML depending on their extension.
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LocatorError, Result};
use crate::field::FieldDimensions;
use crate::pose::PoseCalculatorType;
use crate::Pose2D;

/// A known start pose with the spread used to seed particles around it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StartPose {
    pub pose: Pose2D,
    pub standard_deviation: Pose2D,
}

/// Odometry noise model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionSection {
    /// Minimum translational error per cycle in mm.
    pub translation_noise: f64,
    /// Minimum rotational error per cycle in rad.
    pub rotation_noise: f64,
    /// Rotational error per mm walked.
    pub moved_dist_weight: f64,
    /// Rotational error per rad turned.
    pub moved_angle_weight: f64,
    /// Translational error along the direction of motion, relative to the distance.
    pub major_dir_trans_weight: f64,
    /// Translational error across the direction of motion, relative to the distance.
    pub minor_dir_trans_weight: f64,
}
impl Default for MotionSection {
    fn default() -> Self {
        MotionSection {
            translation_noise: 8.0,
            rotation_noise: 0.02,
            moved_dist_weight: 0.0008,
            moved_angle_weight: 0.2,
            major_dir_trans_weight: 0.5,
            minor_dir_trans_weight: 0.2,
        }
    }
}

/// Sensor model tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSection {
    pub goal_post_angle_std: f64,
    /// Relative distance error, i.e. 0.3 means 30 % of the expected distance.
    pub goal_post_distance_std: f64,
    pub center_circle_angle_std: f64,
    pub center_circle_distance_std: f64,
    pub line_point_angle_std: f64,
    pub corner_angle_std: f64,
    /// Radius in mm within which an observed intersection is matched to a field corner.
    pub max_crossing_length: f64,
    pub landmark_strong_weight: f64,
    pub landmark_weak_weight: f64,
}
impl Default for SensorSection {
    fn default() -> Self {
        SensorSection {
            goal_post_angle_std: 0.15,
            goal_post_distance_std: 0.3,
            center_circle_angle_std: 0.2,
            center_circle_distance_std: 0.3,
            line_point_angle_std: 0.08,
            corner_angle_std: 0.1,
            max_crossing_length: 400.0,
            landmark_strong_weight: 0.999,
            landmark_weak_weight: 0.001,
        }
    }
}

/// Weighting adaptation and resampling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResamplingSection {
    pub alpha_slow: f64,
    pub alpha_fast: f64,
    /// Fraction of the average weighting added to every particle before resampling.
    pub resampling_threshold: f64,
    /// Never replace resampled particles by templates.
    pub disable_sensor_resetting: bool,
}
impl Default for ResamplingSection {
    fn default() -> Self {
        ResamplingSection {
            alpha_slow: 0.005,
            alpha_fast: 0.1,
            resampling_threshold: 0.01,
            disable_sensor_resetting: false,
        }
    }
}

/// Relocalization templates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateSection {
    /// Age in ms after which a template is discarded.
    pub template_max_keep_time: u64,
    pub max_templates: usize,
    pub template_translation_std: f64,
    pub template_rotation_std: f64,
    /// Only accept templates inside the given x/y range around the field center.
    pub clip_template_generation: bool,
    pub clip_template_generation_range_x: f64,
    pub clip_template_generation_range_y: f64,
}
impl Default for TemplateSection {
    fn default() -> Self {
        TemplateSection {
            template_max_keep_time: 3000,
            max_templates: 50,
            template_translation_std: 100.0,
            template_rotation_std: 0.1,
            clip_template_generation: true,
            clip_template_generation_range_x: 3200.0,
            clip_template_generation_range_y: 2200.0,
        }
    }
}

/// Pose extraction tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseSection {
    pub binning_cells_x: usize,
    pub binning_cells_y: usize,
    pub cluster_split_distance: f64,
    pub cluster_merge_distance: f64,
    pub cluster_merge_angle: f64,
    pub kmeans_clusters: usize,
    pub kmeans_max_iterations: usize,
}
impl Default for PoseSection {
    fn default() -> Self {
        PoseSection {
            binning_cells_x: 10,
            binning_cells_y: 10,
            cluster_split_distance: 1000.0,
            cluster_merge_distance: 500.0,
            cluster_merge_angle: 0.5,
            kmeans_clusters: 5,
            kmeans_max_iterations: 1000,
        }
    }
}

/// Complete self locator configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfLocatorConfig {
    pub number_of_samples: usize,
    /// Number of observations fused per cycle.
    pub number_of_observations: usize,
    /// Re-seed the particles on penalty and kick-off transitions.
    pub consider_game_state: bool,
    pub pose_calculator: PoseCalculatorType,
    pub max_hypotheses: usize,
    pub known_start_pose: Option<StartPose>,
    pub field: FieldDimensions,
    pub motion: MotionSection,
    pub sensors: SensorSection,
    pub resampling: ResamplingSection,
    pub templates: TemplateSection,
    pub pose: PoseSection,
}
impl Default for SelfLocatorConfig {
    fn default() -> Self {
        SelfLocatorConfig {
            number_of_samples: 100,
            number_of_observations: 6,
            consider_game_state: true,
            pose_calculator: PoseCalculatorType::ParticleHistory,
            max_hypotheses: 6,
            known_start_pose: None,
            field: FieldDimensions::default(),
            motion: MotionSection::default(),
            sensors: SensorSection::default(),
            resampling: ResamplingSection::default(),
            templates: TemplateSection::default(),
            pose: PoseSection::default(),
        }
    }
}

impl SelfLocatorConfig {
    /// Check the values a cycle relies on.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(LocatorError::InvalidConfig(msg.to_string()));
        if self.number_of_samples == 0 {
            return invalid("number_of_samples must be at least 1");
        }
        if self.number_of_observations == 0 {
            return invalid("number_of_observations must be at least 1");
        }
        let alphas = [self.resampling.alpha_slow, self.resampling.alpha_fast];
        if alphas.iter().any(|a| !(0.0..=1.0).contains(a)) {
            return invalid("alpha_slow and alpha_fast must be within [0, 1]");
        }
        if self.resampling.resampling_threshold < 0.0 {
            return invalid("resampling_threshold must be non-negative");
        }
        let m = &self.motion;
        let noise = [
            m.translation_noise,
            m.rotation_noise,
            m.moved_dist_weight,
            m.moved_angle_weight,
            m.major_dir_trans_weight,
            m.minor_dir_trans_weight,
        ];
        if noise.iter().any(|n| !n.is_finite() || *n < 0.0) {
            return invalid("motion noise parameters must be finite and non-negative");
        }
        if self.pose.binning_cells_x == 0 || self.pose.binning_cells_y == 0 {
            return invalid("binning grid needs at least one cell per axis");
        }
        if self.pose.kmeans_clusters == 0 {
            return invalid("kmeans_clusters must be at least 1");
        }
        Ok(())
    }

    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    /// Write the configuration as YAML.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self)?;
        file.write_all(s.as_bytes())?;
        Ok(())
    }

    /// Read the configuration from YAML.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_yaml::from_reader(file)?)
    }

    /// Write the configuration as TOML.
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self)?;
        file.write_all(s.as_bytes())?;
        Ok(())
    }

    /// Read the configuration from TOML.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        Ok(toml::from_str(&s)?)
    }

    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(unsupported(p)),
        }
    }

    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let config = match extension(p).as_deref() {
            Some("json") => Self::from_json(p)?,
            Some("yaml") | Some("yml") => Self::from_yaml(p)?,
            Some("toml") => Self::from_toml(p)?,
            _ => return Err(unsupported(p)),
        };
        config.validate()?;
        Ok(config)
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

fn unsupported(path: &Path) -> LocatorError {
    LocatorError::InvalidConfig(format!(
        "unsupported configuration format: {}",
        path.display()
    ))
}
