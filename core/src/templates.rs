//! Sources of global relocalization hypotheses ("templates").
//!
//! A template is a pose that was derived from a single frame without any help from the particle
//! population, e.g. by triangulating from both posts of one goal. The resampler replaces part of
//! the population by templates whenever the short-term average weighting drops below the
//! long-term one, which lets the filter recover after the robot has been displaced.
use std::collections::VecDeque;

use nalgebra::Vector2;
use rand::RngCore;

use crate::config::TemplateSection;
use crate::field::{FieldDimensions, GoalPostId};
use crate::measurements::FramePercepts;
use crate::particle::sample_triangular;
use crate::{Pose2D, normalize_angle};

/// A pose hypothesis together with the odometry and time at which it was created.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleTemplate {
    pub pose: Pose2D,
    pub odometry: Pose2D,
    /// Creation time in ms.
    pub timestamp: u64,
}

/// Producer of relocalization templates consumed by the resampler.
pub trait TemplateSource {
    /// Called once per cycle before anything else with the frame's percepts and odometry.
    fn buffer_new_perceptions(&mut self, percepts: &FramePercepts, odometry: &Pose2D);
    /// Whether at least one unexpired template is available.
    fn templates_available(&self) -> bool;
    /// Remove one template and return the pose it implies now.
    fn take_template(&mut self, rng: &mut dyn RngCore) -> Option<Pose2D>;
}

/// Time bounded FIFO of templates, fed by goal pair triangulation and by external producers.
#[derive(Clone, Debug)]
pub struct TemplateBuffer {
    field: FieldDimensions,
    params: TemplateSection,
    templates: VecDeque<SampleTemplate>,
    time: u64,
    odometry: Pose2D,
}

impl TemplateBuffer {
    pub fn new(field: &FieldDimensions, params: &TemplateSection) -> TemplateBuffer {
        TemplateBuffer {
            field: field.clone(),
            params: params.clone(),
            templates: VecDeque::with_capacity(params.max_templates),
            time: 0,
            odometry: Pose2D::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn clear(&mut self) {
        self.templates.clear();
    }

    /// Add a template. Templates outside the accepted field range are dropped, and the oldest
    /// template makes room when the buffer is full. Returns whether it was kept.
    pub fn push(&mut self, template: SampleTemplate) -> bool {
        if !self.accepts(&template.pose) || self.params.max_templates == 0 {
            return false;
        }
        while self.templates.len() >= self.params.max_templates {
            self.templates.pop_front();
        }
        self.templates.push_back(template);
        true
    }

    fn accepts(&self, pose: &Pose2D) -> bool {
        if !pose.x.is_finite() || !pose.y.is_finite() || !pose.rotation.is_finite() {
            return false;
        }
        if self.params.clip_template_generation {
            pose.x.abs() <= self.params.clip_template_generation_range_x
                && pose.y.abs() <= self.params.clip_template_generation_range_y
        } else {
            self.field.is_inside_carpet(&pose.translation())
        }
    }

    fn remove_expired(&mut self) {
        let max_age = self.params.template_max_keep_time;
        let now = self.time;
        self.templates
            .retain(|t| now.saturating_sub(t.timestamp) <= max_age);
    }

    /// Robot pose implied by seeing the left and right post of one goal at the given robot
    /// relative positions.
    pub fn triangulate(
        left_field: &Vector2<f64>,
        right_field: &Vector2<f64>,
        left_seen: &Vector2<f64>,
        right_seen: &Vector2<f64>,
    ) -> Option<Pose2D> {
        let seen_baseline = right_seen - left_seen;
        let field_baseline = right_field - left_field;
        if seen_baseline.norm() < 1.0 {
            return None;
        }
        let rotation = normalize_angle(
            field_baseline.y.atan2(field_baseline.x) - seen_baseline.y.atan2(seen_baseline.x),
        );
        let seen_center = (left_seen + right_seen) / 2.0;
        let field_center = (left_field + right_field) / 2.0;
        let (sin, cos) = rotation.sin_cos();
        let rotated = Vector2::new(
            cos * seen_center.x - sin * seen_center.y,
            sin * seen_center.x + cos * seen_center.y,
        );
        let translation = field_center - rotated;
        Some(Pose2D::new(translation.x, translation.y, rotation))
    }

    fn templates_from_goals(&mut self, percepts: &FramePercepts) {
        let goals = [
            (GoalPostId::OpponentLeft, GoalPostId::OpponentRight),
            (GoalPostId::OwnLeft, GoalPostId::OwnRight),
        ];
        for (left, right) in goals {
            let left_post = percepts.goal.post(left);
            let right_post = percepts.goal.post(right);
            if !percepts.is_fresh(left_post) || !percepts.is_fresh(right_post) {
                continue;
            }
            let pose = Self::triangulate(
                &self.field.goal_post(left),
                &self.field.goal_post(right),
                &left_post.position_relative,
                &right_post.position_relative,
            );
            if let Some(pose) = pose {
                let template = SampleTemplate {
                    pose,
                    odometry: self.odometry,
                    timestamp: self.time,
                };
                if self.push(template) {
                    log::trace!("template from {left:?}/{right:?} at {pose}");
                }
            }
        }
    }
}

impl TemplateSource for TemplateBuffer {
    fn buffer_new_perceptions(&mut self, percepts: &FramePercepts, odometry: &Pose2D) {
        self.time = percepts.time;
        self.odometry = *odometry;
        self.remove_expired();
        if percepts.camera_matrix_valid {
            self.templates_from_goals(percepts);
        }
    }

    fn templates_available(&self) -> bool {
        let now = self.time;
        let max_age = self.params.template_max_keep_time;
        self.templates
            .iter()
            .any(|t| now.saturating_sub(t.timestamp) <= max_age)
    }

    fn take_template(&mut self, rng: &mut dyn RngCore) -> Option<Pose2D> {
        self.remove_expired();
        let template = self.templates.pop_back()?;
        let moved = self.odometry.relative_to(&template.odometry);
        let pose = template.pose.compose(&moved);
        let std = self.params.template_translation_std;
        Some(Pose2D::new(
            pose.x + sample_triangular(rng, std),
            pose.y + sample_triangular(rng, std),
            normalize_angle(pose.rotation + sample_triangular(rng, self.params.template_rotation_std)),
        ))
    }
}
