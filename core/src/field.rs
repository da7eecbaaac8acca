//! Field geometry: dimensions, field markings and the lookup model used by sensor models.
//!
//! Defaults follow the 2011 Standard Platform League field (6 m × 4 m inside the lines with a
//! 0.7 m carpet border). The field frame origin is the center spot; x points to the opponent
//! goal, y to the left sideline.
use std::f64::consts::PI;

use nalgebra::Vector2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{Pose2D, saturate_i32};

/// Field dimensions in millimetres.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldDimensions {
    pub x_pos_opponent_ground_line: f64,
    pub x_pos_own_ground_line: f64,
    pub y_pos_left_sideline: f64,
    pub y_pos_right_sideline: f64,
    pub x_pos_opponent_field_border: f64,
    pub x_pos_own_field_border: f64,
    pub y_pos_left_field_border: f64,
    pub y_pos_right_field_border: f64,
    pub x_pos_opponent_goalpost: f64,
    pub x_pos_own_goalpost: f64,
    pub y_pos_left_goal: f64,
    pub y_pos_right_goal: f64,
    pub x_pos_opponent_penalty_area: f64,
    pub x_pos_own_penalty_area: f64,
    pub y_pos_left_penalty_area: f64,
    pub y_pos_right_penalty_area: f64,
    pub center_circle_radius: f64,
}
impl Default for FieldDimensions {
    fn default() -> Self {
        FieldDimensions {
            x_pos_opponent_ground_line: 3000.0,
            x_pos_own_ground_line: -3000.0,
            y_pos_left_sideline: 2000.0,
            y_pos_right_sideline: -2000.0,
            x_pos_opponent_field_border: 3700.0,
            x_pos_own_field_border: -3700.0,
            y_pos_left_field_border: 2700.0,
            y_pos_right_field_border: -2700.0,
            x_pos_opponent_goalpost: 3000.0,
            x_pos_own_goalpost: -3000.0,
            y_pos_left_goal: 700.0,
            y_pos_right_goal: -700.0,
            x_pos_opponent_penalty_area: 2400.0,
            x_pos_own_penalty_area: -2400.0,
            y_pos_left_penalty_area: 1100.0,
            y_pos_right_penalty_area: -1100.0,
            center_circle_radius: 600.0,
        }
    }
}

/// Identity of a goal post. "Left" and "right" refer to the field's +y and -y side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GoalPostId {
    OpponentLeft,
    OpponentRight,
    OwnLeft,
    OwnRight,
}
impl GoalPostId {
    pub const ALL: [GoalPostId; 4] = [
        GoalPostId::OpponentLeft,
        GoalPostId::OpponentRight,
        GoalPostId::OwnLeft,
        GoalPostId::OwnRight,
    ];
}

/// Shape of a line intersection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CornerKind {
    L,
    T,
    X,
}

/// A straight field marking between two points.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineSegment {
    pub start: Vector2<f64>,
    pub end: Vector2<f64>,
}
impl LineSegment {
    pub fn new(start: Vector2<f64>, end: Vector2<f64>) -> LineSegment {
        LineSegment { start, end }
    }

    pub fn distance_to(&self, point: &Vector2<f64>) -> f64 {
        let direction = self.end - self.start;
        let length_squared = direction.norm_squared();
        if length_squared == 0.0 {
            return (point - self.start).norm();
        }
        let t = ((point - self.start).dot(&direction) / length_squared).clamp(0.0, 1.0);
        (point - (self.start + direction * t)).norm()
    }

    pub fn point_at(&self, t: f64) -> Vector2<f64> {
        self.start + (self.end - self.start) * t
    }
}

/// A typed line intersection on the field.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldCorner {
    pub position: Vector2<f64>,
    pub kind: CornerKind,
}

impl FieldDimensions {
    pub fn goal_post(&self, id: GoalPostId) -> Vector2<f64> {
        match id {
            GoalPostId::OpponentLeft => {
                Vector2::new(self.x_pos_opponent_goalpost, self.y_pos_left_goal)
            }
            GoalPostId::OpponentRight => {
                Vector2::new(self.x_pos_opponent_goalpost, self.y_pos_right_goal)
            }
            GoalPostId::OwnLeft => Vector2::new(self.x_pos_own_goalpost, self.y_pos_left_goal),
            GoalPostId::OwnRight => Vector2::new(self.x_pos_own_goalpost, self.y_pos_right_goal),
        }
    }

    pub fn is_inside_carpet(&self, point: &Vector2<f64>) -> bool {
        point.x >= self.x_pos_own_field_border
            && point.x <= self.x_pos_opponent_field_border
            && point.y >= self.y_pos_right_field_border
            && point.y <= self.y_pos_left_field_border
    }

    pub fn is_inside_field(&self, point: &Vector2<f64>) -> bool {
        point.x >= self.x_pos_own_ground_line
            && point.x <= self.x_pos_opponent_ground_line
            && point.y >= self.y_pos_right_sideline
            && point.y <= self.y_pos_left_sideline
    }

    /// Clamp a point onto the carpet (hard clamp, no reflection).
    pub fn clip_to_carpet(&self, point: &mut Vector2<f64>) {
        point.x = point
            .x
            .clamp(self.x_pos_own_field_border, self.x_pos_opponent_field_border);
        point.y = point
            .y
            .clamp(self.y_pos_right_field_border, self.y_pos_left_field_border);
    }

    /// Integer variant of [FieldDimensions::clip_to_carpet] for fixed-point particle positions.
    pub fn clip_to_carpet_fixed(&self, point: &Vector2<i32>) -> Vector2<i32> {
        Vector2::new(
            point.x.clamp(
                saturate_i32(self.x_pos_own_field_border),
                saturate_i32(self.x_pos_opponent_field_border),
            ),
            point.y.clamp(
                saturate_i32(self.y_pos_right_field_border),
                saturate_i32(self.y_pos_left_field_border),
            ),
        )
    }

    /// A pose drawn uniformly from the area inside the field lines with a uniform heading.
    pub fn random_pose_on_field<R: Rng + ?Sized>(&self, rng: &mut R) -> Pose2D {
        let x = self.x_pos_own_ground_line
            + rng.random::<f64>() * (self.x_pos_opponent_ground_line - self.x_pos_own_ground_line);
        let y = self.y_pos_right_sideline
            + rng.random::<f64>() * (self.y_pos_left_sideline - self.y_pos_right_sideline);
        let rotation = (rng.random::<f64>() * 2.0 - 1.0) * PI;
        Pose2D::new(x, y, rotation)
    }

    /// All straight field markings. The center circle is handled separately.
    pub fn field_lines(&self) -> Vec<LineSegment> {
        let own = self.x_pos_own_ground_line;
        let opp = self.x_pos_opponent_ground_line;
        let left = self.y_pos_left_sideline;
        let right = self.y_pos_right_sideline;
        let own_area = self.x_pos_own_penalty_area;
        let opp_area = self.x_pos_opponent_penalty_area;
        let area_left = self.y_pos_left_penalty_area;
        let area_right = self.y_pos_right_penalty_area;
        let v = Vector2::new;
        vec![
            LineSegment::new(v(own, right), v(own, left)),
            LineSegment::new(v(opp, right), v(opp, left)),
            LineSegment::new(v(own, left), v(opp, left)),
            LineSegment::new(v(own, right), v(opp, right)),
            LineSegment::new(v(0.0, right), v(0.0, left)),
            LineSegment::new(v(own_area, area_right), v(own_area, area_left)),
            LineSegment::new(v(own, area_left), v(own_area, area_left)),
            LineSegment::new(v(own, area_right), v(own_area, area_right)),
            LineSegment::new(v(opp_area, area_right), v(opp_area, area_left)),
            LineSegment::new(v(opp, area_left), v(opp_area, area_left)),
            LineSegment::new(v(opp, area_right), v(opp_area, area_right)),
        ]
    }

    /// All line intersections with their shape.
    pub fn field_corners(&self) -> Vec<FieldCorner> {
        let own = self.x_pos_own_ground_line;
        let opp = self.x_pos_opponent_ground_line;
        let left = self.y_pos_left_sideline;
        let right = self.y_pos_right_sideline;
        let corner = |x: f64, y: f64, kind: CornerKind| FieldCorner {
            position: Vector2::new(x, y),
            kind,
        };
        let mut corners = vec![
            corner(own, left, CornerKind::L),
            corner(own, right, CornerKind::L),
            corner(opp, left, CornerKind::L),
            corner(opp, right, CornerKind::L),
            corner(0.0, left, CornerKind::T),
            corner(0.0, right, CornerKind::T),
            corner(0.0, self.center_circle_radius, CornerKind::X),
            corner(0.0, -self.center_circle_radius, CornerKind::X),
        ];
        for (ground, area) in [
            (own, self.x_pos_own_penalty_area),
            (opp, self.x_pos_opponent_penalty_area),
        ] {
            for y in [self.y_pos_left_penalty_area, self.y_pos_right_penalty_area] {
                corners.push(corner(area, y, CornerKind::L));
                corners.push(corner(ground, y, CornerKind::T));
            }
        }
        corners
    }
}

/// Precomputed field markings used to score line and corner observations.
///
/// Built once when the sensor models are created; queries never allocate.
#[derive(Clone, Debug)]
pub struct FieldModel {
    lines: Vec<LineSegment>,
    corners: Vec<FieldCorner>,
    center_circle_radius: f64,
    max_crossing_length: f64,
}
impl FieldModel {
    pub fn new(field: &FieldDimensions, max_crossing_length: f64) -> FieldModel {
        FieldModel {
            lines: field.field_lines(),
            corners: field.field_corners(),
            center_circle_radius: field.center_circle_radius,
            max_crossing_length,
        }
    }

    pub fn lines(&self) -> &[LineSegment] {
        &self.lines
    }

    pub fn corners(&self) -> &[FieldCorner] {
        &self.corners
    }

    /// Distance from a field point to the closest marking, including the center circle.
    pub fn distance_to_nearest_line(&self, point: &Vector2<f64>) -> f64 {
        let circle = (point.norm() - self.center_circle_radius).abs();
        self.lines
            .iter()
            .map(|line| line.distance_to(point))
            .fold(circle, f64::min)
    }

    /// The closest corner of the given shape within the configured maximum crossing length.
    pub fn nearest_corner(&self, point: &Vector2<f64>, kind: CornerKind) -> Option<(FieldCorner, f64)> {
        self.corners
            .iter()
            .filter(|corner| corner.kind == kind)
            .map(|corner| (*corner, (corner.position - point).norm()))
            .filter(|(_, distance)| *distance <= self.max_crossing_length)
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_random_poses_are_on_field() {
        let field = FieldDimensions::default();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1000 {
            let pose = field.random_pose_on_field(&mut rng);
            assert!(field.is_inside_field(&pose.translation()));
            assert!(pose.rotation >= -PI && pose.rotation <= PI);
        }
    }

    #[test]
    fn test_clip_to_carpet() {
        let field = FieldDimensions::default();
        let mut point = Vector2::new(5000.0, -4000.0);
        field.clip_to_carpet(&mut point);
        assert_approx_eq!(point.x, 3700.0, 1e-12);
        assert_approx_eq!(point.y, -2700.0, 1e-12);
        let fixed = field.clip_to_carpet_fixed(&Vector2::new(i32::MIN, 100));
        assert_eq!(fixed, Vector2::new(-3700, 100));
    }

    #[test]
    fn test_distance_to_nearest_line() {
        let model = FieldModel::new(&FieldDimensions::default(), 300.0);
        assert_approx_eq!(model.distance_to_nearest_line(&Vector2::new(0.0, 1000.0)), 0.0, 1e-9);
        // on the center circle
        assert_approx_eq!(model.distance_to_nearest_line(&Vector2::new(600.0, 0.0)), 0.0, 1e-9);
        // midway between halfway line and circle
        assert_approx_eq!(model.distance_to_nearest_line(&Vector2::new(1500.0, 0.0)), 900.0, 1e-9);
    }

    #[test]
    fn test_nearest_corner_respects_kind_and_range() {
        let model = FieldModel::new(&FieldDimensions::default(), 300.0);
        let (corner, distance) = model
            .nearest_corner(&Vector2::new(2950.0, 1950.0), CornerKind::L)
            .unwrap();
        assert_eq!(corner.position, Vector2::new(3000.0, 2000.0));
        assert_approx_eq!(distance, 50.0 * 2f64.sqrt(), 1e-9);
        assert!(
            model
                .nearest_corner(&Vector2::new(2950.0, 1950.0), CornerKind::X)
                .is_none()
        );
        assert_eq!(model.corners().len(), 16);
    }
}
