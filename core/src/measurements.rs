//! Percepts delivered by the perception pipeline and the per-frame observation selection.
//!
//! Percepts are expressed relative to the robot (x forward, y left, millimetres). The selector
//! turns the percepts of one frame into a bounded list of [Observation]s so that the cost of
//! sensor fusion does not depend on how much the camera happened to see.
use nalgebra::Vector2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::field::{CornerKind, GoalPostId};

/// Number of known-identity goal posts.
pub const NUMBER_OF_GOAL_POSTS: usize = 4;
/// Number of goal posts whose side is unknown (one per goal).
pub const NUMBER_OF_UNKNOWN_GOAL_POSTS: usize = 2;

/// A goal post sighting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalPost {
    pub position_relative: Vector2<f64>,
    pub time_when_last_seen: u64,
}

/// All goal post sightings. `posts` follow [GoalPostId::ALL]; `unknown_posts[0]` belongs to the
/// opponent goal and `unknown_posts[1]` to the own goal.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalPercept {
    pub posts: [GoalPost; NUMBER_OF_GOAL_POSTS],
    pub unknown_posts: [GoalPost; NUMBER_OF_UNKNOWN_GOAL_POSTS],
}
impl GoalPercept {
    pub fn post(&self, id: GoalPostId) -> &GoalPost {
        &self.posts[id as usize]
    }

    pub fn post_mut(&mut self, id: GoalPostId) -> &mut GoalPost {
        &mut self.posts[id as usize]
    }

    /// Candidate field posts of an unknown-side sighting.
    pub fn unknown_post_candidates(index: usize) -> [GoalPostId; 2] {
        if index == 0 {
            [GoalPostId::OpponentLeft, GoalPostId::OpponentRight]
        } else {
            [GoalPostId::OwnLeft, GoalPostId::OwnRight]
        }
    }
}

/// A seen line segment, relative to the robot.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerceivedLine {
    pub first: Vector2<f64>,
    pub last: Vector2<f64>,
}

/// A seen line intersection, relative to the robot.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intersection {
    pub position_relative: Vector2<f64>,
    pub kind: CornerKind,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CenterCircle {
    pub found: bool,
    pub position_relative: Vector2<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LinePercept {
    pub lines: Vec<PerceivedLine>,
    pub intersections: Vec<Intersection>,
    pub circle: CenterCircle,
}
impl LinePercept {
    /// End point `index` of the seen lines: `2 * j` is the first and `2 * j + 1` the last point
    /// of line `j`.
    pub fn line_point(&self, index: usize) -> Option<Vector2<f64>> {
        let line = self.lines.get(index / 2)?;
        Some(if index % 2 == 0 { line.first } else { line.last })
    }
}

/// Direction the head was turned to when the landmark matcher ran.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeadDirection {
    FacingLeft,
    FacingRight,
    #[default]
    FacingFront,
}

/// Result of the image based landmark matcher.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NaturalLandmarkPercept {
    pub match_found: bool,
    pub head_direction: HeadDirection,
}

/// Everything perception delivered for one frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FramePercepts {
    /// Frame time in ms.
    pub time: u64,
    pub camera_matrix_valid: bool,
    pub goal: GoalPercept,
    pub lines: LinePercept,
    pub landmark: Option<NaturalLandmarkPercept>,
}
impl FramePercepts {
    pub fn new(time: u64) -> FramePercepts {
        FramePercepts {
            time,
            camera_matrix_valid: true,
            ..Default::default()
        }
    }

    pub fn is_fresh(&self, post: &GoalPost) -> bool {
        post.time_when_last_seen == self.time
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObservationKind {
    GoalPost,
    CenterCircle,
    LinePoint,
    Corner,
    GlobalLandmarkMatch,
}

/// Reference to one percept of the current frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Observation {
    pub kind: ObservationKind,
    pub index: usize,
}
impl Observation {
    pub fn new(kind: ObservationKind, index: usize) -> Observation {
        Observation { kind, index }
    }
}

/// Which observations may be selected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionMode {
    Geometric,
    /// Only the global landmark matcher, used right after a penalty.
    LandmarksOnly,
}

/// Builds the bounded observation list of a frame. Buffers are reused across frames.
#[derive(Clone, Debug, Default)]
pub struct ObservationSelector {
    selected: Vec<Observation>,
    optional: Vec<Observation>,
}
impl ObservationSelector {
    pub fn new() -> ObservationSelector {
        ObservationSelector {
            selected: Vec::with_capacity(100),
            optional: Vec::with_capacity(100),
        }
    }

    pub fn selected(&self) -> &[Observation] {
        &self.selected
    }

    /// Select up to `target` observations. Goal posts and the center circle are always taken;
    /// line points and corners are drawn with replacement to fill up. Returns `None` if the
    /// frame offers nothing to fuse.
    pub fn select<R: Rng + ?Sized>(
        &mut self,
        percepts: &FramePercepts,
        mode: SelectionMode,
        target: usize,
        rng: &mut R,
    ) -> Option<&[Observation]> {
        self.selected.clear();
        self.optional.clear();
        if !percepts.camera_matrix_valid {
            return None;
        }

        match mode {
            SelectionMode::Geometric => {
                for (i, post) in percepts.goal.posts.iter().enumerate() {
                    if percepts.is_fresh(post) {
                        self.selected.push(Observation::new(ObservationKind::GoalPost, i));
                    }
                }
                if self.selected.is_empty() {
                    for (i, post) in percepts.goal.unknown_posts.iter().enumerate() {
                        if percepts.is_fresh(post) {
                            self.selected.push(Observation::new(
                                ObservationKind::GoalPost,
                                i + NUMBER_OF_GOAL_POSTS,
                            ));
                        }
                    }
                }
                if percepts.lines.circle.found {
                    self.selected.push(Observation::new(ObservationKind::CenterCircle, 0));
                }
                for j in 0..percepts.lines.lines.len() {
                    self.optional.push(Observation::new(ObservationKind::LinePoint, 2 * j));
                    self.optional.push(Observation::new(ObservationKind::LinePoint, 2 * j + 1));
                }
                for i in 0..percepts.lines.intersections.len() {
                    self.optional.push(Observation::new(ObservationKind::Corner, i));
                }
            }
            SelectionMode::LandmarksOnly => {
                self.selected
                    .push(Observation::new(ObservationKind::GlobalLandmarkMatch, 0));
            }
        }

        if self.selected.is_empty() && self.optional.is_empty() {
            return None;
        }

        while self.selected.len() < target {
            let observation = if self.optional.is_empty() {
                self.selected[rng.random_range(0..self.selected.len())]
            } else {
                self.optional[rng.random_range(0..self.optional.len())]
            };
            self.selected.push(observation);
        }
        Some(&self.selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn seen(time: u64) -> GoalPost {
        GoalPost {
            position_relative: Vector2::new(2000.0, 0.0),
            time_when_last_seen: time,
        }
    }

    #[test]
    fn test_nothing_seen_means_no_update() {
        let mut selector = ObservationSelector::new();
        let mut rng = StdRng::seed_from_u64(0);
        let percepts = FramePercepts::new(100);
        assert!(selector.select(&percepts, SelectionMode::Geometric, 6, &mut rng).is_none());
    }

    #[test]
    fn test_invalid_camera_means_no_update() {
        let mut selector = ObservationSelector::new();
        let mut rng = StdRng::seed_from_u64(0);
        let mut percepts = FramePercepts::new(100);
        percepts.goal.posts[0] = seen(100);
        percepts.camera_matrix_valid = false;
        assert!(selector.select(&percepts, SelectionMode::Geometric, 6, &mut rng).is_none());
    }

    #[test]
    fn test_known_posts_preferred_over_unknown() {
        let mut selector = ObservationSelector::new();
        let mut rng = StdRng::seed_from_u64(0);
        let mut percepts = FramePercepts::new(100);
        percepts.goal.posts[1] = seen(100);
        percepts.goal.posts[2] = seen(90); // stale
        percepts.goal.unknown_posts[0] = seen(100);
        let selected = selector
            .select(&percepts, SelectionMode::Geometric, 4, &mut rng)
            .unwrap();
        assert_eq!(selected.len(), 4);
        assert!(
            selected
                .iter()
                .all(|o| *o == Observation::new(ObservationKind::GoalPost, 1))
        );

        percepts.goal.posts[1] = seen(90);
        let selected = selector
            .select(&percepts, SelectionMode::Geometric, 2, &mut rng)
            .unwrap();
        assert_eq!(selected[0], Observation::new(ObservationKind::GoalPost, 4));
    }

    #[test]
    fn test_optional_observations_fill_up() {
        let mut selector = ObservationSelector::new();
        let mut rng = StdRng::seed_from_u64(5);
        let mut percepts = FramePercepts::new(100);
        percepts.lines.circle.found = true;
        percepts.lines.lines.push(PerceivedLine {
            first: Vector2::new(500.0, -200.0),
            last: Vector2::new(900.0, 300.0),
        });
        percepts.lines.intersections.push(Intersection {
            position_relative: Vector2::new(700.0, 0.0),
            kind: CornerKind::L,
        });
        let selected = selector
            .select(&percepts, SelectionMode::Geometric, 10, &mut rng)
            .unwrap();
        assert_eq!(selected.len(), 10);
        assert_eq!(selected[0].kind, ObservationKind::CenterCircle);
        for o in &selected[1..] {
            match o.kind {
                ObservationKind::LinePoint => assert!(o.index < 2),
                ObservationKind::Corner => assert_eq!(o.index, 0),
                other => panic!("unexpected optional observation {other:?}"),
            }
        }
    }

    #[test]
    fn test_landmark_mode_bypasses_geometry() {
        let mut selector = ObservationSelector::new();
        let mut rng = StdRng::seed_from_u64(0);
        let mut percepts = FramePercepts::new(100);
        percepts.goal.posts[0] = seen(100);
        percepts.lines.circle.found = true;
        let selected = selector
            .select(&percepts, SelectionMode::LandmarksOnly, 3, &mut rng)
            .unwrap();
        assert_eq!(selected.len(), 3);
        assert!(
            selected
                .iter()
                .all(|o| o.kind == ObservationKind::GlobalLandmarkMatch)
        );
    }

    #[test]
    fn test_line_point_indexing() {
        let mut lines = LinePercept::default();
        lines.lines.push(PerceivedLine {
            first: Vector2::new(1.0, 2.0),
            last: Vector2::new(3.0, 4.0),
        });
        assert_eq!(lines.line_point(0), Some(Vector2::new(1.0, 2.0)));
        assert_eq!(lines.line_point(1), Some(Vector2::new(3.0, 4.0)));
        assert_eq!(lines.line_point(2), None);
    }
}
