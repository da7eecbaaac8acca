//! Goal post sensor model.
use nalgebra::Vector2;

use super::{SensorModel, SensorModelResult, point_likelihood};
use crate::config::SensorSection;
use crate::field::{FieldDimensions, GoalPostId};
use crate::measurements::{
    FramePercepts, GoalPercept, NUMBER_OF_GOAL_POSTS, NUMBER_OF_UNKNOWN_GOAL_POSTS, ObservationKind,
};
use crate::particle::SampleSet;

/// Scores particles by the bearing and distance to seen goal posts. A post whose side is unknown
/// is matched to whichever post of its goal explains it better.
#[derive(Clone, Debug)]
pub struct GoalPostsSensorModel {
    posts: [Vector2<f64>; NUMBER_OF_GOAL_POSTS],
    angle_std: f64,
    distance_std: f64,
}

impl GoalPostsSensorModel {
    pub fn new(field: &FieldDimensions, params: &SensorSection) -> GoalPostsSensorModel {
        GoalPostsSensorModel {
            posts: GoalPostId::ALL.map(|id| field.goal_post(id)),
            angle_std: params.goal_post_angle_std,
            distance_std: params.goal_post_distance_std,
        }
    }
}

impl SensorModel for GoalPostsSensorModel {
    fn kind(&self) -> ObservationKind {
        ObservationKind::GoalPost
    }

    fn compute_weightings(
        &self,
        samples: &SampleSet,
        selected_indices: &[usize],
        percepts: &FramePercepts,
        weightings: &mut [Option<f64>],
    ) -> SensorModelResult {
        let goal = &percepts.goal;
        for (particle, weighting) in samples.particles().iter().zip(weightings.iter_mut()) {
            let mut w = 1.0;
            for &index in selected_indices {
                if index < NUMBER_OF_GOAL_POSTS {
                    let observed = goal.posts[index].position_relative;
                    w *= point_likelihood(
                        particle,
                        &observed,
                        &self.posts[index],
                        self.angle_std,
                        self.distance_std,
                    );
                } else if index < NUMBER_OF_GOAL_POSTS + NUMBER_OF_UNKNOWN_GOAL_POSTS {
                    let unknown = index - NUMBER_OF_GOAL_POSTS;
                    let observed = goal.unknown_posts[unknown].position_relative;
                    w *= GoalPercept::unknown_post_candidates(unknown)
                        .iter()
                        .map(|id| {
                            point_likelihood(
                                particle,
                                &observed,
                                &self.posts[*id as usize],
                                self.angle_std,
                                self.distance_std,
                            )
                        })
                        .fold(0.0, f64::max);
                }
            }
            *weighting = Some(w);
        }
        SensorModelResult::FullUpdate
    }
}
