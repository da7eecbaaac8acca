use super::{PoseAccumulator, RobotPose, share};
use crate::config::PoseSection;
use crate::field::FieldDimensions;
use crate::particle::SampleSet;

/// Splits the carpet into a grid, sums the weighting per cell and reports the weighted mean of
/// the particles in the heaviest cell.
#[derive(Clone, Debug)]
pub struct Binning2D {
    cells_x: usize,
    cells_y: usize,
    x_min: f64,
    y_min: f64,
    cell_width: f64,
    cell_height: f64,
    weightings: Vec<f64>,
    counts: Vec<usize>,
}

impl Binning2D {
    pub fn new(field: &FieldDimensions, params: &PoseSection) -> Binning2D {
        let cells_x = params.binning_cells_x.max(1);
        let cells_y = params.binning_cells_y.max(1);
        let width = field.x_pos_opponent_field_border - field.x_pos_own_field_border;
        let height = field.y_pos_left_field_border - field.y_pos_right_field_border;
        Binning2D {
            cells_x,
            cells_y,
            x_min: field.x_pos_own_field_border,
            y_min: field.y_pos_right_field_border,
            cell_width: width / cells_x as f64,
            cell_height: height / cells_y as f64,
            weightings: vec![0.0; cells_x * cells_y],
            counts: vec![0; cells_x * cells_y],
        }
    }

    pub fn init(&mut self, _samples: &mut SampleSet) {
        self.weightings.fill(0.0);
        self.counts.fill(0);
    }

    fn cell_of(&self, x: f64, y: f64) -> usize {
        let column = ((x - self.x_min) / self.cell_width).floor();
        let row = ((y - self.y_min) / self.cell_height).floor();
        let column = column.clamp(0.0, (self.cells_x - 1) as f64) as usize;
        let row = row.clamp(0.0, (self.cells_y - 1) as f64) as usize;
        row * self.cells_x + column
    }

    pub fn calc_pose(&mut self, samples: &SampleSet) -> RobotPose {
        self.weightings.fill(0.0);
        self.counts.fill(0);
        let total = samples.total_weighting();
        let weighted = total > 0.0 && total.is_finite();
        for particle in samples.particles() {
            let position = particle.position();
            let cell = self.cell_of(position.x, position.y);
            self.counts[cell] += 1;
            if particle.weighting.is_finite() {
                self.weightings[cell] += particle.weighting;
            }
        }
        let score = |cell: usize| {
            if weighted {
                self.weightings[cell]
            } else {
                self.counts[cell] as f64
            }
        };
        let mut best = 0;
        for cell in 1..self.weightings.len() {
            if score(cell) > score(best) {
                best = cell;
            }
        }

        let mut accumulator = PoseAccumulator::default();
        for particle in samples.particles() {
            let position = particle.position();
            if self.cell_of(position.x, position.y) == best {
                accumulator.add(particle);
            }
        }
        let (pose, deviation) = accumulator.mean().unwrap_or_default();
        RobotPose {
            pose,
            validity: share(self.weightings[best], total, self.counts[best], samples.len()),
            deviation,
        }
    }
}
