use nalgebra::{storage::StorageMut, Dyn, Matrix};

use super::matrix::ScoreMatrix;

/// Writes the softmax of element `batch`'s raw scores into `y`, one column
/// per time step. Only the first `y.ncols()` time steps are read.
///
/// # Shapes
///   - inputs: `num_time_steps` matrices of `[batch_size, num_classes]`
///   - y: `[num_classes, seq_len]`
pub fn softmax_into<M, S>(inputs: &[M], batch: usize, y: &mut Matrix<f32, Dyn, Dyn, S>)
where
    M: ScoreMatrix,
    S: StorageMut<f32, Dyn, Dyn>,
{
    let num_classes = y.nrows();

    for t in 0..y.ncols() {
        let scores = &inputs[t];
        let max_coeff = scores.row_max(batch);

        // accumulate in double precision
        let mut sum = 0f64;
        for c in 0..num_classes {
            let e = (scores.score(batch, c) - max_coeff).exp();
            y[(c, t)] = e;
            sum += e as f64;
        }
        let sum = sum as f32;
        for c in 0..num_classes {
            y[(c, t)] /= sum;
        }
    }
}
