use log::warn;
use nalgebra::{
    storage::{Storage, StorageMut},
    Dyn, Matrix,
};

use super::{
    lattice::Lattice,
    log_space::{log_mul, log_sum_exp, LOG_ZERO},
};

impl<'a> Lattice<'a> {
    /// Gradient of `-ln p(z|x)` with respect to the raw scores that went
    /// into the softmax.
    ///
    /// For every time step `t` after the delay and class `k`:
    /// `dy[(k, t)] = y[(k, t)] - sum_{u: l'[u] = k} exp(log_alpha[(u, t)] + log_beta[(u, t)] - log_p_z_x)`.
    /// Columns inside the output delay are left at zero.
    ///
    /// # Shapes
    ///   - y, dy: `[num_classes, seq_len]`
    ///   - log_alpha, log_beta: `[l_prime.len(), seq_len - output_delay]`
    pub fn gradient<SY, SA, SB, SD>(
        &self,
        y: &Matrix<f32, Dyn, Dyn, SY>,
        log_alpha: &Matrix<f32, Dyn, Dyn, SA>,
        log_beta: &Matrix<f32, Dyn, Dyn, SB>,
        log_p_z_x: f32,
        dy: &mut Matrix<f32, Dyn, Dyn, SD>,
    ) where
        SY: Storage<f32, Dyn, Dyn>,
        SA: Storage<f32, Dyn, Dyn>,
        SB: Storage<f32, Dyn, Dyn>,
        SD: StorageMut<f32, Dyn, Dyn>,
    {
        // activations for the targets may all be zero
        if log_p_z_x <= LOG_ZERO {
            warn!("No valid path found.");
            dy.copy_from(y);
            return;
        }

        dy.fill(0.0);

        let num_classes = y.nrows();
        let mut prob_sum = vec![LOG_ZERO; num_classes];
        for t in 0..log_alpha.ncols() {
            prob_sum.fill(LOG_ZERO);
            for (u, &label) in self.l_prime.iter().enumerate() {
                prob_sum[label] =
                    log_sum_exp(prob_sum[label], log_mul(log_alpha[(u, t)], log_beta[(u, t)]));
            }

            let col = self.output_delay + t;
            for (label, &log_prob) in prob_sum.iter().enumerate() {
                let negative_term = if log_prob <= LOG_ZERO {
                    0.0
                } else {
                    (log_prob - log_p_z_x).exp()
                };
                dy[(label, col)] = y[(label, col)] - negative_term;
            }
        }
    }
}
