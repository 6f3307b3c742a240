use nalgebra::{
    storage::{Storage, StorageMut},
    Dyn, Matrix,
};

use super::{
    lattice::Lattice,
    log_space::{log_mul, log_sum_exp, safe_log, LOG_ZERO},
};

impl<'a> Lattice<'a> {
    /// Fills `log_beta` with the backward variables.
    ///
    /// `log_beta[(u, t)]` is the log probability of completing `l'` from
    /// position `u` over the remaining time steps. The emission at `t` itself
    /// is counted in `log_alpha` only, so `log_alpha + log_beta` summed over
    /// `u` gives `ln p(z|x)` in every column.
    ///
    /// # Shapes
    ///   - y: `[num_classes, seq_len]`, softmax output
    ///   - log_beta: `[l_prime.len(), seq_len - output_delay]`
    pub fn backward_variables<SY, SB>(
        &self,
        y: &Matrix<f32, Dyn, Dyn, SY>,
        log_beta: &mut Matrix<f32, Dyn, Dyn, SB>,
    ) where
        SY: Storage<f32, Dyn, Dyn>,
        SB: StorageMut<f32, Dyn, Dyn>,
    {
        log_beta.fill(LOG_ZERO);

        let u_prime = self.l_prime.len();
        let num_steps = log_beta.ncols();
        if num_steps == 0 {
            return;
        }

        // a path may end on the last label or the trailing blank
        for u in u_prime.saturating_sub(2)..u_prime {
            log_beta[(u, num_steps - 1)] = 0.0;
        }

        for t in (0..(num_steps - 1)).rev() {
            let next = self.output_delay + t + 1;
            for u in self.window(t, num_steps) {
                let emit = |v: usize| safe_log(y[(self.l_prime[v], next)]);

                // \beta_{t+1}(u)
                let mut sum_log_beta = log_mul(log_beta[(u, t + 1)], emit(u));
                // \beta_{t+1}(u+1)
                if u + 1 < u_prime {
                    sum_log_beta =
                        log_sum_exp(sum_log_beta, log_mul(log_beta[(u + 1, t + 1)], emit(u + 1)));
                }
                // \beta_{t+1}(u+2)
                if u + 2 < u_prime && self.can_skip(u, u + 2) {
                    sum_log_beta =
                        log_sum_exp(sum_log_beta, log_mul(log_beta[(u + 2, t + 1)], emit(u + 2)));
                }

                log_beta[(u, t)] = sum_log_beta;
            }
        }
    }
}
