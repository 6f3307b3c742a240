use nalgebra::{
    storage::{Storage, StorageMut},
    Dyn, Matrix,
};

use super::{
    lattice::Lattice,
    log_space::{log_mul, log_sum_exp, safe_log, LOG_ZERO},
};

impl<'a> Lattice<'a> {
    /// Fills `log_alpha` with the forward variables.
    ///
    /// `log_alpha[(u, t)]` is the log probability of every path that has
    /// emitted the first `u + 1` symbols of `l'` after `t + 1` time steps.
    ///
    /// # Shapes
    ///   - y: `[num_classes, seq_len]`, softmax output
    ///   - log_alpha: `[l_prime.len(), seq_len - output_delay]`
    pub fn forward_variables<SY, SA>(
        &self,
        y: &Matrix<f32, Dyn, Dyn, SY>,
        log_alpha: &mut Matrix<f32, Dyn, Dyn, SA>,
    ) where
        SY: Storage<f32, Dyn, Dyn>,
        SA: StorageMut<f32, Dyn, Dyn>,
    {
        log_alpha.fill(LOG_ZERO);

        let u_prime = self.l_prime.len();
        let num_steps = log_alpha.ncols();
        if num_steps == 0 {
            return;
        }

        // only the leading blank and the first label can start a path
        log_alpha[(0, 0)] = safe_log(y[(self.blank, self.output_delay)]);
        if u_prime > 1 {
            log_alpha[(1, 0)] = safe_log(y[(self.l_prime[1], self.output_delay)]);
        }

        for t in 1..num_steps {
            for u in self.window(t, num_steps) {
                // \alpha_{t-1}(u)
                let mut sum_log_alpha = log_alpha[(u, t - 1)];
                // \alpha_{t-1}(u-1)
                if u > 0 {
                    sum_log_alpha = log_sum_exp(sum_log_alpha, log_alpha[(u - 1, t - 1)]);
                }
                // \alpha_{t-1}(u-2)
                if u > 1 && self.can_skip(u, u - 2) {
                    sum_log_alpha = log_sum_exp(sum_log_alpha, log_alpha[(u - 2, t - 1)]);
                }

                let log_y = safe_log(y[(self.l_prime[u], self.output_delay + t)]);
                log_alpha[(u, t)] = log_mul(log_y, sum_log_alpha);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use nalgebra::DMatrix;

    use super::*;

    fn uniform(num_classes: usize, seq_len: usize) -> DMatrix<f32> {
        DMatrix::from_element(num_classes, seq_len, 1.0 / num_classes as f32)
    }

    #[test]
    fn test_initial_column() {
        let l_prime = [2, 0, 2, 1, 2];
        let lattice = Lattice::new(&l_prime, 2, 0, true);
        let y = DMatrix::from_column_slice(3, 1, &[0.2, 0.3, 0.5]);

        let mut log_alpha = DMatrix::zeros(5, 1);
        lattice.forward_variables(&y, &mut log_alpha);

        assert!((log_alpha[(0, 0)] - 0.5f32.ln()).abs() < 1e-6);
        assert!((log_alpha[(1, 0)] - 0.2f32.ln()).abs() < 1e-6);
        for u in 2..5 {
            assert_eq!(log_alpha[(u, 0)], LOG_ZERO);
        }
    }

    #[test]
    fn test_two_steps_single_label() {
        // "00", "b0", "0b" all collapse to "0"
        let l_prime = [1, 0, 1];
        let lattice = Lattice::new(&l_prime, 1, 0, true);
        let y = uniform(2, 2);

        let mut log_alpha = DMatrix::zeros(3, 2);
        lattice.forward_variables(&y, &mut log_alpha);

        let p = log_sum_exp(log_alpha[(1, 1)], log_alpha[(2, 1)]).exp();
        assert!((p - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_output_delay_shifts_time() {
        let l_prime = [1, 0, 1];
        let lattice = Lattice::new(&l_prime, 1, 1, true);
        // the first column is inside the delay and must be ignored
        let y = DMatrix::from_column_slice(2, 2, &[0.0, 1.0, 0.9, 0.1]);

        let mut log_alpha = DMatrix::zeros(3, 1);
        lattice.forward_variables(&y, &mut log_alpha);

        assert!((log_alpha[(1, 0)] - 0.9f32.ln()).abs() < 1e-6);
        assert!((log_alpha[(0, 0)] - 0.1f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_zero_probability_stays_log_zero() {
        let l_prime = [1, 0, 1];
        let lattice = Lattice::new(&l_prime, 1, 0, true);
        let y = DMatrix::from_column_slice(2, 2, &[0.0, 1.0, 0.0, 1.0]);

        let mut log_alpha = DMatrix::zeros(3, 2);
        lattice.forward_variables(&y, &mut log_alpha);

        assert_eq!(log_alpha[(1, 1)], LOG_ZERO);
        assert!(log_alpha.iter().all(|v| v.is_finite()));
    }
}
