use core::ops::Range;

use nalgebra::{storage::Storage, Dyn, Matrix};

use super::log_space::{log_mul, log_sum_exp, LOG_ZERO};

/// The alignment lattice of one batch element: the positions of `l'` laid
/// out against the time steps after the output delay.
///
/// Rows of the DP tables index `l'`, columns index time.
#[derive(Clone, Copy, Debug)]
pub struct Lattice<'a> {
    pub l_prime: &'a [usize],
    pub blank: usize,
    pub output_delay: usize,
    pub merge_repeated: bool,
}

impl<'a> Lattice<'a> {
    pub fn new(l_prime: &'a [usize], blank: usize, output_delay: usize, merge_repeated: bool) -> Self {
        Self {
            l_prime,
            blank,
            output_delay,
            merge_repeated,
        }
    }

    /// Rows of column `t` that can lie on a complete path of `num_steps`
    /// columns: reachable from the start and still able to reach the end.
    pub(super) fn window(&self, t: usize, num_steps: usize) -> Range<usize> {
        let u_prime = self.l_prime.len();
        let start = u_prime.saturating_sub(2 * (num_steps - t));
        let end = u_prime.min(2 * (t + 1));

        start..end
    }

    /// Whether a path may jump straight between label positions `u` and
    /// `other` (two rows apart), skipping the blank between them.
    pub(super) fn can_skip(&self, u: usize, other: usize) -> bool {
        let label = self.l_prime[u];
        let matching_labels_merge = self.merge_repeated && label == self.l_prime[other];

        label != self.blank && !matching_labels_merge
    }

    /// `ln p(z|x)` read off column `t` of the forward and backward tables.
    /// The value is the same for every column.
    pub fn log_likelihood_at<SA, SB>(
        &self,
        log_alpha: &Matrix<f32, Dyn, Dyn, SA>,
        log_beta: &Matrix<f32, Dyn, Dyn, SB>,
        t: usize,
    ) -> f32
    where
        SA: Storage<f32, Dyn, Dyn>,
        SB: Storage<f32, Dyn, Dyn>,
    {
        (0..self.l_prime.len()).fold(LOG_ZERO, |acc, u| {
            log_sum_exp(acc, log_mul(log_alpha[(u, t)], log_beta[(u, t)]))
        })
    }
}
