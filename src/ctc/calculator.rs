use std::thread;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::{CtcError, Result};

use super::{
    labels::{ExtendedLabels, LabelPreprocessor},
    lattice::Lattice,
    matrix::{ScoreMatrix, ScoreMatrixMut, SequenceLengths},
    softmax::softmax_into,
};

/// Flags of one kernel invocation.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct CtcOptions {
    /// Collapse adjacent repeated labels before building `l'`.
    pub preprocess_collapse_repeated: bool,
    /// Treat adjacent identical labels in the lattice as one emission.
    pub ctc_merge_repeated: bool,
    /// Time steps before the targets start to align with the inputs.
    pub output_delay: usize,
    /// Worker threads for the per element loop. `1` runs on the caller.
    pub num_threads: usize,
}

impl Default for CtcOptions {
    fn default() -> Self {
        Self {
            preprocess_collapse_repeated: false,
            ctc_merge_repeated: true,
            output_delay: 0,
            num_threads: 1,
        }
    }
}

/// Work buffers sized to the batch-wide maxima and reused for every element.
struct Scratch {
    y: DMatrix<f32>,
    dy: DMatrix<f32>,
    log_alpha: DMatrix<f32>,
    log_beta: DMatrix<f32>,
}

impl Scratch {
    fn new(num_classes: usize, num_time_steps: usize, max_u_prime: usize, max_steps: usize) -> Self {
        Self {
            y: DMatrix::zeros(num_classes, num_time_steps),
            dy: DMatrix::zeros(num_classes, num_time_steps),
            log_alpha: DMatrix::zeros(max_u_prime, max_steps),
            log_beta: DMatrix::zeros(max_u_prime, max_steps),
        }
    }
}

/// Result of one element when the batch is split across threads.
struct ElementOutcome {
    batch: usize,
    loss: f32,
    gradient: Option<DMatrix<f32>>,
}

/// Batch shape after validation.
#[derive(Clone, Copy, Debug)]
struct BatchShape {
    batch_size: usize,
    num_classes: usize,
    num_time_steps: usize,
}

/// The Connectionist Temporal Classification loss and its gradient.
///
/// The blank is always the last class, `num_classes - 1`.
///
/// # Reference
///
/// - [Connectionist Temporal Classification: Labelling Unsegmented Sequence Data with Recurrent Neural Networks](https://www.cs.toronto.edu/~graves/icml_2006.pdf)
/// - Alex Graves, "Supervised Sequence Labelling with Recurrent Neural Networks", chapter 7.
#[derive(Clone, Debug, Default)]
pub struct CtcLossCalculator {
    options: CtcOptions,
}

impl CtcLossCalculator {
    pub fn new(options: CtcOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CtcOptions {
        &self.options
    }

    /// Compute the loss, and the gradient if `gradients` is given.
    ///
    /// # Parameters:
    ///
    /// - seq_len: Number of valid time steps of every batch element. Shape:
    ///   `[batch_size]`
    /// - labels: Raw label sequence of every batch element. A value
    ///   `>= num_classes - 1` terminates the sequence.
    /// - inputs: Raw (unnormalized) scores, one matrix per time step. Shape:
    ///   `num_time_steps x [batch_size, num_classes]`
    /// - loss: Receives `-ln p(z|x)` per element. Shape: `[batch_size]`
    /// - gradients: Receives the gradient with respect to `inputs`. Rows
    ///   past an element's sequence length are zeroed. Shape: same as
    ///   `inputs`
    ///
    /// Any invalid element fails the whole call before the loss or gradients
    /// are evaluated.
    pub fn calculate_loss<L, M, G>(
        &self,
        seq_len: &L,
        labels: &[Vec<i32>],
        inputs: &[M],
        loss: &mut [f32],
        gradients: Option<&mut [G]>,
    ) -> Result<()>
    where
        L: SequenceLengths + ?Sized,
        M: ScoreMatrix + Sync,
        G: ScoreMatrixMut,
    {
        let shape = Self::assertions(seq_len, inputs, loss, gradients.as_deref())?;
        loss.fill(0.0);

        let preprocessor = LabelPreprocessor::new(
            shape.num_classes,
            self.options.preprocess_collapse_repeated,
            self.options.output_delay,
        );
        let label_batch = preprocessor.populate(seq_len, labels)?;

        // validated non-negative above
        let lengths: Vec<usize> = (0..shape.batch_size)
            .map(|b| seq_len.length_at(b) as usize)
            .collect();

        if self.options.num_threads > 1 && shape.batch_size > 1 {
            self.calculate_parallel(
                shape,
                &lengths,
                &label_batch.l_primes,
                label_batch.max_u_prime,
                inputs,
                loss,
                gradients,
            )
        } else {
            let mut scratch = Scratch::new(
                shape.num_classes,
                shape.num_time_steps,
                label_batch.max_u_prime,
                shape.num_time_steps.saturating_sub(self.options.output_delay),
            );
            let requires_backprop = gradients.is_some();
            let mut gradients = gradients;

            for b in 0..shape.batch_size {
                loss[b] = self.calculate_element(
                    b,
                    lengths[b],
                    &label_batch.l_primes[b],
                    inputs,
                    requires_backprop,
                    &mut scratch,
                );

                if let Some(gradients) = gradients.as_deref_mut() {
                    let dy = scratch.dy.columns(0, lengths[b]);
                    write_gradient(b, lengths[b], &dy, gradients);
                }
            }

            Ok(())
        }
    }

    /// Loss of a single element. The gradient, if requested, is left in the
    /// first `seq_len` columns of `scratch.dy`.
    fn calculate_element<M: ScoreMatrix>(
        &self,
        batch: usize,
        seq_len: usize,
        l_prime: &ExtendedLabels,
        inputs: &[M],
        requires_backprop: bool,
        scratch: &mut Scratch,
    ) -> f32 {
        let num_classes = scratch.y.nrows();
        let output_delay = self.options.output_delay;

        if requires_backprop {
            scratch.dy.columns_mut(0, seq_len).fill(0.0);
        }
        // nothing to align, or nothing left after the delay
        if seq_len == 0 || seq_len <= output_delay {
            return 0.0;
        }

        let num_steps = seq_len - output_delay;
        let u_prime = l_prime.len();
        let lattice = Lattice::new(
            l_prime.as_slice(),
            num_classes - 1,
            output_delay,
            self.options.ctc_merge_repeated,
        );

        let mut y = scratch.y.view_mut((0, 0), (num_classes, seq_len));
        softmax_into(inputs, batch, &mut y);
        let y = scratch.y.view((0, 0), (num_classes, seq_len));

        let mut log_alpha = scratch.log_alpha.view_mut((0, 0), (u_prime, num_steps));
        lattice.forward_variables(&y, &mut log_alpha);
        let mut log_beta = scratch.log_beta.view_mut((0, 0), (u_prime, num_steps));
        lattice.backward_variables(&y, &mut log_beta);

        let log_alpha = scratch.log_alpha.view((0, 0), (u_prime, num_steps));
        let log_beta = scratch.log_beta.view((0, 0), (u_prime, num_steps));
        let log_p_z_x = lattice.log_likelihood_at(&log_alpha, &log_beta, 0);

        if requires_backprop {
            let mut dy = scratch.dy.view_mut((0, 0), (num_classes, seq_len));
            lattice.gradient(&y, &log_alpha, &log_beta, log_p_z_x, &mut dy);
        }

        // rounding can push a near certain alignment just above zero
        (-log_p_z_x).max(0.0)
    }

    #[allow(clippy::too_many_arguments)]
    fn calculate_parallel<M, G>(
        &self,
        shape: BatchShape,
        lengths: &[usize],
        l_primes: &[ExtendedLabels],
        max_u_prime: usize,
        inputs: &[M],
        loss: &mut [f32],
        gradients: Option<&mut [G]>,
    ) -> Result<()>
    where
        M: ScoreMatrix + Sync,
        G: ScoreMatrixMut,
    {
        let requires_backprop = gradients.is_some();
        let num_threads = self.options.num_threads.min(shape.batch_size);
        let chunk_size = (shape.batch_size + num_threads - 1) / num_threads;
        let max_steps = shape
            .num_time_steps
            .saturating_sub(self.options.output_delay);

        let chunks = thread::scope(|scope| {
            let handles: Vec<_> = (0..shape.batch_size)
                .step_by(chunk_size)
                .map(|start| {
                    let end = (start + chunk_size).min(shape.batch_size);
                    scope.spawn(move || {
                        let mut scratch = Scratch::new(
                            shape.num_classes,
                            shape.num_time_steps,
                            max_u_prime,
                            max_steps,
                        );

                        (start..end)
                            .map(|b| {
                                let loss = self.calculate_element(
                                    b,
                                    lengths[b],
                                    &l_primes[b],
                                    inputs,
                                    requires_backprop,
                                    &mut scratch,
                                );
                                let gradient = requires_backprop
                                    .then(|| scratch.dy.columns(0, lengths[b]).into_owned());

                                ElementOutcome {
                                    batch: b,
                                    loss,
                                    gradient,
                                }
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .map_err(|_| CtcError::Worker("ctc worker thread panicked".to_string()))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let mut gradients = gradients;
        for outcome in chunks.into_iter().flatten() {
            loss[outcome.batch] = outcome.loss;
            if let (Some(gradients), Some(dy)) = (gradients.as_deref_mut(), outcome.gradient) {
                write_gradient(outcome.batch, lengths[outcome.batch], &dy, gradients);
            }
        }

        Ok(())
    }

    fn assertions<L, M, G>(
        seq_len: &L,
        inputs: &[M],
        loss: &[f32],
        gradients: Option<&[G]>,
    ) -> Result<BatchShape>
    where
        L: SequenceLengths + ?Sized,
        M: ScoreMatrix,
        G: ScoreMatrix,
    {
        let num_time_steps = inputs.len();
        let first = inputs.first().ok_or_else(|| {
            CtcError::invalid_argument("inputs must contain at least one time step")
        })?;
        let batch_size = first.num_rows();
        let num_classes = first.num_cols();

        if num_classes == 0 {
            return Err(CtcError::invalid_argument(
                "num_classes must be at least 1 to hold the blank",
            ));
        }
        if loss.len() != batch_size {
            return Err(CtcError::invalid_argument(format!(
                "loss.len() != batch_size: {} vs. {batch_size}",
                loss.len()
            )));
        }
        if seq_len.len() != batch_size {
            return Err(CtcError::invalid_argument(format!(
                "seq_len.len() != batch_size: {} vs. {batch_size}",
                seq_len.len()
            )));
        }

        for (t, input) in inputs.iter().enumerate().skip(1) {
            if input.num_rows() != batch_size {
                return Err(CtcError::invalid_argument(format!(
                    "Expected batch size at t: {t} to be: {batch_size} but got: {}",
                    input.num_rows()
                )));
            }
            if input.num_cols() != num_classes {
                return Err(CtcError::invalid_argument(format!(
                    "Expected class count at t: {t} to be: {num_classes} but got: {}",
                    input.num_cols()
                )));
            }
        }

        for b in 0..batch_size {
            let length = seq_len.length_at(b);
            if length < 0 {
                return Err(CtcError::invalid_argument(format!("seq_len({b}) < 0")));
            }
            if length > num_time_steps as i64 {
                return Err(CtcError::invalid_argument(format!(
                    "seq_len({b}) > num_time_steps"
                )));
            }
        }

        if let Some(gradients) = gradients {
            if gradients.len() != num_time_steps {
                return Err(CtcError::invalid_argument(format!(
                    "gradients.len() != num_time_steps: {} vs. {num_time_steps}",
                    gradients.len()
                )));
            }
            for (t, gradient) in gradients.iter().enumerate() {
                if gradient.num_rows() != batch_size || gradient.num_cols() != num_classes {
                    return Err(CtcError::invalid_argument(format!(
                        "Expected gradient shape at t: {t} to be: [{batch_size}, {num_classes}] but got: [{}, {}]",
                        gradient.num_rows(),
                        gradient.num_cols()
                    )));
                }
            }
        }

        Ok(BatchShape {
            batch_size,
            num_classes,
            num_time_steps,
        })
    }
}

/// Copies an element's `[num_classes, seq_len]` gradient into row `batch` of
/// the per time step gradient matrices. Later time steps are zeroed.
fn write_gradient<D, G>(batch: usize, seq_len: usize, dy: &D, gradients: &mut [G])
where
    D: ScoreMatrix,
    G: ScoreMatrixMut,
{
    for (t, gradient) in gradients.iter_mut().enumerate() {
        if t < seq_len {
            for c in 0..dy.num_rows() {
                gradient.store(batch, c, dy.score(c, t));
            }
        } else {
            gradient.set_row_zero(batch);
        }
    }
}
