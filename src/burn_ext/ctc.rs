use core::marker::PhantomData;

use burn::{
    nn::loss::Reduction,
    tensor::{backend::Backend, Data, Int, Shape, Tensor},
};
use nalgebra::DMatrix;

use crate::{
    ctc::{CtcLossCalculator, CtcOptions, LabelPreprocessor},
    error::Result,
};

/// Loss and gradient of one evaluation, on the device of the inputs.
#[derive(Clone, Debug)]
pub struct CtcLossOutput<B: Backend> {
    /// `[batch_size]` without reduction, `[1]` otherwise.
    pub loss: Tensor<B, 1>,
    /// Gradient of the reduced loss with respect to the raw scores. Shape:
    /// `[batch_size, seq_length, num_classes]`
    pub gradients: Tensor<B, 3>,
}

/// The Connectionist Temporal Classification loss on burn tensors.
///
/// Evaluation happens on the host: scores are read back, the loss and its
/// gradient are computed by [`CtcLossCalculator`], and the results are
/// uploaded to the device the scores came from.
#[derive(Clone, Debug)]
pub struct CtcLoss<B: Backend> {
    calculator: CtcLossCalculator,
    backend: PhantomData<B>,
}

impl<B: Backend> Default for CtcLoss<B> {
    fn default() -> Self {
        CtcLoss::new(CtcOptions::default())
    }
}

impl<B: Backend> CtcLoss<B> {
    /// Create the criterion.
    pub fn new(options: CtcOptions) -> Self {
        Self {
            calculator: CtcLossCalculator::new(options),
            backend: PhantomData,
        }
    }

    /// Compute the criterion on the input tensor.
    ///
    /// # Parameters:
    ///
    /// - scores: Raw, unnormalized scores; the softmax is applied inside.
    ///   The blank is the last class. Shape:
    ///   `[batch_size, seq_length, num_classes]`
    /// - labels: Target label sequence of every batch element.
    /// - seq_lengths: Valid time steps of every batch element. Shape:
    ///   `[batch_size]`
    /// - reduction: None: no reduction will be applied; Some(Reduction::Mean)
    ///   or Some(Reduction::Auto): every loss is divided by its label count
    ///   and the mean over the batch is taken; Some(Reduction::Sum): the
    ///   losses are summed.
    pub fn forward(
        &self,
        scores: Tensor<B, 3>,
        labels: &[Vec<i32>],
        seq_lengths: Tensor<B, 1, Int>,
        reduction: Option<Reduction>,
    ) -> Result<Tensor<B, 1>> {
        let (loss, _) = self.evaluate(scores, labels, seq_lengths, reduction, false)?;
        Ok(loss)
    }

    /// Same as [`forward`](Self::forward), also returning the gradient of the
    /// reduced loss.
    pub fn forward_with_gradients(
        &self,
        scores: Tensor<B, 3>,
        labels: &[Vec<i32>],
        seq_lengths: Tensor<B, 1, Int>,
        reduction: Option<Reduction>,
    ) -> Result<CtcLossOutput<B>> {
        let device = scores.device();
        let dims = scores.dims();
        let (loss, gradients) = self.evaluate(scores, labels, seq_lengths, reduction, true)?;

        let gradients = match gradients {
            Some(gradients) => gradients,
            None => Tensor::zeros(dims, &device),
        };

        Ok(CtcLossOutput { loss, gradients })
    }

    fn evaluate(
        &self,
        scores: Tensor<B, 3>,
        labels: &[Vec<i32>],
        seq_lengths: Tensor<B, 1, Int>,
        reduction: Option<Reduction>,
        requires_backprop: bool,
    ) -> Result<(Tensor<B, 1>, Option<Tensor<B, 3>>)> {
        let device = scores.device();
        let [batch_size, seq_length, num_classes] = scores.dims();

        let values = scores.into_data().convert::<f32>().value;
        let seq_len = seq_lengths.into_data().convert::<i64>().value;

        // [batch_size, seq_length, num_classes] -> seq_length x [batch_size, num_classes]
        let inputs: Vec<DMatrix<f32>> = (0..seq_length)
            .map(|t| {
                DMatrix::from_fn(batch_size, num_classes, |b, c| {
                    values[(b * seq_length + t) * num_classes + c]
                })
            })
            .collect();

        let mut loss = vec![0f32; batch_size];
        let mut gradients = vec![DMatrix::<f32>::zeros(batch_size, num_classes); seq_length];
        self.calculator.calculate_loss(
            seq_len.as_slice(),
            labels,
            &inputs,
            &mut loss,
            requires_backprop.then_some(gradients.as_mut_slice()),
        )?;

        let weights = self.element_weights(num_classes, &seq_len, labels, reduction.as_ref())?;
        let reduced = match reduction {
            None => loss,
            Some(_) => vec![loss.iter().zip(&weights).map(|(l, w)| l * w).sum()],
        };
        let reduced_len = reduced.len();
        let loss = Tensor::<B, 1>::from_data(
            Data::new(reduced, Shape::new([reduced_len])).convert(),
            &device,
        );

        if !requires_backprop {
            return Ok((loss, None));
        }

        let mut values = vec![0f32; batch_size * seq_length * num_classes];
        for (t, gradient) in gradients.iter().enumerate() {
            for b in 0..batch_size {
                for c in 0..num_classes {
                    values[(b * seq_length + t) * num_classes + c] = gradient[(b, c)] * weights[b];
                }
            }
        }
        let gradients = Tensor::<B, 3>::from_data(
            Data::new(values, Shape::new([batch_size, seq_length, num_classes])).convert(),
            &device,
        );

        Ok((loss, Some(gradients)))
    }

    /// Factor applied to every element's loss (and gradient) by the reduction.
    fn element_weights(
        &self,
        num_classes: usize,
        seq_len: &[i64],
        labels: &[Vec<i32>],
        reduction: Option<&Reduction>,
    ) -> Result<Vec<f32>> {
        let batch_size = labels.len();
        match reduction {
            None | Some(Reduction::Sum) => Ok(vec![1.0; batch_size]),
            Some(Reduction::Mean) | Some(Reduction::Auto) => {
                let options = self.calculator.options();
                let label_batch = LabelPreprocessor::new(
                    num_classes,
                    options.preprocess_collapse_repeated,
                    options.output_delay,
                )
                .populate(seq_len, labels)?;

                Ok(label_batch
                    .l_primes
                    .iter()
                    .map(|l_prime| 1.0 / (l_prime.label_count().max(1) * batch_size) as f32)
                    .collect())
            }
        }
    }
}
