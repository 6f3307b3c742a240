use log::debug;

use crate::error::{CtcError, Result};

use super::matrix::SequenceLengths;

/// Target labels with a blank before, between and after every label.
/// Length is `2 * label_count + 1`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtendedLabels {
    l_prime: Vec<usize>,
}

impl ExtendedLabels {
    pub fn new(labels: &[usize], blank: usize) -> Self {
        let mut l_prime = Vec::with_capacity(2 * labels.len() + 1);
        for &label in labels {
            l_prime.push(blank);
            l_prime.push(label);
        }
        l_prime.push(blank);

        Self { l_prime }
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.l_prime
    }

    pub fn len(&self) -> usize {
        self.l_prime.len()
    }

    pub fn is_empty(&self) -> bool {
        self.l_prime.is_empty()
    }

    /// Number of true labels in the sequence.
    pub fn label_count(&self) -> usize {
        self.l_prime.len() / 2
    }

    /// The true labels, without blanks.
    pub fn labels(&self) -> impl Iterator<Item = usize> + '_ {
        self.l_prime.iter().skip(1).step_by(2).copied()
    }
}

/// Extended label sequences for a whole batch.
#[derive(Clone, Debug)]
pub struct LabelBatch {
    pub l_primes: Vec<ExtendedLabels>,
    /// Longest `l'` in the batch, used to size the DP arenas.
    pub max_u_prime: usize,
}

/// Turns raw label sequences into extended label sequences and checks that
/// each one can be emitted in the time available.
#[derive(Clone, Copy, Debug)]
pub struct LabelPreprocessor {
    pub num_classes: usize,
    pub collapse_repeated: bool,
    pub output_delay: usize,
}

impl LabelPreprocessor {
    pub fn new(num_classes: usize, collapse_repeated: bool, output_delay: usize) -> Self {
        Self {
            num_classes,
            collapse_repeated,
            output_delay,
        }
    }

    /// The last class. There is none without at least one class.
    pub fn blank(&self) -> Result<usize> {
        self.num_classes.checked_sub(1).ok_or_else(|| {
            CtcError::invalid_argument("num_classes must be at least 1 to hold the blank")
        })
    }

    /// Retained labels of one raw sequence.
    ///
    /// A value `>= num_classes - 1` ends the sequence. It is dropped, and any
    /// true label after it is an error.
    pub fn compact_labels(&self, batch: usize, label: &[i32]) -> Result<Vec<i32>> {
        if label.is_empty() {
            return Err(CtcError::invalid_argument(format!(
                "Labels length is zero in batch {batch}"
            )));
        }

        let null_label = self.num_classes as i64 - 1;
        let mut l = Vec::with_capacity(label.len());
        let mut finished_sequence = false;
        for (i, &value) in label.iter().enumerate() {
            if i > 0 && self.collapse_repeated && value == label[i - 1] {
                continue;
            }
            if value as i64 >= null_label {
                finished_sequence = true;
            } else {
                if finished_sequence {
                    return Err(CtcError::invalid_argument(format!(
                        "Saw a non-null label (index >= num_classes - 1) following a null label, batch: {batch} num_classes: {} labels: {}",
                        self.num_classes,
                        join(&l)
                    )));
                }
                l.push(value);
            }
        }

        Ok(l)
    }

    /// Extended labels for one element, given its sequence length.
    ///
    /// Elements with `seq_len == 0` are never evaluated, so the time check is
    /// skipped for them.
    pub fn preprocess(&self, batch: usize, label: &[i32], seq_len: i64) -> Result<ExtendedLabels> {
        let blank = self.blank()?;
        let l = self.compact_labels(batch, label)?;
        debug!("label for batch: {batch}: {}", join(label));

        for &l_i in &l {
            if l_i < 0 {
                return Err(CtcError::invalid_argument(format!(
                    "All labels must be nonnegative integers, batch: {batch} labels: {}",
                    join(&l)
                )));
            }
            if l_i as usize >= blank {
                return Err(CtcError::invalid_argument(format!(
                    "No label may be greater than or equal to the blank index. num_classes: {}, batch: {batch} labels: {}",
                    self.num_classes,
                    join(&l)
                )));
            }
        }

        let time = seq_len - self.output_delay as i64;
        let required_time = l.len() as i64;
        if seq_len > 0 && required_time > time {
            return Err(CtcError::invalid_argument(format!(
                "Not enough time for target transition sequence (required: {required_time}, available: {time}), skipping data instance in batch: {batch}"
            )));
        }

        let l: Vec<usize> = l.into_iter().map(|l_i| l_i as usize).collect();
        Ok(ExtendedLabels::new(&l, blank))
    }

    /// Extended labels for every batch element plus the longest `l'`.
    pub fn populate<L>(&self, seq_len: &L, labels: &[Vec<i32>]) -> Result<LabelBatch>
    where
        L: SequenceLengths + ?Sized,
    {
        let batch_size = seq_len.len();
        if labels.len() != batch_size {
            return Err(CtcError::invalid_argument(format!(
                "labels.len() != batch_size: {} vs. {batch_size}",
                labels.len()
            )));
        }

        let mut max_u_prime = 0;
        let mut l_primes = Vec::with_capacity(batch_size);
        for (b, label) in labels.iter().enumerate() {
            let l_prime = self.preprocess(b, label, seq_len.length_at(b))?;
            max_u_prime = max_u_prime.max(l_prime.len());
            l_primes.push(l_prime);
        }

        Ok(LabelBatch {
            l_primes,
            max_u_prime,
        })
    }
}

fn join<T: ToString>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
