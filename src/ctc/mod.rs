mod backward;
pub mod calculator;
pub mod decoder;
mod forward;
mod gradient;
pub mod labels;
pub mod lattice;
pub mod log_space;
pub mod matrix;
pub mod softmax;

pub use calculator::{CtcLossCalculator, CtcOptions};
pub use decoder::greedy_decode;
pub use labels::{ExtendedLabels, LabelBatch, LabelPreprocessor};
pub use lattice::Lattice;
pub use log_space::{log_sum_exp, LOG_ZERO};
pub use matrix::{ScoreMatrix, ScoreMatrixMut, SequenceLengths};
