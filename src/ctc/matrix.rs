use nalgebra::{storage::RawStorage, storage::RawStorageMut, Dim, Matrix};

/// Read access to a `batch_size × num_classes` matrix of raw scores for one
/// time step.
pub trait ScoreMatrix {
    fn num_rows(&self) -> usize;

    fn num_cols(&self) -> usize;

    fn score(&self, row: usize, col: usize) -> f32;

    fn row_max(&self, row: usize) -> f32 {
        (0..self.num_cols())
            .map(|col| self.score(row, col))
            .fold(f32::NEG_INFINITY, f32::max)
    }
}

/// Write access for the gradient tensor, one matrix per time step.
pub trait ScoreMatrixMut: ScoreMatrix {
    fn store(&mut self, row: usize, col: usize, value: f32);

    fn set_row_zero(&mut self, row: usize) {
        for col in 0..self.num_cols() {
            self.store(row, col, 0.0);
        }
    }
}

impl<R, C, S> ScoreMatrix for Matrix<f32, R, C, S>
where
    R: Dim,
    C: Dim,
    S: RawStorage<f32, R, C>,
{
    fn num_rows(&self) -> usize {
        self.nrows()
    }

    fn num_cols(&self) -> usize {
        self.ncols()
    }

    fn score(&self, row: usize, col: usize) -> f32 {
        self[(row, col)]
    }
}

impl<R, C, S> ScoreMatrixMut for Matrix<f32, R, C, S>
where
    R: Dim,
    C: Dim,
    S: RawStorageMut<f32, R, C>,
{
    fn store(&mut self, row: usize, col: usize, value: f32) {
        self[(row, col)] = value;
    }
}

/// Per batch element sequence lengths. Values are signed so that negative
/// lengths coming from the caller can be reported instead of wrapping.
pub trait SequenceLengths {
    fn len(&self) -> usize;

    fn length_at(&self, batch: usize) -> i64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> SequenceLengths for [T]
where
    T: Copy + TryInto<i64>,
{
    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    fn length_at(&self, batch: usize) -> i64 {
        self[batch].try_into().unwrap_or(i64::MAX)
    }
}
