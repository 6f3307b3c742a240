use super::matrix::{ScoreMatrix, SequenceLengths};

/// Best path decoding: take the most likely class at every time step,
/// merge repeats and drop blanks. The blank is the last class.
///
/// Works on raw scores or probabilities, the argmax is the same.
pub fn greedy_decode<L, M>(seq_len: &L, inputs: &[M]) -> Vec<Vec<usize>>
where
    L: SequenceLengths + ?Sized,
    M: ScoreMatrix,
{
    let num_classes = inputs.first().map(|m| m.num_cols()).unwrap_or(0);
    if num_classes == 0 {
        return vec![Vec::new(); seq_len.len()];
    }
    let blank = num_classes - 1;

    (0..seq_len.len())
        .map(|b| {
            let length = seq_len.length_at(b).clamp(0, inputs.len() as i64) as usize;
            let mut decoded = Vec::with_capacity(length);
            let mut prev = blank;
            for scores in &inputs[..length] {
                let best = (0..num_classes)
                    .fold((0, f32::NEG_INFINITY), |(arg, max), c| {
                        let v = scores.score(b, c);
                        if v > max {
                            (c, v)
                        } else {
                            (arg, max)
                        }
                    })
                    .0;

                if best != blank && best != prev {
                    decoded.push(best);
                }
                prev = best;
            }

            decoded
        })
        .collect()
}

#[cfg(test)]
mod test {
    use nalgebra::DMatrix;

    use super::*;

    #[test]
    fn test_greedy_decode() {
        // classes {0, 1}, blank 2; element 0 reads "0 0 b 0 1", element 1 is empty
        let steps = [[0usize, 2], [0, 2], [2, 2], [0, 1], [1, 1]];
        let inputs: Vec<_> = steps
            .iter()
            .map(|best| {
                DMatrix::from_fn(2, 3, |b, c| if c == best[b] { 1.0 } else { 0.0 })
            })
            .collect();

        let seq_len: &[i32] = &[5, 0];
        let decoded = greedy_decode(seq_len, &inputs);
        assert_eq!(decoded, vec![vec![0, 0, 1], vec![]]);

        let seq_len: &[i32] = &[2, 5];
        let decoded = greedy_decode(seq_len, &inputs);
        assert_eq!(decoded, vec![vec![0], vec![1]]);
    }
}
