use ctc::ctc::{
    softmax::softmax_into, CtcLossCalculator, CtcOptions, ExtendedLabels, Lattice,
    LabelPreprocessor,
};
use nalgebra::DMatrix;
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};

fn random_inputs(
    seed: u64,
    num_time_steps: usize,
    batch_size: usize,
    num_classes: usize,
) -> Vec<DMatrix<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0.0f32, 1.0).unwrap();

    (0..num_time_steps)
        .map(|_| DMatrix::from_fn(batch_size, num_classes, |_, _| normal.sample(&mut rng)))
        .collect()
}

fn evaluate(
    options: CtcOptions,
    seq_len: &[i32],
    labels: &[Vec<i32>],
    inputs: &[DMatrix<f32>],
) -> (Vec<f32>, Vec<DMatrix<f32>>) {
    let [batch_size, num_classes] = [inputs[0].nrows(), inputs[0].ncols()];
    let mut loss = vec![0f32; batch_size];
    let mut gradients = vec![DMatrix::<f32>::zeros(batch_size, num_classes); inputs.len()];

    CtcLossCalculator::new(options)
        .calculate_loss(
            seq_len,
            labels,
            inputs,
            &mut loss,
            Some(gradients.as_mut_slice()),
        )
        .unwrap();

    (loss, gradients)
}

fn loss_only(options: CtcOptions, seq_len: &[i32], labels: &[Vec<i32>], inputs: &[DMatrix<f32>]) -> Vec<f32> {
    let mut loss = vec![0f32; inputs[0].nrows()];
    CtcLossCalculator::new(options)
        .calculate_loss(seq_len, labels, inputs, &mut loss, None::<&mut [DMatrix<f32>]>)
        .unwrap();

    loss
}

#[test]
fn test_concrete_scenario() {
    let labels = vec![vec![0, 1]];
    let seq_len: &[i32] = &[5];

    let l_prime = LabelPreprocessor::new(3, false, 0)
        .preprocess(0, &labels[0], 5)
        .unwrap();
    assert_eq!(l_prime.as_slice(), &[2, 0, 2, 1, 2]);

    let inputs = random_inputs(0, 5, 1, 3);
    let (loss, gradients) = evaluate(CtcOptions::default(), seq_len, &labels, &inputs);

    assert!(loss[0].is_finite());
    assert!(loss[0] >= 0.0);
    assert_eq!(gradients.len(), 5);
    assert!(gradients
        .iter()
        .all(|g| g.nrows() == 1 && g.ncols() == 3 && g.iter().all(|v| v.is_finite())));
}

#[test]
fn test_not_enough_time() {
    let inputs = random_inputs(0, 5, 1, 3);
    let mut loss = vec![0f32; 1];
    let seq_len: &[i32] = &[1];

    let err = CtcLossCalculator::default()
        .calculate_loss(
            seq_len,
            &[vec![0, 1]],
            &inputs,
            &mut loss,
            None::<&mut [DMatrix<f32>]>,
        )
        .unwrap_err();

    assert!(err.is_invalid_argument());
}

#[test]
fn test_terminator_followed_by_label() {
    let inputs = random_inputs(0, 5, 1, 3);
    let mut loss = vec![0f32; 1];
    let seq_len: &[i32] = &[5];

    let err = CtcLossCalculator::default()
        .calculate_loss(
            seq_len,
            &[vec![0, 2, 1]],
            &inputs,
            &mut loss,
            None::<&mut [DMatrix<f32>]>,
        )
        .unwrap_err();
    assert!(err.is_invalid_argument());

    // trailing terminators are fine and change nothing
    let with_terminator = loss_only(CtcOptions::default(), seq_len, &[vec![0, 1, 2, 2]], &inputs);
    let without = loss_only(CtcOptions::default(), seq_len, &[vec![0, 1]], &inputs);
    assert_eq!(with_terminator, without);
}

#[test]
fn test_alpha_beta_sum_is_constant_over_time() {
    let num_classes = 5;
    let seq_len = 12;
    let inputs = random_inputs(3, seq_len, 1, num_classes);

    for (labels, merge_repeated, output_delay) in [
        (vec![0usize, 1, 1, 3], true, 0usize),
        (vec![0, 1, 1, 3], false, 0),
        (vec![2, 2, 2], true, 3),
        (vec![3], false, 1),
    ] {
        let l_prime = ExtendedLabels::new(&labels, num_classes - 1);
        let lattice = Lattice::new(
            l_prime.as_slice(),
            num_classes - 1,
            output_delay,
            merge_repeated,
        );

        let mut y = DMatrix::zeros(num_classes, seq_len);
        softmax_into(&inputs, 0, &mut y);

        let num_steps = seq_len - output_delay;
        let mut log_alpha = DMatrix::zeros(l_prime.len(), num_steps);
        let mut log_beta = DMatrix::zeros(l_prime.len(), num_steps);
        lattice.forward_variables(&y, &mut log_alpha);
        lattice.backward_variables(&y, &mut log_beta);

        let log_p_z_x = lattice.log_likelihood_at(&log_alpha, &log_beta, 0);
        assert!(log_p_z_x.is_finite() && log_p_z_x < 0.0);
        for t in 1..num_steps {
            let at_t = lattice.log_likelihood_at(&log_alpha, &log_beta, t);
            assert!(
                (at_t - log_p_z_x).abs() < 1e-3,
                "t: {t}, {at_t} vs {log_p_z_x}"
            );
        }
    }
}

#[test]
fn test_uniform_probabilities_match_path_count() {
    // classes {0}, blank 1; "0" over two steps: "00", "b0", "0b"
    let inputs = vec![DMatrix::zeros(1, 2), DMatrix::zeros(1, 2)];
    let seq_len: &[i32] = &[2];
    let loss = loss_only(CtcOptions::default(), seq_len, &[vec![0]], &inputs);

    assert!((loss[0] - -(0.75f32.ln())).abs() < 1e-5);
}

#[test]
fn test_merge_repeated_only_matters_for_repeats() {
    let merged = CtcOptions::default();
    let unmerged = CtcOptions {
        ctc_merge_repeated: false,
        ..CtcOptions::default()
    };

    // uniform scores: with the repeat "0 0" over three steps the merged
    // lattice only has "0 b 0", the unmerged one has five paths
    let inputs = vec![DMatrix::zeros(1, 2); 3];
    let seq_len: &[i32] = &[3];
    let labels = vec![vec![0, 0]];
    let loss_merged = loss_only(merged, seq_len, &labels, &inputs);
    let loss_unmerged = loss_only(unmerged, seq_len, &labels, &inputs);
    assert!((loss_merged[0] - -(0.125f32.ln())).abs() < 1e-5);
    assert!((loss_unmerged[0] - -(0.625f32.ln())).abs() < 1e-5);

    let inputs = random_inputs(11, 8, 2, 4);
    let seq_len: &[i32] = &[8, 6];
    let labels = vec![vec![0, 1, 2], vec![2, 0]];
    let loss_merged = loss_only(merged, seq_len, &labels, &inputs);
    let loss_unmerged = loss_only(unmerged, seq_len, &labels, &inputs);
    for (a, b) in loss_merged.iter().zip(&loss_unmerged) {
        assert!((a - b).abs() < 1e-5);
    }

    let labels = vec![vec![1, 1, 2], vec![0, 0]];
    let loss_merged = loss_only(merged, seq_len, &labels, &inputs);
    let loss_unmerged = loss_only(unmerged, seq_len, &labels, &inputs);
    for (a, b) in loss_merged.iter().zip(&loss_unmerged) {
        assert!(a > b);
    }
}

#[test]
fn test_collapse_repeated_preprocessing() {
    let inputs = random_inputs(5, 6, 1, 3);
    let seq_len: &[i32] = &[6];
    let collapse = CtcOptions {
        preprocess_collapse_repeated: true,
        ..CtcOptions::default()
    };

    let collapsed = loss_only(collapse, seq_len, &[vec![0, 0, 1]], &inputs);
    let expected = loss_only(CtcOptions::default(), seq_len, &[vec![0, 1]], &inputs);
    assert!((collapsed[0] - expected[0]).abs() < 1e-6);
}

#[test]
fn test_zero_length_sequence() {
    let inputs = random_inputs(7, 4, 2, 3);
    let seq_len: &[i32] = &[0, 4];
    let labels = vec![vec![0, 1], vec![1, 0]];

    let mut loss = vec![-1f32; 2];
    let mut gradients = vec![DMatrix::from_element(2, 3, 7.0f32); 4];
    CtcLossCalculator::default()
        .calculate_loss(
            seq_len,
            &labels,
            &inputs,
            &mut loss,
            Some(gradients.as_mut_slice()),
        )
        .unwrap();

    assert_eq!(loss[0], 0.0);
    assert!(loss[1] > 0.0);
    for gradient in &gradients {
        assert!(gradient.row(0).iter().all(|&v| v == 0.0));
        assert!(gradient.row(1).iter().all(|&v| v != 7.0));
    }
}

#[test]
fn test_gradient_matches_finite_differences() {
    let num_classes = 4;
    let num_time_steps = 6;
    let seq_len: &[i32] = &[6, 4];
    let labels = vec![vec![0, 1, 1], vec![2]];
    let options = CtcOptions {
        output_delay: 1,
        ..CtcOptions::default()
    };
    let inputs = random_inputs(13, num_time_steps, 2, num_classes);

    let (_, gradients) = evaluate(options, seq_len, &labels, &inputs);

    let h = 1e-2f32;
    for t in 0..num_time_steps {
        for b in 0..2 {
            for c in 0..num_classes {
                let mut plus = inputs.clone();
                plus[t][(b, c)] += h;
                let mut minus = inputs.clone();
                minus[t][(b, c)] -= h;

                let loss_plus = loss_only(options, seq_len, &labels, &plus)[b];
                let loss_minus = loss_only(options, seq_len, &labels, &minus)[b];
                let numeric = (loss_plus - loss_minus) / (2.0 * h);
                let analytic = gradients[t][(b, c)];

                assert!(
                    (numeric - analytic).abs() < 5e-3,
                    "t: {t}, b: {b}, c: {c}: numeric {numeric} vs analytic {analytic}"
                );
            }
        }
    }
}

#[test]
fn test_parallel_matches_sequential() {
    let inputs = random_inputs(17, 10, 5, 6);
    let seq_len: &[i32] = &[10, 7, 0, 9, 3];
    let labels = vec![
        vec![0, 1, 2, 3],
        vec![4, 4],
        vec![1],
        vec![2, 3, 2, 3, 1],
        vec![0],
    ];

    let sequential = evaluate(CtcOptions::default(), seq_len, &labels, &inputs);
    let parallel = evaluate(
        CtcOptions {
            num_threads: 3,
            ..CtcOptions::default()
        },
        seq_len,
        &labels,
        &inputs,
    );

    assert_eq!(sequential.0, parallel.0);
    assert_eq!(sequential.1, parallel.1);
}

#[test]
fn test_loss_is_non_negative() {
    for seed in 0..10 {
        let inputs = random_inputs(seed, 9, 3, 5);
        let seq_len: &[i32] = &[9, 8, 5];
        let labels = vec![vec![0, 1, 2], vec![3, 3, 3], vec![1]];

        for merge_repeated in [true, false] {
            let options = CtcOptions {
                ctc_merge_repeated: merge_repeated,
                ..CtcOptions::default()
            };
            let loss = loss_only(options, seq_len, &labels, &inputs);
            assert!(loss.iter().all(|l| l.is_finite() && *l >= 0.0));
        }
    }

    // near certain alignments, where ln p(z|x) rounds to about zero
    let seq_len: &[i32] = &[3];
    for s in [4.0f32, 8.0, 12.0, 16.0, 20.0, 30.0] {
        let inputs = vec![DMatrix::from_row_slice(1, 2, &[s, 0.0]); 3];
        let (loss, gradients) = evaluate(CtcOptions::default(), seq_len, &[vec![0]], &inputs);
        assert!(loss[0] >= 0.0, "s: {s}, loss: {}", loss[0]);
        assert!(gradients.iter().all(|g| g.iter().all(|v| v.is_finite())));
    }
}

#[test]
fn test_shape_errors() {
    let calculator = CtcLossCalculator::default();
    let seq_len: &[i32] = &[2, 2];
    let labels = vec![vec![0], vec![1]];

    // loss of the wrong size
    let inputs = random_inputs(0, 2, 2, 3);
    let mut loss = vec![0f32; 3];
    let err = calculator
        .calculate_loss(seq_len, &labels, &inputs, &mut loss, None::<&mut [DMatrix<f32>]>)
        .unwrap_err();
    assert!(err.is_invalid_argument());

    // inconsistent class count
    let mut inputs = random_inputs(0, 2, 2, 3);
    inputs[1] = DMatrix::zeros(2, 4);
    let mut loss = vec![0f32; 2];
    let err = calculator
        .calculate_loss(seq_len, &labels, &inputs, &mut loss, None::<&mut [DMatrix<f32>]>)
        .unwrap_err();
    assert!(err.to_string().contains("class count at t: 1"));

    // sequence longer than the inputs
    let inputs = random_inputs(0, 2, 2, 3);
    let too_long: &[i32] = &[3, 2];
    let err = calculator
        .calculate_loss(too_long, &labels, &inputs, &mut loss, None::<&mut [DMatrix<f32>]>)
        .unwrap_err();
    assert!(err.to_string().contains("seq_len(0) > num_time_steps"));

    let negative: &[i32] = &[2, -1];
    let err = calculator
        .calculate_loss(negative, &labels, &inputs, &mut loss, None::<&mut [DMatrix<f32>]>)
        .unwrap_err();
    assert!(err.to_string().contains("seq_len(1) < 0"));

    // gradient tensor with the wrong number of time steps
    let mut gradients = vec![DMatrix::<f32>::zeros(2, 3); 1];
    let err = calculator
        .calculate_loss(seq_len, &labels, &inputs, &mut loss, Some(gradients.as_mut_slice()))
        .unwrap_err();
    assert!(err.is_invalid_argument());

    // no time steps at all
    let err = calculator
        .calculate_loss(
            seq_len,
            &labels,
            Vec::<DMatrix<f32>>::new().as_slice(),
            &mut loss,
            None::<&mut [DMatrix<f32>]>,
        )
        .unwrap_err();
    assert!(err.is_invalid_argument());
}
