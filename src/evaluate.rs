use std::{fs, path::Path, time::Instant};

use log::info;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::{
    converter::Converter,
    ctc::{greedy_decode, CtcLossCalculator},
    error::{CtcError, Result},
    parse_config::CtcRunConfig,
    worker::CtcBatch,
};

/// A batch as stored on disk. `inputs` is `[time][batch][class]`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BatchFile {
    pub seq_len: Vec<i32>,
    pub labels: Vec<Vec<i32>>,
    pub inputs: Vec<Vec<Vec<f32>>>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LossReport {
    pub loss: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub gradients: Option<Vec<Vec<Vec<f32>>>>,
    /// Best path text of every element, when a lexicon is given.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub decoded: Option<Vec<String>>,
}

impl BatchFile {
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn into_batch(self) -> Result<CtcBatch> {
        let inputs = self
            .inputs
            .iter()
            .enumerate()
            .map(|(t, rows)| {
                let num_classes = rows.first().map(|row| row.len()).unwrap_or(0);
                if let Some(b) = rows.iter().position(|row| row.len() != num_classes) {
                    return Err(CtcError::invalid_argument(format!(
                        "ragged inputs at t: {t}, batch: {b}"
                    )));
                }
                Ok(DMatrix::from_fn(rows.len(), num_classes, |b, c| rows[b][c]))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(CtcBatch {
            seq_len: self.seq_len,
            labels: self.labels,
            inputs,
        })
    }
}

/// Evaluates one batch with the kernel flags of `config`. With a
/// `converter`, the best path of every element is decoded as well.
pub fn run(
    config: &CtcRunConfig,
    batch: &CtcBatch,
    converter: Option<&Converter>,
) -> Result<LossReport> {
    let start = Instant::now();
    let calculator = CtcLossCalculator::new(config.options());

    let batch_size = batch.seq_len.len();
    let num_classes = batch.inputs.first().map(|m| m.ncols()).unwrap_or(0);
    let mut loss = vec![0f32; batch_size];
    let mut gradients = config
        .compute_gradients
        .then(|| vec![DMatrix::<f32>::zeros(batch_size, num_classes); batch.inputs.len()]);

    calculator.calculate_loss(
        batch.seq_len.as_slice(),
        &batch.labels,
        &batch.inputs,
        &mut loss,
        gradients.as_deref_mut(),
    )?;

    info!(
        "Evaluated {} elements over {} time steps, took {} seconds.",
        batch_size,
        batch.inputs.len(),
        start.elapsed().as_secs_f64()
    );

    let gradients = gradients.map(|gradients| {
        gradients
            .iter()
            .map(|gradient| {
                gradient
                    .row_iter()
                    .map(|row| row.iter().copied().collect::<Vec<f32>>())
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>()
    });

    let decoded = match converter {
        Some(converter) => {
            let num_classes = batch.inputs.first().map(|m| m.ncols()).unwrap_or(0);
            if converter.num_classes() != num_classes {
                return Err(CtcError::invalid_argument(format!(
                    "lexicon expects {} classes but the inputs have {num_classes}",
                    converter.num_classes()
                )));
            }
            let paths = greedy_decode(batch.seq_len.as_slice(), &batch.inputs);
            Some(converter.decode_multi(&paths))
        }
        None => None,
    };

    Ok(LossReport {
        loss,
        gradients,
        decoded,
    })
}
