use std::{fs, path::PathBuf};

use clap::Parser;
use ctc::{
    converter::Converter,
    error::Result,
    evaluate::{run, BatchFile},
    parse_config::CtcRunConfig,
};

/// Evaluate the CTC loss of a batch and print the report as JSON.
#[derive(Parser, Debug)]
#[command(name = "ctc")]
pub struct Args {
    /// YAML file with the KERNEL and RUNTIME sections.
    pub config: PathBuf,

    /// JSON batch: `seq_len`, `labels` and `inputs` as `[time][batch][class]`.
    pub batch: PathBuf,

    /// Text file with one character per class, in class order. Enables best
    /// path decoding in the report.
    #[arg(long)]
    pub lexicon: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let config = CtcRunConfig::from_yaml(&args.config)?;
    let batch = BatchFile::from_json(&args.batch)?.into_batch()?;
    let converter = match &args.lexicon {
        Some(path) => Some(Converter::new(&fs::read_to_string(path)?)),
        None => None,
    };
    let report = run(&config, &batch, converter.as_ref())?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
