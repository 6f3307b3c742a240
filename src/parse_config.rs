use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{ctc::CtcOptions, error::Result};

#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct KernelYaml {
    preprocess_collapse_repeated: bool,
    ctc_merge_repeated: bool,
    output_delay: usize,
}

impl Default for KernelYaml {
    fn default() -> Self {
        let options = CtcOptions::default();
        Self {
            preprocess_collapse_repeated: options.preprocess_collapse_repeated,
            ctc_merge_repeated: options.ctc_merge_repeated,
            output_delay: options.output_delay,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(default)]
struct RuntimeYaml {
    num_threads: usize,
    compute_gradients: bool,
}

impl Default for RuntimeYaml {
    fn default() -> Self {
        Self {
            num_threads: 1,
            compute_gradients: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "UPPERCASE", default)]
struct CtcRunConfigYaml {
    kernel: KernelYaml,
    runtime: RuntimeYaml,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CtcRunConfig {
    pub preprocess_collapse_repeated: bool,
    pub ctc_merge_repeated: bool,
    pub output_delay: usize,
    pub num_threads: usize,
    pub compute_gradients: bool,
}

impl Default for CtcRunConfig {
    fn default() -> Self {
        Self::from(CtcRunConfigYaml::default())
    }
}

impl From<CtcRunConfigYaml> for CtcRunConfig {
    fn from(yaml: CtcRunConfigYaml) -> Self {
        Self {
            preprocess_collapse_repeated: yaml.kernel.preprocess_collapse_repeated,
            ctc_merge_repeated: yaml.kernel.ctc_merge_repeated,
            output_delay: yaml.kernel.output_delay,
            num_threads: yaml.runtime.num_threads.max(1),
            compute_gradients: yaml.runtime.compute_gradients,
        }
    }
}

impl CtcRunConfig {
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let yaml: CtcRunConfigYaml = serde_yaml::from_str(raw)?;
        Ok(Self::from(yaml))
    }

    pub fn options(&self) -> CtcOptions {
        CtcOptions {
            preprocess_collapse_repeated: self.preprocess_collapse_repeated,
            ctc_merge_repeated: self.ctc_merge_repeated,
            output_delay: self.output_delay,
            num_threads: self.num_threads,
        }
    }
}
