//! Persistence of a trainer's state as a single safetensors file.

use std::{borrow::Cow, collections::HashMap, fs, path::Path};

use safetensors::{Dtype, SafeTensors, View, tensor::Metadata};

use crate::{MlErr, Result};

const PARAMS: &str = "params";
const ADAM_V: &str = "adam/v";
const ADAM_S: &str = "adam/s";
const GLOBAL_STEP: &str = "global_step";
const BETA1_POW: &str = "beta1_pow";
const BETA2_POW: &str = "beta2_pow";

/// Everything needed to resume training.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub params: Vec<f32>,
    pub adam_v: Vec<f32>,
    pub adam_s: Vec<f32>,
    pub beta_powers: (f32, f32),
    pub global_step: u64,
}

/// A flat `f32` tensor borrowed for serialization.
struct FlatF32<'a> {
    data: &'a [f32],
    shape: [usize; 1],
}

impl<'a> FlatF32<'a> {
    fn new(data: &'a [f32]) -> Self {
        Self {
            data,
            shape: [data.len()],
        }
    }
}

impl View for FlatF32<'_> {
    fn dtype(&self) -> Dtype {
        Dtype::F32
    }

    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn data(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(bytemuck::cast_slice(self.data))
    }

    fn data_len(&self) -> usize {
        std::mem::size_of_val(self.data)
    }
}

impl Checkpoint {
    /// Writes the checkpoint to `path`, replacing any previous file atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tensors = [
            (PARAMS, FlatF32::new(&self.params)),
            (ADAM_V, FlatF32::new(&self.adam_v)),
            (ADAM_S, FlatF32::new(&self.adam_s)),
        ];

        let metadata = HashMap::from([
            (GLOBAL_STEP.to_string(), self.global_step.to_string()),
            (BETA1_POW.to_string(), self.beta_powers.0.to_string()),
            (BETA2_POW.to_string(), self.beta_powers.1.to_string()),
        ]);

        let tmp = path.with_extension("tmp");
        safetensors::serialize_to_file(tensors, &Some(metadata), &tmp)
            .map_err(|e| MlErr::Checkpoint(format!("failed to write {}: {e:?}", tmp.display())))?;
        fs::rename(&tmp, path)?;

        log::debug!(step = self.global_step; "checkpoint written to {}", path.display());
        Ok(())
    }

    /// Reads a checkpoint previously written by `save`.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let invalid = |what: &str| MlErr::Checkpoint(format!("{}: {what}", path.display()));

        let (_, header) = SafeTensors::read_metadata(&bytes)
            .map_err(|e| invalid(&format!("unreadable header ({e:?})")))?;
        let tensors = SafeTensors::deserialize(&bytes)
            .map_err(|e| invalid(&format!("unreadable tensors ({e:?})")))?;

        let read = |name: &str| -> Result<Vec<f32>> {
            let view = tensors
                .tensor(name)
                .map_err(|_| invalid(&format!("missing tensor {name}")))?;

            if view.dtype() != Dtype::F32 {
                return Err(invalid(&format!("tensor {name} is not f32")));
            }

            Ok(bytemuck::pod_collect_to_vec(view.data()))
        };

        let entry = |key: &str| -> Result<&str> {
            metadata(&header)
                .and_then(|m| m.get(key))
                .map(String::as_str)
                .ok_or_else(|| invalid(&format!("missing metadata {key}")))
        };

        let global_step = entry(GLOBAL_STEP)?
            .parse()
            .map_err(|_| invalid("malformed global step"))?;
        let beta1_pow = entry(BETA1_POW)?
            .parse()
            .map_err(|_| invalid("malformed beta1 power"))?;
        let beta2_pow = entry(BETA2_POW)?
            .parse()
            .map_err(|_| invalid("malformed beta2 power"))?;

        Ok(Self {
            params: read(PARAMS)?,
            adam_v: read(ADAM_V)?,
            adam_s: read(ADAM_S)?,
            beta_powers: (beta1_pow, beta2_pow),
            global_step,
        })
    }
}

fn metadata(header: &Metadata) -> Option<&HashMap<String, String>> {
    header.metadata().as_ref()
}
