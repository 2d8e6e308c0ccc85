// src/services/generator/candle_backend.rs
//! Mistral weights and tokenizer fetched from the HuggingFace hub and run
//! with candle.
use std::collections::BTreeSet;
use std::path::PathBuf;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::mistral::{Config, Model};
use hf_hub::api::sync::{Api, ApiRepo};
use hf_hub::{Repo, RepoType};
use tokenizers::Tokenizer;

use super::{CausalLm, GenerationError, GenerativeResolver, ModelLoadError, TextTokenizer};

pub struct MistralModel {
    model: Model,
    device: Device,
}

impl MistralModel {
    fn forward(&mut self, tokens: &[u32], offset: usize) -> candle_core::Result<Vec<f32>> {
        let input = Tensor::new(tokens, &self.device)?.unsqueeze(0)?;
        // (1, 1, vocab): the model only projects the last position.
        let logits = self.model.forward(&input, offset)?;
        logits.squeeze(0)?.squeeze(0)?.to_dtype(DType::F32)?.to_vec1::<f32>()
    }
}

impl CausalLm for MistralModel {
    fn next_token_logits(
        &mut self,
        tokens: &[u32],
        offset: usize,
    ) -> Result<Vec<f32>, GenerationError> {
        self.forward(tokens, offset)
            .map_err(|e| GenerationError::Inference(e.to_string()))
    }

    fn reset(&mut self) {
        self.model.clear_kv_cache();
    }
}

pub struct HfTokenizer {
    inner: Tokenizer,
    eos: Option<u32>,
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, GenerationError> {
        self.inner
            .encode(text, true)
            .map(|enc| enc.get_ids().to_vec())
            .map_err(|e| GenerationError::Tokenizer(e.to_string()))
    }

    fn decode(&self, ids: &[u32]) -> Result<String, GenerationError> {
        self.inner
            .decode(ids, true)
            .map_err(|e| GenerationError::Tokenizer(e.to_string()))
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.eos
    }
}

fn fetch(repo: &ApiRepo, model_id: &str, file: &str) -> Result<PathBuf, ModelLoadError> {
    repo.get(file).map_err(|e| ModelLoadError::Hub {
        model_id: model_id.to_string(),
        file: file.to_string(),
        reason: e.to_string(),
    })
}

/// Sharded checkpoints list their files in `model.safetensors.index.json`;
/// single-file checkpoints ship `model.safetensors`.
fn fetch_weights(repo: &ApiRepo, model_id: &str) -> Result<Vec<PathBuf>, ModelLoadError> {
    let index_path = match repo.get("model.safetensors.index.json") {
        Ok(path) => path,
        Err(_) => return Ok(vec![fetch(repo, model_id, "model.safetensors")?]),
    };

    let index: serde_json::Value = std::fs::read_to_string(&index_path)
        .map_err(|e| ModelLoadError::Config(e.to_string()))
        .and_then(|text| {
            serde_json::from_str(&text).map_err(|e| ModelLoadError::Config(e.to_string()))
        })?;
    let shards: BTreeSet<&str> = index
        .get("weight_map")
        .and_then(|m| m.as_object())
        .ok_or_else(|| ModelLoadError::Config("weight index has no weight_map".into()))?
        .values()
        .filter_map(|v| v.as_str())
        .collect();

    shards
        .into_iter()
        .map(|file| fetch(repo, model_id, file))
        .collect()
}

/// Download (or reuse the local hub cache for) `model_id` at `revision` and
/// build a ready resolver. Blocking and slow on first run.
pub fn load(model_id: &str, revision: &str) -> Result<GenerativeResolver, ModelLoadError> {
    let api = Api::new().map_err(|e| ModelLoadError::Hub {
        model_id: model_id.to_string(),
        file: "<api>".to_string(),
        reason: e.to_string(),
    })?;
    let repo = api.repo(Repo::with_revision(
        model_id.to_string(),
        RepoType::Model,
        revision.to_string(),
    ));

    let tokenizer_path = fetch(&repo, model_id, "tokenizer.json")?;
    let inner = Tokenizer::from_file(&tokenizer_path)
        .map_err(|e| ModelLoadError::Tokenizer(e.to_string()))?;
    let eos = inner.token_to_id("</s>");

    let config_path = fetch(&repo, model_id, "config.json")?;
    let config: Config = std::fs::read_to_string(&config_path)
        .map_err(|e| ModelLoadError::Config(e.to_string()))
        .and_then(|text| {
            serde_json::from_str(&text).map_err(|e| ModelLoadError::Config(e.to_string()))
        })?;

    let weights = fetch_weights(&repo, model_id)?;

    let device = Device::cuda_if_available(0).map_err(|e| ModelLoadError::Model(e.to_string()))?;
    let dtype = if device.is_cuda() { DType::BF16 } else { DType::F32 };
    tracing::info!(model_id, revision, shards = weights.len(), ?dtype, "loading model weights");

    // SAFETY: the hub cache files are not modified while mapped.
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(&weights, dtype, &device) }
        .map_err(|e| ModelLoadError::Model(e.to_string()))?;
    let model = Model::new(&config, vb).map_err(|e| ModelLoadError::Model(e.to_string()))?;

    Ok(GenerativeResolver::new(
        MistralModel { model, device },
        HfTokenizer { inner, eos },
    ))
}
