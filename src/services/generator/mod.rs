// src/services/generator/mod.rs
//! Prompt construction and token-by-token generation on top of a
//! causal-language model.
//!
//! The model and tokenizer sit behind [`CausalLm`] and [`TextTokenizer`] so
//! the resolver does not care where the weights come from. The concrete
//! Mistral backend lives in `candle_backend` behind the `candle` feature.

#[cfg(feature = "candle")]
pub mod candle_backend;
pub mod sampling;

use std::{sync::Mutex, time::Duration};

use thiserror::Error;

use sampling::Sampler;

#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("failed to fetch {file} for model {model_id}: {reason}")]
    Hub {
        model_id: String,
        file: String,
        reason: String,
    },

    #[error("failed to initialize tokenizer: {0}")]
    Tokenizer(String),

    #[error("failed to initialize model: {0}")]
    Model(String),

    #[error("invalid model configuration: {0}")]
    Config(String),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("tokenizer failure: {0}")]
    Tokenizer(String),

    #[error("inference failure: {0}")]
    Inference(String),

    #[error("prompt encoded to zero tokens")]
    EmptyPrompt,

    #[error("generation did not finish within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParameters {
    pub max_new_tokens: usize,
    pub do_sample: bool,
    pub top_p: f32,
    pub temperature: f32,
    /// Fixed sampler seed. `None` seeds from the OS on every call.
    pub seed: Option<u64>,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            max_new_tokens: 150,
            do_sample: true,
            top_p: 0.9,
            temperature: 0.7,
            seed: None,
        }
    }
}

impl GenerationParameters {
    /// Returns a description of the first out-of-range field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_new_tokens == 0 {
            return Err("max_new_tokens must be greater than zero".into());
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(format!("top_p must be in (0, 1], got {}", self.top_p));
        }
        if !(self.temperature > 0.0 && self.temperature.is_finite()) {
            return Err(format!(
                "temperature must be a positive number, got {}",
                self.temperature
            ));
        }
        Ok(())
    }
}

pub trait TextTokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>, GenerationError>;

    /// Decode ids, skipping special tokens.
    fn decode(&self, ids: &[u32]) -> Result<String, GenerationError>;

    fn eos_token_id(&self) -> Option<u32>;
}

/// A stateful next-token predictor. Implementations may keep a KV cache
/// between calls; `reset` discards it before a new sequence.
pub trait CausalLm: Send {
    /// Feed `tokens`, which start at absolute position `offset` in the
    /// sequence, and return the logits for the following token.
    fn next_token_logits(&mut self, tokens: &[u32], offset: usize)
    -> Result<Vec<f32>, GenerationError>;

    fn reset(&mut self);
}

/// The fixed prompt scaffold. Changing it changes model behaviour.
pub fn build_prompt(message: &str) -> String {
    format!("User: {message}\nAssistant:")
}

/// Wraps one shared model instance. Calls to [`generate`](Self::generate)
/// are serialized; with sampling enabled the output for identical input
/// differs from call to call.
pub struct GenerativeResolver {
    model: Mutex<Box<dyn CausalLm>>,
    tokenizer: Box<dyn TextTokenizer>,
}

impl std::fmt::Debug for GenerativeResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerativeResolver").finish_non_exhaustive()
    }
}

impl GenerativeResolver {
    pub fn new(model: impl CausalLm + 'static, tokenizer: impl TextTokenizer + 'static) -> Self {
        Self {
            model: Mutex::new(Box::new(model)),
            tokenizer: Box::new(tokenizer),
        }
    }

    /// Blocking. Run it off the async executor.
    pub fn generate(
        &self,
        message: &str,
        params: &GenerationParameters,
    ) -> Result<String, GenerationError> {
        let prompt = build_prompt(message);
        let prompt_ids = self.tokenizer.encode(&prompt)?;
        if prompt_ids.is_empty() {
            return Err(GenerationError::EmptyPrompt);
        }

        let eos = self.tokenizer.eos_token_id();
        let mut sampler = Sampler::new(params);
        let mut ids = prompt_ids.clone();

        {
            // A poisoned lock only means an earlier call panicked mid-pass;
            // the cache is reset below so the model is still usable.
            let mut model = self
                .model
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            model.reset();

            let mut fed = 0;
            for _ in 0..params.max_new_tokens {
                let logits = model.next_token_logits(&ids[fed..], fed)?;
                fed = ids.len();
                let next = sampler.sample(&logits)?;
                if Some(next) == eos {
                    break;
                }
                ids.push(next);
            }
        }

        let generated = ids.len() - prompt_ids.len();
        tracing::debug!(prompt_tokens = prompt_ids.len(), generated, "generation finished");

        let full = self.tokenizer.decode(&ids)?;
        let continuation = match full.strip_prefix(&prompt) {
            Some(rest) => rest.to_string(),
            // Decoding did not reproduce the prompt verbatim, so fall back to
            // the generated ids alone.
            None => self.tokenizer.decode(&ids[prompt_ids.len()..])?,
        };
        Ok(continuation.trim().to_string())
    }
}
