// src/services/resolver.rs
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use super::generator::{GenerationError, GenerationParameters, GenerativeResolver};
use super::reply_table::ReplyTable;

pub const FALLBACK_REPLY: &str = "Sorry, I don't have a response for that.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySource {
    Table,
    Generated,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub reply: String,
    pub source: ReplySource,
}

/// Table lookup first, then the generator if one is configured, then the
/// fixed apology. An unmatched message is never an error.
#[derive(Debug)]
pub struct ResolutionService {
    table: ReplyTable,
    generator: Option<Arc<GenerativeResolver>>,
    params: GenerationParameters,
    timeout: Option<Duration>,
}

impl ResolutionService {
    pub fn new(table: ReplyTable) -> Self {
        Self {
            table,
            generator: None,
            params: GenerationParameters::default(),
            timeout: None,
        }
    }

    pub fn with_generator(
        mut self,
        generator: GenerativeResolver,
        params: GenerationParameters,
    ) -> Self {
        self.generator = Some(Arc::new(generator));
        self.params = params;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    pub async fn resolve(&self, raw: &str) -> Result<Resolution, GenerationError> {
        let message = raw.trim();

        if let Some(reply) = self.table.lookup(message) {
            tracing::debug!(source = ?ReplySource::Table, "resolved");
            return Ok(Resolution {
                reply: reply.to_string(),
                source: ReplySource::Table,
            });
        }

        let Some(generator) = &self.generator else {
            tracing::debug!(source = ?ReplySource::Fallback, "resolved");
            return Ok(Resolution {
                reply: FALLBACK_REPLY.to_string(),
                source: ReplySource::Fallback,
            });
        };

        let generator = Arc::clone(generator);
        let params = self.params.clone();
        let owned = message.to_string();
        let started = Instant::now();
        let task = tokio::task::spawn_blocking(move || generator.generate(&owned, &params));

        // A timed-out task keeps running on its blocking thread; its result is dropped.
        let joined = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, task)
                .await
                .map_err(|_| GenerationError::Timeout(limit))?,
            None => task.await,
        };
        let reply = joined
            .map_err(|e| GenerationError::Inference(format!("generation task failed: {e}")))??;

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            chars = reply.len(),
            "generated reply"
        );
        Ok(Resolution {
            reply,
            source: ReplySource::Generated,
        })
    }
}
