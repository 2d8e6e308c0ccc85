#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use reply_backend::routes::create_router;
use reply_backend::services::generator::{CausalLm, GenerationError, TextTokenizer};
use reply_backend::services::resolver::ResolutionService;
use reply_backend::state::AppState;
use tower::util::ServiceExt;

pub const EOS: u32 = 256;

/// One token per byte; id 256 is end-of-sequence.
pub struct ByteTokenizer;

impl TextTokenizer for ByteTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, GenerationError> {
        Ok(text.bytes().map(u32::from).collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String, GenerationError> {
        let bytes: Vec<u8> = ids.iter().filter(|&&id| id < EOS).map(|&id| id as u8).collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn eos_token_id(&self) -> Option<u32> {
        Some(EOS)
    }
}

/// Spreads probability over lowercase letters and the space byte, so every
/// call samples a different string. Records the prompt of each sequence.
#[derive(Default)]
pub struct BabblingModel {
    pub prompts: Arc<Mutex<Vec<String>>>,
}

impl CausalLm for BabblingModel {
    fn next_token_logits(
        &mut self,
        tokens: &[u32],
        offset: usize,
    ) -> Result<Vec<f32>, GenerationError> {
        if offset == 0 {
            let prompt = tokens.iter().map(|&t| t as u8 as char).collect();
            self.prompts.lock().unwrap().push(prompt);
        }
        Ok(letter_logits())
    }

    fn reset(&mut self) {}
}

fn letter_logits() -> Vec<f32> {
    let mut logits = vec![f32::NEG_INFINITY; EOS as usize + 1];
    for b in b'a'..=b'z' {
        logits[b as usize] = 1.0;
    }
    logits[b' ' as usize] = 1.0;
    logits
}

/// Holds a busy flag for the length of every forward pass and counts the
/// passes that found it already set.
#[derive(Default)]
pub struct ExclusiveModel {
    pub busy: Arc<AtomicBool>,
    pub overlaps: Arc<AtomicUsize>,
    pub passes: Arc<AtomicUsize>,
}

impl CausalLm for ExclusiveModel {
    fn next_token_logits(&mut self, _: &[u32], _: usize) -> Result<Vec<f32>, GenerationError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.passes.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(5));
        self.busy.store(false, Ordering::SeqCst);
        Ok(letter_logits())
    }

    fn reset(&mut self) {}
}

pub struct BrokenModel;

impl CausalLm for BrokenModel {
    fn next_token_logits(&mut self, _: &[u32], _: usize) -> Result<Vec<f32>, GenerationError> {
        Err(GenerationError::Inference("out of memory".into()))
    }

    fn reset(&mut self) {}
}

pub fn app(resolver: ResolutionService) -> Router {
    create_router().with_state(AppState::shared(resolver))
}

pub async fn post_chat(app: Router, body: &str) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
