// src/state.rs
use std::sync::Arc;

use crate::services::resolver::ResolutionService;

pub type SharedState = Arc<AppState>;

/// Built once at startup and shared read-only across requests.
pub struct AppState {
    pub resolver: ResolutionService,
}

impl AppState {
    pub fn new(resolver: ResolutionService) -> Self {
        Self { resolver }
    }

    pub fn shared(resolver: ResolutionService) -> SharedState {
        Arc::new(Self::new(resolver))
    }
}
