//! Application state management
//!
//! Contains shared state accessible across all handlers.

use crate::config::Settings;
use crate::engine::Engine;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    /// The one engine instance behind every endpoint
    pub engine: Engine,

    pub settings: Settings,
}

impl AppState {
    pub fn new(engine: Engine, settings: Settings) -> Self {
        Self { engine, settings }
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
