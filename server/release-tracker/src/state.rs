//! Shared HTTP state.

use std::sync::Arc;

use crate::engine::Engine;

pub struct AppState {
  pub engine: Arc<Engine>,
}

impl AppState {
  pub fn new(engine: Engine) -> Arc<Self> {
    Arc::new(Self {
      engine: Arc::new(engine),
    })
  }
}
