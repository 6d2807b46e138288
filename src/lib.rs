use std::sync::Arc;

use crate::config::Config;
use crate::store::Store;

pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod moderation;
pub mod router;
pub mod routes;
pub mod store;
pub mod utils;

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }
}
