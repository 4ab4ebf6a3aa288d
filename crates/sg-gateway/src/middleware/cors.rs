//! CORS middleware.

use crate::domain::config::CorsConfig;
use tower_http::cors::CorsLayer;

/// Permissive CORS when `allow_all` is set, none otherwise.
pub fn create_cors_layer(config: &CorsConfig) -> Option<CorsLayer> {
    config.allow_all.then(CorsLayer::permissive)
}
