//! CORS middleware configuration

use tower_http::cors::CorsLayer;

/// Permissive CORS; the API carries no browser credentials
pub fn cors_layer() -> CorsLayer {
    CorsLayer::permissive()
}
