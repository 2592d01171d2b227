pub mod openrouter;

use std::path;

use crate::domain::models::GatewayBox;
use crate::infrastructure::cache::CompletionCache;

pub struct GatewayManager {}

impl GatewayManager {
    /// Gateway routed by the configured keys, caching into `cache_dir`.
    pub fn get(cache_dir: path::PathBuf) -> GatewayBox {
        return Box::new(openrouter::OpenRouter::new(
            openrouter::Route::from_config(),
            CompletionCache::new(cache_dir),
        ));
    }
}
