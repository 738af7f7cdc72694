use crate::config::Config;
use crate::middleware::RateLimiter;
use crate::services::ai::SuggestionEngine;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub engine: Arc<dyn SuggestionEngine>,
    pub login_limiter: RateLimiter,
    pub reset_limiter: RateLimiter,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, engine: Arc<dyn SuggestionEngine>) -> Self {
        let trust_proxy = config.trust_proxy;
        Self {
            pool,
            config: Arc::new(config),
            engine,
            login_limiter: RateLimiter::new(5, 60).trust_proxy(trust_proxy),
            reset_limiter: RateLimiter::new(3, 15 * 60).trust_proxy(trust_proxy),
        }
    }

    pub fn session_key(&self) -> &[u8] {
        &self.config.session_key
    }
}

pub type SharedState = Arc<AppState>;
