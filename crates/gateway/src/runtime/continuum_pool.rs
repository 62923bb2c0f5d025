//! In-process continuum cache.
//!
//! Each user's continuum is loaded once per process lifetime; a cold load
//! rebuilds the message cache through the session cache loader. Turns
//! take the per-continuum async mutex for their whole duration (the KV
//! lock already serializes turns per user; this mutex protects against
//! in-process races).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use mnemon_continuum::{Continuum, ContinuumRepository, SessionCacheLoader};
use mnemon_domain::config::ContinuumConfig;
use mnemon_domain::error::Result;

pub struct ContinuumPool {
    repository: Arc<ContinuumRepository>,
    config: ContinuumConfig,
    cache: Mutex<HashMap<String, Arc<Mutex<Continuum>>>>,
}

impl ContinuumPool {
    pub fn new(repository: Arc<ContinuumRepository>, config: ContinuumConfig) -> Self {
        Self {
            repository,
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Get the user's continuum, loading the session cache on a miss.
    pub async fn get_or_load(&self, user_id: &str) -> Result<Arc<Mutex<Continuum>>> {
        let mut cache = self.cache.lock().await;
        if let Some(continuum) = cache.get(user_id) {
            return Ok(continuum.clone());
        }

        let mut continuum = self
            .repository
            .get_or_create(user_id, self.config.segment_size_threshold)?;
        let loader = SessionCacheLoader::new(&self.repository, self.config.session_summary_count);
        let messages = loader.load_session_cache(continuum.id)?;
        continuum.replace_messages(messages);

        let shared = Arc::new(Mutex::new(continuum));
        cache.insert(user_id.to_string(), shared.clone());
        Ok(shared)
    }
}
