//! Expiring value cache with an injected clock, used for the voice list.

use crate::elevenlabs::{SpeechSynthesizer, Voice};
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Time source for cache expiry
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A single cached value and the instant it stops being valid
pub struct ExpiringCache<T> {
    value: Option<T>,
    expires_at: DateTime<Utc>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<T: Clone> ExpiringCache<T> {
    pub fn new(ttl: std::time::Duration, clock: Arc<dyn Clock>) -> Self {
        let ttl = Duration::from_std(ttl).unwrap_or_else(|_| Duration::hours(1));
        Self {
            value: None,
            expires_at: clock.now(),
            ttl,
            clock,
        }
    }

    /// The cached value, if present and not yet expired
    pub fn get(&self) -> Option<T> {
        match &self.value {
            Some(v) if self.clock.now() < self.expires_at => Some(v.clone()),
            _ => None,
        }
    }

    pub fn put(&mut self, value: T) {
        self.expires_at = self.clock.now() + self.ttl;
        self.value = Some(value);
    }

    pub fn invalidate(&mut self) {
        self.value = None;
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// Voice listing served from an [`ExpiringCache`], refreshed from the API on miss
pub struct CachedVoices {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    cache: Mutex<ExpiringCache<Vec<Voice>>>,
}

impl CachedVoices {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, ttl: std::time::Duration) -> Self {
        Self::with_clock(synthesizer, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        ttl: std::time::Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            synthesizer,
            cache: Mutex::new(ExpiringCache::new(ttl, clock)),
        }
    }

    pub async fn voices(&self) -> Result<Vec<Voice>> {
        // Held across the fetch so concurrent misses issue a single request
        let mut cache = self.cache.lock().await;
        if let Some(voices) = cache.get() {
            debug!(target: "voice_cache", count = voices.len(), "Voice list cache hit");
            return Ok(voices);
        }
        let voices = self.synthesizer.list_voices().await?;
        debug!(target: "voice_cache", count = voices.len(), "Voice list refreshed");
        cache.put(voices.clone());
        Ok(voices)
    }

    pub async fn invalidate(&self) {
        self.cache.lock().await.invalidate();
    }
}
