use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

/// Token bucket for one upstream metadata service. All workers share one
/// limiter per service, so the aggregate request rate stays within the
/// configured budget no matter the pool size.
pub struct ServiceLimiter {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl ServiceLimiter {
    pub fn per_second(rate: u32) -> Self {
        let rate = NonZeroU32::new(rate.max(1)).expect("rate is non-zero");
        Self {
            limiter: RateLimiter::direct(Quota::per_second(rate)),
        }
    }

    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }
}

/// Download concurrency control keyed by URL host, independent of the
/// global worker pool. Also tracks hosts cooling down after a 403/429:
/// those are skipped for the remainder of the run.
pub struct HostLimiter {
    per_host: usize,
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
    cooldown: Mutex<HashSet<String>>,
}

impl HostLimiter {
    pub fn new(per_host: usize) -> Self {
        Self {
            per_host: per_host.max(1),
            semaphores: Mutex::new(HashMap::new()),
            cooldown: Mutex::new(HashSet::new()),
        }
    }

    /// Acquire a download slot for `host`, or None when the host is cooling
    /// down.
    pub async fn acquire(&self, host: &str) -> Option<tokio::sync::OwnedSemaphorePermit> {
        if self.is_cooling(host) {
            return None;
        }
        let semaphore = {
            let mut semaphores = self.semaphores.lock().expect("host limiter lock poisoned");
            semaphores
                .entry(host.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_host)))
                .clone()
        };
        let permit = semaphore
            .acquire_owned()
            .await
            .expect("host semaphore is never closed");

        // The host may have been put on cooldown while we waited.
        if self.is_cooling(host) {
            return None;
        }
        Some(permit)
    }

    pub fn is_cooling(&self, host: &str) -> bool {
        self.cooldown
            .lock()
            .expect("cooldown lock poisoned")
            .contains(host)
    }

    pub fn cool_down(&self, host: &str) {
        let newly = self
            .cooldown
            .lock()
            .expect("cooldown lock poisoned")
            .insert(host.to_string());
        if newly {
            tracing::warn!(host, "host rate limited us; skipping it for this run");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_host_cooldown() {
        let limiter = HostLimiter::new(2);
        assert!(limiter.acquire("a.example.org").await.is_some());
        limiter.cool_down("a.example.org");
        assert!(limiter.acquire("a.example.org").await.is_none());
        assert!(limiter.acquire("b.example.org").await.is_some());
    }

    #[tokio::test]
    async fn test_per_host_cap() {
        let limiter = HostLimiter::new(1);
        let held = limiter.acquire("a.example.org").await.unwrap();
        // A second acquire on the same host must wait for the permit.
        let pending = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            limiter.acquire("a.example.org"),
        )
        .await;
        assert!(pending.is_err());
        drop(held);
        assert!(limiter.acquire("a.example.org").await.is_some());
    }
}
