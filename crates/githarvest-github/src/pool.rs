use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use githarvest_core::CredentialUsage;
use tokio::sync::Notify;
use tracing::debug;

use crate::error::{Error, Result};

/// Assumed per-window quota for a credential before the first authoritative
/// rate headers arrive (GitHub search quota for authenticated tokens).
const DEFAULT_QUOTA: i64 = 30;

struct CredState {
    token: String,
    remaining: i64,
    reset_at: DateTime<Utc>,
    in_flight: u32,
    requests: u64,
}

struct PoolInner {
    state: Mutex<Vec<CredState>>,
    notify: Notify,
}

/// Rotates a fixed set of API credentials between workers. Selection is
/// greedy by remaining quota; when every credential is exhausted, `acquire`
/// sleeps until the earliest reset instead of burning requests on 403s.
pub struct CredentialPool {
    inner: Arc<PoolInner>,
}

impl CredentialPool {
    pub fn new(tokens: Vec<String>) -> Result<Self> {
        if tokens.is_empty() {
            return Err(Error::NoCredentials);
        }
        let now = Utc::now();
        let state = tokens
            .into_iter()
            .map(|token| CredState {
                token,
                remaining: DEFAULT_QUOTA,
                reset_at: now,
                in_flight: 0,
                requests: 0,
            })
            .collect();
        Ok(Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(state),
                notify: Notify::new(),
            }),
        })
    }

    /// Number of credentials; never zero, construction rejects empty lists.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Lease the credential with the most remaining quota. Blocks (async)
    /// until one becomes usable; quota is decremented optimistically here and
    /// corrected by `Lease::update` when response headers arrive.
    pub async fn acquire(&self) -> Lease {
        loop {
            let notified = self.inner.notify.notified();

            let earliest_reset = {
                let mut state = self.lock();
                let now = Utc::now();
                for cred in state.iter_mut() {
                    if cred.remaining <= 0 && cred.reset_at <= now {
                        cred.remaining = DEFAULT_QUOTA;
                    }
                }

                let best = state
                    .iter_mut()
                    .enumerate()
                    .filter(|(_, c)| c.remaining > 0)
                    .max_by_key(|(_, c)| c.remaining);

                if let Some((id, cred)) = best {
                    cred.remaining -= 1;
                    cred.in_flight += 1;
                    cred.requests += 1;
                    return Lease {
                        inner: Arc::clone(&self.inner),
                        id,
                        token: cred.token.clone(),
                    };
                }

                state.iter().map(|c| c.reset_at).min()
            };

            let wait = earliest_reset
                .map(|reset| {
                    let secs = (reset - Utc::now()).num_milliseconds().max(0) as u64;
                    // Small slack so we land after the window actually rolls.
                    Duration::from_millis(secs + 250)
                })
                .unwrap_or(Duration::from_secs(1));

            debug!(wait_ms = wait.as_millis() as u64, "all credentials exhausted, waiting");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = notified => {}
            }
        }
    }

    /// Per-credential usage for the run summary.
    pub fn stats(&self) -> Vec<CredentialUsage> {
        self.lock()
            .iter()
            .enumerate()
            .map(|(id, c)| CredentialUsage {
                credential_id: id,
                requests: c.requests,
                remaining: c.remaining,
            })
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<CredState>> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle to one leased credential. `update` records the authoritative
/// `X-RateLimit-*` values from a response; dropping the lease releases the
/// in-flight slot and wakes any waiter.
pub struct Lease {
    inner: Arc<PoolInner>,
    id: usize,
    token: String,
}

impl Lease {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn credential_id(&self) -> usize {
        self.id
    }

    pub fn update(&self, remaining: i64, reset_at: DateTime<Utc>) {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        let cred = &mut state[self.id];
        cred.remaining = remaining.max(0);
        cred.reset_at = reset_at;
        drop(state);
        self.inner.notify.notify_waiters();
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        let cred = &mut state[self.id];
        cred.in_flight = cred.in_flight.saturating_sub(1);
        drop(state);
        self.inner.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn pool(n: usize) -> CredentialPool {
        let tokens = (0..n).map(|i| format!("token-{}", i)).collect();
        CredentialPool::new(tokens).unwrap()
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert!(matches!(
            CredentialPool::new(Vec::new()),
            Err(Error::NoCredentials)
        ));
    }

    #[tokio::test]
    async fn test_greedy_selection_prefers_most_quota() {
        let pool = pool(2);
        let reset = Utc::now() + ChronoDuration::hours(1);

        // Drain token-0 down to 2, token-1 stays at 25.
        {
            let lease = pool.acquire().await;
            lease.update(
                if lease.token() == "token-0" { 2 } else { 25 },
                reset,
            );
        }
        {
            let lease = pool.acquire().await;
            lease.update(
                if lease.token() == "token-0" { 2 } else { 25 },
                reset,
            );
        }

        let lease = pool.acquire().await;
        assert_eq!(lease.token(), "token-1");
    }

    #[tokio::test]
    async fn test_never_hands_out_exhausted_credential() {
        let pool = pool(1);
        let reset = Utc::now() + ChronoDuration::hours(1);
        {
            let lease = pool.acquire().await;
            lease.update(0, reset);
        }

        let acquired =
            tokio::time::timeout(Duration::from_millis(100), pool.acquire()).await;
        assert!(acquired.is_err());
    }

    #[tokio::test]
    async fn test_blocks_until_reset_then_recovers() {
        let pool = pool(1);
        {
            let lease = pool.acquire().await;
            lease.update(0, Utc::now() + ChronoDuration::milliseconds(150));
        }

        let start = std::time::Instant::now();
        let lease = tokio::time::timeout(Duration::from_secs(2), pool.acquire())
            .await
            .expect("acquire should succeed after the reset elapses");
        assert!(start.elapsed() >= Duration::from_millis(100));
        drop(lease);
    }

    #[tokio::test]
    async fn test_stats_track_usage() {
        let pool = pool(2);
        for _ in 0..3 {
            let _lease = pool.acquire().await;
        }
        let stats = pool.stats();
        let total: u64 = stats.iter().map(|s| s.requests).sum();
        assert_eq!(total, 3);
        assert_eq!(stats.len(), 2);
    }
}
