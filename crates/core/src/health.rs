use std::time::Duration;

use tokio::sync::Mutex;

use crate::Result;

const HEALTH_CACHE_TTL_SECS: i64 = 30;
const DISCORD_PING_TIMEOUT: Duration = Duration::from_secs(5);
const DISCORD_GATEWAY_URL: &str = "https://discord.com/api/v10/gateway";

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthSnapshot {
    pub reachable: bool,
    pub latency_ms: Option<u128>,
    pub checked_at: i64,
}

/// Caches the Discord reachability probe for `HEALTH_CACHE_TTL_SECS`
/// (spec.md §5: the one permitted cached state is the Discord-health
/// snapshot). Everything else the health endpoint reports — local index
/// stats, db file size — is cheap enough to read live on every request.
#[derive(Default)]
pub struct HealthCache {
    cached: Mutex<Option<HealthSnapshot>>,
}

impl HealthCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, client: &reqwest::Client, now: i64) -> Result<HealthSnapshot> {
        self.get_from(client, DISCORD_GATEWAY_URL, now).await
    }

    async fn get_from(&self, client: &reqwest::Client, url: &str, now: i64) -> Result<HealthSnapshot> {
        let mut guard = self.cached.lock().await;
        if let Some(snapshot) = guard.as_ref() {
            if now - snapshot.checked_at < HEALTH_CACHE_TTL_SECS {
                return Ok(snapshot.clone());
            }
        }

        let snapshot = ping_discord(client, url, now).await;
        *guard = Some(snapshot.clone());
        Ok(snapshot)
    }
}

async fn ping_discord(client: &reqwest::Client, url: &str, now: i64) -> HealthSnapshot {
    let started = std::time::Instant::now();
    let result = client.get(url).timeout(DISCORD_PING_TIMEOUT).send().await;

    match result {
        Ok(res) if res.status().is_success() => HealthSnapshot {
            reachable: true,
            latency_ms: Some(started.elapsed().as_millis()),
            checked_at: now,
        },
        _ => HealthSnapshot {
            reachable: false,
            latency_ms: None,
            checked_at: now,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Port 1 is never listened on, so this fails fast with a connection
    // refusal instead of depending on real network access.
    const UNREACHABLE_URL: &str = "http://127.0.0.1:1";

    #[tokio::test]
    async fn returns_cached_snapshot_within_ttl() {
        let client = reqwest::Client::new();
        let cache = HealthCache::new();

        let first = cache.get_from(&client, UNREACHABLE_URL, 1_000).await.unwrap();
        let second = cache.get_from(&client, UNREACHABLE_URL, 1_010).await.unwrap();

        assert_eq!(first.checked_at, second.checked_at);
        assert!(!first.reachable);
    }

    #[tokio::test]
    async fn refreshes_after_ttl_expires() {
        let client = reqwest::Client::new();
        let cache = HealthCache::new();

        let first = cache.get_from(&client, UNREACHABLE_URL, 1_000).await.unwrap();
        let refreshed = cache
            .get_from(&client, UNREACHABLE_URL, 1_000 + HEALTH_CACHE_TTL_SECS + 1)
            .await
            .unwrap();

        assert_ne!(first.checked_at, refreshed.checked_at);
    }
}
