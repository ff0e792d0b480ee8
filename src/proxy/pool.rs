//! Cooldown-based endpoint pool
//!
//! Picks uniformly among endpoints whose cooldown has elapsed and falls back
//! to the least-recently-used endpoint when none has, so callers always make
//! progress as long as the pool is not empty.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::PoolConfig;
use crate::error::{Result, RotorError};
use crate::models::Endpoint;
use crate::proxy::validator::ProxyValidator;

struct Slot {
    endpoint: Arc<Endpoint>,
    /// `None` until the first pick
    last_used_at: Option<Instant>,
    /// When the cooldown since the last use ends; initial values are staggered
    ready_at: Instant,
    /// Pool-wide selection counter at the last pick, breaks ties between equal instants
    last_sequence: u64,
}

impl Slot {
    fn is_ready(&self, now: Instant) -> bool {
        now >= self.ready_at
    }
}

#[derive(Default)]
struct PoolState {
    slots: Vec<Slot>,
    sequence: u64,
}

/// Read-only view of one slot
#[derive(Debug, Clone)]
pub struct SlotSnapshot {
    pub endpoint: Arc<Endpoint>,
    pub last_used_at: Option<Instant>,
    pub ready_at: Instant,
}

/// Pool of validated endpoints rotated under a cooldown
pub struct ProxyPool {
    state: Mutex<PoolState>,
    cooldown: Duration,
    validator: Option<Arc<ProxyValidator>>,
}

impl ProxyPool {
    /// Empty pool that admits endpoints through `validator`
    pub fn new(config: &PoolConfig, validator: Arc<ProxyValidator>) -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            cooldown: config.cooldown,
            validator: Some(validator),
        }
    }

    /// Pool seeded with endpoints that were validated elsewhere
    pub fn from_endpoints(cooldown: Duration, endpoints: Vec<Endpoint>) -> Self {
        let pool = Self {
            state: Mutex::new(PoolState::default()),
            cooldown,
            validator: None,
        };
        pool.install(endpoints);
        pool
    }

    /// Parse, validate and install `raw`, replacing the current contents
    ///
    /// Returns the number of endpoints admitted.
    #[instrument(skip(self, raw), fields(raw_count = raw.len()))]
    pub async fn initialize<S: AsRef<str>>(&self, raw: &[S]) -> Result<usize> {
        let validator = self.validator.as_ref().ok_or_else(|| {
            RotorError::InvalidConfig("pool has no validator to admit endpoints".to_string())
        })?;

        let parsed = Endpoint::parse_list(raw);
        let dropped = raw.len() - parsed.len();
        if dropped > 0 {
            warn!("Dropped {} unparsable proxy entries", dropped);
        }

        let valid = validator.filter_valid(parsed).await;
        let admitted = self.install(valid);

        info!(
            "Proxy pool initialized: {} admitted out of {} entries",
            admitted,
            raw.len()
        );
        Ok(admitted)
    }

    /// Replace the pool contents, staggering first eligibility across the cooldown window
    fn install(&self, endpoints: Vec<Endpoint>) -> usize {
        let mut seen = HashSet::new();
        let mut unique: Vec<Endpoint> = endpoints
            .into_iter()
            .filter(|e| seen.insert(e.identity()))
            .collect();
        unique.shuffle(&mut rand::thread_rng());

        let now = Instant::now();
        let count = unique.len() as u32;
        let slots: Vec<Slot> = unique
            .into_iter()
            .enumerate()
            .map(|(rank, endpoint)| {
                // rank 0 is eligible right away; the rest become eligible one by one
                Slot {
                    endpoint: Arc::new(endpoint),
                    last_used_at: None,
                    ready_at: now + stagger_offset(self.cooldown, rank as u32, count),
                    last_sequence: 0,
                }
            })
            .collect();

        let admitted = slots.len();
        let mut state = self.state.lock();
        state.slots = slots;
        state.sequence = 0;
        admitted
    }

    /// Take an endpoint for one request
    ///
    /// Chooses uniformly among endpoints idle for at least the cooldown; if
    /// none is, returns the least-recently-used one. `None` only when the pool
    /// is empty. The pick and the `last_used_at` update happen under one lock.
    pub fn acquire(&self) -> Option<Arc<Endpoint>> {
        let now = Instant::now();
        let mut state = self.state.lock();

        if state.slots.is_empty() {
            return None;
        }

        let eligible: Vec<usize> = state
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_ready(now))
            .map(|(index, _)| index)
            .collect();

        let (index, fallback) = match eligible.as_slice() {
            [] => {
                let oldest = state
                    .slots
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, slot)| (slot.ready_at, slot.last_sequence))
                    .map(|(index, _)| index)?;
                (oldest, true)
            }
            candidates => (candidates[rand::thread_rng().gen_range(0..candidates.len())], false),
        };

        state.sequence += 1;
        let sequence = state.sequence;
        let slot = &mut state.slots[index];
        slot.last_used_at = Some(now);
        slot.ready_at = now + self.cooldown;
        slot.last_sequence = sequence;

        if fallback {
            debug!("No endpoint past cooldown, falling back to LRU {}", slot.endpoint);
        } else {
            debug!("Acquired {}", slot.endpoint);
        }

        Some(slot.endpoint.clone())
    }

    /// Current slots with their last use time
    pub fn snapshot(&self) -> Vec<SlotSnapshot> {
        self.state
            .lock()
            .slots
            .iter()
            .map(|slot| SlotSnapshot {
                endpoint: slot.endpoint.clone(),
                last_used_at: slot.last_used_at,
                ready_at: slot.ready_at,
            })
            .collect()
    }

    /// Endpoints whose cooldown has elapsed right now
    pub fn eligible_count(&self) -> usize {
        let now = Instant::now();
        self.state
            .lock()
            .slots
            .iter()
            .filter(|slot| slot.is_ready(now))
            .count()
    }

    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().slots.is_empty()
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}

fn stagger_offset(cooldown: Duration, rank: u32, count: u32) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    cooldown.saturating_mul(rank) / count
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use async_trait::async_trait;
    use bytes::Bytes;

    use crate::config::ValidatorConfig;
    use crate::proxy::validator::{ProbeResponse, ProbeStrategy, Prober};

    fn endpoints(n: usize) -> Vec<Endpoint> {
        (0..n)
            .map(|i| Endpoint::parse(&format!("http://10.0.0.{}:8080", i + 1)).unwrap())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_pool_returns_none() {
        let pool = ProxyPool::from_endpoints(Duration::from_secs(1), Vec::new());
        assert!(pool.acquire().is_none());
        assert!(pool.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_endpoints_then_lru_fallback() {
        let pool = ProxyPool::from_endpoints(Duration::from_millis(1000), endpoints(2));

        let first = pool.acquire().unwrap();
        let second = pool.acquire().unwrap();
        assert_ne!(first.identity(), second.identity());

        let now = Instant::now();
        for slot in pool.snapshot() {
            assert_eq!(slot.last_used_at, Some(now));
            assert_eq!(slot.ready_at, now + Duration::from_millis(1000));
        }

        let third = pool.acquire().unwrap();
        assert_eq!(third.identity(), first.identity());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_use_times_are_staggered() {
        let cooldown = Duration::from_secs(100);
        let pool = ProxyPool::from_endpoints(cooldown, endpoints(4));

        let mut stamps: Vec<Instant> = pool.snapshot().iter().map(|s| s.ready_at).collect();
        stamps.sort();
        stamps.dedup();
        assert_eq!(stamps.len(), 4);
        assert_eq!(pool.eligible_count(), 1);

        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(pool.eligible_count(), 3);

        tokio::time::advance(Duration::from_secs(25)).await;
        assert_eq!(pool.eligible_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_invariant() {
        let cooldown = Duration::from_millis(500);
        let pool = ProxyPool::from_endpoints(cooldown, endpoints(5));

        for step in 0..200u64 {
            let before: HashMap<String, Instant> = pool
                .snapshot()
                .into_iter()
                .map(|s| (s.endpoint.identity(), s.ready_at))
                .collect();
            let now = Instant::now();

            let picked = pool.acquire().unwrap();
            let picked_before = before[&picked.identity()];

            let cooled = now >= picked_before;
            let oldest = before.values().min().copied().unwrap();
            let unique_oldest = before.values().filter(|&&t| t == oldest).count() == 1;
            assert!(
                cooled || (picked_before == oldest && unique_oldest),
                "step {}: picked endpoint neither cooled nor unique LRU",
                step
            );

            tokio::time::advance(Duration::from_millis(37 + step % 50)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_acquires_are_distinct() {
        let pool = Arc::new(ProxyPool::from_endpoints(
            Duration::from_secs(3600),
            endpoints(16),
        ));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.acquire().unwrap().identity() })
            })
            .collect();

        let mut seen = HashSet::new();
        for task in tasks {
            assert!(seen.insert(task.await.unwrap()));
        }
        assert_eq!(seen.len(), 16);
    }

    #[test]
    fn test_concurrent_acquires_across_threads_are_distinct() {
        let pool = Arc::new(ProxyPool::from_endpoints(
            Duration::from_secs(3600),
            endpoints(8),
        ));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || pool.acquire().unwrap().identity())
            })
            .collect();

        let picked: HashSet<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(picked.len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_random_among_eligible() {
        let pool = ProxyPool::from_endpoints(Duration::from_millis(10), endpoints(4));
        tokio::time::advance(Duration::from_millis(20)).await;

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..400 {
            // every slot cools down between picks, so all four stay eligible
            tokio::time::advance(Duration::from_millis(20)).await;
            *counts.entry(pool.acquire().unwrap().identity()).or_default() += 1;
        }

        assert_eq!(counts.len(), 4);
        assert!(counts.values().all(|&c| c > 40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_endpoints_are_collapsed() {
        let mut list = endpoints(2);
        list.push(list[0].clone());
        let pool = ProxyPool::from_endpoints(Duration::from_secs(1), list);
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test]
    async fn test_initialize_without_validator_is_rejected() {
        let pool = ProxyPool::from_endpoints(Duration::from_secs(1), Vec::new());
        let result = pool.initialize(&["http://10.0.0.1:8080"]).await;
        assert!(matches!(result, Err(RotorError::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_staggering_survives_cooldown_longer_than_clock_age() {
        // longer than any monotonic clock has been running
        let cooldown = Duration::from_secs(20 * 365 * 24 * 3600);
        let pool = ProxyPool::from_endpoints(cooldown, endpoints(4));

        assert_eq!(pool.eligible_count(), 1);
        let first = pool.acquire().unwrap();
        assert_eq!(pool.eligible_count(), 0);

        // the next pick falls back to the slot whose stagger ends soonest
        let second = pool.acquire().unwrap();
        assert_ne!(first.identity(), second.identity());
    }

    /// Echo prober: the direct path and `leaky` hosts report the host's own IP
    struct EchoProber;

    #[async_trait]
    impl Prober for EchoProber {
        async fn fetch(
            &self,
            _strategy: &ProbeStrategy,
            via: Option<&Endpoint>,
        ) -> Result<ProbeResponse> {
            let body: &'static str = match via {
                Some(endpoint) if endpoint.host != "leaky" => r#"{"ip":"5.5.5.5"}"#,
                _ => r#"{"ip":"1.1.1.1"}"#,
            };
            Ok(ProbeResponse {
                status: 200,
                body: Bytes::from_static(body.as_bytes()),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_admits_only_valid_entries() {
        let validator_config = ValidatorConfig {
            batch_size: 2,
            batch_pause: Duration::from_millis(10),
            probe_timeout: Duration::from_secs(1),
            strategies: vec![ProbeStrategy::Json {
                url: "https://echo.test/ip".to_string(),
            }],
        };
        let validator = Arc::new(ProxyValidator::new(validator_config, Arc::new(EchoProber)));
        let pool = ProxyPool::new(
            &PoolConfig {
                cooldown: Duration::from_millis(100),
            },
            validator.clone(),
        );

        let admitted = pool
            .initialize(&["garbage", "http://leaky:1", "http://good:1"])
            .await
            .unwrap();
        assert_eq!(admitted, 1);

        let hosts: Vec<String> = pool
            .snapshot()
            .iter()
            .map(|slot| slot.endpoint.host.clone())
            .collect();
        assert_eq!(hosts, vec!["good".to_string()]);

        let leaky = Endpoint::parse("http://leaky:1").unwrap();
        assert!(!validator.cached(&leaky).unwrap().valid);

        for _ in 0..20 {
            assert_eq!(pool.acquire().unwrap().host, "good");
            tokio::time::advance(Duration::from_millis(30)).await;
        }
    }

    #[test]
    fn test_stagger_offsets_spread_across_window() {
        let cooldown = Duration::from_secs(60);
        assert_eq!(stagger_offset(cooldown, 0, 4), Duration::ZERO);
        assert_eq!(stagger_offset(cooldown, 2, 4), Duration::from_secs(30));
        assert!(stagger_offset(cooldown, 3, 4) < cooldown);
        assert_eq!(stagger_offset(cooldown, 0, 0), Duration::ZERO);
    }
}
