//! Generic bounded async resource pool
//!
//! One contract for every expensive reusable resource (transcoder
//! subprocesses, provider connections): `acquire` prefers an idle member,
//! grows up to the configured maximum, and otherwise waits (bounded) for a
//! release. A per-checkout watchdog force-discards handles held past the
//! maximum usage duration, and a periodic health pass retires stale members
//! and replenishes toward the target size.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};

use outdial_config::PoolConfig;

use crate::PoolError;

/// Factory for pool members
#[async_trait::async_trait]
pub trait ResourceFactory: Send + Sync + 'static {
    type Resource: Send + Sync + 'static;

    /// Create a fresh resource
    async fn create(&self) -> Result<Self::Resource, PoolError>;

    /// Is this resource still usable?
    async fn is_healthy(&self, resource: &Self::Resource) -> bool;

    /// Tear the resource down (kill process, close connection)
    async fn destroy(&self, resource: &Self::Resource);
}

struct Slot<R> {
    id: u64,
    resource: Arc<R>,
    busy: bool,
    /// Bumped on every checkout so a release after a watchdog discard is a no-op
    generation: u64,
    created: Instant,
    last_used: Instant,
}

struct Inner<R> {
    slots: Vec<Slot<R>>,
    next_id: u64,
}

/// A checked-out pool member.
///
/// Must be given back via [`ResourcePool::release`]; dropping it without a
/// release leaves the slot busy until the checkout watchdog reclaims it.
#[derive(Debug)]
pub struct Checkout<R> {
    pub resource: Arc<R>,
    slot_id: u64,
    generation: u64,
}

impl<R> Checkout<R> {
    pub fn id(&self) -> u64 {
        self.slot_id
    }
}

/// Bounded pool of reusable resources
pub struct ResourcePool<F: ResourceFactory> {
    name: String,
    factory: Arc<F>,
    config: PoolConfig,
    inner: Mutex<Inner<F::Resource>>,
    /// Members currently being created (counts toward the max)
    creating: AtomicUsize,
    released: Notify,
}

impl<F: ResourceFactory> ResourcePool<F> {
    pub fn new(name: impl Into<String>, factory: F, config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            factory: Arc::new(factory),
            config,
            inner: Mutex::new(Inner {
                slots: Vec::new(),
                next_id: 0,
            }),
            creating: AtomicUsize::new(0),
            released: Notify::new(),
        })
    }

    /// Pre-create members up to the target size
    pub async fn warm_up(self: &Arc<Self>) {
        let target = self.config.target_size;
        for _ in 0..target {
            if self.size() >= target {
                break;
            }
            match self.factory.create().await {
                Ok(resource) => self.insert_idle(resource),
                Err(e) => {
                    tracing::warn!(pool = %self.name, error = %e, "Warm-up member creation failed");
                    break;
                },
            }
        }
        tracing::info!(pool = %self.name, size = self.size(), "Pool warmed up");
    }

    /// Current membership (including in-flight creations)
    pub fn size(&self) -> usize {
        self.inner.lock().slots.len() + self.creating.load(Ordering::SeqCst)
    }

    /// Members currently idle
    pub fn idle_count(&self) -> usize {
        self.inner.lock().slots.iter().filter(|s| !s.busy).count()
    }

    /// Acquire a member: idle-preferred, grow-to-max, then bounded wait.
    pub async fn acquire(self: &Arc<Self>) -> Result<Checkout<F::Resource>, PoolError> {
        let deadline = Instant::now() + Duration::from_millis(self.config.acquire_timeout_ms);

        loop {
            // 1. Try an idle member
            if let Some(checkout) = self.try_checkout_idle() {
                self.spawn_watchdog(checkout.slot_id, checkout.generation);
                return Ok(checkout);
            }

            // 2. Grow if below the maximum
            if self.try_reserve_creation() {
                let created = self.factory.create().await;
                self.creating.fetch_sub(1, Ordering::SeqCst);
                match created {
                    Ok(resource) => {
                        let checkout = self.insert_busy(resource);
                        self.spawn_watchdog(checkout.slot_id, checkout.generation);
                        return Ok(checkout);
                    },
                    Err(e) => {
                        tracing::warn!(pool = %self.name, error = %e, "Pool member creation failed");
                        return Err(e);
                    },
                }
            }

            // 3. Wait (bounded) for a release
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PoolError::Unavailable {
                    pool: self.name.clone(),
                    waited_ms: self.config.acquire_timeout_ms,
                });
            }
            if tokio::time::timeout(remaining, self.released.notified())
                .await
                .is_err()
            {
                return Err(PoolError::Unavailable {
                    pool: self.name.clone(),
                    waited_ms: self.config.acquire_timeout_ms,
                });
            }
        }
    }

    /// Return a member to the pool.
    ///
    /// `force_discard` destroys the underlying resource and, if the pool is
    /// below target, schedules a replacement. A release that races a
    /// watchdog discard is silently ignored.
    pub async fn release(self: &Arc<Self>, checkout: Checkout<F::Resource>, force_discard: bool) {
        let removed = {
            let mut inner = self.inner.lock();
            let Some(idx) = inner
                .slots
                .iter()
                .position(|s| s.id == checkout.slot_id && s.generation == checkout.generation)
            else {
                // Watchdog got here first
                return;
            };

            if force_discard {
                Some(inner.slots.swap_remove(idx))
            } else {
                let slot = &mut inner.slots[idx];
                slot.busy = false;
                slot.last_used = Instant::now();
                None
            }
        };

        if let Some(slot) = removed {
            tracing::debug!(pool = %self.name, member = slot.id, "Discarding pool member on release");
            self.factory.destroy(&slot.resource).await;
            self.replenish().await;
        }
        self.released.notify_one();
    }

    /// Start the periodic health pass. Returns a shutdown sender.
    pub fn start_health_task(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let pool = Arc::clone(self);
        let interval = Duration::from_secs(pool.config.health_interval_secs);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        pool.health_pass().await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!(pool = %pool.name, "Pool health task shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    /// Retire stale/unhealthy idle members, then replenish toward target.
    pub async fn health_pass(self: &Arc<Self>) {
        let max_age = Duration::from_secs(self.config.max_age_secs);
        let candidates: Vec<(u64, Arc<F::Resource>)> = {
            let inner = self.inner.lock();
            inner
                .slots
                .iter()
                .filter(|s| !s.busy)
                .map(|s| (s.id, s.resource.clone()))
                .collect()
        };

        let mut retired = 0usize;
        for (id, resource) in candidates {
            let too_old = {
                let inner = self.inner.lock();
                match inner.slots.iter().find(|s| s.id == id && !s.busy) {
                    Some(slot) => slot.created.elapsed() > max_age,
                    None => continue,
                }
            };
            let unhealthy = !too_old && !self.factory.is_healthy(&resource).await;
            if !(too_old || unhealthy) {
                continue;
            }

            let removed = {
                let mut inner = self.inner.lock();
                inner
                    .slots
                    .iter()
                    .position(|s| s.id == id && !s.busy)
                    .map(|idx| inner.slots.swap_remove(idx))
            };
            if let Some(slot) = removed {
                tracing::debug!(
                    pool = %self.name,
                    member = slot.id,
                    too_old,
                    "Retiring pool member"
                );
                self.factory.destroy(&slot.resource).await;
                retired += 1;
            }
        }

        if retired > 0 {
            tracing::info!(pool = %self.name, retired, "Health pass retired members");
        }
        self.replenish().await;
    }

    /// Destroy everything. Used at shutdown.
    pub async fn drain(self: &Arc<Self>) {
        let slots: Vec<Slot<F::Resource>> = {
            let mut inner = self.inner.lock();
            inner.slots.drain(..).collect()
        };
        for slot in &slots {
            self.factory.destroy(&slot.resource).await;
        }
    }

    fn try_checkout_idle(&self) -> Option<Checkout<F::Resource>> {
        let mut inner = self.inner.lock();
        let slot = inner.slots.iter_mut().find(|s| !s.busy)?;
        slot.busy = true;
        slot.generation += 1;
        slot.last_used = Instant::now();
        Some(Checkout {
            resource: slot.resource.clone(),
            slot_id: slot.id,
            generation: slot.generation,
        })
    }

    /// Reserve a creation slot if total membership is below the maximum
    fn try_reserve_creation(&self) -> bool {
        let inner = self.inner.lock();
        let total = inner.slots.len() + self.creating.load(Ordering::SeqCst);
        if total < self.config.max_size {
            self.creating.fetch_add(1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    fn insert_idle(&self, resource: F::Resource) {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.slots.push(Slot {
            id,
            resource: Arc::new(resource),
            busy: false,
            generation: 0,
            created: Instant::now(),
            last_used: Instant::now(),
        });
    }

    fn insert_busy(&self, resource: F::Resource) -> Checkout<F::Resource> {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        let resource = Arc::new(resource);
        inner.slots.push(Slot {
            id,
            resource: resource.clone(),
            busy: true,
            generation: 1,
            created: Instant::now(),
            last_used: Instant::now(),
        });
        Checkout {
            resource,
            slot_id: id,
            generation: 1,
        }
    }

    /// Replace discarded members up to the target size
    async fn replenish(self: &Arc<Self>) {
        while self.size() < self.config.target_size {
            if !self.try_reserve_creation() {
                break;
            }
            let created = self.factory.create().await;
            self.creating.fetch_sub(1, Ordering::SeqCst);
            match created {
                Ok(resource) => {
                    self.insert_idle(resource);
                    self.released.notify_one();
                },
                Err(e) => {
                    tracing::warn!(pool = %self.name, error = %e, "Replenish failed");
                    break;
                },
            }
        }
    }

    /// Reclaim a checkout held past the maximum usage duration
    fn spawn_watchdog(self: &Arc<Self>, slot_id: u64, generation: u64) {
        let pool = Arc::clone(self);
        let max_checkout = Duration::from_millis(pool.config.max_checkout_ms);

        tokio::spawn(async move {
            tokio::time::sleep(max_checkout).await;

            let removed = {
                let mut inner = pool.inner.lock();
                inner
                    .slots
                    .iter()
                    .position(|s| s.id == slot_id && s.generation == generation && s.busy)
                    .map(|idx| inner.slots.swap_remove(idx))
            };

            if let Some(slot) = removed {
                tracing::warn!(
                    pool = %pool.name,
                    member = slot.id,
                    held_ms = max_checkout.as_millis() as u64,
                    "Checkout exceeded max usage, force-discarding"
                );
                pool.factory.destroy(&slot.resource).await;
                pool.replenish().await;
                pool.released.notify_one();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    struct FakeFactory {
        counter: AtomicU64,
        healthy: std::sync::atomic::AtomicBool,
        destroyed: Mutex<Vec<u64>>,
    }

    impl FakeFactory {
        fn new() -> Self {
            Self {
                counter: AtomicU64::new(0),
                healthy: std::sync::atomic::AtomicBool::new(true),
                destroyed: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl ResourceFactory for FakeFactory {
        type Resource = u64;

        async fn create(&self) -> Result<u64, PoolError> {
            Ok(self.counter.fetch_add(1, Ordering::SeqCst))
        }

        async fn is_healthy(&self, _resource: &u64) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }

        async fn destroy(&self, resource: &u64) {
            self.destroyed.lock().push(*resource);
        }
    }

    fn config(target: usize, max: usize) -> PoolConfig {
        PoolConfig {
            target_size: target,
            max_size: max,
            acquire_timeout_ms: 50,
            max_checkout_ms: 60_000,
            max_age_secs: 3600,
            health_interval_secs: 3600,
        }
    }

    #[tokio::test]
    async fn test_warm_up_reaches_target() {
        let pool = ResourcePool::new("test", FakeFactory::new(), config(2, 4));
        pool.warm_up().await;
        assert_eq!(pool.size(), 2);
        assert_eq!(pool.idle_count(), 2);
    }

    #[tokio::test]
    async fn test_acquire_prefers_idle_then_grows() {
        let pool = ResourcePool::new("test", FakeFactory::new(), config(1, 2));
        pool.warm_up().await;

        let a = pool.acquire().await.unwrap();
        assert_eq!(pool.idle_count(), 0);

        // No idle left, pool grows
        let b = pool.acquire().await.unwrap();
        assert_eq!(pool.size(), 2);
        assert_ne!(a.id(), b.id());

        pool.release(a, false).await;
        pool.release(b, false).await;
        assert_eq!(pool.idle_count(), 2);
    }

    #[tokio::test]
    async fn test_acquire_never_exceeds_max() {
        let pool = ResourcePool::new("test", FakeFactory::new(), config(1, 2));
        let _a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();

        // At max, no idle members: bounded wait then Unavailable
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::Unavailable { .. }));
        assert_eq!(pool.size(), 2);
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let pool = ResourcePool::new("test", FakeFactory::new(), config(1, 1));
        let a = pool.acquire().await.unwrap();

        let pool2 = Arc::clone(&pool);
        let waiter = tokio::spawn(async move { pool2.acquire().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        pool.release(a, false).await;

        let checkout = waiter.await.unwrap().unwrap();
        pool.release(checkout, false).await;
    }

    #[tokio::test]
    async fn test_force_discard_destroys_and_replenishes() {
        let pool = ResourcePool::new("test", FakeFactory::new(), config(1, 2));
        pool.warm_up().await;

        let checkout = pool.acquire().await.unwrap();
        let resource = *checkout.resource;
        pool.release(checkout, true).await;

        // Destroyed resource never comes back from a later acquire
        let next = pool.acquire().await.unwrap();
        assert_ne!(*next.resource, resource);
        assert!(pool.factory.destroyed.lock().contains(&resource));
        pool.release(next, false).await;
    }

    #[tokio::test]
    async fn test_no_double_checkout_of_same_member() {
        let pool = ResourcePool::new("test", FakeFactory::new(), config(2, 2));
        pool.warm_up().await;

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_ne!(a.id(), b.id(), "two live checkouts must never share a member");
        pool.release(a, false).await;
        pool.release(b, false).await;
    }

    #[tokio::test]
    async fn test_watchdog_reclaims_wedged_checkout() {
        let mut cfg = config(1, 1);
        cfg.max_checkout_ms = 20;
        let pool = ResourcePool::new("test", FakeFactory::new(), cfg);

        let checkout = pool.acquire().await.unwrap();
        let wedged = *checkout.resource;

        // Never released; watchdog discards it and replenishes
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(pool.factory.destroyed.lock().contains(&wedged));

        // The stale release must be a no-op
        pool.release(checkout, false).await;
        let next = pool.acquire().await.unwrap();
        assert_ne!(*next.resource, wedged);
        pool.release(next, false).await;
    }

    #[tokio::test]
    async fn test_health_pass_retires_unhealthy_members() {
        let pool = ResourcePool::new("test", FakeFactory::new(), config(2, 4));
        pool.warm_up().await;

        pool.factory.healthy.store(false, Ordering::SeqCst);
        pool.health_pass().await;

        // All members were unhealthy; replenish rebuilt toward target
        assert_eq!(pool.factory.destroyed.lock().len(), 2);
        assert_eq!(pool.size(), 2);
    }
}
