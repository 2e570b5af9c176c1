//! Resource manager: fixed-capacity pools with soft admission
//!
//! One pool per execution kind. Allocation never blocks and never hard
//! rejects for capacity: an oversized request is degraded once to 80% and
//! then granted against whatever remains. Every allocation is tracked by
//! ID with an expiry, and must be released or swept.

use cadence_core::{CadenceError, ExecutionKind, IdGenerator, ResourceDefaults, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Resources a caller asks for
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub memory_mb: u64,
    pub cpu_units: u64,
    pub concurrency: u32,
    /// Advisory timeout; also bounds the allocation lifetime
    pub timeout_ms: Option<u64>,
}

impl ResourceRequirements {
    /// One-time graceful degradation to 80%, floored at small minimums
    fn degraded(&self) -> Self {
        Self {
            memory_mb: ((self.memory_mb as f64 * 0.8) as u64).max(16),
            cpu_units: ((self.cpu_units as f64 * 0.8) as u64).max(1),
            concurrency: ((self.concurrency as f64 * 0.8) as u32).max(1),
            timeout_ms: self.timeout_ms,
        }
    }
}

/// A live allocation against one pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceAllocation {
    pub allocation_id: String,
    pub kind: ExecutionKind,
    /// What the caller asked for
    pub requested: ResourceRequirements,
    /// What was actually granted
    pub granted: ResourceRequirements,
    /// Whether the request was degraded before granting
    pub degraded: bool,
    pub timestamp: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct PoolUsage {
    memory_mb: u64,
    cpu_units: u64,
    concurrency: u32,
}

#[derive(Debug, Clone)]
struct Pool {
    capacity: PoolUsage,
    allocated: PoolUsage,
}

impl Pool {
    fn available(&self) -> PoolUsage {
        PoolUsage {
            memory_mb: self.capacity.memory_mb.saturating_sub(self.allocated.memory_mb),
            cpu_units: self.capacity.cpu_units.saturating_sub(self.allocated.cpu_units),
            concurrency: self.capacity.concurrency.saturating_sub(self.allocated.concurrency),
        }
    }

    fn fits(&self, req: &ResourceRequirements) -> bool {
        let avail = self.available();
        req.memory_mb <= avail.memory_mb
            && req.cpu_units <= avail.cpu_units
            && req.concurrency <= avail.concurrency
    }

    fn grant(&mut self, req: &ResourceRequirements) {
        self.allocated.memory_mb += req.memory_mb;
        self.allocated.cpu_units += req.cpu_units;
        self.allocated.concurrency += req.concurrency;
    }

    fn reclaim(&mut self, req: &ResourceRequirements) {
        self.allocated.memory_mb = self.allocated.memory_mb.saturating_sub(req.memory_mb);
        self.allocated.cpu_units = self.allocated.cpu_units.saturating_sub(req.cpu_units);
        self.allocated.concurrency = self.allocated.concurrency.saturating_sub(req.concurrency);
    }
}

/// Utilization fractions for one pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolUtilization {
    pub memory: f64,
    pub cpu: f64,
    pub concurrency: f64,
}

impl PoolUtilization {
    pub fn overall(&self) -> f64 {
        self.memory.max(self.cpu).max(self.concurrency)
    }
}

/// Graduated pressure per dimension plus textual recommendations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PressureReport {
    /// Per-pool pressure in [0, 1]
    pub per_pool: HashMap<String, f64>,
    pub overall: f64,
    pub recommendations: Vec<String>,
}

/// Fixed-capacity pools per execution kind
pub struct ResourceManager {
    pools: RwLock<HashMap<ExecutionKind, Pool>>,
    allocations: RwLock<HashMap<String, ResourceAllocation>>,
    ids: Arc<dyn IdGenerator>,
    defaults: ResourceDefaults,
}

impl ResourceManager {
    pub fn new(defaults: ResourceDefaults, ids: Arc<dyn IdGenerator>) -> Self {
        let capacity = PoolUsage {
            memory_mb: defaults.pool_memory_mb,
            cpu_units: defaults.pool_cpu_units,
            concurrency: defaults.pool_concurrency,
        };

        let mut pools = HashMap::new();
        for kind in [
            ExecutionKind::Wave,
            ExecutionKind::Delegation,
            ExecutionKind::Loop,
            ExecutionKind::Chain,
        ] {
            pools.insert(
                kind,
                Pool {
                    capacity: capacity.clone(),
                    allocated: PoolUsage::default(),
                },
            );
        }

        Self {
            pools: RwLock::new(pools),
            allocations: RwLock::new(HashMap::new()),
            ids,
            defaults,
        }
    }

    /// Soft-admission allocation.
    ///
    /// If the request fits available capacity it is granted as-is. If not,
    /// it is degraded once to 80% and granted best-effort against whatever
    /// remains; allocation never blocks and never fails for capacity.
    pub async fn allocate(
        &self,
        kind: ExecutionKind,
        requirements: ResourceRequirements,
    ) -> Result<ResourceAllocation> {
        let mut pools = self.pools.write().await;
        let capacity = PoolUsage {
            memory_mb: self.defaults.pool_memory_mb,
            cpu_units: self.defaults.pool_cpu_units,
            concurrency: self.defaults.pool_concurrency,
        };
        // Pools for unknown kinds are created on first use
        let pool = pools.entry(kind.clone()).or_insert_with(|| Pool {
            capacity,
            allocated: PoolUsage::default(),
        });

        let (granted, degraded) = if pool.fits(&requirements) {
            (requirements.clone(), false)
        } else {
            let scaled = requirements.degraded();
            let avail = pool.available();
            warn!(
                "Pool {} cannot satisfy request, degrading to 80% and clamping to availability",
                kind
            );
            (
                ResourceRequirements {
                    memory_mb: scaled.memory_mb.min(avail.memory_mb),
                    cpu_units: scaled.cpu_units.min(avail.cpu_units),
                    concurrency: scaled.concurrency.min(avail.concurrency),
                    timeout_ms: scaled.timeout_ms,
                },
                true,
            )
        };

        pool.grant(&granted);

        let now = Utc::now();
        let lifetime_ms = requirements
            .timeout_ms
            .unwrap_or(self.defaults.allocation_expiry_secs * 1000);
        let allocation = ResourceAllocation {
            allocation_id: self.ids.next("alloc"),
            kind,
            requested: requirements,
            granted,
            degraded,
            timestamp: now,
            expires_at: now + Duration::milliseconds(lifetime_ms as i64),
        };

        debug!(
            "Allocated {} ({}mb/{}cpu/{}conc, degraded={})",
            allocation.allocation_id,
            allocation.granted.memory_mb,
            allocation.granted.cpu_units,
            allocation.granted.concurrency,
            allocation.degraded
        );

        self.allocations
            .write()
            .await
            .insert(allocation.allocation_id.clone(), allocation.clone());
        Ok(allocation)
    }

    /// Release an allocation, returning its resources to the pool
    pub async fn release(&self, allocation_id: &str) -> Result<()> {
        let allocation = self
            .allocations
            .write()
            .await
            .remove(allocation_id)
            .ok_or_else(|| {
                CadenceError::Resource(format!("Unknown allocation: {}", allocation_id))
            })?;

        let mut pools = self.pools.write().await;
        if let Some(pool) = pools.get_mut(&allocation.kind) {
            pool.reclaim(&allocation.granted);
        }
        debug!("Released allocation {}", allocation_id);
        Ok(())
    }

    /// Release all expired allocations, returning how many were swept
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = self
            .allocations
            .read()
            .await
            .values()
            .filter(|a| a.expires_at < now)
            .map(|a| a.allocation_id.clone())
            .collect();

        let mut swept = 0;
        for id in expired {
            if self.release(&id).await.is_ok() {
                swept += 1;
            }
        }
        if swept > 0 {
            info!("Swept {} expired allocations", swept);
        }
        swept
    }

    pub async fn active_allocation_count(&self) -> usize {
        self.allocations.read().await.len()
    }

    /// Current utilization of one pool
    pub async fn utilization(&self, kind: &ExecutionKind) -> PoolUtilization {
        let pools = self.pools.read().await;
        match pools.get(kind) {
            Some(pool) => PoolUtilization {
                memory: ratio(pool.allocated.memory_mb, pool.capacity.memory_mb),
                cpu: ratio(pool.allocated.cpu_units, pool.capacity.cpu_units),
                concurrency: ratio(
                    pool.allocated.concurrency as u64,
                    pool.capacity.concurrency as u64,
                ),
            },
            None => PoolUtilization {
                memory: 0.0,
                cpu: 0.0,
                concurrency: 0.0,
            },
        }
    }

    /// Graduated 0-1 pressure per pool: linear below the warning
    /// threshold, accelerating between warning and critical, saturating
    /// at 1 above critical.
    pub async fn check_pressure(&self) -> PressureReport {
        let pools = self.pools.read().await;
        let warn_at = self.defaults.warning_threshold;
        let crit_at = self.defaults.critical_threshold;

        let mut per_pool = HashMap::new();
        let mut overall: f64 = 0.0;
        for (kind, pool) in pools.iter() {
            let util = PoolUtilization {
                memory: ratio(pool.allocated.memory_mb, pool.capacity.memory_mb),
                cpu: ratio(pool.allocated.cpu_units, pool.capacity.cpu_units),
                concurrency: ratio(
                    pool.allocated.concurrency as u64,
                    pool.capacity.concurrency as u64,
                ),
            };
            let pressure = graduated_pressure(util.overall(), warn_at, crit_at);
            overall = overall.max(pressure);
            per_pool.insert(kind.to_string(), pressure);
        }

        let mut recommendations = Vec::new();
        if overall >= 0.8 {
            recommendations
                .push("Critical resource pressure: defer new executions and sweep expired allocations".into());
        } else if overall >= 0.5 {
            recommendations
                .push("Elevated resource pressure: prefer sequential phases and smaller delegations".into());
        }

        PressureReport {
            per_pool,
            overall,
            recommendations,
        }
    }
}

fn ratio(used: u64, capacity: u64) -> f64 {
    if capacity == 0 {
        0.0
    } else {
        used as f64 / capacity as f64
    }
}

/// Piecewise pressure curve over raw utilization
fn graduated_pressure(utilization: f64, warn_at: f64, crit_at: f64) -> f64 {
    let u = utilization.clamp(0.0, 1.5);
    if u <= warn_at {
        0.5 * u / warn_at
    } else if u <= crit_at {
        let t = (u - warn_at) / (crit_at - warn_at);
        0.5 + 0.4 * t * t
    } else {
        let t = ((u - crit_at) / (1.0 - crit_at).max(0.01)).min(1.0);
        (0.9 + 0.1 * t).min(1.0)
    }
}
