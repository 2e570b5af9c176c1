//! Kernel facade: wires the engines together
//!
//! One kernel owns all four engines plus the shared resource pools,
//! checkpoint store, and performance tracker. Work strategies are
//! pluggable; the defaults are the deterministic implementations.

use cadence_agent::{
    DeterministicSimulator, DeterministicWorker, GrowthImprovement, ImprovementFunction,
    PersonaWorker, SubAgentManager, TemplateRegistry, WorkSimulator,
};
use cadence_core::{CadenceConfig, ContextPreserver, IdGenerator, InMemoryPreserver, UuidIds};
use cadence_metrics::PerformanceTracker;
use cadence_orchestrator::chain::ChainManager;
use cadence_orchestrator::checkpoint::CheckpointManager;
use cadence_orchestrator::delegation::DelegationEngine;
use cadence_orchestrator::loop_engine::LoopController;
use cadence_orchestrator::resource::{PressureReport, ResourceManager};
use cadence_orchestrator::wave::WaveEngine;
use std::sync::Arc;

/// Pluggable strategy set for a kernel
pub struct KernelStrategies {
    pub worker: Arc<dyn PersonaWorker>,
    pub simulator: Arc<dyn WorkSimulator>,
    pub improver: Arc<dyn ImprovementFunction>,
    pub preserver: Arc<dyn ContextPreserver>,
    pub ids: Arc<dyn IdGenerator>,
}

impl Default for KernelStrategies {
    fn default() -> Self {
        Self {
            worker: Arc::new(DeterministicWorker),
            simulator: Arc::new(DeterministicSimulator),
            improver: Arc::new(GrowthImprovement),
            preserver: Arc::new(InMemoryPreserver::new()),
            ids: Arc::new(UuidIds),
        }
    }
}

/// The assembled orchestration kernel
pub struct CadenceKernel {
    pub waves: WaveEngine,
    pub loops: LoopController,
    pub chains: ChainManager,
    pub delegations: DelegationEngine,
    pub resources: Arc<ResourceManager>,
    pub checkpoints: Arc<CheckpointManager>,
    pub tracker: Arc<PerformanceTracker>,
    pub preserver: Arc<dyn ContextPreserver>,
    pub ids: Arc<dyn IdGenerator>,
}

impl CadenceKernel {
    /// Kernel with deterministic default strategies
    pub fn new(config: CadenceConfig) -> Self {
        Self::with_strategies(config, KernelStrategies::default())
    }

    pub fn with_strategies(config: CadenceConfig, strategies: KernelStrategies) -> Self {
        let ids = strategies.ids;
        let preserver = strategies.preserver;
        let tracker = Arc::new(PerformanceTracker::new());
        let resources = Arc::new(ResourceManager::new(
            config.resources.clone(),
            Arc::clone(&ids),
        ));
        let checkpoints = Arc::new(CheckpointManager::new(
            config.checkpoints.clone(),
            Arc::clone(&ids),
        ));
        let agents = Arc::new(SubAgentManager::new(
            TemplateRegistry::with_builtins(),
            Arc::clone(&ids),
        ));

        let waves = WaveEngine::new(
            config.wave.clone(),
            Arc::clone(&checkpoints),
            Arc::clone(&resources),
            Arc::clone(&strategies.worker),
            Arc::clone(&tracker),
            Arc::clone(&preserver),
            Arc::clone(&ids),
        );
        let loops = LoopController::new(
            config.loop_defaults.clone(),
            strategies.improver,
            Arc::clone(&resources),
            Arc::clone(&tracker),
            Arc::clone(&preserver),
            Arc::clone(&ids),
        );
        let chains = ChainManager::new(
            config.chain.clone(),
            strategies.worker,
            Arc::clone(&resources),
            Arc::clone(&tracker),
            Arc::clone(&preserver),
            Arc::clone(&ids),
        );
        let delegations = DelegationEngine::new(
            config.delegation.clone(),
            agents,
            strategies.simulator,
            Arc::clone(&resources),
            Arc::clone(&tracker),
            Arc::clone(&preserver),
            Arc::clone(&ids),
        );

        Self {
            waves,
            loops,
            chains,
            delegations,
            resources,
            checkpoints,
            tracker,
            preserver,
            ids,
        }
    }

    /// Record a system-level snapshot and return the pressure report
    pub async fn system_snapshot(&self) -> PressureReport {
        let pressure = self.resources.check_pressure().await;
        let active = self.waves.active_count().await
            + self.loops.active_count().await
            + self.chains.active_count().await
            + self.delegations.active_count().await;
        self.tracker
            .record_system_metrics(pressure.overall, active)
            .await;
        pressure
    }

    /// Housekeeping: sweep expired allocations and old checkpoints
    pub async fn maintenance_sweep(&self) -> (usize, usize) {
        let allocations = self.resources.sweep_expired().await;
        let checkpoints = self.checkpoints.retention_sweep().await;
        (allocations, checkpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::ExecutionContext;
    use cadence_orchestrator::phases::OperationProfile;
    use cadence_orchestrator::wave::WaveOptions;

    #[tokio::test]
    async fn test_kernel_wires_all_engines() {
        let kernel = CadenceKernel::new(CadenceConfig::default());
        let plan = kernel
            .waves
            .create_wave_plan(OperationProfile::new("tidy", 0.2), None)
            .unwrap();
        let report = kernel
            .waves
            .execute_wave(
                plan,
                WaveOptions::default(),
                ExecutionContext::new("exec-1", "tidy"),
            )
            .await
            .unwrap();
        assert!(!report.phase_results.is_empty());

        let pressure = kernel.system_snapshot().await;
        assert!(pressure.overall >= 0.0);
        assert!(kernel.tracker.record_count() > 0);
    }

    #[tokio::test]
    async fn test_maintenance_sweep_runs_clean() {
        let kernel = CadenceKernel::new(CadenceConfig::default());
        let (allocations, checkpoints) = kernel.maintenance_sweep().await;
        assert_eq!(allocations, 0);
        assert_eq!(checkpoints, 0);
    }
}
