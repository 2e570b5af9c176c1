//! Request/response tool surface
//!
//! Tools are addressed by name with JSON arguments and answered with a
//! uniform envelope. Unknown tools come back as `method_not_found`,
//! malformed arguments as `invalid_params`, and engine failures as either
//! `invalid_params` (caller mistakes) or `internal_error`.

use crate::kernel::CadenceKernel;
use cadence_core::{CadenceError, ExecutionContext};
use cadence_orchestrator::chain::ChainConfig;
use cadence_orchestrator::delegation::{DelegationTask, StrategyConfig};
use cadence_orchestrator::loop_engine::LoopConfig;
use cadence_orchestrator::phases::{OperationProfile, WavePlan, WaveStrategy};
use cadence_orchestrator::wave::WaveOptions;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

pub const ERR_METHOD_NOT_FOUND: &str = "method_not_found";
pub const ERR_INVALID_PARAMS: &str = "invalid_params";
pub const ERR_INTERNAL: &str = "internal_error";

/// One tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolRequest {
    pub fn new(tool: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool: tool.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolError {
    pub code: String,
    pub message: String,
}

/// Uniform response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

impl ToolResponse {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(ToolError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

struct ToolFailure {
    code: &'static str,
    message: String,
}

impl From<CadenceError> for ToolFailure {
    fn from(err: CadenceError) -> Self {
        let code = match err {
            CadenceError::Validation(_)
            | CadenceError::NotFound(_)
            | CadenceError::DuplicateId(_) => ERR_INVALID_PARAMS,
            _ => ERR_INTERNAL,
        };
        Self {
            code,
            message: err.to_string(),
        }
    }
}

fn parse<T: DeserializeOwned>(arguments: Value) -> Result<T, ToolFailure> {
    serde_json::from_value(arguments).map_err(|e| ToolFailure {
        code: ERR_INVALID_PARAMS,
        message: e.to_string(),
    })
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ToolFailure> {
    serde_json::to_value(value).map_err(|e| ToolFailure {
        code: ERR_INTERNAL,
        message: e.to_string(),
    })
}

#[derive(Deserialize)]
struct CreateWavePlanArgs {
    profile: OperationProfile,
    strategy: Option<WaveStrategy>,
}

#[derive(Deserialize)]
struct ExecuteWaveArgs {
    /// Pre-built plan; when absent one is built from `profile`
    plan: Option<WavePlan>,
    profile: Option<OperationProfile>,
    strategy: Option<WaveStrategy>,
    #[serde(default)]
    options: WaveOptions,
    context: Option<ExecutionContext>,
}

#[derive(Deserialize)]
struct WaveIdArgs {
    wave_id: String,
}

#[derive(Deserialize)]
struct RollbackArgs {
    wave_id: String,
    target_phase: usize,
    #[serde(default)]
    preserve_checkpoints: Vec<String>,
}

#[derive(Deserialize)]
struct DelegateArgs {
    task: DelegationTask,
    #[serde(default)]
    strategy: StrategyConfig,
    context: Option<ExecutionContext>,
}

#[derive(Deserialize)]
struct DelegationIdArgs {
    delegation_id: String,
}

#[derive(Deserialize)]
struct StartLoopArgs {
    config: LoopConfig,
    context: Option<ExecutionContext>,
}

#[derive(Deserialize)]
struct LoopIdArgs {
    loop_id: String,
}

#[derive(Deserialize)]
struct StartChainArgs {
    config: ChainConfig,
    context: Option<ExecutionContext>,
}

#[derive(Deserialize)]
struct ChainIdArgs {
    chain_id: String,
}

/// Dispatches tool requests to the kernel's engines
pub struct ToolRouter {
    kernel: Arc<CadenceKernel>,
}

impl ToolRouter {
    pub fn new(kernel: Arc<CadenceKernel>) -> Self {
        Self { kernel }
    }

    /// The tool names this router answers to
    pub fn tools(&self) -> &'static [&'static str] {
        &[
            "create_wave_plan",
            "execute_wave",
            "get_wave_status",
            "rollback_wave_phase",
            "delegate_to_subagents",
            "get_delegation_results",
            "start_loop",
            "execute_loop_iteration",
            "complete_loop",
            "get_loop_status",
            "cancel_loop",
            "start_chain",
            "execute_chain",
            "get_chain_status",
            "cancel_chain",
            "performance_report",
            "resource_pressure",
        ]
    }

    pub async fn handle(&self, request: ToolRequest) -> ToolResponse {
        debug!("Tool request: {}", request.tool);
        match self.dispatch(&request.tool, request.arguments).await {
            Ok(result) => ToolResponse::ok(result),
            Err(failure) => {
                warn!("Tool {} failed: {}", request.tool, failure.message);
                ToolResponse::failure(failure.code, failure.message)
            }
        }
    }

    async fn dispatch(&self, tool: &str, arguments: Value) -> Result<Value, ToolFailure> {
        match tool {
            "create_wave_plan" => {
                let args: CreateWavePlanArgs = parse(arguments)?;
                let plan = self.kernel.waves.create_wave_plan(args.profile, args.strategy)?;
                to_value(&plan)
            }
            "execute_wave" => {
                let args: ExecuteWaveArgs = parse(arguments)?;
                let plan = match (args.plan, args.profile) {
                    (Some(plan), _) => plan,
                    (None, Some(profile)) => {
                        self.kernel.waves.create_wave_plan(profile, args.strategy)?
                    }
                    (None, None) => {
                        return Err(ToolFailure {
                            code: ERR_INVALID_PARAMS,
                            message: "execute_wave needs a plan or a profile".to_string(),
                        })
                    }
                };
                let context = self.context_or_fresh(args.context, &plan.operation.description);
                let report = self
                    .kernel
                    .waves
                    .execute_wave(plan, args.options, context)
                    .await?;
                to_value(&report)
            }
            "get_wave_status" => {
                let args: WaveIdArgs = parse(arguments)?;
                let status = self.kernel.waves.get_wave_status(&args.wave_id).await?;
                to_value(&status)
            }
            "rollback_wave_phase" => {
                let args: RollbackArgs = parse(arguments)?;
                let report = self
                    .kernel
                    .waves
                    .rollback_wave_phase(
                        &args.wave_id,
                        args.target_phase,
                        &args.preserve_checkpoints,
                    )
                    .await?;
                to_value(&report)
            }
            "delegate_to_subagents" => {
                let args: DelegateArgs = parse(arguments)?;
                let context = self.context_or_fresh(args.context, &args.task.operation);
                let report = self
                    .kernel
                    .delegations
                    .delegate_to_sub_agents(args.task, args.strategy, context)
                    .await?;
                to_value(&report)
            }
            "get_delegation_results" => {
                let args: DelegationIdArgs = parse(arguments)?;
                let report = self
                    .kernel
                    .delegations
                    .get_delegation_results(&args.delegation_id)
                    .await?;
                to_value(&report)
            }
            "start_loop" => {
                let args: StartLoopArgs = parse(arguments)?;
                let context = self.context_or_fresh(args.context, &args.config.operation);
                let loop_id = self.kernel.loops.start_loop(args.config, context).await?;
                Ok(json!({ "loop_id": loop_id }))
            }
            "execute_loop_iteration" => {
                let args: LoopIdArgs = parse(arguments)?;
                let iteration = self.kernel.loops.execute_iteration(&args.loop_id).await?;
                to_value(&iteration)
            }
            "complete_loop" => {
                let args: LoopIdArgs = parse(arguments)?;
                let report = self.kernel.loops.complete_loop(&args.loop_id).await?;
                to_value(&report)
            }
            "get_loop_status" => {
                let args: LoopIdArgs = parse(arguments)?;
                let status = self.kernel.loops.get_loop_status(&args.loop_id).await?;
                to_value(&status)
            }
            "cancel_loop" => {
                let args: LoopIdArgs = parse(arguments)?;
                self.kernel.loops.cancel_loop(&args.loop_id).await?;
                Ok(json!({ "loop_id": args.loop_id, "cancelled": true }))
            }
            "start_chain" => {
                let args: StartChainArgs = parse(arguments)?;
                let context = self.context_or_fresh(args.context, &args.config.operation);
                let chain_id = self.kernel.chains.start_chain(args.config, context).await?;
                Ok(json!({ "chain_id": chain_id }))
            }
            "execute_chain" => {
                let args: ChainIdArgs = parse(arguments)?;
                let report = self.kernel.chains.execute_chain(&args.chain_id).await?;
                to_value(&report)
            }
            "get_chain_status" => {
                let args: ChainIdArgs = parse(arguments)?;
                let status = self.kernel.chains.get_chain_status(&args.chain_id).await?;
                to_value(&status)
            }
            "cancel_chain" => {
                let args: ChainIdArgs = parse(arguments)?;
                self.kernel.chains.cancel_chain(&args.chain_id).await?;
                Ok(json!({ "chain_id": args.chain_id, "cancelled": true }))
            }
            "performance_report" => {
                let report = self.kernel.tracker.generate_report().await;
                to_value(&report)
            }
            "resource_pressure" => {
                let pressure = self.kernel.system_snapshot().await;
                to_value(&pressure)
            }
            other => Err(ToolFailure {
                code: ERR_METHOD_NOT_FOUND,
                message: format!("Unknown tool: {}", other),
            }),
        }
    }

    fn context_or_fresh(
        &self,
        context: Option<ExecutionContext>,
        command: &str,
    ) -> ExecutionContext {
        context.unwrap_or_else(|| ExecutionContext::new(self.kernel.ids.next("exec"), command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::CadenceConfig;

    fn router() -> ToolRouter {
        ToolRouter::new(Arc::new(CadenceKernel::new(CadenceConfig::default())))
    }

    #[tokio::test]
    async fn test_unknown_tool_is_method_not_found() {
        let response = router()
            .handle(ToolRequest::new("explode", json!({})))
            .await;
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, ERR_METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_arguments_are_invalid_params() {
        let response = router()
            .handle(ToolRequest::new("get_wave_status", json!({"bogus": 1})))
            .await;
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, ERR_INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_create_wave_plan_roundtrip() {
        let response = router()
            .handle(ToolRequest::new(
                "create_wave_plan",
                json!({
                    "profile": {
                        "description": "improve module quality",
                        "base_complexity": 0.3,
                        "file_count": 12,
                        "domains": ["backend"],
                        "operation_types": ["refactor"]
                    }
                }),
            ))
            .await;
        assert!(response.success, "{:?}", response.error);
        let plan = response.result.unwrap();
        assert_eq!(plan["strategy"], "progressive");
        assert!(!plan["phases"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_execute_wave_from_profile() {
        let response = router()
            .handle(ToolRequest::new(
                "execute_wave",
                json!({
                    "profile": {
                        "description": "tidy",
                        "base_complexity": 0.2
                    }
                }),
            ))
            .await;
        assert!(response.success, "{:?}", response.error);
        let report = response.result.unwrap();
        assert_eq!(report["status"], "completed");
    }

    #[tokio::test]
    async fn test_execute_wave_without_plan_or_profile_rejected() {
        let response = router()
            .handle(ToolRequest::new("execute_wave", json!({})))
            .await;
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, ERR_INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_loop_lifecycle_over_tools() {
        let router = router();
        let started = router
            .handle(ToolRequest::new(
                "start_loop",
                json!({
                    "config": {
                        "mode": "polish",
                        "operation": "polish docs",
                        "initial_quality": 0.3
                    }
                }),
            ))
            .await;
        assert!(started.success, "{:?}", started.error);
        let loop_id = started.result.unwrap()["loop_id"]
            .as_str()
            .unwrap()
            .to_string();

        let iteration = router
            .handle(ToolRequest::new(
                "execute_loop_iteration",
                json!({ "loop_id": loop_id }),
            ))
            .await;
        assert!(iteration.success, "{:?}", iteration.error);

        let status = router
            .handle(ToolRequest::new(
                "get_loop_status",
                json!({ "loop_id": loop_id }),
            ))
            .await;
        assert!(status.success);
        assert_eq!(status.result.unwrap()["iterations"], 1);

        let report = router
            .handle(ToolRequest::new(
                "complete_loop",
                json!({ "loop_id": loop_id }),
            ))
            .await;
        assert!(report.success, "{:?}", report.error);
    }

    #[tokio::test]
    async fn test_chain_runs_over_tools() {
        let router = router();
        let started = router
            .handle(ToolRequest::new(
                "start_chain",
                json!({
                    "config": {
                        "operation": "review service",
                        "personas": ["architect", "security", "qa"]
                    }
                }),
            ))
            .await;
        assert!(started.success, "{:?}", started.error);
        let chain_id = started.result.unwrap()["chain_id"]
            .as_str()
            .unwrap()
            .to_string();

        let report = router
            .handle(ToolRequest::new(
                "execute_chain",
                json!({ "chain_id": chain_id }),
            ))
            .await;
        assert!(report.success, "{:?}", report.error);
        let report = report.result.unwrap();
        assert_eq!(report["links"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_delegation_over_tools() {
        let response = router()
            .handle(ToolRequest::new(
                "delegate_to_subagents",
                json!({
                    "task": {
                        "operation": "audit security posture",
                        "scope": [
                            {"path": "src/auth.rs", "size_bytes": 4000, "item_type": "rs"},
                            {"path": "src/session.rs", "size_bytes": 3000, "item_type": "rs"}
                        ]
                    }
                }),
            ))
            .await;
        assert!(response.success, "{:?}", response.error);
        let report = response.result.unwrap();
        assert_eq!(report["status"], "completed");
        assert!(!report["sub_agent_results"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_for_missing_execution_is_invalid_params() {
        let response = router()
            .handle(ToolRequest::new(
                "get_chain_status",
                json!({ "chain_id": "chain-missing" }),
            ))
            .await;
        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, ERR_INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_performance_report_and_pressure() {
        let router = router();
        let report = router
            .handle(ToolRequest::new("performance_report", json!({})))
            .await;
        assert!(report.success);

        let pressure = router
            .handle(ToolRequest::new("resource_pressure", json!({})))
            .await;
        assert!(pressure.success);
        assert!(pressure.result.unwrap()["overall"].as_f64().unwrap() >= 0.0);
    }
}
