//! Tool registry: the one door through which the engine reaches external
//! capabilities.
//!
//! [`ToolRegistry::call`] never fails. Unknown tools, missing or unsafe
//! parameters, timeouts and panicking tools all come back as a
//! [`ToolCallResult`] carrying an error kind.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use parley_core::domain::decision::ToolKind;
use parley_core::domain::intent::IntentType;
use parley_core::domain::tool::{ToolCallResult, ToolErrorKind, ToolParams};

use crate::guardrails::{GuardrailDecision, GuardrailPolicy};

pub mod calculator;
pub mod catalog;
pub mod outlet;

pub use calculator::CalculatorTool;
pub use catalog::{ProductSearchTool, RestaurantSearchTool};
pub use outlet::OutletSearchTool;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind}: {detail}")]
pub struct ToolFailure {
    pub kind: ToolErrorKind,
    pub detail: String,
    pub contract_violation: bool,
}

impl ToolFailure {
    pub fn new(kind: ToolErrorKind, detail: impl Into<String>) -> Self {
        Self { kind, detail: detail.into(), contract_violation: false }
    }

    pub fn contract_violation(kind: ToolErrorKind, detail: impl Into<String>) -> Self {
        Self { contract_violation: true, ..Self::new(kind, detail) }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn kind(&self) -> ToolKind;

    /// Parameters that must be present before the tool runs.
    fn required_params(&self) -> &'static [&'static str];

    async fn execute(&self, params: &ToolParams) -> Result<Value, ToolFailure>;
}

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    guardrails: GuardrailPolicy,
    timeout: Duration,
}

impl ToolRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self { tools: HashMap::new(), guardrails: GuardrailPolicy::default(), timeout }
    }

    pub fn with_guardrails(mut self, guardrails: GuardrailPolicy) -> Self {
        self.guardrails = guardrails;
        self
    }

    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.kind().name().to_string(), Arc::new(tool));
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Registered tools in stable order, the metadata the planner scores
    /// against.
    pub fn registered(&self) -> Vec<ToolKind> {
        ToolKind::ALL.into_iter().filter(|tool| self.tools.contains_key(tool.name())).collect()
    }

    pub fn serves_intent(&self, intent: IntentType) -> bool {
        ToolKind::for_intent(intent).is_some_and(|tool| self.tools.contains_key(tool.name()))
    }

    pub async fn call(&self, name: &str, params: &ToolParams) -> ToolCallResult {
        let started = Instant::now();
        let result = self.dispatch(name, params).await;
        let latency_ms = elapsed_ms(started);

        match result {
            Ok(data) => {
                debug!(
                    event_name = "tools.call",
                    tool = name,
                    ok = true,
                    latency_ms,
                    "tool call succeeded"
                );
                ToolCallResult::success(data, latency_ms)
            }
            Err(failure) => {
                warn!(
                    event_name = "tools.call",
                    tool = name,
                    ok = false,
                    error_kind = failure.kind.as_str(),
                    contract_violation = failure.contract_violation,
                    detail = %failure.detail,
                    latency_ms,
                    "tool call failed"
                );
                if failure.contract_violation {
                    ToolCallResult::contract_violation(failure.kind, latency_ms)
                } else {
                    ToolCallResult::failure(failure.kind, latency_ms)
                }
            }
        }
    }

    async fn dispatch(&self, name: &str, params: &ToolParams) -> Result<Value, ToolFailure> {
        let tool = self.tools.get(name).cloned().ok_or_else(|| {
            ToolFailure::new(ToolErrorKind::UpstreamUnavailable, format!("no tool named `{name}`"))
        })?;

        let missing = tool.required_params().iter().find(|param| params.get(param).is_none());
        if let Some(missing) = missing {
            return Err(ToolFailure::new(
                ToolErrorKind::MissingParam,
                format!("missing parameter `{missing}`"),
            ));
        }

        if let GuardrailDecision::Deny { param, reason_code } = self.guardrails.evaluate(params) {
            return Err(ToolFailure::new(
                ToolErrorKind::UnsafeInput,
                format!("parameter `{param}` rejected: {reason_code}"),
            ));
        }

        let params = params.clone();
        let mut handle = tokio::spawn(async move { tool.execute(&params).await });

        match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) if join_error.is_panic() => {
                Err(ToolFailure::contract_violation(
                    ToolErrorKind::UpstreamUnavailable,
                    format!("tool panicked: {join_error}"),
                ))
            }
            Ok(Err(join_error)) => Err(ToolFailure::new(
                ToolErrorKind::UpstreamUnavailable,
                format!("tool task failed: {join_error}"),
            )),
            Err(_) => {
                handle.abort();
                Err(ToolFailure::new(
                    ToolErrorKind::Timeout,
                    format!("exceeded {} ms", self.timeout.as_millis()),
                ))
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
