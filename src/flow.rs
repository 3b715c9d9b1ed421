//! The prompt contract shared by every feature flow.
//!
//! A flow validates its request, renders the prompt, calls the model
//! backend (the only suspension point), and validates what comes back.
//! Nothing that fails validation ever reaches the caller.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::llm::{BackendError, ModelBackend, ModelRequest};
use crate::shape::{Prompt, Shape};
use crate::shapes::{self, ClinicalTranscription, RiskScore, SymptomAnalysis, XrayAnalysis};
use crate::types::{validate, TypeDef, ValidationError};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Explicit per-invocation limits. One attempt means no retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl Default for InvocationPolicy {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_attempts: 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("request failed validation: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
    #[error("model invocation failed: {0}")]
    ModelInvocation(#[source] BackendError),
    #[error("model output rejected: {reason}")]
    ModelOutput {
        reason: String,
        violations: Vec<ValidationError>,
    },
    #[error("unknown flow: {0}")]
    UnknownFlow(String),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl FlowError {
    pub fn kind(&self) -> &'static str {
        match self {
            FlowError::Validation(_) => "validation",
            FlowError::ModelInvocation(_) => "model_invocation",
            FlowError::ModelOutput { .. } => "model_output",
            FlowError::UnknownFlow(_) => "unknown_flow",
        }
    }

    fn output(reason: impl Into<String>) -> Self {
        FlowError::ModelOutput {
            reason: reason.into(),
            violations: Vec::new(),
        }
    }
}

/// Per-invocation state. Never persisted.
#[derive(Debug)]
pub enum FlowState<O> {
    Created,
    ValidatingInput,
    InvokingModel { attempt: u32 },
    ValidatingOutput { attempt: u32 },
    Succeeded(O),
    Failed(FlowError),
}

impl<O> FlowState<O> {
    pub fn name(&self) -> &'static str {
        match self {
            FlowState::Created => "created",
            FlowState::ValidatingInput => "validating-input",
            FlowState::InvokingModel { .. } => "invoking-model",
            FlowState::ValidatingOutput { .. } => "validating-output",
            FlowState::Succeeded(_) => "succeeded",
            FlowState::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowState::Succeeded(_) | FlowState::Failed(_))
    }

    pub fn into_result(self) -> Result<O, FlowError> {
        match self {
            FlowState::Succeeded(out) => Ok(out),
            FlowState::Failed(err) => Err(err),
            other => Err(FlowError::output(format!(
                "flow stopped in non-terminal state {}",
                other.name()
            ))),
        }
    }
}

/// Tracks one invocation's walk through the state machine.
struct Run {
    flow: &'static str,
    state: &'static str,
}

impl Run {
    fn start(flow: &'static str) -> Self {
        Self {
            flow,
            state: FlowState::<()>::Created.name(),
        }
    }

    fn enter<O>(&mut self, next: FlowState<O>) -> FlowState<O> {
        debug!(flow = self.flow, from = self.state, to = next.name(), "flow transition");
        self.state = next.name();
        next
    }

    fn fail(&mut self, err: FlowError) -> FlowState<Value> {
        match &err {
            FlowError::ModelOutput { reason, violations } => warn!(
                flow = self.flow,
                kind = "model_output",
                violations = violations.len(),
                "{reason}"
            ),
            other => warn!(flow = self.flow, kind = other.kind(), "{other}"),
        }
        self.enter(FlowState::Failed(err))
    }
}

/// Generic flow over a shape. Cheap to clone; holds no per-call state.
pub struct Flow<S: Shape> {
    backend: Arc<dyn ModelBackend>,
    policy: InvocationPolicy,
    input_schema: Arc<TypeDef>,
    output_schema: Arc<TypeDef>,
    _shape: PhantomData<fn() -> S>,
}

impl<S: Shape> Clone for Flow<S> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            policy: self.policy,
            input_schema: self.input_schema.clone(),
            output_schema: self.output_schema.clone(),
            _shape: PhantomData,
        }
    }
}

impl<S: Shape> Flow<S> {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self {
            backend,
            policy: InvocationPolicy::default(),
            input_schema: Arc::new(S::input_typedef()),
            output_schema: Arc::new(S::output_typedef()),
            _shape: PhantomData,
        }
    }

    pub fn with_policy(mut self, policy: InvocationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Typed entry point.
    pub async fn run(&self, input: &S::Input) -> Result<S::Output, FlowError> {
        let value = to_value(input)?;
        let output = self.execute(value).await.into_result()?;
        serde_json::from_value(output)
            .map_err(|e| FlowError::output(format!("output does not match {}: {e}", S::ID)))
    }

    /// Raw JSON entry point. On success the validated value is returned
    /// exactly as the backend produced it.
    pub async fn run_value(&self, input: Value) -> Result<Value, FlowError> {
        self.execute(input).await.into_result()
    }

    /// Drive one invocation to a terminal state.
    pub async fn execute(&self, input: Value) -> FlowState<Value> {
        let mut run = Run::start(S::ID);

        run.enter::<Value>(FlowState::ValidatingInput);
        if let Err(errors) = validate(&self.input_schema, &input) {
            return run.fail(FlowError::Validation(errors));
        }
        let typed: S::Input = match serde_json::from_value(input) {
            Ok(typed) => typed,
            Err(e) => {
                return run.fail(FlowError::Validation(vec![ValidationError::Invalid {
                    path: "$".to_string(),
                    reason: e.to_string(),
                }]))
            }
        };
        let base_prompt = match S::render_prompt(&typed) {
            Ok(prompt) => prompt,
            Err(e) => return run.fail(FlowError::Validation(vec![e])),
        };

        let max_attempts = self.policy.max_attempts.max(1);
        let mut prompt = base_prompt.clone();
        let mut last_err = None;

        for attempt in 1..=max_attempts {
            run.enter::<Value>(FlowState::InvokingModel { attempt });
            let request = ModelRequest {
                shape_id: S::ID,
                prompt: &prompt,
                output_schema: &self.output_schema,
            };
            let text = match tokio::time::timeout(self.policy.timeout, self.backend.generate(request))
                .await
            {
                Ok(Ok(text)) => text,
                Ok(Err(BackendError::NoOutput)) => {
                    last_err = Some(FlowError::output("model returned no structured output"));
                    continue;
                }
                Ok(Err(e)) if !e.is_retryable() => {
                    info!(flow = S::ID, attempt, error = %e, "model invocation failed permanently");
                    return run.fail(FlowError::ModelInvocation(e));
                }
                Ok(Err(e)) => {
                    info!(flow = S::ID, attempt, error = %e, "model invocation failed");
                    last_err = Some(FlowError::ModelInvocation(e));
                    continue;
                }
                Err(_) => {
                    info!(flow = S::ID, attempt, "model invocation timed out");
                    last_err = Some(FlowError::ModelInvocation(BackendError::Timeout(
                        self.policy.timeout,
                    )));
                    continue;
                }
            };

            run.enter::<Value>(FlowState::ValidatingOutput { attempt });
            match self.check_output(&text) {
                Ok(value) => {
                    debug!(flow = S::ID, attempt, "flow succeeded");
                    return run.enter(FlowState::Succeeded(value));
                }
                Err(err) => {
                    if let FlowError::ModelOutput { violations, .. } = &err {
                        if !violations.is_empty() {
                            prompt = with_feedback(&base_prompt, violations);
                        }
                    }
                    debug!(flow = S::ID, attempt, "output rejected: {err}");
                    last_err = Some(err);
                }
            }
        }

        run.fail(last_err.unwrap_or_else(|| FlowError::output("no attempt was made")))
    }

    fn check_output(&self, text: &str) -> Result<Value, FlowError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| FlowError::output(format!("model did not return valid JSON: {e}")))?;

        if let Err(violations) = validate(&self.output_schema, &value) {
            return Err(FlowError::ModelOutput {
                reason: format!("output failed schema: {}", join_errors(&violations)),
                violations,
            });
        }

        // The typed form must also accept it, so `run` can never fail later.
        serde_json::from_value::<S::Output>(value.clone())
            .map_err(|e| FlowError::output(format!("output does not match {}: {e}", S::ID)))?;

        Ok(value)
    }
}

fn to_value<T: Serialize>(input: &T) -> Result<Value, FlowError> {
    serde_json::to_value(input).map_err(|e| {
        FlowError::Validation(vec![ValidationError::Invalid {
            path: "$".to_string(),
            reason: e.to_string(),
        }])
    })
}

/// Retry prompt: the original prompt plus the problems found last time.
fn with_feedback(prompt: &Prompt, violations: &[ValidationError]) -> Prompt {
    let mut retry = prompt.clone();
    retry.push_text("\n\nYour previous JSON had these problems:\n");
    for v in violations {
        retry.push_text(format!("- {v}\n"));
    }
    retry.push_text("\nFix these issues and output ONLY corrected JSON.\n");
    retry
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowInfo {
    pub id: &'static str,
    pub description: &'static str,
}

/// The four feature flows over one injected backend.
#[derive(Clone)]
pub struct FlowRegistry {
    symptom_analysis: Flow<SymptomAnalysis>,
    risk_score: Flow<RiskScore>,
    clinical_transcription: Flow<ClinicalTranscription>,
    xray_analysis: Flow<XrayAnalysis>,
}

impl FlowRegistry {
    pub fn new(backend: Arc<dyn ModelBackend>, policy: InvocationPolicy) -> Self {
        Self {
            symptom_analysis: Flow::new(backend.clone()).with_policy(policy),
            risk_score: Flow::new(backend.clone()).with_policy(policy),
            clinical_transcription: Flow::new(backend.clone()).with_policy(policy),
            xray_analysis: Flow::new(backend).with_policy(policy),
        }
    }

    pub fn flows(&self) -> Vec<FlowInfo> {
        fn info<S: Shape>() -> FlowInfo {
            FlowInfo {
                id: S::ID,
                description: S::DESCRIPTION,
            }
        }
        vec![
            info::<SymptomAnalysis>(),
            info::<RiskScore>(),
            info::<ClinicalTranscription>(),
            info::<XrayAnalysis>(),
        ]
    }

    pub async fn run(&self, flow_id: &str, input: Value) -> Result<Value, FlowError> {
        match flow_id {
            shapes::symptom_analysis::ID => self.symptom_analysis.run_value(input).await,
            shapes::risk_score::ID => self.risk_score.run_value(input).await,
            shapes::clinical_transcription::ID => {
                self.clinical_transcription.run_value(input).await
            }
            shapes::xray_analysis::ID => self.xray_analysis.run_value(input).await,
            other => Err(FlowError::UnknownFlow(other.to_string())),
        }
    }

    pub fn symptom_analysis(&self) -> &Flow<SymptomAnalysis> {
        &self.symptom_analysis
    }

    pub fn risk_score(&self) -> &Flow<RiskScore> {
        &self.risk_score
    }

    pub fn clinical_transcription(&self) -> &Flow<ClinicalTranscription> {
        &self.clinical_transcription
    }

    pub fn xray_analysis(&self) -> &Flow<XrayAnalysis> {
        &self.xray_analysis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replays scripted replies and records the prompts it was given.
    struct Scripted {
        replies: Mutex<Vec<Result<String, BackendError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, BackendError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into_iter().rev().collect()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ModelBackend for Scripted {
        async fn generate(&self, request: ModelRequest<'_>) -> Result<String, BackendError> {
            self.prompts.lock().unwrap().push(request.prompt.render_text());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(BackendError::NoOutput))
        }
    }

    struct Slow;

    #[async_trait]
    impl ModelBackend for Slow {
        async fn generate(&self, _request: ModelRequest<'_>) -> Result<String, BackendError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("{}".to_string())
        }
    }

    const GOOD: &str = r#"{"potentialCauses":"Viral infection","recommendedNextSteps":"Rest"}"#;

    fn symptoms() -> Value {
        json!({ "symptoms": "persistent cough and fever" })
    }

    #[tokio::test]
    async fn succeeds_on_valid_output() {
        let backend = Scripted::new(vec![Ok(GOOD.to_string())]);
        let flow = Flow::<SymptomAnalysis>::new(backend.clone());

        let state = flow.execute(symptoms()).await;
        assert!(state.is_terminal());
        assert_eq!(state.name(), "succeeded");
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn no_output_is_a_model_output_error() {
        let backend = Scripted::new(vec![Err(BackendError::NoOutput)]);
        let flow = Flow::<SymptomAnalysis>::new(backend);
        let err = flow.run_value(symptoms()).await.unwrap_err();
        assert_eq!(err.kind(), "model_output");
    }

    #[tokio::test]
    async fn non_json_output_is_rejected() {
        let backend = Scripted::new(vec![Ok("Potential causes: flu".to_string())]);
        let flow = Flow::<SymptomAnalysis>::new(backend);
        let err = flow.run_value(symptoms()).await.unwrap_err();
        assert!(matches!(err, FlowError::ModelOutput { .. }));
    }

    #[tokio::test]
    async fn transport_errors_are_not_retried_by_default() {
        let backend = Scripted::new(vec![
            Err(BackendError::Status {
                status: 429,
                body: "quota".into(),
            }),
            Ok(GOOD.to_string()),
        ]);
        let flow = Flow::<SymptomAnalysis>::new(backend.clone());
        let err = flow.run_value(symptoms()).await.unwrap_err();
        assert_eq!(err.kind(), "model_invocation");
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn client_errors_fail_without_retry() {
        let backend = Scripted::new(vec![
            Err(BackendError::Status {
                status: 401,
                body: "bad key".into(),
            }),
            Ok(GOOD.to_string()),
        ]);
        let flow = Flow::<SymptomAnalysis>::new(backend.clone()).with_policy(InvocationPolicy {
            timeout: DEFAULT_TIMEOUT,
            max_attempts: 3,
        });
        let err = flow.run_value(symptoms()).await.unwrap_err();
        assert!(matches!(
            err,
            FlowError::ModelInvocation(BackendError::Status { status: 401, .. })
        ));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn unsupported_media_fails_without_retry() {
        let backend = Scripted::new(vec![
            Err(BackendError::UnsupportedMedia {
                provider: "ollama",
                mime_type: "audio/webm".into(),
            }),
            Ok(GOOD.to_string()),
        ]);
        let flow = Flow::<SymptomAnalysis>::new(backend.clone()).with_policy(InvocationPolicy {
            timeout: DEFAULT_TIMEOUT,
            max_attempts: 3,
        });
        let err = flow.run_value(symptoms()).await.unwrap_err();
        assert_eq!(err.kind(), "model_invocation");
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let backend = Scripted::new(vec![
            Err(BackendError::Status {
                status: 503,
                body: "overloaded".into(),
            }),
            Ok(GOOD.to_string()),
        ]);
        let flow = Flow::<SymptomAnalysis>::new(backend.clone()).with_policy(InvocationPolicy {
            timeout: DEFAULT_TIMEOUT,
            max_attempts: 3,
        });
        let out = flow.run_value(symptoms()).await.unwrap();
        assert_eq!(out["potentialCauses"], "Viral infection");
        assert_eq!(backend.calls(), 2);
    }

    #[test]
    fn retryable_backend_errors() {
        let status = |status| BackendError::Status {
            status,
            body: String::new(),
        };
        assert!(status(429).is_retryable());
        assert!(status(500).is_retryable());
        assert!(!status(400).is_retryable());
        assert!(!status(403).is_retryable());
        assert!(BackendError::Timeout(DEFAULT_TIMEOUT).is_retryable());
        assert!(!BackendError::Config("no key".into()).is_retryable());
    }

    #[tokio::test]
    async fn bounded_retry_feeds_back_violations() {
        let backend = Scripted::new(vec![
            Ok(r#"{"potentialCauses":"Flu"}"#.to_string()),
            Ok(GOOD.to_string()),
        ]);
        let flow = Flow::<SymptomAnalysis>::new(backend.clone()).with_policy(InvocationPolicy {
            timeout: DEFAULT_TIMEOUT,
            max_attempts: 3,
        });

        let out = flow.run_value(symptoms()).await.unwrap();
        assert_eq!(out["recommendedNextSteps"], "Rest");

        let prompts = backend.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(!prompts[0].contains("previous JSON"));
        assert!(prompts[1].contains("Missing required field at path $.recommendedNextSteps"));
    }

    #[tokio::test]
    async fn retries_stop_at_the_bound() {
        let backend = Scripted::new(vec![
            Ok("{}".to_string()),
            Ok("{}".to_string()),
            Ok(GOOD.to_string()),
        ]);
        let flow = Flow::<SymptomAnalysis>::new(backend.clone()).with_policy(InvocationPolicy {
            timeout: DEFAULT_TIMEOUT,
            max_attempts: 2,
        });
        let err = flow.run_value(symptoms()).await.unwrap_err();
        assert_eq!(err.kind(), "model_output");
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_a_model_invocation_error() {
        let flow = Flow::<SymptomAnalysis>::new(Arc::new(Slow)).with_policy(InvocationPolicy {
            timeout: Duration::from_secs(5),
            max_attempts: 1,
        });
        let err = flow.run_value(symptoms()).await.unwrap_err();
        assert!(matches!(
            err,
            FlowError::ModelInvocation(BackendError::Timeout(d)) if d == Duration::from_secs(5)
        ));
    }

    #[tokio::test]
    async fn typed_run_returns_typed_output() {
        let backend = Scripted::new(vec![Ok(GOOD.to_string())]);
        let flow = Flow::<SymptomAnalysis>::new(backend);
        let input = serde_json::from_value(symptoms()).unwrap();
        let out = flow.run(&input).await.unwrap();
        assert_eq!(out.potential_causes, "Viral infection");
    }

    #[tokio::test]
    async fn registry_rejects_unknown_flow() {
        let registry = FlowRegistry::new(Scripted::new(vec![]), InvocationPolicy::default());
        let err = registry.run("tarot-reading", json!({})).await.unwrap_err();
        assert!(matches!(err, FlowError::UnknownFlow(id) if id == "tarot-reading"));
        assert_eq!(registry.flows().len(), 4);
    }
}
