//! Stage contract
//!
//! The uniform interface every stage handler conforms to. Concrete
//! implementations (LLM research, TTS, rendering, publishing) live outside
//! this crate; the orchestrator and workers only ever see this trait.

pub mod handoff;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use uuid::Uuid;

use crate::registry::StageName;

/// Everything a handler needs to execute one stage.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub pipeline_id: Uuid,
    pub stage_id: Uuid,
    /// Stage input assembled by the worker (topic, description, parameters).
    pub input: serde_json::Value,
    /// Output of the predecessor stage, `None` for the first stage.
    pub previous_output: Option<serde_json::Value>,
    /// When set, the handler must not perform externally visible work.
    pub dry_run: bool,
}

/// Outcome of input validation. Validation is synchronous and pure; a
/// failed validation never mutates state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    Invalid(Vec<String>),
}

impl Validation {
    pub fn ok() -> Self {
        Validation::Valid
    }

    pub fn fail(errors: Vec<String>) -> Self {
        Validation::Invalid(errors)
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Validation::Valid)
    }

    /// Validation errors, empty when valid.
    pub fn errors(&self) -> &[String] {
        match self {
            Validation::Valid => &[],
            Validation::Invalid(errors) => errors,
        }
    }
}

/// Result of a stage execution
#[derive(Debug, Clone)]
pub struct StageResult {
    pub success: bool,
    pub output: Option<serde_json::Value>,
    pub artifacts: Vec<String>,
    pub metadata: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl StageResult {
    /// Creates a successful result carrying the stage output.
    pub fn ok(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            artifacts: Vec::new(),
            metadata: None,
            error: None,
        }
    }

    /// Creates a successful result with artifact handles.
    pub fn ok_with_artifacts(output: serde_json::Value, artifacts: Vec<String>) -> Self {
        Self {
            success: true,
            output: Some(output),
            artifacts,
            metadata: None,
            error: None,
        }
    }

    /// Attaches opaque handler metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Creates a failed result with an error message.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            artifacts: Vec::new(),
            metadata: None,
            error: Some(error.into()),
        }
    }
}

/// Trait for stage handlers.
///
/// Handlers must be retry-safe at the stage level: re-running after a
/// transient failure produces a functionally equivalent output. `execute`
/// must not leave orphan external mutations on failure.
#[async_trait]
pub trait StageHandler: Send + Sync + Debug {
    /// The stage this handler implements.
    fn stage(&self) -> StageName;

    /// Validates the stage input. Pure; never mutates state.
    fn validate(&self, input: &serde_json::Value) -> Validation;

    /// Performs the stage's work.
    async fn execute(&self, ctx: StageContext) -> StageResult;
}

/// Registry of stage handlers keyed by stage name.
///
/// Handlers are registered at startup. A worker only claims stages it has a
/// handler for; the orchestrator never executes handlers itself.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<StageName, Arc<dyn StageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers a handler under its own stage name. A second handler for
    /// the same stage replaces the first.
    pub fn register(&mut self, handler: Arc<dyn StageHandler>) {
        self.handlers.insert(handler.stage(), handler);
    }

    pub fn get(&self, stage: StageName) -> Option<Arc<dyn StageHandler>> {
        self.handlers.get(&stage).cloned()
    }

    /// The stages this registry can execute, in registry order.
    pub fn capabilities(&self) -> Vec<StageName> {
        StageName::all()
            .iter()
            .copied()
            .filter(|stage| self.handlers.contains_key(stage))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct EchoHandler {
        stage: StageName,
    }

    #[async_trait]
    impl StageHandler for EchoHandler {
        fn stage(&self) -> StageName {
            self.stage
        }

        fn validate(&self, input: &serde_json::Value) -> Validation {
            if input.get("topic").and_then(|t| t.as_str()).is_some() {
                Validation::ok()
            } else {
                Validation::fail(vec!["missing topic".to_string()])
            }
        }

        async fn execute(&self, ctx: StageContext) -> StageResult {
            StageResult::ok(json!({ "echo": ctx.input }))
        }
    }

    #[test]
    fn test_registry_capabilities_follow_stage_order() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(EchoHandler {
            stage: StageName::Voice,
        }));
        registry.register(Arc::new(EchoHandler {
            stage: StageName::Research,
        }));

        assert_eq!(
            registry.capabilities(),
            vec![StageName::Research, StageName::Voice]
        );
        assert!(registry.get(StageName::Publish).is_none());
    }

    #[test]
    fn test_validation_errors() {
        let handler = EchoHandler {
            stage: StageName::Research,
        };
        assert!(handler.validate(&json!({ "topic": "cats" })).is_valid());

        let invalid = handler.validate(&json!({}));
        assert!(!invalid.is_valid());
        assert_eq!(invalid.errors(), ["missing topic"]);
    }

    #[tokio::test]
    async fn test_execute_returns_output() {
        let handler = EchoHandler {
            stage: StageName::Research,
        };
        let ctx = StageContext {
            pipeline_id: Uuid::new_v4(),
            stage_id: Uuid::new_v4(),
            input: json!({ "topic": "cats" }),
            previous_output: None,
            dry_run: false,
        };

        let result = handler.execute(ctx).await;
        assert!(result.success);
        assert!(result.output.is_some());
        assert!(result.error.is_none());
    }

    #[test]
    fn test_result_constructors() {
        let ok = StageResult::ok(json!({"k": 1}));
        assert!(ok.success && ok.error.is_none());

        let with_artifacts = StageResult::ok_with_artifacts(
            json!({"audio_url": "s3://bucket/voice.mp3"}),
            vec!["s3://bucket/voice.mp3".to_string()],
        )
        .with_metadata(json!({"voice": "narrator-2"}));
        assert_eq!(with_artifacts.artifacts.len(), 1);
        assert!(with_artifacts.metadata.is_some());

        let failed = StageResult::failed("llm_timeout");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("llm_timeout"));
    }
}
