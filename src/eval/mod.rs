pub mod codes;
pub mod context;
pub mod decision;

pub use codes::ErrorCode;
pub use context::{Passport, PolicyPack, PolicyRef, ToolCallContext, is_full_policy_pack};
pub use decision::{Decision, Reason};

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use serde_json::Value;

use crate::backend::local::LocalBackend;
use crate::backend::remote::{RemoteBackend, RemoteCall};
use crate::config::{self, Environment, EvaluationConfig, Mode};
use crate::error::{ConfigError, Error, GuardrailViolation};
use crate::identity;
use crate::mapping;
use crate::validate::{
    ValidationResult, sanitize_log_value, validate_agent_id, validate_context_structure,
    validate_passport_path, validate_tool_name,
};

/// A long-lived verification handle, typically one per agent session.
///
/// Cloning is cheap and clones share the configuration cache. The
/// configuration is read on first use and kept for the handle's lifetime;
/// build a new evaluator to pick up changes.
#[derive(Debug, Clone)]
pub struct Evaluator {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    framework: String,
    config_path: Option<PathBuf>,
    env: Environment,
    config: OnceLock<Arc<EvaluationConfig>>,
}

impl Evaluator {
    /// An evaluator for `framework` over the current process environment.
    pub fn new(framework: impl Into<String>) -> Self {
        Self::with_options(framework, None, Environment::capture())
    }

    pub fn with_environment(framework: impl Into<String>, env: Environment) -> Self {
        Self::with_options(framework, None, env)
    }

    /// `config_path` is used when it names a file; otherwise the usual
    /// discovery applies.
    pub fn with_options(
        framework: impl Into<String>,
        config_path: Option<PathBuf>,
        env: Environment,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                framework: framework.into(),
                config_path,
                env,
                config: OnceLock::new(),
            }),
        }
    }

    pub fn framework(&self) -> &str {
        &self.inner.framework
    }

    /// The resolved configuration, loading it on first call.
    pub fn config(&self) -> Result<Arc<EvaluationConfig>, ConfigError> {
        self.inner.config()
    }

    /// Decide whether a tool call may run, without blocking the async runtime.
    ///
    /// Subprocess and network work run on the blocking pool. Only a corrupt
    /// configuration file is an error; every other failure is a deny.
    pub async fn verify(
        &self,
        passport: Option<Passport>,
        policy: Option<PolicyRef>,
        context: ToolCallContext,
    ) -> Result<Decision, ConfigError> {
        let inner = Arc::clone(&self.inner);
        let request_id = context.request_id().map(str::to_string);
        let worker = tokio::task::spawn_blocking(move || -> Result<Decision, ConfigError> {
            let config = inner.config()?;
            Ok(inner.decide(&config, passport.as_ref(), policy.as_ref(), &context))
        });
        match worker.await {
            Ok(result) => result,
            Err(e) => {
                log::error!("evaluation worker failed: {e}");
                Ok(
                    Decision::deny(ErrorCode::EvaluatorError, format!("Evaluation worker failed: {e}"))
                        .with_request_id(request_id.as_deref()),
                )
            }
        }
    }

    /// Blocking twin of [`verify`](Self::verify) with the same decisions.
    pub fn verify_sync(
        &self,
        passport: Option<&Passport>,
        policy: Option<&PolicyRef>,
        context: &ToolCallContext,
    ) -> Result<Decision, ConfigError> {
        let config = self.inner.config()?;
        Ok(self.inner.decide(&config, passport, policy, context))
    }

    /// Like [`verify`](Self::verify), but a deny is returned as
    /// [`Error::Violation`].
    pub async fn verify_strict(
        &self,
        passport: Option<Passport>,
        policy: Option<PolicyRef>,
        context: ToolCallContext,
    ) -> Result<Decision, Error> {
        let decision = self.verify(passport, policy, context).await?;
        into_strict(decision)
    }

    pub fn verify_strict_sync(
        &self,
        passport: Option<&Passport>,
        policy: Option<&PolicyRef>,
        context: &ToolCallContext,
    ) -> Result<Decision, Error> {
        let decision = self.verify_sync(passport, policy, context)?;
        into_strict(decision)
    }
}

fn into_strict(decision: Decision) -> Result<Decision, Error> {
    match GuardrailViolation::from_decision(&decision) {
        Some(violation) => Err(violation.into()),
        None => Ok(decision),
    }
}

impl Inner {
    fn config(&self) -> Result<Arc<EvaluationConfig>, ConfigError> {
        if let Some(cached) = self.config.get() {
            return Ok(Arc::clone(cached));
        }
        // Concurrent first loads may both read the file; the first stored wins.
        let loaded = Arc::new(config::load_config(
            self.config_path.as_deref(),
            &self.env,
            &self.framework,
        )?);
        Ok(Arc::clone(self.config.get_or_init(|| loaded)))
    }

    fn decide(
        &self,
        config: &EvaluationConfig,
        passport: Option<&Passport>,
        policy: Option<&PolicyRef>,
        context: &ToolCallContext,
    ) -> Decision {
        let pack = policy.and_then(PolicyRef::as_pack);
        let pack_id = match pack {
            Some(p) => p.id.as_str(),
            None => mapping::tool_to_pack_id(context.tool()),
        };

        let decision = match config.mode {
            Mode::Api => self.decide_remote(config, passport, pack, context),
            Mode::Local => self.decide_local(config, context),
        };
        log::debug!(
            "{} {} [{}] {}",
            decision.as_str(),
            sanitize_log_value(context.tool(), "tool"),
            pack_id,
            decision.codes().join(",")
        );
        decision
            .with_request_id(context.request_id())
            .with_policy_id(pack_id)
    }

    /// Tool name and context checks shared by both backends.
    fn validate_call(
        &self,
        config: &EvaluationConfig,
        context: &ToolCallContext,
        value: &Value,
    ) -> ValidationResult {
        validate_tool_name(context.tool())?;
        validate_context_structure(value, config.max_context_bytes)
    }

    fn decide_remote(
        &self,
        config: &EvaluationConfig,
        passport: Option<&Passport>,
        pack: Option<&PolicyPack>,
        context: &ToolCallContext,
    ) -> Decision {
        let value = context.to_value();
        if let Err(e) = self.validate_call(config, context, &value) {
            return Decision::denied(e.to_reason());
        }

        let agent_id = config
            .agent_id
            .as_deref()
            .or_else(|| passport.and_then(Passport::agent_id));
        if let Some(id) = agent_id
            && let Err(e) = validate_agent_id(id)
        {
            log::warn!(
                "agent id {} looks malformed ({}), forwarding anyway",
                sanitize_log_value(id, "agent"),
                e.code
            );
        }

        let document = match agent_id {
            Some(_) => None,
            None => identity::resolve_passport_path(config, &self.env)
                .and_then(|path| Passport::load(&path)),
        };
        if agent_id.is_none() && document.is_none() {
            return Decision::deny(
                ErrorCode::ApiError,
                "Agent identity required: configure an agent_id or install a passport",
            );
        }

        let backend = RemoteBackend {
            api_url: &config.api_url,
            api_key: config.api_key.as_deref(),
            timeout: config.api_timeout(),
            verify_ssl: config.verify_ssl,
        };
        let call = RemoteCall {
            pack_id: mapping::tool_to_pack_id(context.tool()),
            context: &value,
            agent_id,
            passport: document.as_ref(),
            policy: pack,
        };
        backend.evaluate(&call)
    }

    fn decide_local(&self, config: &EvaluationConfig, context: &ToolCallContext) -> Decision {
        let passport = identity::resolve_passport_path(config, &self.env);
        let script = identity::resolve_guardrail_script(config, &self.env);
        let (Some(passport), Some(script)) = (passport, script) else {
            if config.fail_open_when_missing_config {
                log::warn!("passport or guardrail script missing, allowing (fail-open)");
                return Decision::allowed(Vec::new());
            }
            return Decision::deny(
                ErrorCode::Misconfigured,
                "Passport or guardrail script not found; denying by default. Set \
                 fail_open_when_missing_config or APORT_FAIL_OPEN_WHEN_MISSING_CONFIG=1 to allow \
                 instead.",
            );
        };

        let value = context.to_value();
        if let Err(e) = self.validate_call(config, context, &value) {
            return Decision::denied(e.to_reason());
        }
        // Checked again right before the path reaches the subprocess.
        if let Err(e) = validate_passport_path(&passport, &self.env.path_policy()) {
            return Decision::denied(e.to_reason());
        }

        LocalBackend {
            script: &script,
            passport: &passport,
            timeout: config.subprocess_timeout(),
        }
        .evaluate(context.tool(), &value)
    }
}
