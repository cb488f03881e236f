//! aport-guardrails: pre-tool-call hook.
//!
//! Reads `{tool_name, tool_input, passport?, policy?, request_id?}` as JSON
//! from stdin and writes the decision document to stdout.
//!
//! Exit status: 0 allow, 2 deny, 1 unreadable input or configuration.

use std::io::Read;
use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;
use serde_json::Value;
use simplelog::LevelFilter;

use aport_guardrails::config::Environment;
use aport_guardrails::{
    DEFAULT_FRAMEWORK, Evaluator, GuardrailViolation, Passport, PolicyRef, ToolCallContext, logging,
};

#[derive(Parser)]
#[command(name = "aport-guardrails")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Framework whose default passport location and config directory apply
    #[arg(short, long, default_value = DEFAULT_FRAMEWORK)]
    framework: String,

    /// Diagnostics level on stderr (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    log_level: LevelFilter,

    /// Print a deny as a guardrail violation instead of a decision
    #[arg(long)]
    strict: bool,
}

#[derive(Deserialize)]
struct HookInput {
    tool_name: Option<String>,
    #[serde(default)]
    tool_input: Value,
    passport: Option<Value>,
    policy: Option<Value>,
    request_id: Option<String>,
}

const EXIT_ALLOW: i32 = 0;
const EXIT_FAULT: i32 = 1;
const EXIT_DENY: i32 = 2;

fn main() {
    let cli = Cli::parse();
    logging::init(cli.log_level);

    let mut input = String::new();
    if std::io::stdin().read_to_string(&mut input).is_err() {
        eprintln!("failed to read stdin");
        std::process::exit(EXIT_FAULT);
    }

    let hook_input: HookInput = match serde_json::from_str(&input) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("JSON parse error: {e}");
            std::process::exit(EXIT_FAULT);
        }
    };

    let Some(tool) = hook_input.tool_name.filter(|t| !t.is_empty()) else {
        eprintln!("missing tool_name");
        std::process::exit(EXIT_FAULT);
    };

    let env = Environment::capture();
    let home = env.home.clone();
    let evaluator = Evaluator::with_options(cli.framework, cli.config, env);

    let mut context = ToolCallContext::from_input(tool.as_str(), hook_input.tool_input);
    if let Some(id) = hook_input.request_id {
        context = context.with_request_id(id);
    }
    let passport = hook_input.passport.and_then(Passport::from_value);
    let policy = hook_input.policy.as_ref().map(PolicyRef::from_value);

    let decision = match evaluator.verify_sync(passport.as_ref(), policy.as_ref(), &context) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("aport-guardrails: {e}");
            std::process::exit(EXIT_FAULT);
        }
    };

    if let Some(home) = &home {
        logging::log_decision(home, &tool, &decision);
    }

    let output = match GuardrailViolation::from_decision(&decision) {
        Some(violation) if cli.strict => serde_json::to_string(&serde_json::json!({
            "violation": {
                "code": violation.code,
                "message": violation.message,
                "reasons": violation.reasons,
                "request_id": violation.request_id,
            }
        })),
        _ => serde_json::to_string(&decision),
    };
    match output {
        Ok(s) => println!("{s}"),
        Err(e) => {
            eprintln!("failed to encode decision: {e}");
            std::process::exit(EXIT_FAULT);
        }
    }

    std::process::exit(if decision.is_allowed() { EXIT_ALLOW } else { EXIT_DENY });
}
