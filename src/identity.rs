//! Which passport and which guardrail script govern a call.

use std::path::{Path, PathBuf};

use crate::config::{Environment, EvaluationConfig};
use crate::mapping;
use crate::validate::{sanitize_log_value, validate_passport_path};

/// Where the guardrail script is installed when nothing overrides it.
pub const DEFAULT_GUARDRAIL_SCRIPT: &str = "~/.openclaw/.skills/aport-guardrail.sh";

/// Resolve the passport file for a call.
///
/// Precedence:
/// 1. The configured path (file or `OPENCLAW_PASSPORT_FILE`), if it passes
///    path validation. It need not exist yet. A rejected path is logged and
///    skipped.
/// 2. The default path of the configured framework, if valid and present.
/// 3. The first valid, present default of any framework.
///
/// `None` means no local identity is available.
pub fn resolve_passport_path(config: &EvaluationConfig, env: &Environment) -> Option<PathBuf> {
    let policy = env.path_policy();

    if let Some(raw) = &config.passport_path {
        let path = env.expand(raw);
        match validate_passport_path(&path, &policy) {
            Ok(()) => return Some(path),
            Err(e) => log::warn!(
                "ignoring configured passport path {}: {e}",
                sanitize_log_value(raw, "passport_path")
            ),
        }
    }

    let usable = |raw: &str| {
        let path = env.expand(raw);
        (validate_passport_path(&path, &policy).is_ok() && path.is_file()).then_some(path)
    };

    if let Some(raw) = mapping::default_passport_path(config.framework())
        && let Some(path) = usable(raw)
    {
        return Some(path);
    }

    let found = mapping::default_passport_paths()
        .iter()
        .find_map(|entry| usable(&entry.path));
    if found.is_none() {
        log::debug!("no passport found for framework {}", config.framework());
    }
    found
}

/// Resolve the guardrail script: the configured path if it exists, else the
/// default install location. The result is canonical (no symlinks) and exists.
pub fn resolve_guardrail_script(config: &EvaluationConfig, env: &Environment) -> Option<PathBuf> {
    if let Some(raw) = config.guardrail_script.as_deref() {
        let path = env.expand(raw);
        if let Some(resolved) = existing_script(&path) {
            return Some(resolved);
        }
        log::warn!(
            "guardrail script {} not found, trying the default location",
            sanitize_log_value(raw, "guardrail_script")
        );
    }
    existing_script(&env.expand(DEFAULT_GUARDRAIL_SCRIPT))
}

fn existing_script(path: &Path) -> Option<PathBuf> {
    if !path.is_file() {
        log::debug!("guardrail script {} not found", path.display());
        return None;
    }
    match std::fs::canonicalize(path) {
        Ok(resolved) => Some(resolved),
        Err(e) => {
            log::warn!("cannot resolve guardrail script {}: {e}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn scratch_home() -> tempfile::TempDir {
        tempfile::Builder::new().prefix("aport-").tempdir_in("/tmp").unwrap()
    }

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn config_for(framework: &str) -> EvaluationConfig {
        let mut config = EvaluationConfig::default_config();
        config.framework = Some(framework.into());
        config
    }

    #[test]
    fn explicit_path_accepted_before_it_exists() {
        let home = scratch_home();
        let env = Environment::isolated(home.path());
        let mut config = config_for("openclaw");
        config.passport_path = Some("~/.aport/new/passport.json".into());
        assert_eq!(
            resolve_passport_path(&config, &env),
            Some(home.path().join(".aport/new/passport.json"))
        );
    }

    #[test]
    fn rejected_explicit_path_falls_through() {
        let home = scratch_home();
        let env = Environment::isolated(home.path());
        write(&home.path().join(".openclaw/passport.json"), "{}");

        let mut config = config_for("openclaw");
        config.passport_path = Some("~/.aport/../../etc/passwd".into());
        assert_eq!(
            resolve_passport_path(&config, &env),
            Some(home.path().join(".openclaw/passport.json"))
        );
    }

    #[test]
    fn framework_default_preferred() {
        let home = scratch_home();
        let env = Environment::isolated(home.path());
        write(&home.path().join(".openclaw/passport.json"), "{}");
        write(&home.path().join(".aport/crewai/passport.json"), "{}");

        assert_eq!(
            resolve_passport_path(&config_for("crewai"), &env),
            Some(home.path().join(".aport/crewai/passport.json"))
        );
        // Unknown framework: first present default in table order
        assert_eq!(
            resolve_passport_path(&config_for("autogen"), &env),
            Some(home.path().join(".openclaw/passport.json"))
        );
    }

    #[test]
    fn nothing_found() {
        let home = scratch_home();
        let env = Environment::isolated(home.path());
        assert_eq!(resolve_passport_path(&config_for("openclaw"), &env), None);
    }

    #[test]
    fn script_default_and_override() {
        let home = scratch_home();
        let env = Environment::isolated(home.path());
        let config = config_for("openclaw");
        assert_eq!(resolve_guardrail_script(&config, &env), None);

        let default = home.path().join(".openclaw/.skills/aport-guardrail.sh");
        write(&default, "#!/bin/sh\n");
        assert_eq!(
            resolve_guardrail_script(&config, &env),
            Some(std::fs::canonicalize(&default).unwrap())
        );

        let custom = home.path().join("bin/guard.sh");
        write(&custom, "#!/bin/sh\n");
        let mut config = config;
        config.guardrail_script = Some("~/bin/guard.sh".into());
        assert_eq!(
            resolve_guardrail_script(&config, &env),
            Some(std::fs::canonicalize(&custom).unwrap())
        );
    }

    #[test]
    fn missing_override_falls_back_to_default() {
        let home = scratch_home();
        let env = Environment::isolated(home.path());
        let mut config = config_for("openclaw");
        config.guardrail_script = Some("/nonexistent/guard.sh".into());
        assert_eq!(resolve_guardrail_script(&config, &env), None);

        let default = home.path().join(".openclaw/.skills/aport-guardrail.sh");
        write(&default, "#!/bin/sh\n");
        assert_eq!(
            resolve_guardrail_script(&config, &env),
            Some(std::fs::canonicalize(&default).unwrap())
        );
    }

    #[cfg(unix)]
    #[test]
    fn script_symlink_resolved() {
        let home = scratch_home();
        let real = home.path().join("real/guard.sh");
        write(&real, "#!/bin/sh\n");
        let link = home.path().join("guard-link.sh");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let mut config = config_for("openclaw");
        config.guardrail_script = Some(link.display().to_string());
        let env = Environment::isolated(home.path());
        assert_eq!(
            resolve_guardrail_script(&config, &env),
            Some(std::fs::canonicalize(&real).unwrap())
        );
    }
}
