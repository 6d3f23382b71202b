//! Environment-driven configuration for the `amelia` binary.
//!
//! Unlike the teacher's `GatorConfig`, there is no on-disk config file or
//! token-secret bootstrap here: every tunable is either a CLI flag or one of
//! the `AMELIA_*` environment variables documented in spec §6. `resolve`
//! mirrors the teacher's precedence (CLI flag, then env var, then a
//! compile-time default) without the TOML round trip, since nothing here
//! needs to survive being written back to disk.

use std::time::Duration;

use amelia_core::OrchestratorConfig;
use amelia_db::config::DbConfig;

/// Fully resolved configuration for a single `amelia` invocation.
#[derive(Debug, Clone)]
pub struct AmeliaConfig {
    pub db: DbConfig,
    pub orchestrator: OrchestratorConfig,
    pub ws_queue_depth: usize,
}

impl AmeliaConfig {
    /// Resolve configuration from the environment, with `cli_db_url`
    /// (the `--database-url` flag) taking precedence over
    /// `AMELIA_DATABASE_URL`.
    pub fn resolve(cli_db_url: Option<&str>) -> Self {
        let db = match cli_db_url {
            Some(url) => DbConfig::new(url),
            None => DbConfig::from_env(),
        };

        let orchestrator = OrchestratorConfig {
            max_concurrent_workflows: env_usize("AMELIA_MAX_CONCURRENT_WORKFLOWS", 5),
            max_pipeline_steps: env_u32("AMELIA_MAX_PIPELINE_STEPS", 500),
            cancel_grace: Duration::from_secs(env_u64("AMELIA_CANCEL_GRACE_SECONDS", 5)),
            default_max_iterations: 5,
        };

        let ws_queue_depth = env_usize("AMELIA_WS_QUEUE_DEPTH", 256);

        Self {
            db,
            orchestrator,
            ws_queue_depth,
        }
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Env vars are process-global; serialize tests that touch them so a
    // parallel test run can't observe a half-set value from another test.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[test]
    fn defaults_with_no_env() {
        let _guard = lock_env();
        for var in [
            "AMELIA_DATABASE_URL",
            "AMELIA_MAX_CONCURRENT_WORKFLOWS",
            "AMELIA_CANCEL_GRACE_SECONDS",
            "AMELIA_MAX_PIPELINE_STEPS",
            "AMELIA_WS_QUEUE_DEPTH",
        ] {
            unsafe { std::env::remove_var(var) };
        }

        let cfg = AmeliaConfig::resolve(None);
        assert_eq!(cfg.db.database_url, DbConfig::DEFAULT_URL);
        assert_eq!(cfg.orchestrator.max_concurrent_workflows, 5);
        assert_eq!(cfg.orchestrator.max_pipeline_steps, 500);
        assert_eq!(cfg.orchestrator.cancel_grace, Duration::from_secs(5));
        assert_eq!(cfg.ws_queue_depth, 256);
    }

    #[test]
    fn cli_flag_overrides_env() {
        let _guard = lock_env();
        unsafe { std::env::set_var("AMELIA_DATABASE_URL", "postgresql://envhost/db") };

        let cfg = AmeliaConfig::resolve(Some("postgresql://clihost/db"));
        assert_eq!(cfg.db.database_url, "postgresql://clihost/db");

        unsafe { std::env::remove_var("AMELIA_DATABASE_URL") };
    }

    #[test]
    fn env_vars_are_honored() {
        let _guard = lock_env();
        unsafe {
            std::env::set_var("AMELIA_MAX_CONCURRENT_WORKFLOWS", "9");
            std::env::set_var("AMELIA_CANCEL_GRACE_SECONDS", "30");
            std::env::set_var("AMELIA_MAX_PIPELINE_STEPS", "42");
            std::env::set_var("AMELIA_WS_QUEUE_DEPTH", "64");
        }

        let cfg = AmeliaConfig::resolve(None);
        assert_eq!(cfg.orchestrator.max_concurrent_workflows, 9);
        assert_eq!(cfg.orchestrator.cancel_grace, Duration::from_secs(30));
        assert_eq!(cfg.orchestrator.max_pipeline_steps, 42);
        assert_eq!(cfg.ws_queue_depth, 64);

        unsafe {
            std::env::remove_var("AMELIA_MAX_CONCURRENT_WORKFLOWS");
            std::env::remove_var("AMELIA_CANCEL_GRACE_SECONDS");
            std::env::remove_var("AMELIA_MAX_PIPELINE_STEPS");
            std::env::remove_var("AMELIA_WS_QUEUE_DEPTH");
        }
    }

    #[test]
    fn malformed_env_value_falls_back_to_default() {
        let _guard = lock_env();
        unsafe { std::env::set_var("AMELIA_MAX_CONCURRENT_WORKFLOWS", "not-a-number") };

        let cfg = AmeliaConfig::resolve(None);
        assert_eq!(cfg.orchestrator.max_concurrent_workflows, 5);

        unsafe { std::env::remove_var("AMELIA_MAX_CONCURRENT_WORKFLOWS") };
    }
}
