//! Global application configuration manager.
//!
//! `AppConfig` is a lazily initialized, globally accessible singleton containing
//! runtime configuration values loaded from environment variables. It provides
//! thread-safe access and mutation for testing or overrides in runtime environments.
//!
//! Pipeline components do not read this singleton directly; binaries read it once
//! and hand explicit settings structs to the components they build.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::sync::{OnceLock, RwLock};

/// How the submission collection job is isolated from the worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionIsolation {
    /// Spawn a child worker process per collection pass.
    Process,
    /// Run the collection pass inside the calling process.
    Inline,
}

impl FromStr for CollectionIsolation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "process" | "fork" => Ok(Self::Process),
            "inline" => Ok(Self::Inline),
            other => Err(format!("unknown collection isolation '{other}'")),
        }
    }
}

/// Represents the complete application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: String,
    pub project_name: String,
    pub log_level: String,
    pub log_file: String,
    pub log_to_stdout: bool,
    pub database_path: String,
    /// Root of the automated-tests tree: one asset directory per assignment,
    /// plus the `test_runs/` diagnostics directory.
    pub automated_tests_root: String,
    /// Root under which group repositories live.
    pub repositories_root: String,
    pub test_harness_path: String,
    /// Optional interpreter used to launch the harness (e.g. `ruby`, `sh`).
    pub test_harness_interpreter: Option<String>,
    pub test_harness_timeout_secs: u64,
    pub test_harness_verbose_flag: String,
    /// Parent directory of the per-run scratch and execution directories.
    pub test_run_root: String,
    pub test_worker_count: usize,
    pub collection_batch_size: u64,
    pub collection_interval_secs: u64,
    pub collection_isolation: CollectionIsolation,
}

/// Lazily-initialized, thread-safe singleton instance of `AppConfig`.
static CONFIG_INSTANCE: OnceLock<RwLock<AppConfig>> = OnceLock::new();

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.into())
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(v) => v.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "unparsable configuration value, using default");
            default
        }),
        Err(_) => default,
    }
}

impl AppConfig {
    /// Loads the configuration from `.env` and environment variables.
    ///
    /// Missing or unparsable values fall back to development defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            env: var_or("APP_ENV", "development"),
            project_name: var_or("PROJECT_NAME", "autotest-pipeline"),
            log_level: var_or("LOG_LEVEL", "code_manager=info"),
            log_file: var_or("LOG_FILE", "code_manager.log"),
            log_to_stdout: var_or("LOG_TO_STDOUT", "false") == "true",
            database_path: var_or("DATABASE_PATH", "data/dev.db"),
            automated_tests_root: var_or("AUTOMATED_TESTS_ROOT", "data/automated_tests"),
            repositories_root: var_or("REPOSITORIES_ROOT", "data/repositories"),
            test_harness_path: var_or("TEST_HARNESS_PATH", "lib/tools/test_harness.rb"),
            test_harness_interpreter: env::var("TEST_HARNESS_INTERPRETER")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            test_harness_timeout_secs: parsed_or("TEST_HARNESS_TIMEOUT_SECS", 300),
            test_harness_verbose_flag: var_or("TEST_HARNESS_VERBOSE_FLAG", "--verbose"),
            test_run_root: var_or("TEST_RUN_ROOT", "data/test_box"),
            test_worker_count: parsed_or("TEST_WORKER_COUNT", 1usize).max(1),
            collection_batch_size: parsed_or("COLLECTION_BATCH_SIZE", 100u64).max(1),
            collection_interval_secs: parsed_or("COLLECTION_INTERVAL_SECS", 3600),
            collection_isolation: parsed_or(
                "COLLECTION_ISOLATION",
                CollectionIsolation::Process,
            ),
        }
    }

    /// Returns a shared reference to the global configuration.
    ///
    /// # Panics
    /// Panics if the lock is poisoned.
    pub fn global() -> std::sync::RwLockReadGuard<'static, AppConfig> {
        CONFIG_INSTANCE
            .get_or_init(|| RwLock::new(AppConfig::from_env()))
            .read()
            .expect("Failed to acquire AppConfig read lock")
    }

    /// Resets the configuration by reloading from environment variables.
    ///
    /// Useful in tests to clear overrides.
    pub fn reset() {
        if let Some(lock) = CONFIG_INSTANCE.get() {
            if let Ok(mut guard) = lock.write() {
                *guard = AppConfig::from_env();
            }
        }
    }

    fn set_field<F>(setter: F)
    where
        F: FnOnce(&mut AppConfig),
    {
        let lock = CONFIG_INSTANCE.get_or_init(|| RwLock::new(AppConfig::from_env()));
        let mut guard = lock
            .write()
            .expect("Failed to acquire AppConfig write lock");
        setter(&mut guard);
    }

    // --- Per-field setters below ---

    pub fn set_log_level(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.log_level = value.into());
    }

    pub fn set_log_to_stdout(value: bool) {
        AppConfig::set_field(|cfg| cfg.log_to_stdout = value);
    }

    pub fn set_database_path(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.database_path = value.into());
    }

    pub fn set_automated_tests_root(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.automated_tests_root = value.into());
    }

    pub fn set_repositories_root(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.repositories_root = value.into());
    }

    pub fn set_test_harness_path(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.test_harness_path = value.into());
    }

    pub fn set_test_harness_interpreter(value: Option<String>) {
        AppConfig::set_field(|cfg| cfg.test_harness_interpreter = value);
    }

    pub fn set_test_harness_timeout_secs(value: u64) {
        AppConfig::set_field(|cfg| cfg.test_harness_timeout_secs = value);
    }

    pub fn set_test_run_root(value: impl Into<String>) {
        AppConfig::set_field(|cfg| cfg.test_run_root = value.into());
    }

    pub fn set_test_worker_count(value: usize) {
        AppConfig::set_field(|cfg| cfg.test_worker_count = value.max(1));
    }

    pub fn set_collection_isolation(value: CollectionIsolation) {
        AppConfig::set_field(|cfg| cfg.collection_isolation = value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env_reads_overrides() {
        unsafe {
            env::set_var("TEST_HARNESS_TIMEOUT_SECS", "42");
            env::set_var("TEST_WORKER_COUNT", "3");
            env::set_var("COLLECTION_ISOLATION", "inline");
            env::set_var("TEST_HARNESS_INTERPRETER", "sh");
        }

        let cfg = AppConfig::from_env();
        assert_eq!(cfg.test_harness_timeout_secs, 42);
        assert_eq!(cfg.test_worker_count, 3);
        assert_eq!(cfg.collection_isolation, CollectionIsolation::Inline);
        assert_eq!(cfg.test_harness_interpreter.as_deref(), Some("sh"));

        unsafe {
            env::remove_var("TEST_HARNESS_TIMEOUT_SECS");
            env::remove_var("TEST_WORKER_COUNT");
            env::remove_var("COLLECTION_ISOLATION");
            env::remove_var("TEST_HARNESS_INTERPRETER");
        }
    }

    #[test]
    #[serial]
    fn test_invalid_numbers_fall_back_to_defaults() {
        unsafe {
            env::set_var("TEST_HARNESS_TIMEOUT_SECS", "soon");
            env::set_var("TEST_WORKER_COUNT", "0");
        }

        let cfg = AppConfig::from_env();
        assert_eq!(cfg.test_harness_timeout_secs, 300);
        assert_eq!(cfg.test_worker_count, 1);

        unsafe {
            env::remove_var("TEST_HARNESS_TIMEOUT_SECS");
            env::remove_var("TEST_WORKER_COUNT");
        }
    }

    #[test]
    fn test_collection_isolation_parses_aliases() {
        assert_eq!("fork".parse::<CollectionIsolation>(), Ok(CollectionIsolation::Process));
        assert_eq!(" Inline ".parse::<CollectionIsolation>(), Ok(CollectionIsolation::Inline));
        assert!("threads".parse::<CollectionIsolation>().is_err());
    }
}
