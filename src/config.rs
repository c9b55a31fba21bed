use std::{env, path::PathBuf, str::FromStr};

use crate::models::ExecutionLimits;

#[derive(Debug, Clone)]
pub struct JudgeConfig {
    pub default_limits: ExecutionLimits,
    pub max_concurrent_processes: usize,
    pub per_submission_parallelism: usize,
    pub workspace_root: PathBuf,
    pub sandbox_path: String,
    pub env_passthrough: Vec<String>,
    pub kill_grace_ms: u64,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl JudgeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let host_parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);

        Self {
            default_limits: ExecutionLimits {
                timeout_ms: env_parse(&lookup, "JUDGE_RUN_TIMEOUT_MS", 10_000),
                build_timeout_ms: env_parse(&lookup, "JUDGE_BUILD_TIMEOUT_MS", 30_000),
                memory_mb: env_parse(&lookup, "JUDGE_MEMORY_MB", 512),
                max_output_bytes: env_parse(&lookup, "JUDGE_MAX_OUTPUT_BYTES", 1024 * 1024),
                max_file_size_bytes: env_parse(
                    &lookup,
                    "JUDGE_MAX_FILE_SIZE_BYTES",
                    16 * 1024 * 1024,
                ),
            }
            .normalized(),
            max_concurrent_processes: env_parse(
                &lookup,
                "JUDGE_MAX_CONCURRENT_PROCESSES",
                host_parallelism,
            )
            .max(1),
            per_submission_parallelism: env_parse(&lookup, "JUDGE_PER_SUBMISSION_PARALLELISM", 1)
                .max(1),
            workspace_root: lookup("JUDGE_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(env::temp_dir),
            sandbox_path: lookup("JUDGE_SANDBOX_PATH")
                .unwrap_or_else(|| "/usr/local/bin:/usr/bin:/bin".to_string()),
            env_passthrough: parse_csv(
                &lookup("JUDGE_ENV_PASSTHROUGH")
                    .unwrap_or_else(|| "RUSTUP_HOME,CARGO_HOME".to_string()),
            ),
            kill_grace_ms: env_parse(&lookup, "JUDGE_KILL_GRACE_MS", 500),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format: env_parse(&lookup, "JUDGE_LOG_FORMAT", LogFormat::Json),
        }
    }
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "compact" | "text" => Ok(Self::Compact),
            _ => Err(format!("unsupported log format: {s}")),
        }
    }
}

fn parse_csv(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_parse<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key)
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{JudgeConfig, LogFormat};

    #[test]
    fn defaults_without_environment() {
        let config = JudgeConfig::default();
        assert_eq!(config.default_limits.timeout_ms, 10_000);
        assert_eq!(config.default_limits.max_output_bytes, 1024 * 1024);
        assert_eq!(config.per_submission_parallelism, 1);
        assert!(config.max_concurrent_processes >= 1);
        assert_eq!(config.env_passthrough, vec!["RUSTUP_HOME", "CARGO_HOME"]);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn reads_overrides_and_ignores_garbage() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("JUDGE_RUN_TIMEOUT_MS", "2500"),
            ("JUDGE_PER_SUBMISSION_PARALLELISM", "0"),
            ("JUDGE_MAX_CONCURRENT_PROCESSES", "not-a-number"),
            ("JUDGE_ENV_PASSTHROUGH", " LANG , ,TZ"),
            ("JUDGE_LOG_FORMAT", "compact"),
        ]);
        let config = JudgeConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.default_limits.timeout_ms, 2500);
        assert_eq!(config.per_submission_parallelism, 1);
        assert!(config.max_concurrent_processes >= 1);
        assert_eq!(config.env_passthrough, vec!["LANG", "TZ"]);
        assert_eq!(config.log_format, LogFormat::Compact);
    }
}
