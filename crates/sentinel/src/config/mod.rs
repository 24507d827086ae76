pub mod types;
pub mod validate;

pub use types::*;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Resolve the config directory: `SENTINEL_CONFIG_DIR` or `./config`.
pub fn config_dir() -> PathBuf {
    env_string("SENTINEL_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config"))
}

/// Load and merge all config JSON files into a single [`SentinelConfig`],
/// then apply environment variable overrides and validate.
///
/// Expected directory layout:
/// ```text
/// config/
///   app.json
///   instruments.json
///   providers.json
///   signals.json
///   scheduler.json
///   oracle.json
///   execution.json
///   channel.json   (optional)
/// ```
///
/// # Environment variable overrides
///
/// | Env Var                     | Config Field                   |
/// |-----------------------------|--------------------------------|
/// | `SENTINEL_DRY_RUN`          | `execution.dry_run`            |
/// | `SENTINEL_ORACLE_ENDPOINT`  | `oracle.endpoint`              |
/// | `SENTINEL_ORACLE_MODEL`     | `oracle.model`                 |
/// | `SENTINEL_STORE_PATH`       | `app.store.path`               |
/// | `SENTINEL_MAX_CONCURRENCY`  | `scheduler.max_concurrency`    |
pub fn load_config(config_dir: &Path) -> Result<SentinelConfig> {
    let read = |name: &str| -> Result<String> {
        let path = config_dir.join(name);
        std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))
    };

    fn parse<T: DeserializeOwned>(contents: &str, name: &str) -> Result<T> {
        serde_json::from_str(contents).with_context(|| format!("parsing {name}"))
    }

    let app: AppConfig = parse(&read("app.json")?, "app.json")?;
    let instruments: InstrumentsConfig = parse(&read("instruments.json")?, "instruments.json")?;
    let providers: ProvidersConfig = parse(&read("providers.json")?, "providers.json")?;
    let signals: SignalConfig = parse(&read("signals.json")?, "signals.json")?;
    let scheduler: SchedulerConfig = parse(&read("scheduler.json")?, "scheduler.json")?;
    let oracle: OracleConfig = parse(&read("oracle.json")?, "oracle.json")?;
    let execution: ExecutionConfig = parse(&read("execution.json")?, "execution.json")?;

    // Channel config is optional.
    let channel: Option<ChannelConfig> = match read("channel.json") {
        Ok(contents) => Some(parse(&contents, "channel.json")?),
        Err(_) => None,
    };

    let mut config = SentinelConfig {
        app,
        instruments,
        providers,
        signals,
        scheduler,
        oracle,
        execution,
        channel,
    };

    apply_env_overrides(&mut config)?;
    validate::validate_config(&config)?;

    Ok(config)
}

// ---------------------------------------------------------------------------
// Environment variable overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides to the loaded config.
///
/// Only non-empty env vars take effect. A value that does not parse is an
/// error; the JSON value is never kept in its place.
fn apply_env_overrides(config: &mut SentinelConfig) -> Result<()> {
    if let Some(val) = env_bool("SENTINEL_DRY_RUN")? {
        info!(dry_run = val, "env override: SENTINEL_DRY_RUN");
        config.execution.dry_run = val;
    }

    if let Some(val) = env_string("SENTINEL_ORACLE_ENDPOINT") {
        info!("env override: SENTINEL_ORACLE_ENDPOINT");
        config.oracle.endpoint = val;
    }

    if let Some(val) = env_string("SENTINEL_ORACLE_MODEL") {
        info!(model = %val, "env override: SENTINEL_ORACLE_MODEL");
        config.oracle.model = val;
    }

    if let Some(val) = env_string("SENTINEL_STORE_PATH") {
        info!(path = %val, "env override: SENTINEL_STORE_PATH");
        config.app.store.path = val;
    }

    if let Some(val) = env_parse::<usize>("SENTINEL_MAX_CONCURRENCY")? {
        info!(val, "env override: SENTINEL_MAX_CONCURRENCY");
        config.scheduler.max_concurrency = val;
    }

    Ok(())
}

/// Read a non-empty env var as a `String`.
pub(crate) fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Read a non-empty env var as a bool (`true`/`1`/`yes` or `false`/`0`/`no`).
fn env_bool(key: &str) -> Result<Option<bool>> {
    let Some(v) = env_string(key) else {
        return Ok(None);
    };
    match v.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(Some(true)),
        "false" | "0" | "no" => Ok(Some(false)),
        _ => anyhow::bail!("{key}={v:?} is not a boolean"),
    }
}

/// Read a non-empty env var and parse it as `T`.
fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    env_string(key)
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| anyhow::anyhow!("{key}={v:?} is not a valid {}", std::any::type_name::<T>()))
        })
        .transpose()
}
