use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const CONFIG_RELATIVE_PATH: &str = ".herald/config.toml";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub version: u32,
    pub queue: QueueConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub group: String,
    pub requeue_secs: u64,
    pub block_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_secs: u64,
    pub drip_batch: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: 1,
            queue: QueueConfig {
                group: default_group(),
                requeue_secs: default_requeue_secs(),
                block_ms: default_block_ms(),
            },
            scheduler: SchedulerConfig {
                tick_secs: default_tick_secs(),
                drip_batch: default_drip_batch(),
            },
        }
    }
}

fn default_group() -> String {
    "senders".to_string()
}

fn default_requeue_secs() -> u64 {
    300
}

fn default_block_ms() -> u64 {
    5000
}

fn default_tick_secs() -> u64 {
    60
}

fn default_drip_batch() -> usize {
    100
}

#[derive(Debug, Clone, Deserialize)]
struct RawEngineConfig {
    version: Option<u32>,
    queue: Option<RawQueueConfig>,
    scheduler: Option<RawSchedulerConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawQueueConfig {
    group: Option<String>,
    requeue_secs: Option<u64>,
    block_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawSchedulerConfig {
    tick_secs: Option<u64>,
    drip_batch: Option<usize>,
}

pub fn engine_config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_RELATIVE_PATH)
}

/// Load `.herald/config.toml` under `root`; a missing file yields defaults.
pub fn load_engine_config(root: &Path) -> Result<EngineConfig> {
    let path = engine_config_path(root);
    if !path.exists() {
        return Ok(EngineConfig::default());
    }

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("read engine config {}", path.display()))?;
    let parsed: RawEngineConfig =
        toml::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
    validate_engine_config(parsed, &path)
}

fn validate_engine_config(raw: RawEngineConfig, path: &Path) -> Result<EngineConfig> {
    let version = raw
        .version
        .ok_or_else(|| anyhow::anyhow!("{} missing required `version`", path.display()))?;
    if version != 1 {
        bail!(
            "{} has unsupported version {version}; expected version = 1",
            path.display()
        );
    }

    let queue = raw.queue.unwrap_or_default();
    let group = queue
        .group
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty())
        .unwrap_or_else(default_group);
    let requeue_secs = queue.requeue_secs.unwrap_or_else(default_requeue_secs);
    if requeue_secs == 0 {
        bail!("{} has zero `[queue].requeue_secs`", path.display());
    }

    let scheduler = raw.scheduler.unwrap_or_default();
    let tick_secs = scheduler.tick_secs.unwrap_or_else(default_tick_secs);
    if tick_secs == 0 {
        bail!("{} has zero `[scheduler].tick_secs`", path.display());
    }
    let drip_batch = scheduler.drip_batch.unwrap_or_else(default_drip_batch);
    if drip_batch == 0 {
        bail!("{} has zero `[scheduler].drip_batch`", path.display());
    }

    Ok(EngineConfig {
        version,
        queue: QueueConfig {
            group,
            requeue_secs,
            block_ms: queue.block_ms.unwrap_or_else(default_block_ms),
        },
        scheduler: SchedulerConfig {
            tick_secs,
            drip_batch,
        },
    })
}

pub fn default_state_db() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("herald").join("state.db");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("state")
            .join("herald")
            .join("state.db");
    }
    PathBuf::from(".herald/state.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_config(root: &Path, body: &str) {
        let path = root.join(".herald").join("config.toml");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempdir().unwrap();
        let cfg = load_engine_config(tmp.path()).unwrap();
        assert_eq!(cfg.queue.group, "senders");
        assert_eq!(cfg.scheduler.tick_secs, 60);
    }

    #[test]
    fn parses_partial_config_with_defaults() {
        let tmp = tempdir().unwrap();
        write_config(
            tmp.path(),
            r#"
version = 1
[queue]
group = "blasters"
[scheduler]
tick_secs = 10
"#,
        );
        let cfg = load_engine_config(tmp.path()).unwrap();
        assert_eq!(cfg.queue.group, "blasters");
        assert_eq!(cfg.queue.requeue_secs, 300);
        assert_eq!(cfg.scheduler.tick_secs, 10);
        assert_eq!(cfg.scheduler.drip_batch, 100);
    }

    #[test]
    fn rejects_unsupported_version() {
        let tmp = tempdir().unwrap();
        write_config(tmp.path(), "version = 7");
        let err = load_engine_config(tmp.path()).unwrap_err();
        assert!(format!("{err}").contains("unsupported version"));
    }

    #[test]
    fn rejects_zero_tick() {
        let tmp = tempdir().unwrap();
        write_config(
            tmp.path(),
            r#"
version = 1
[scheduler]
tick_secs = 0
"#,
        );
        let err = load_engine_config(tmp.path()).unwrap_err();
        assert!(format!("{err}").contains("zero `[scheduler].tick_secs`"));
    }
}
