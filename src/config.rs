use crate::error::TrawlError;
use crate::frame::FrameSpec;
use crate::ingest::IngestOptions;
use crate::pattern::SearchParams;
use crate::scheduler::SchedulerPolicy;
use crate::tags::TagSpec;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub search_case_sensitive: bool,
    pub search_regex: bool,
    pub slice_ms: u64,
    pub backoff_ms: u64,
    pub throttle_ms: u64,
    pub throttle_after: u32,
    pub scan_chunk_lines: usize,
    pub replay_chunk: usize,
    /// Height of the match list pane, in percent of the screen.
    pub list_height: u16,
    pub show_line_numbers: bool,
    pub load_chunk_bytes: usize,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub frame: FrameSpec,
    pub tags: Vec<TagSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            search_case_sensitive: false,
            search_regex: false,
            slice_ms: 100,
            backoff_ms: 100,
            throttle_ms: 10,
            throttle_after: 10,
            scan_chunk_lines: 4096,
            replay_chunk: 1000,
            list_height: 35,
            show_line_numbers: true,
            load_chunk_bytes: 64 * 1024,
            log_level: "info".to_string(),
            log_file: dirs::cache_dir().map(|dir| dir.join("trawl").join("trawl.log")),
            frame: FrameSpec::default(),
            tags: Vec::new(),
        }
    }
}

impl Config {
    pub fn scheduler_policy(&self) -> SchedulerPolicy {
        SchedulerPolicy {
            slice: Duration::from_millis(self.slice_ms),
            backoff: Duration::from_millis(self.backoff_ms),
            throttle: Duration::from_millis(self.throttle_ms),
            throttle_after: self.throttle_after,
            scan_chunk_lines: self.scan_chunk_lines,
            replay_chunk: self.replay_chunk,
        }
    }

    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            chunk_bytes: self.load_chunk_bytes,
            max_bytes: None,
        }
    }

    pub fn search_params(&self, pattern: impl Into<String>) -> SearchParams {
        SearchParams::new(pattern, self.search_regex, self.search_case_sensitive)
    }

    pub fn validate(&self) -> std::result::Result<(), TrawlError> {
        if self.scan_chunk_lines == 0 || self.replay_chunk == 0 || self.load_chunk_bytes == 0 {
            return Err(TrawlError::Config(
                "scan_chunk_lines, replay_chunk and load_chunk_bytes must be positive".to_string(),
            ));
        }
        if !(10..=90).contains(&self.list_height) {
            return Err(TrawlError::Config(format!(
                "list_height must be between 10 and 90, got {}",
                self.list_height
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PartialConfig {
    search_case_sensitive: Option<bool>,
    search_regex: Option<bool>,
    slice_ms: Option<u64>,
    backoff_ms: Option<u64>,
    throttle_ms: Option<u64>,
    throttle_after: Option<u32>,
    scan_chunk_lines: Option<usize>,
    replay_chunk: Option<usize>,
    list_height: Option<u16>,
    show_line_numbers: Option<bool>,
    load_chunk_bytes: Option<usize>,
    log_level: Option<String>,
    log_file: Option<PathBuf>,
    frame: Option<FrameSpec>,
    tags: Option<Vec<TagSpec>>,
}

fn or_default<T>(value: Option<T>, default: T, changed: &mut bool) -> T {
    match value {
        Some(v) => v,
        None => {
            *changed = true;
            default
        }
    }
}

impl PartialConfig {
    fn apply_defaults(self) -> (Config, bool) {
        let defaults = Config::default();
        let mut changed = false;

        let log_file = match self.log_file {
            Some(v) => Some(v),
            None => {
                changed = true;
                defaults.log_file
            }
        };

        (
            Config {
                search_case_sensitive: or_default(
                    self.search_case_sensitive,
                    defaults.search_case_sensitive,
                    &mut changed,
                ),
                search_regex: or_default(self.search_regex, defaults.search_regex, &mut changed),
                slice_ms: or_default(self.slice_ms, defaults.slice_ms, &mut changed),
                backoff_ms: or_default(self.backoff_ms, defaults.backoff_ms, &mut changed),
                throttle_ms: or_default(self.throttle_ms, defaults.throttle_ms, &mut changed),
                throttle_after: or_default(
                    self.throttle_after,
                    defaults.throttle_after,
                    &mut changed,
                ),
                scan_chunk_lines: or_default(
                    self.scan_chunk_lines,
                    defaults.scan_chunk_lines,
                    &mut changed,
                ),
                replay_chunk: or_default(self.replay_chunk, defaults.replay_chunk, &mut changed),
                list_height: or_default(self.list_height, defaults.list_height, &mut changed),
                show_line_numbers: or_default(
                    self.show_line_numbers,
                    defaults.show_line_numbers,
                    &mut changed,
                ),
                load_chunk_bytes: or_default(
                    self.load_chunk_bytes,
                    defaults.load_chunk_bytes,
                    &mut changed,
                ),
                log_level: or_default(self.log_level, defaults.log_level, &mut changed),
                log_file,
                frame: or_default(self.frame, defaults.frame, &mut changed),
                tags: or_default(self.tags, defaults.tags, &mut changed),
            },
            changed,
        )
    }
}

pub fn config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("Could not determine config directory")?;
    Ok(base.join("trawl").join("config.toml"))
}

fn ensure_config_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

fn parse_config(raw: &str) -> Result<(Config, bool)> {
    let partial: PartialConfig = toml::from_str(raw)?;
    let (cfg, changed) = partial.apply_defaults();
    cfg.validate()?;
    Ok((cfg, changed))
}

fn write_config_to(path: &Path, cfg: &Config) -> Result<()> {
    ensure_config_dir(path)?;
    let text = toml::to_string_pretty(cfg).context("Failed to serialize config")?;
    fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

/// Reads the config at `path`, creating it with defaults when absent and
/// writing back any keys the file was missing.
fn load_config_from(path: &Path) -> Result<Config> {
    if !path.exists() {
        let cfg = Config::default();
        write_config_to(path, &cfg)?;
        return Ok(cfg);
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let (cfg, changed) =
        parse_config(&raw).with_context(|| format!("Failed to parse {}", path.display()))?;
    if changed {
        write_config_to(path, &cfg)?;
    }
    Ok(cfg)
}

pub fn load_config() -> Result<Config> {
    load_config_from(&config_path()?)
}

pub fn open_config_in_editor() -> Result<()> {
    let path = config_path()?;
    if !path.exists() {
        write_config_to(&path, &Config::default())?;
    }

    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    let mut parts = match shell_words::split(&editor) {
        Ok(p) if !p.is_empty() => p,
        _ => vec![editor],
    };
    let cmd = parts.remove(0);
    let status = Command::new(cmd)
        .args(parts)
        .arg(&path)
        .status()
        .with_context(|| format!("Failed to launch editor for {}", path.display()))?;
    if !status.success() {
        anyhow::bail!("Editor exited with status {}", status);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{load_config_from, parse_config, Config};

    #[test]
    fn missing_keys_are_filled_and_flagged() {
        let (cfg, changed) = parse_config("slice_ms = 50\n").unwrap();
        assert!(changed);
        assert_eq!(cfg.slice_ms, 50);
        assert_eq!(cfg.scan_chunk_lines, Config::default().scan_chunk_lines);
    }

    #[test]
    fn written_defaults_parse_back_unchanged() {
        let mut cfg = Config::default();
        cfg.frame.val_pattern = r"tick (\d+)".to_string();
        cfg.tags.push(crate::tags::TagSpec {
            name: "errors".into(),
            search: crate::pattern::SearchParams::literal("ERROR"),
        });
        let text = toml::to_string_pretty(&cfg).unwrap();
        let (back, changed) = parse_config(&text).unwrap();
        assert_eq!(back.frame, cfg.frame);
        assert_eq!(back.tags, cfg.tags);
        assert_eq!(changed, cfg.log_file.is_none());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(parse_config("list_height = 5\n").is_err());
        assert!(parse_config("scan_chunk_lines = 0\n").is_err());
    }

    #[test]
    fn policy_mirrors_config() {
        let cfg = Config::default();
        let policy = cfg.scheduler_policy();
        assert_eq!(policy.slice.as_millis(), 100);
        assert_eq!(policy.replay_chunk, 1000);
        assert!(!cfg.search_params("x").case_sensitive);
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trawl").join("config.toml");
        let cfg = load_config_from(&path).unwrap();
        assert_eq!(cfg.replay_chunk, Config::default().replay_chunk);
        let (written, _) = parse_config(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.slice_ms, cfg.slice_ms);
    }

    #[test]
    fn partial_file_is_completed_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "scan_chunk_lines = 7\n").unwrap();
        let cfg = load_config_from(&path).unwrap();
        assert_eq!(cfg.scan_chunk_lines, 7);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("replay_chunk"));
        assert_eq!(parse_config(&raw).unwrap().0.scan_chunk_lines, 7);
    }
}
