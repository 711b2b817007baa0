//! Operator-facing configuration (§4.15): an adjacent `env` file checked
//! before the process environment, the same file-then-env precedent
//! `wslcb_address_validator::config::api_key` already establishes.

use std::path::{Path, PathBuf};

const DATA_DIR_VAR: &str = "DATA_DIR";
const DEFAULT_ENV_FILE: &str = "env";

fn read_var_from_file(path: &Path, var: &str) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(value) = line.strip_prefix(&format!("{var}=")) {
            return Some(value.trim().to_string());
        }
    }
    None
}

/// Resolved settings for one `wslcbctl` invocation.
pub struct Config {
    pub data_dir: PathBuf,
    pub env_file: PathBuf,
}

impl Config {
    /// Resolve `data_dir`: an explicit `--data-dir` flag wins outright;
    /// otherwise the adjacent env file's `DATA_DIR` line, then the
    /// `DATA_DIR` environment variable, then `"data"`.
    pub fn load(data_dir_flag: Option<PathBuf>, env_file: Option<PathBuf>) -> Self {
        let env_file = env_file.unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_FILE));

        let data_dir = data_dir_flag
            .or_else(|| read_var_from_file(&env_file, DATA_DIR_VAR).map(PathBuf::from))
            .or_else(|| std::env::var(DATA_DIR_VAR).ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("data"));

        std::env::set_var(DATA_DIR_VAR, &data_dir);

        Config { data_dir, env_file }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("wslcb.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_flag_wins_over_file_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("env");
        std::fs::write(&env_path, "DATA_DIR=/from/file\n").unwrap();

        let config = Config::load(Some(PathBuf::from("/from/flag")), Some(env_path));
        assert_eq!(config.data_dir, PathBuf::from("/from/flag"));
    }

    #[test]
    fn file_wins_over_environment_variable() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("env");
        std::fs::write(&env_path, "DATA_DIR=/from/file\n").unwrap();

        let config = Config::load(None, Some(env_path));
        assert_eq!(config.data_dir, PathBuf::from("/from/file"));
    }
}
