//! API key resolution (§6's "Address validator collaborator"): an
//! adjacent `env` file of `KEY=value` lines first, then the environment
//! variable of the same name. Cached after first load per process.

use std::path::Path;
use std::sync::OnceLock;

const API_KEY_VAR: &str = "ADDRESS_VALIDATOR_API_KEY";

fn read_env_file(path: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(path).ok()?;
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(value) = line.strip_prefix(&format!("{API_KEY_VAR}=")) {
            return Some(value.trim().to_string());
        }
    }
    None
}

/// Resolve the API key, checking `env_file` before the process
/// environment. Empty string if neither source has it — mirrors the
/// upstream's fall-through-to-empty-string behavior rather than an
/// error, since an absent key is a deployment choice (validation simply
/// never runs), not a startup failure.
pub fn api_key(env_file: &Path) -> &'static str {
    static CACHED: OnceLock<String> = OnceLock::new();
    CACHED
        .get_or_init(|| {
            read_env_file(env_file)
                .or_else(|| std::env::var(API_KEY_VAR).ok())
                .unwrap_or_default()
        })
        .as_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_key_from_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env");
        std::fs::write(&path, "# comment\n\nADDRESS_VALIDATOR_API_KEY=abc123\n").unwrap();
        assert_eq!(read_env_file(&path), Some("abc123".to_string()));
    }

    #[test]
    fn missing_file_returns_none() {
        assert_eq!(read_env_file(Path::new("/nonexistent/env")), None);
    }
}
