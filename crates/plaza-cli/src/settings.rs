//! Locating and loading the CLI configuration

use anyhow::Context;
use plaza_core::PlazaConfig;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "plaza";

/// Load the configuration the way the binary does
///
/// An explicit `--config` file must exist; the default file is optional.
/// `PLAZA_*` variables override the file, and the session is kept under the
/// data directory unless configured otherwise.
pub(crate) fn load(explicit: Option<&PathBuf>) -> anyhow::Result<PlazaConfig> {
    let default_file = dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"));
    let data_dir = dirs::data_dir().map(|dir| dir.join(APP_DIR));
    resolve(explicit.map(PathBuf::as_path), default_file.as_deref(), data_dir.as_deref())
        .map(PlazaConfig::with_env)
}

fn resolve(
    explicit: Option<&Path>,
    default_file: Option<&Path>,
    data_dir: Option<&Path>,
) -> anyhow::Result<PlazaConfig> {
    let mut config = match (explicit, default_file) {
        (Some(path), _) => PlazaConfig::load(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        (None, Some(path)) if path.exists() => PlazaConfig::load(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        _ => {
            tracing::debug!("no config file, using defaults");
            PlazaConfig::new()
        }
    };
    if config.backend.session_file.is_none() {
        config.backend.session_file = data_dir.map(|dir| dir.join("session.json"));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_default_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = resolve(None, Some(&dir.path().join("config.toml")), Some(dir.path())).unwrap();

        assert_eq!(config.chat_history_limit, 10);
        assert_eq!(
            config.backend.session_file,
            Some(dir.path().join("session.json"))
        );
    }

    #[test]
    fn explicit_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve(Some(&dir.path().join("nope.toml")), None, None).unwrap_err();
        assert!(err.to_string().starts_with("reading config"));
    }

    #[test]
    fn configured_session_file_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[backend]\nurl = \"https://demo.supabase.co\"\nanon_key = \"k\"\nsession_file = \"/tmp/s.json\"\n",
        )
        .unwrap();

        let config = resolve(None, Some(&path), Some(dir.path())).unwrap();
        assert_eq!(config.backend.url, "https://demo.supabase.co");
        assert_eq!(config.backend.session_file, Some(PathBuf::from("/tmp/s.json")));
    }
}
