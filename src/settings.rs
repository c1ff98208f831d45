use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const SERVER_ENV: &str = "PERSPECTA_PORTAL_SERVER";
pub const TOKEN_ENV: &str = "PERSPECTA_PORTAL_TOKEN";

const DEFAULT_MODALITIES: &[&str] = &["CT", "MR", "CR", "DX", "US", "MG", "XA", "NM", "PT", "RF"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalSettings {
    pub server_url: Option<String>,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// `page_size` sent to the institute studies endpoint.
    pub institute_fetch_size: u32,
    pub modalities: Vec<String>,
}

impl Default for PortalSettings {
    fn default() -> Self {
        Self {
            server_url: None,
            connect_timeout_secs: 10,
            request_timeout_secs: 60,
            institute_fetch_size: 1000,
            modalities: DEFAULT_MODALITIES.iter().map(|m| (*m).to_string()).collect(),
        }
    }
}

impl PortalSettings {
    pub fn load_or_default() -> Self {
        let Some(path) = settings_file_path() else {
            return Self::default();
        };
        match load_settings(&path) {
            Ok(Some(settings)) => {
                log::info!("Loaded settings from {}", path.display());
                settings
            }
            Ok(None) => Self::default(),
            Err(err) => {
                log::warn!("Using default settings: {err:#}");
                Self::default()
            }
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Server URL from the environment, falling back to the settings file.
    pub fn resolved_server_url(&self) -> Option<String> {
        env::var(SERVER_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .or_else(|| self.server_url.clone())
            .map(|url| normalize_server_url(&url))
            .filter(|url| !url.is_empty())
    }
}

pub fn env_token() -> Option<String> {
    env::var(TOKEN_ENV)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Strips whitespace, query, fragment and trailing slashes from a server URL.
pub fn normalize_server_url(url: &str) -> String {
    let trimmed = url.trim();
    let query_index = trimmed.find('?').unwrap_or(trimmed.len());
    let fragment_index = trimmed.find('#').unwrap_or(trimmed.len());
    trimmed[..query_index.min(fragment_index)]
        .trim_end_matches('/')
        .to_string()
}

fn settings_file_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        return env::var_os("APPDATA")
            .map(PathBuf::from)
            .map(|base| base.join("perspecta-portal").join("settings.toml"));
    }

    #[cfg(target_os = "macos")]
    {
        return env::var_os("HOME").map(PathBuf::from).map(|home| {
            home.join("Library")
                .join("Application Support")
                .join("perspecta-portal")
                .join("settings.toml")
        });
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        if let Some(xdg) = env::var_os("XDG_CONFIG_HOME") {
            return Some(PathBuf::from(xdg).join("perspecta-portal").join("settings.toml"));
        }
        env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join(".config").join("perspecta-portal").join("settings.toml"))
    }
}

fn load_settings(path: &Path) -> Result<Option<PortalSettings>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path)
        .with_context(|| format!("Could not read settings file {}", path.display()))?;
    let settings = toml::from_str::<PortalSettings>(&text)
        .with_context(|| format!("Could not parse settings file {}", path.display()))?;
    Ok(Some(settings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_settings_keep_defaults() {
        let settings = toml::from_str::<PortalSettings>(
            "server_url = \"https://pacs.example.org/\"\nmodalities = [\"CT\", \"MR\"]\n",
        )
        .expect("settings should parse");
        assert_eq!(settings.server_url.as_deref(), Some("https://pacs.example.org/"));
        assert_eq!(settings.modalities, vec!["CT".to_string(), "MR".to_string()]);
        assert_eq!(settings.institute_fetch_size, 1000);
        assert_eq!(settings.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn load_settings_reports_parse_errors() {
        let path = std::env::temp_dir().join(format!(
            "perspecta-portal-settings-test-{}-{}.toml",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ));
        fs::write(&path, "connect_timeout_secs = \"soon\"\n").expect("should write temp settings");
        let error = load_settings(&path).expect_err("settings should fail to parse");
        assert!(format!("{error:#}").contains("Could not parse settings file"));
        let _ = fs::remove_file(&path);

        assert!(load_settings(&path).expect("missing file is fine").is_none());
    }

    #[test]
    fn server_urls_are_normalized() {
        assert_eq!(normalize_server_url(" http://host:8000/ "), "http://host:8000");
        assert_eq!(normalize_server_url("http://host/portal/?x=1#y"), "http://host/portal");
        assert_eq!(normalize_server_url("   "), "");
    }
}
