// ── Shell configuration ───────────────────────────────────────────────────────
//
// Reads `config.json` from the path in `WEBHOST_CONFIG`, or from
// `%APPDATA%\webhost\config.json`.  Every field has a default, so a missing
// file (or a partial one) still yields a usable configuration.
// No `unsafe`: pure safe Rust + serde_json.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{error::Result, platform::WindowParams, webview::NavigationTarget};

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV: &str = "WEBHOST_CONFIG";

/// Page shown when no start URL is configured.
pub const BUNDLED_PAGE: &str = include_str!("../assets/index.html");

// ── On-disk type ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub title: String,
    pub width: i32,
    pub height: i32,
    /// `0x00BBGGRR`; the default is `#111827`.
    pub background_color: u32,
    /// Start page.  `None` shows the bundled page.
    pub url: Option<String>,
    /// Fallback `tracing` filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            title: "Minimal WebView Sample".to_owned(),
            width: 800,
            height: 600,
            background_color: 0x0027_1811,
            url: None,
            log_filter: "info,wm=debug".to_owned(),
        }
    }
}

impl ShellConfig {
    pub fn window_params(&self) -> WindowParams {
        WindowParams {
            title: self.title.clone(),
            width: self.width,
            height: self.height,
            background_color: self.background_color,
        }
    }

    pub fn start_page(&self) -> NavigationTarget {
        match &self.url {
            Some(url) => NavigationTarget::Url(url.clone()),
            None => NavigationTarget::Html(BUNDLED_PAGE.to_owned()),
        }
    }
}

// ── Path ──────────────────────────────────────────────────────────────────────

/// `$WEBHOST_CONFIG`, else `%APPDATA%\webhost\config.json`.
///
/// Returns `None` if neither variable is set.
pub fn config_path() -> Option<PathBuf> {
    if let Some(explicit) = std::env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(explicit));
    }
    let appdata = std::env::var_os("APPDATA")?;
    let mut p = PathBuf::from(appdata);
    p.push(env!("CARGO_PKG_NAME"));
    p.push("config.json");
    Some(p)
}

// ── Load ──────────────────────────────────────────────────────────────────────

/// Load the configuration from [`config_path`].
pub fn load() -> Result<ShellConfig> {
    match config_path() {
        Some(path) => load_from(&path),
        None => Ok(ShellConfig::default()),
    }
}

/// Load from `path`.  A missing file gives the defaults; a file that exists
/// but does not parse is an error.
pub fn load_from(path: &Path) -> Result<ShellConfig> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(target: "app", path = %path.display(), "no configuration file; using defaults");
            return Ok(ShellConfig::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config = serde_json::from_slice(&data)?;
    tracing::debug!(target: "app", path = %path.display(), "configuration loaded");
    Ok(config)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShellError;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("webhost-{}-{name}", std::process::id()));
        fs::write(&path, contents).expect("write temp config");
        path
    }

    #[test]
    fn defaults_match_sample_window() {
        let c = ShellConfig::default();
        assert_eq!(c.title, "Minimal WebView Sample");
        assert_eq!((c.width, c.height), (800, 600));
        assert_eq!(c.background_color, 0x271811);
        assert_eq!(c.start_page(), NavigationTarget::Html(BUNDLED_PAGE.to_owned()));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let path = temp_file("partial.json", r#"{"width":1024,"url":"https://example.com/"}"#);
        let c = load_from(&path).expect("load");
        fs::remove_file(&path).ok();

        assert_eq!(c.width, 1024);
        assert_eq!(c.height, 600);
        assert_eq!(c.start_page(), NavigationTarget::Url("https://example.com/".into()));
        assert_eq!(c.window_params().width, 1024);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("webhost-definitely-absent.json");
        assert_eq!(load_from(&path).expect("load"), ShellConfig::default());
    }

    #[test]
    fn malformed_file_is_config_error() {
        let path = temp_file("bad.json", "{ width: ");
        let err = load_from(&path).unwrap_err();
        fs::remove_file(&path).ok();
        assert!(matches!(err, ShellError::Config(_)));
    }

    #[test]
    fn bundled_page_posts_every_sample_message() {
        for message in ["MsgBox", "AlertScript", "FunctionWithArg", "FunctionWithReturn", "ReplaceHtml"] {
            assert!(BUNDLED_PAGE.contains(message), "bundled page lacks {message}");
        }
    }
}
