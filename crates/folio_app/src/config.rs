use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use folio_core::Layout;
use folio_engine::{FetchSettings, HostRule, SelectorSet};
use folio_logging::folio_info;
use serde::Deserialize;

/// Optional settings file, written in RON. Every field may be left out.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Host admission rules, first match wins.
    pub rules: Vec<HostRule>,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: Option<u64>,
    pub redirect_limit: usize,
    pub user_agent: Option<String>,
    pub archive_extension: String,
    pub selectors: SelectorSet,
}

impl Default for AppConfig {
    fn default() -> Self {
        let fetch = FetchSettings::default();
        Self {
            rules: fetch.rules,
            connect_timeout_secs: fetch.connect_timeout.as_secs(),
            request_timeout_secs: None,
            redirect_limit: fetch.redirect_limit,
            user_agent: None,
            archive_extension: "cbz".to_string(),
            selectors: SelectorSet::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        let config = ron::from_str(&content)
            .with_context(|| format!("cannot parse config {}", path.display()))?;
        folio_info!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        let defaults = FetchSettings::default();
        FetchSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: self.request_timeout_secs.map(Duration::from_secs),
            redirect_limit: self.redirect_limit,
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent),
            rules: self.rules.clone(),
        }
    }

    pub fn layout(&self, archive: bool) -> Layout {
        if archive {
            Layout::Archive {
                extension: self.archive_extension.clone(),
            }
        } else {
            Layout::Folder
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use folio_core::Layout;
    use folio_engine::HostRule;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::AppConfig;

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("folio.ron");
        fs::write(
            &path,
            r##"(
                rules: [
                    (pattern: "*.example.com", max_concurrent: 4, per_second: 2),
                    (pattern: "*", max_concurrent: 50, per_second: 10),
                ],
                request_timeout_secs: Some(30),
                selectors: (image: "#main-image"),
            )"##,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(
            config.rules,
            vec![
                HostRule::new("*.example.com", 4, 2),
                HostRule::new("*", 50, 10)
            ]
        );
        assert_eq!(config.selectors.image, "#main-image");
        assert_eq!(config.selectors.page_options, "#pageMenu option");

        let settings = config.fetch_settings();
        assert_eq!(settings.connect_timeout, Duration::from_secs(10));
        assert_eq!(settings.request_timeout, Some(Duration::from_secs(30)));
        assert_eq!(settings.redirect_limit, 5);
        assert_eq!(
            config.layout(true),
            Layout::Archive {
                extension: "cbz".into()
            }
        );
        assert_eq!(config.layout(false), Layout::Folder);
    }

    #[test]
    fn broken_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("folio.ron");
        fs::write(&path, "(rules: oops)").unwrap();
        assert!(AppConfig::load(&path).is_err());
        assert!(AppConfig::load(&temp.path().join("missing.ron")).is_err());
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("folio.ron");
        fs::write(&path, "()").unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), AppConfig::default());
    }
}
