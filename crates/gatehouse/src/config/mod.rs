//! Configuration types for the gatehouse server.

pub mod duration;
pub mod watcher;

use std::collections::HashSet;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub use duration::{parse_duration, DurationError};
pub use watcher::ConfigWatcher;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,

    /// Pipeline that serves requests arriving on the listener.
    pub entry: String,

    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ListenConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
}

/// One filter entry: the common `name`/`kind` pair plus kind-specific fields.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilterSpec {
    pub name: String,
    pub kind: String,
    #[serde(flatten)]
    pub params: serde_yaml::Mapping,
}

impl FilterSpec {
    /// Decode the kind-specific fields into the filter's own spec type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        serde_yaml::from_value(serde_yaml::Value::Mapping(self.params.clone())).map_err(
            |source| ConfigError::InvalidSpec {
                filter: self.name.clone(),
                source,
            },
        )
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks. Filter-level checks happen when pipelines are built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for pipeline in &self.pipelines {
            if pipeline.name.trim().is_empty() {
                return Err(ConfigError::EmptyPipelineName);
            }
            if !names.insert(pipeline.name.as_str()) {
                return Err(ConfigError::DuplicatePipeline(pipeline.name.clone()));
            }
        }

        if !names.contains(self.entry.as_str()) {
            return Err(ConfigError::UnknownEntry(self.entry.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{BridgeSpec, MockSpec};
    use std::io::Write;

    const SAMPLE: &str = r#"
listen:
  port: 9080
entry: front
pipelines:
  - name: front
    filters:
      - name: mock
        kind: Mock
        rules:
          - match:
              pathPrefix: /api
              headers:
                X-Env:
                  exact: test
            code: 418
            body: teapot
            delay: 10ms
      - name: bridge
        kind: Bridge
        destinations: [back]
  - name: back
    filters:
      - name: upstream
        kind: Proxy
        url: http://127.0.0.1:9000
"#;

    #[test]
    fn test_parse_config() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.listen.host, "0.0.0.0");
        assert_eq!(config.listen.port, 9080);
        assert_eq!(config.entry, "front");
        assert_eq!(config.pipelines.len(), 2);

        let front = &config.pipelines[0];
        assert_eq!(front.filters[0].kind, "Mock");
        let mock: MockSpec = front.filters[0].decode().unwrap();
        assert_eq!(mock.rules.len(), 1);
        assert_eq!(mock.rules[0].status_code, 418);
        assert_eq!(mock.rules[0].match_config.path_prefix.as_deref(), Some("/api"));

        let bridge: BridgeSpec = front.filters[1].decode().unwrap();
        assert_eq!(bridge.destinations, vec!["back".to_string()]);
    }

    #[test]
    fn test_listen_defaults() {
        let config = Config::from_yaml("entry: a\npipelines:\n  - name: a\n").unwrap();
        assert_eq!(config.listen.address(), "0.0.0.0:8080");
        assert!(config.pipelines[0].filters.is_empty());
    }

    #[test]
    fn test_unknown_entry() {
        let err = Config::from_yaml("entry: missing\npipelines:\n  - name: a\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownEntry(ref name) if name == "missing"));
    }

    #[test]
    fn test_duplicate_pipeline() {
        let err =
            Config::from_yaml("entry: a\npipelines:\n  - name: a\n  - name: a\n").unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePipeline(_)));
    }

    #[test]
    fn test_empty_pipeline_name() {
        let err = Config::from_yaml("entry: a\npipelines:\n  - name: ''\n").unwrap_err();
        assert!(matches!(err, ConfigError::EmptyPipelineName));
    }

    #[test]
    fn test_decode_reports_filter_name() {
        let spec: FilterSpec =
            serde_yaml::from_str("name: b\nkind: Bridge\ndestinations: 7\n").unwrap();
        let err = spec.decode::<BridgeSpec>().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSpec { ref filter, .. } if filter == "b"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.pipelines[1].name, "back");

        let missing = Config::from_file("/nonexistent/gatehouse.yaml").unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
