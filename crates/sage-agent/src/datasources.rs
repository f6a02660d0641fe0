//! HTTP JSON data sources exposed to the model through `query_data_source`.
//!
//! ```yaml
//! dataSources:
//!   - name: headcount
//!     description: Current headcount by department
//!     url: https://hr.example.com/api/headcount
//!     categories: [hr]
//!     headers:
//!       Authorization: Bearer ${HR_API_TOKEN}
//!     parameters:
//!       - name: department
//!         description: Department code
//!         required: true
//! ```
//!
//! `${VAR}` in header values is replaced from the environment at request
//! time. A source with no categories applies to every request.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, instrument, warn};

use sage_core::defaults;
use sage_core::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceParameter {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceConfig {
    pub name: String,
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub parameters: Vec<DataSourceParameter>,
}

impl DataSourceConfig {
    pub fn applies_to(&self, category_ids: &[String]) -> bool {
        self.categories.is_empty()
            || self
                .categories
                .iter()
                .any(|c| category_ids.iter().any(|r| c.eq_ignore_ascii_case(r)))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataSourceFile {
    #[serde(default)]
    data_sources: Vec<DataSourceConfig>,
}

fn env_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex"))
}

/// Replace `${VAR}` with the variable's value (empty when unset).
pub fn interpolate_env(value: &str) -> String {
    env_pattern()
        .replace_all(value, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

/// Configured data sources plus the HTTP client that queries them.
pub struct DataSourceRegistry {
    sources: Vec<DataSourceConfig>,
    client: Client,
}

impl DataSourceRegistry {
    pub fn new(sources: Vec<DataSourceConfig>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(defaults::DATA_SOURCE_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { sources, client })
    }

    pub fn empty() -> Self {
        Self {
            sources: Vec::new(),
            client: Client::new(),
        }
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let file: DataSourceFile = serde_yaml::from_str(raw)
            .map_err(|e| Error::Config(format!("Invalid data sources file: {}", e)))?;
        Self::new(file.data_sources)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        Self::from_yaml(&raw)
    }

    /// Load from `DATA_SOURCES_PATH`; a missing file yields no sources.
    pub async fn from_env() -> Result<Self> {
        let path = std::env::var("DATA_SOURCES_PATH")
            .unwrap_or_else(|_| defaults::DATA_SOURCES_PATH.into());
        if !Path::new(&path).exists() {
            debug!(path = %path, "No data sources file");
            return Ok(Self::empty());
        }
        Self::load(path).await
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&DataSourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }

    pub fn for_categories(&self, category_ids: &[String]) -> Vec<&DataSourceConfig> {
        self.sources
            .iter()
            .filter(|s| s.applies_to(category_ids))
            .collect()
    }

    /// Prompt text listing the sources available for these categories.
    pub fn capability_description(&self, category_ids: &[String]) -> Option<String> {
        let sources = self.for_categories(category_ids);
        if sources.is_empty() {
            return None;
        }
        let mut out = String::from(
            "You can fetch live data with the query_data_source tool. Available data sources:",
        );
        for source in sources {
            out.push_str(&format!("\n- {}: {}", source.name, source.description));
            for p in &source.parameters {
                out.push_str(&format!(
                    "\n    - {}{}: {}",
                    p.name,
                    if p.required { " (required)" } else { "" },
                    p.description
                ));
            }
        }
        Some(out)
    }

    /// GET the source with `params` as query parameters.
    #[instrument(skip(self, params), fields(subsystem = "agent", component = "datasources", op = "query"))]
    pub async fn query(&self, name: &str, params: &Map<String, JsonValue>) -> Result<JsonValue> {
        let source = self
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Data source '{}'", name)))?;

        for p in source.parameters.iter().filter(|p| p.required) {
            if !params.contains_key(&p.name) {
                return Err(Error::InvalidInput(format!(
                    "Missing required parameter '{}' for data source '{}'",
                    p.name, name
                )));
            }
        }

        let query: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect();

        let mut request = self.client.get(&source.url).query(&query);
        for (header, value) in &source.headers {
            request = request.header(header.as_str(), interpolate_env(value));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Tool(format!("Data source '{}' unreachable: {}", name, e)))?;
        let status = response.status();
        if !status.is_success() {
            warn!(source = name, status = status.as_u16(), "Data source returned error");
            return Err(Error::Tool(format!(
                "Data source '{}' returned {}",
                name, status
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Tool(format!("Data source '{}' returned invalid JSON: {}", name, e)))
    }
}
