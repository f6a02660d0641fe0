use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value as JsonValue};

use sage_core::{Error, Result};

use crate::datasources::DataSourceRegistry;

use super::{Tool, ToolContext, ToolOutput};

/// Fetches live JSON from a configured data source.
pub struct QueryDataSourceTool {
    registry: Arc<DataSourceRegistry>,
}

impl QueryDataSourceTool {
    pub fn new(registry: Arc<DataSourceRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Tool for QueryDataSourceTool {
    fn name(&self) -> &str {
        "query_data_source"
    }

    fn display_name(&self) -> &str {
        "Querying data source"
    }

    fn description(&self) -> &str {
        "Fetch live data from one of the configured data sources listed in the system prompt."
    }

    fn parameters(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "source": {"type": "string", "description": "Data source name"},
                "params": {"type": "object", "description": "Query parameters"}
            },
            "required": ["source"]
        })
    }

    async fn execute(&self, args: JsonValue, ctx: &ToolContext) -> Result<ToolOutput> {
        let name = args["source"].as_str().unwrap_or_default();
        let source = self
            .registry
            .get(name)
            .ok_or_else(|| Error::Tool(format!("Unknown data source '{}'", name)))?;
        if !source.applies_to(&ctx.category_ids) {
            return Err(Error::Tool(format!(
                "Data source '{}' is not available for this request",
                name
            )));
        }

        let params = args
            .get("params")
            .and_then(|p| p.as_object())
            .cloned()
            .unwrap_or_else(Map::new);
        let data = self.registry.query(name, &params).await?;
        Ok(ToolOutput::new(json!({"source": name, "data": data})))
    }
}
