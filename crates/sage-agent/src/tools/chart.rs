use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use sage_core::{ArtifactKind, Error, Result};

use super::{Tool, ToolContext, ToolOutput};

const CHART_TYPES: [&str; 5] = ["bar", "line", "pie", "area", "scatter"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub label: String,
    pub data: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartSpec {
    chart_type: String,
    title: String,
    labels: Vec<String>,
    datasets: Vec<Dataset>,
}

/// Produces a chart artifact the client renders.
#[derive(Debug, Default)]
pub struct CreateChartTool;

impl CreateChartTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for CreateChartTool {
    fn name(&self) -> &str {
        "create_chart"
    }

    fn display_name(&self) -> &str {
        "Creating chart"
    }

    fn description(&self) -> &str {
        "Render numeric data as a chart. Every dataset needs one value per label."
    }

    fn parameters(&self) -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "chartType": {"type": "string", "enum": CHART_TYPES},
                "title": {"type": "string"},
                "labels": {"type": "array", "items": {"type": "string"}},
                "datasets": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "label": {"type": "string"},
                            "data": {"type": "array", "items": {"type": "number"}}
                        },
                        "required": ["label", "data"]
                    }
                }
            },
            "required": ["chartType", "title", "labels", "datasets"]
        })
    }

    async fn execute(&self, args: JsonValue, _ctx: &ToolContext) -> Result<ToolOutput> {
        let spec: ChartSpec = serde_json::from_value(args)
            .map_err(|e| Error::Tool(format!("Invalid chart specification: {}", e)))?;

        if spec.datasets.is_empty() {
            return Err(Error::Tool("Chart needs at least one dataset".into()));
        }
        if let Some(bad) = spec
            .datasets
            .iter()
            .find(|d| d.data.len() != spec.labels.len())
        {
            return Err(Error::Tool(format!(
                "Dataset '{}' has {} values for {} labels",
                bad.label,
                bad.data.len(),
                spec.labels.len()
            )));
        }

        let id = Uuid::now_v7();
        let mut payload = serde_json::to_value(&spec)?;
        payload["id"] = json!(id);

        Ok(ToolOutput::new(json!({
            "status": "created",
            "chartId": id,
            "chartType": spec.chart_type,
            "points": spec.labels.len(),
        }))
        .with_artifact(ArtifactKind::Chart, payload))
    }
}
