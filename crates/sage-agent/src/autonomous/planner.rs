//! Plan generation.
//!
//! The model is asked for a JSON plan once per request. Anything that does
//! not parse into at least one task falls back to a single task carrying
//! the original request.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, instrument, warn};

use sage_core::{AgentTask, CompletionBackend, Result};

const PLANNER_PROMPT: &str = "You break a user's request into a short sequence of research and \
writing tasks. Respond with JSON only, in the form \
{\"tasks\":[{\"id\":\"t1\",\"description\":\"...\",\"type\":\"research|analysis|writing\",\"dependsOn\":[]}]}. \
Use as few tasks as the request needs.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTask {
    #[serde(default)]
    id: Option<String>,
    description: String,
    #[serde(default, rename = "type")]
    task_type: Option<String>,
    #[serde(default)]
    depends_on: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPlan {
    Wrapped { tasks: Vec<RawTask> },
    Bare(Vec<RawTask>),
}

/// Slice from the first opening bracket to the matching last closer.
fn json_region(raw: &str) -> Option<&str> {
    let start = raw.find(['{', '['])?;
    let closer = if raw[start..].starts_with('{') { '}' } else { ']' };
    let end = raw.rfind(closer)?;
    (end > start).then(|| &raw[start..=end])
}

/// Parse a model plan; `None` when no usable task is found.
pub fn parse_plan(raw: &str, max_tasks: usize) -> Option<Vec<AgentTask>> {
    let region = json_region(raw)?;
    let plan: RawPlan = serde_json::from_str(region).ok()?;
    let raw_tasks = match plan {
        RawPlan::Wrapped { tasks } | RawPlan::Bare(tasks) => tasks,
    };

    let mut seen = HashSet::new();
    let mut tasks: Vec<AgentTask> = Vec::new();
    for (i, entry) in raw_tasks
        .into_iter()
        .filter(|t| !t.description.trim().is_empty())
        .take(max_tasks)
        .enumerate()
    {
        let id = entry
            .id
            .filter(|id| !id.trim().is_empty() && !seen.contains(id.as_str()))
            .unwrap_or_else(|| format!("task-{}", i + 1));
        seen.insert(id.clone());

        let mut task = AgentTask::new(
            id,
            entry.description.trim(),
            entry.task_type.unwrap_or_else(|| "research".into()),
        );
        // Only earlier tasks can be depended on.
        task.depends_on = entry
            .depends_on
            .into_iter()
            .filter(|d| tasks.iter().any(|t| &t.id == d))
            .collect();
        tasks.push(task);
    }

    (!tasks.is_empty()).then_some(tasks)
}

pub fn fallback_plan(message: &str) -> Vec<AgentTask> {
    vec![AgentTask::new("task-1", message.trim(), "answer")]
}

pub struct Planner {
    backend: Arc<dyn CompletionBackend>,
    max_tasks: usize,
}

impl Planner {
    pub fn new(backend: Arc<dyn CompletionBackend>, max_tasks: usize) -> Self {
        Self {
            backend,
            max_tasks: max_tasks.max(1),
        }
    }

    /// Produce the plan and the raw model output it came from.
    #[instrument(skip_all, fields(subsystem = "agent", component = "planner", op = "plan"))]
    pub async fn plan(&self, message: &str, context_block: &str) -> Result<(Vec<AgentTask>, String)> {
        let prompt = format!("Request:\n{}\n\nAvailable context:\n{}", message, context_block);
        let raw = self.backend.complete(PLANNER_PROMPT, &[], &prompt).await?;

        match parse_plan(&raw, self.max_tasks) {
            Some(tasks) => {
                debug!(task_count = tasks.len(), "Plan created");
                Ok((tasks, raw))
            }
            None => {
                warn!("Plan could not be parsed, using single task");
                Ok((fallback_plan(message), raw))
            }
        }
    }
}
