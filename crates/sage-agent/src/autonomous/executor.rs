//! Sequential plan execution under a token budget.

use std::sync::{Arc, OnceLock};

use regex::Regex;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use sage_core::{
    defaults, AgentPlanStats, AgentTask, AgentTaskStatus, CompletionBackend, Error,
    EstimatingTokenizer, Result, StreamEvent, TokenUsage, Tokenizer,
};

use crate::tool_loop::{ToolLoop, ToolLoopRequest};
use crate::tools::ToolRegistry;

use super::budget::TokenBudget;
use super::planner::Planner;
use super::AgentConfig;

const TASK_INSTRUCTIONS: &str = "You are completing one step of a larger plan. Answer only the \
current task, using the context and earlier results. End with a final line of the form \
`CONFIDENCE: <number between 0 and 1>` rating how well the available information supports your answer.";

const SUMMARY_PROMPT: &str = "Combine the results of the completed tasks into one clear answer \
to the user's original request. Mention any task that failed or needs review.";

fn confidence_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?im)^[ \t*_`]*CONFIDENCE:\s*([0-9]*\.?[0-9]+)\s*(%)?[ \t*_`]*$")
            .expect("static regex")
    })
}

/// Split a task answer into its body and the `CONFIDENCE:` trailer value.
///
/// Percentages are scaled into 0..1 and the value is clamped.
pub fn parse_confidence(output: &str) -> (String, Option<f32>) {
    let Some(caps) = confidence_pattern().captures_iter(output).last() else {
        return (output.trim().to_string(), None);
    };
    let Some(whole) = caps.get(0) else {
        return (output.trim().to_string(), None);
    };
    let value = caps[1].parse::<f32>().ok().map(|v| {
        let v = if caps.get(2).is_some() || v > 1.0 { v / 100.0 } else { v };
        v.clamp(0.0, 1.0)
    });

    let mut body = String::with_capacity(output.len());
    body.push_str(&output[..whole.start()]);
    body.push_str(&output[whole.end()..]);
    (body.trim().to_string(), value)
}

pub fn compute_stats(tasks: &[AgentTask]) -> AgentPlanStats {
    let count = |status: AgentTaskStatus| tasks.iter().filter(|t| t.status == status).count();
    let confidences: Vec<f32> = tasks.iter().filter_map(|t| t.confidence).collect();
    AgentPlanStats {
        total: tasks.len(),
        completed: count(AgentTaskStatus::Done),
        failed: count(AgentTaskStatus::Error),
        skipped: count(AgentTaskStatus::Skipped),
        needs_review: count(AgentTaskStatus::NeedsReview),
        average_confidence: (!confidences.is_empty())
            .then(|| confidences.iter().sum::<f32>() / confidences.len() as f32),
    }
}

/// Summary assembled without the model.
pub fn fallback_summary(tasks: &[AgentTask], stats: &AgentPlanStats) -> String {
    let mut out = format!(
        "Completed {} of {} tasks ({} need review, {} failed, {} skipped).",
        stats.completed + stats.needs_review,
        stats.total,
        stats.needs_review,
        stats.failed,
        stats.skipped
    );
    for task in tasks {
        match (&task.status, &task.result) {
            (AgentTaskStatus::Done | AgentTaskStatus::NeedsReview, Some(result)) => {
                out.push_str(&format!("\n\n### {}\n{}", task.description, result));
            }
            (AgentTaskStatus::Error, _) => {
                out.push_str(&format!("\n\n### {}\nThis task failed.", task.description));
            }
            _ => {}
        }
    }
    out
}

#[derive(Debug, Clone, Default)]
pub struct AgentRequest {
    pub message: String,
    pub system_prompt: String,
    pub context_block: String,
    /// Offer the tool registry to each task.
    pub enable_tools: bool,
    pub category_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AgentRunOutcome {
    pub tasks: Vec<AgentTask>,
    pub stats: AgentPlanStats,
    /// Becomes the assistant message.
    pub summary: String,
    pub tokens_used: usize,
    pub budget_exceeded: bool,
    pub usage: TokenUsage,
    /// Tools called across all tasks, in call order.
    pub tools_used: Vec<String>,
}

struct TaskRun {
    body: String,
    confidence: Option<f32>,
    tokens: usize,
    usage: TokenUsage,
    tool_results: Vec<(String, String)>,
}

pub struct AgentExecutor {
    backend: Arc<dyn CompletionBackend>,
    planner: Planner,
    tool_loop: ToolLoop,
    config: AgentConfig,
    tokenizer: Arc<dyn Tokenizer>,
    event_capacity: usize,
}

async fn emit(events: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> Result<()> {
    events.send(event).await.map_err(|_| Error::Aborted)
}

impl AgentExecutor {
    pub fn new(backend: Arc<dyn CompletionBackend>, config: AgentConfig) -> Self {
        Self {
            planner: Planner::new(backend.clone(), config.max_tasks),
            tool_loop: ToolLoop::new(backend.clone(), Arc::new(ToolRegistry::new())),
            backend,
            config,
            tokenizer: Arc::new(EstimatingTokenizer),
            event_capacity: defaults::STREAM_CHANNEL_CAPACITY,
        }
    }

    /// Run tasks through `tools` instead of plain completions.
    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tool_loop = ToolLoop::new(self.backend.clone(), tools);
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Plan, execute, and summarize. Events go to `events`; a closed
    /// channel stops the run with [`Error::Aborted`].
    #[instrument(skip_all, fields(subsystem = "agent", component = "executor", op = "run"))]
    pub async fn run(
        &self,
        request: &AgentRequest,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<AgentRunOutcome> {
        let mut budget = TokenBudget::new(
            self.config.token_budget,
            self.config.budget_medium,
            self.config.budget_high,
        );
        let mut usage = TokenUsage::default();
        let mut tools_used = Vec::new();
        // Tool outputs shared with every later task.
        let mut working: Vec<String> = Vec::new();

        let (mut tasks, raw_plan) = self
            .planner
            .plan(&request.message, &request.context_block)
            .await?;
        budget.record(
            self.tokenizer.count_tokens(&request.message)
                + self.tokenizer.count_tokens(&request.context_block)
                + self.tokenizer.count_tokens(&raw_plan),
        );
        emit(events, StreamEvent::AgentPlanCreated { tasks: tasks.clone() }).await?;

        let mut exceeded = false;
        for i in 0..tasks.len() {
            if self.check_budget(&mut budget, events).await? {
                exceeded = true;
                break;
            }

            let blocked = tasks[i].depends_on.iter().any(|dep| {
                tasks
                    .iter()
                    .any(|t| &t.id == dep && t.status.blocks_dependents())
            });
            if blocked {
                tasks[i].status = AgentTaskStatus::Skipped;
                debug!(task_id = %tasks[i].id, "Skipping task with failed dependency");
                emit(events, completed_event(&tasks[i])).await?;
                continue;
            }

            tasks[i].status = AgentTaskStatus::Running;
            emit(
                events,
                StreamEvent::AgentTaskStarted {
                    task_id: tasks[i].id.clone(),
                    description: tasks[i].description.clone(),
                },
            )
            .await?;

            match self.execute_task(request, &tasks, i, &working, events).await {
                Ok(run) => {
                    budget.record(run.tokens);
                    usage.add(run.usage);
                    for (tool, body) in run.tool_results {
                        working.push(format!("- {} via {}: {}", tasks[i].id, tool, body));
                        tools_used.push(tool);
                    }
                    let task = &mut tasks[i];
                    task.confidence = run.confidence;
                    task.status = match run.confidence {
                        Some(c) if c < self.config.review_threshold => AgentTaskStatus::NeedsReview,
                        _ => AgentTaskStatus::Done,
                    };
                    task.result = Some(run.body);
                }
                Err(Error::Aborted) => return Err(Error::Aborted),
                Err(e) => {
                    warn!(task_id = %tasks[i].id, error = %e, "Task failed");
                    tasks[i].status = AgentTaskStatus::Error;
                    tasks[i].result = Some(e.to_string());
                }
            }
            emit(events, completed_event(&tasks[i])).await?;

            if self.check_budget(&mut budget, events).await? {
                exceeded = true;
                break;
            }
        }

        if exceeded {
            for task in tasks.iter_mut().filter(|t| t.status == AgentTaskStatus::Pending) {
                task.status = AgentTaskStatus::Skipped;
                emit(events, completed_event(task)).await?;
            }
        }

        let stats = compute_stats(&tasks);
        let summary = if exceeded {
            fallback_summary(&tasks, &stats)
        } else {
            self.summarize(request, &tasks, &stats).await
        };
        budget.record(self.tokenizer.count_tokens(&summary));

        emit(
            events,
            StreamEvent::AgentPlanSummary {
                stats: stats.clone(),
                summary: summary.clone(),
            },
        )
        .await?;

        info!(
            task_count = stats.total,
            completed = stats.completed,
            tokens_used = budget.used(),
            budget_exceeded = exceeded,
            "Autonomous run finished"
        );
        Ok(AgentRunOutcome {
            tasks,
            stats,
            summary,
            tokens_used: budget.used(),
            budget_exceeded: exceeded,
            usage,
            tools_used,
        })
    }

    /// Emit newly crossed warnings; returns true when the ceiling is exceeded.
    async fn check_budget(
        &self,
        budget: &mut TokenBudget,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<bool> {
        let check = budget.check();
        for level in check.new_warnings {
            warn!(?level, tokens_used = budget.used(), "Agent budget warning");
            emit(
                events,
                StreamEvent::AgentBudgetWarning {
                    level,
                    tokens_used: budget.used(),
                    token_budget: budget.budget(),
                },
            )
            .await?;
        }
        if check.exceeded {
            warn!(tokens_used = budget.used(), "Agent budget exceeded, halting plan");
            emit(
                events,
                StreamEvent::AgentBudgetExceeded {
                    tokens_used: budget.used(),
                    token_budget: budget.budget(),
                },
            )
            .await?;
        }
        Ok(check.exceeded)
    }

    async fn execute_task(
        &self,
        request: &AgentRequest,
        tasks: &[AgentTask],
        index: usize,
        working: &[String],
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<TaskRun> {
        let task = &tasks[index];
        let earlier: Vec<String> = tasks[..index]
            .iter()
            .filter_map(|t| {
                t.result
                    .as_ref()
                    .filter(|_| matches!(t.status, AgentTaskStatus::Done | AgentTaskStatus::NeedsReview))
                    .map(|r| format!("### {} ({})\n{}", t.id, t.description, r))
            })
            .collect();

        let mut prompt = format!(
            "Original request:\n{}\n\nContext:\n{}",
            request.message, request.context_block
        );
        if !earlier.is_empty() {
            prompt.push_str(&format!("\n\nEarlier results:\n{}", earlier.join("\n\n")));
        }
        if !working.is_empty() {
            prompt.push_str(&format!("\n\nTool outputs so far:\n{}", working.join("\n")));
        }
        prompt.push_str(&format!("\n\nCurrent task ({}): {}", task.task_type, task.description));

        let system = if request.system_prompt.trim().is_empty() {
            TASK_INSTRUCTIONS.to_string()
        } else {
            format!("{}\n\n{}", request.system_prompt, TASK_INSTRUCTIONS)
        };

        let outcome = self
            .tool_loop
            .complete_bridged(
                ToolLoopRequest {
                    system_prompt: system.clone(),
                    message: prompt.clone(),
                    enable_tools: request.enable_tools,
                    category_ids: request.category_ids.clone(),
                    ..Default::default()
                },
                events,
                self.event_capacity,
            )
            .await?;
        if outcome.content.trim().is_empty() {
            return Err(Error::Inference("Task produced no output".into()));
        }

        let tool_results = outcome.tool_results();
        let tokens = if outcome.usage.total_tokens > 0 {
            outcome.usage.total_tokens as usize
        } else {
            self.tokenizer.count_tokens(&system)
                + self.tokenizer.count_tokens(&prompt)
                + tool_results
                    .iter()
                    .map(|(_, body)| self.tokenizer.count_tokens(body))
                    .sum::<usize>()
                + self.tokenizer.count_tokens(&outcome.content)
        };
        let (body, confidence) = parse_confidence(&outcome.content);
        Ok(TaskRun {
            body,
            confidence,
            tokens,
            usage: outcome.usage,
            tool_results,
        })
    }

    async fn summarize(&self, request: &AgentRequest, tasks: &[AgentTask], stats: &AgentPlanStats) -> String {
        let results: Vec<String> = tasks
            .iter()
            .map(|t| {
                format!(
                    "### {} [{}]\n{}",
                    t.description,
                    serde_json::to_value(t.status)
                        .ok()
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default(),
                    t.result.as_deref().unwrap_or("")
                )
            })
            .collect();
        let prompt = format!(
            "Original request:\n{}\n\nTask results:\n{}",
            request.message,
            results.join("\n\n")
        );

        match self.backend.complete(SUMMARY_PROMPT, &[], &prompt).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => fallback_summary(tasks, stats),
            Err(e) => {
                warn!(error = %e, "Summary generation failed, using fallback");
                fallback_summary(tasks, stats)
            }
        }
    }
}

fn completed_event(task: &AgentTask) -> StreamEvent {
    StreamEvent::AgentTaskCompleted {
        task_id: task.id.clone(),
        status: task.status,
        confidence: task.confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::CreateChartTool;
    use sage_core::{AgentBudgetLevel, CompletionResponse, ToolCall};
    use sage_inference::mock::MockCompletionBackend;

    fn config(budget: usize) -> AgentConfig {
        AgentConfig {
            token_budget: budget,
            ..AgentConfig::default()
        }
    }

    fn request() -> AgentRequest {
        AgentRequest {
            message: "Compare leave policies".into(),
            system_prompt: "You are Sage.".into(),
            context_block: "ctx".into(),
            ..Default::default()
        }
    }

    fn with_usage(content: &str, total: u32) -> CompletionResponse {
        let mut r = CompletionResponse::text(content);
        r.usage.total_tokens = total;
        r
    }

    fn drain(rx: &mut mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[test]
    fn test_parse_confidence_trailer() {
        let (body, c) = parse_confidence("The policy allows 20 days.\nCONFIDENCE: 0.85");
        assert_eq!(body, "The policy allows 20 days.");
        assert_eq!(c, Some(0.85));

        let (_, pct) = parse_confidence("x\n**Confidence: 40%**");
        assert_eq!(pct, Some(0.4));

        let (body, none) = parse_confidence("No trailer here");
        assert_eq!(body, "No trailer here");
        assert!(none.is_none());
    }

    #[test]
    fn test_stats_and_fallback_summary() {
        let mut a = AgentTask::new("a", "Find policy", "research");
        a.status = AgentTaskStatus::Done;
        a.confidence = Some(0.9);
        a.result = Some("20 days".into());
        let mut b = AgentTask::new("b", "Check exceptions", "research");
        b.status = AgentTaskStatus::NeedsReview;
        b.confidence = Some(0.5);
        b.result = Some("unclear".into());
        let mut c = AgentTask::new("c", "Write memo", "writing");
        c.status = AgentTaskStatus::Skipped;

        let tasks = vec![a, b, c];
        let stats = compute_stats(&tasks);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.needs_review, 1);
        assert_eq!(stats.skipped, 1);
        assert!((stats.average_confidence.unwrap() - 0.7).abs() < 1e-6);

        let summary = fallback_summary(&tasks, &stats);
        assert!(summary.starts_with("Completed 2 of 3 tasks"));
        assert!(summary.contains("### Find policy\n20 days"));
        assert!(!summary.contains("Write memo"));
    }

    #[tokio::test]
    async fn test_run_executes_plan_in_order() {
        let backend = MockCompletionBackend::new()
            .with_scripted(CompletionResponse::text(
                r#"{"tasks":[{"id":"a","description":"Find policy"},{"id":"b","description":"Compare","dependsOn":["a"]}]}"#,
            ))
            .with_scripted(CompletionResponse::text("20 days\nCONFIDENCE: 0.9"))
            .with_scripted(CompletionResponse::text("Similar\nCONFIDENCE: 0.3"))
            .with_default_response("Final combined answer");
        let executor = AgentExecutor::new(Arc::new(backend.clone()), AgentConfig::default());
        let (tx, mut rx) = mpsc::channel(64);

        let outcome = executor.run(&request(), &tx).await.unwrap();
        assert_eq!(outcome.summary, "Final combined answer");
        assert_eq!(outcome.tasks[0].status, AgentTaskStatus::Done);
        assert_eq!(outcome.tasks[1].status, AgentTaskStatus::NeedsReview);
        assert!(!outcome.budget_exceeded);

        let second_task_prompt = backend.get_calls()[2].last_message_text();
        assert!(second_task_prompt.contains("Earlier results:\n### a (Find policy)\n20 days"));

        let kinds: Vec<&str> = drain(&mut rx).iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                "agentPlanCreated",
                "agentTaskStarted",
                "agentTaskCompleted",
                "agentTaskStarted",
                "agentTaskCompleted",
                "agentPlanSummary"
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_dependency_skips_dependent() {
        let backend = MockCompletionBackend::new()
            .with_scripted(CompletionResponse::text(
                r#"[{"id":"a","description":"A"},{"id":"b","description":"B","dependsOn":["a"]},{"id":"c","description":"C"}]"#,
            ))
            .with_scripted(CompletionResponse::text(""))
            .with_scripted(CompletionResponse::text("C done"))
            .with_default_response("summary");
        let executor = AgentExecutor::new(Arc::new(backend), AgentConfig::default());
        let (tx, _rx) = mpsc::channel(64);

        let outcome = executor.run(&request(), &tx).await.unwrap();
        let statuses: Vec<AgentTaskStatus> = outcome.tasks.iter().map(|t| t.status).collect();
        assert_eq!(
            statuses,
            vec![AgentTaskStatus::Error, AgentTaskStatus::Skipped, AgentTaskStatus::Done]
        );
        assert_eq!(outcome.stats.failed, 1);
        assert_eq!(outcome.stats.skipped, 1);
    }

    #[tokio::test]
    async fn test_budget_warnings_then_halt() {
        let backend = MockCompletionBackend::new()
            .with_scripted(CompletionResponse::text(
                r#"{"tasks":[{"id":"a","description":"A"},{"id":"b","description":"B"},{"id":"c","description":"C"},{"id":"d","description":"D"}]}"#,
            ))
            .with_scripted(with_usage("a", 450))
            .with_scripted(with_usage("b", 300))
            .with_scripted(with_usage("c", 400))
            .with_default_response("unused");
        let executor = AgentExecutor::new(Arc::new(backend.clone()), config(1000));
        let (tx, mut rx) = mpsc::channel(64);

        let outcome = executor.run(&request(), &tx).await.unwrap();
        assert!(outcome.budget_exceeded);
        assert_eq!(outcome.tasks[3].status, AgentTaskStatus::Skipped);
        assert_eq!(outcome.stats.completed, 3);
        assert!(outcome.summary.starts_with("Completed 3 of 4 tasks"));
        // plan + three tasks, no summary call once the budget is gone
        assert_eq!(backend.call_count(), 4);

        let events = drain(&mut rx);
        let warnings: Vec<AgentBudgetLevel> = events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::AgentBudgetWarning { level, .. } => Some(*level),
                _ => None,
            })
            .collect();
        assert_eq!(warnings, vec![AgentBudgetLevel::Medium, AgentBudgetLevel::High]);
        assert_eq!(
            events.iter().filter(|e| e.kind() == "agentBudgetExceeded").count(),
            1
        );
        assert_eq!(events.last().map(|e| e.kind()), Some("agentPlanSummary"));
    }

    #[tokio::test]
    async fn test_tasks_run_against_tool_registry() {
        let chart_call = CompletionResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: "call_1".into(),
                name: "create_chart".into(),
                arguments_json: r#"{"chartType":"bar","title":"Leave by region","labels":["EU","US"],"datasets":[{"label":"days","data":[25,15]}]}"#.into(),
            }],
            usage: TokenUsage::default(),
        };
        let backend = MockCompletionBackend::new()
            .with_scripted(CompletionResponse::text(
                r#"{"tasks":[{"id":"a","description":"Chart leave days"},{"id":"b","description":"Explain the chart","dependsOn":["a"]}]}"#,
            ))
            .with_scripted(chart_call)
            .with_scripted(CompletionResponse::text("Chart created\nCONFIDENCE: 0.9"))
            .with_scripted(CompletionResponse::text("EU offers more days\nCONFIDENCE: 0.8"))
            .with_default_response("Summary");
        let tools = ToolRegistry::new().with_tool(Arc::new(CreateChartTool::new()));
        let executor = AgentExecutor::new(Arc::new(backend.clone()), AgentConfig::default())
            .with_tools(Arc::new(tools));
        let (tx, mut rx) = mpsc::channel(64);

        let mut req = request();
        req.enable_tools = true;
        let outcome = executor.run(&req, &tx).await.unwrap();

        assert_eq!(outcome.tools_used, vec!["create_chart"]);
        assert_eq!(outcome.tasks[0].status, AgentTaskStatus::Done);
        assert_eq!(outcome.tasks[1].status, AgentTaskStatus::Done);

        let calls = backend.get_calls();
        assert_eq!(calls[1].tool_names, vec!["create_chart"]);
        let second_task_prompt = calls[3].last_message_text();
        assert!(second_task_prompt.contains("Tool outputs so far:\n- a via create_chart:"));
        assert!(second_task_prompt.contains("\"status\":\"created\""));

        let kinds: Vec<&str> = drain(&mut rx).iter().map(|e| e.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                "agentPlanCreated",
                "agentTaskStarted",
                "toolStart",
                "artifact",
                "toolEnd",
                "agentTaskCompleted",
                "agentTaskStarted",
                "agentTaskCompleted",
                "agentPlanSummary"
            ]
        );
    }

    #[tokio::test]
    async fn test_tools_not_offered_when_disabled() {
        let backend = MockCompletionBackend::new()
            .with_scripted(CompletionResponse::text(r#"[{"id":"a","description":"A"}]"#))
            .with_default_response("answer");
        let tools = ToolRegistry::new().with_tool(Arc::new(CreateChartTool::new()));
        let executor = AgentExecutor::new(Arc::new(backend.clone()), AgentConfig::default())
            .with_tools(Arc::new(tools));
        let (tx, _rx) = mpsc::channel(64);

        executor.run(&request(), &tx).await.unwrap();
        assert!(backend.get_calls().iter().all(|c| c.tool_names.is_empty()));
    }

    #[tokio::test]
    async fn test_closed_channel_aborts() {
        let backend = MockCompletionBackend::new();
        let executor = AgentExecutor::new(Arc::new(backend), AgentConfig::default());
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let err = executor.run(&request(), &tx).await.unwrap_err();
        assert!(matches!(err, Error::Aborted));
    }
}
