//! Skill registry and resolution.
//!
//! A skill is a prompt fragment that joins the system prompt when its
//! trigger matches the request. Skills live in a versioned YAML file:
//!
//! ```yaml
//! version: 2
//! skills:
//!   - name: hr-leave
//!     promptFragment: Cite the leave policy section when answering.
//!     priority: 10
//!     trigger:
//!       type: keyword
//!       keywords: [leave, vacation]
//!       categories: [hr]
//!       categoryRestricted: true
//! ```
//!
//! The registry is loaded once and shared; [`SkillRegistry::reload`]
//! swaps in a fresh copy and bumps the generation counter.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use sage_core::defaults;
use sage_core::{
    EstimatingTokenizer, Error, ResolvedSkill, ResolvedSkills, Result, Tokenizer, TriggerReason,
};

/// When a skill activates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SkillTrigger {
    Always,
    Category {
        categories: Vec<String>,
    },
    Keyword {
        keywords: Vec<String>,
        #[serde(default)]
        categories: Vec<String>,
        /// Also require a category match.
        #[serde(default, rename = "categoryRestricted")]
        category_restricted: bool,
    },
}

fn default_priority() -> i32 {
    defaults::SKILL_DEFAULT_PRIORITY
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub prompt_fragment: String,
    pub trigger: SkillTrigger,
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Broad per-category framing. Informational only.
    #[serde(default)]
    pub is_index: bool,
    /// Overrides the computed token count.
    #[serde(default)]
    pub token_estimate: Option<usize>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
struct SkillFile {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    skills: Vec<SkillDefinition>,
}

/// An immutable view of the registry at one generation.
#[derive(Debug, Clone, Default)]
pub struct SkillSet {
    pub version: u32,
    /// Incremented on every successful load.
    pub generation: u64,
    pub skills: Vec<SkillDefinition>,
}

#[derive(Debug, Clone)]
enum SkillSource {
    File(PathBuf),
    Inline(String),
}

fn parse_skill_file(raw: &str) -> Result<(u32, Vec<SkillDefinition>)> {
    let file: SkillFile = serde_yaml::from_str(raw)
        .map_err(|e| Error::Config(format!("Invalid skills file: {}", e)))?;

    let mut seen = HashSet::new();
    for skill in &file.skills {
        if skill.name.trim().is_empty() {
            return Err(Error::Config("Skill with empty name".into()));
        }
        if !seen.insert(skill.name.as_str()) {
            return Err(Error::Config(format!("Duplicate skill name: {}", skill.name)));
        }
    }
    Ok((file.version, file.skills))
}

/// Versioned, reloadable skill definitions.
pub struct SkillRegistry {
    source: SkillSource,
    state: RwLock<Arc<SkillSet>>,
}

impl SkillRegistry {
    /// Load from a YAML file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = SkillSource::File(path.as_ref().to_path_buf());
        let set = Self::read_source(&source, 1).await?;
        Ok(Self {
            source,
            state: RwLock::new(Arc::new(set)),
        })
    }

    /// Build from YAML text.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let (version, skills) = parse_skill_file(raw)?;
        Ok(Self {
            source: SkillSource::Inline(raw.to_string()),
            state: RwLock::new(Arc::new(SkillSet {
                version,
                generation: 1,
                skills,
            })),
        })
    }

    /// Load from `SKILLS_PATH` (default `config/skills.yaml`).
    ///
    /// A missing file yields an empty registry.
    pub async fn from_env() -> Result<Self> {
        let path = std::env::var("SKILLS_PATH").unwrap_or_else(|_| defaults::SKILLS_PATH.into());
        if !Path::new(&path).exists() {
            warn!(path = %path, "Skills file not found, starting with no skills");
            return Ok(Self {
                source: SkillSource::File(PathBuf::from(path)),
                state: RwLock::new(Arc::new(SkillSet::default())),
            });
        }
        Self::load(path).await
    }

    async fn read_source(source: &SkillSource, generation: u64) -> Result<SkillSet> {
        let raw = match source {
            SkillSource::File(path) => tokio::fs::read_to_string(path).await?,
            SkillSource::Inline(raw) => raw.clone(),
        };
        let (version, skills) = if raw.trim().is_empty() {
            (0, Vec::new())
        } else {
            parse_skill_file(&raw)?
        };
        Ok(SkillSet {
            version,
            generation,
            skills,
        })
    }

    /// Current definitions.
    pub async fn snapshot(&self) -> Arc<SkillSet> {
        self.state.read().await.clone()
    }

    /// Re-read the source. On failure the previous definitions stay active.
    pub async fn reload(&self) -> Result<u64> {
        let mut set = Self::read_source(&self.source, 0).await?;
        // Numbered under the write lock so concurrent reloads never share a generation.
        let mut state = self.state.write().await;
        set.generation = state.generation + 1;
        let generation = set.generation;
        info!(
            subsystem = "agent",
            component = "skills",
            version = set.version,
            generation,
            count = set.skills.len(),
            "Reloaded skills"
        );
        *state = Arc::new(set);
        Ok(generation)
    }
}

fn intersects(a: &[String], b: &[String]) -> bool {
    a.iter().any(|x| b.iter().any(|y| x.eq_ignore_ascii_case(y)))
}

/// Why `trigger` fires for this request, if it does.
pub fn trigger_reason(
    trigger: &SkillTrigger,
    category_ids: &[String],
    message: &str,
) -> Option<TriggerReason> {
    match trigger {
        SkillTrigger::Always => Some(TriggerReason::Always),
        SkillTrigger::Category { categories } => {
            intersects(categories, category_ids).then_some(TriggerReason::Category)
        }
        SkillTrigger::Keyword {
            keywords,
            categories,
            category_restricted,
        } => {
            let lowered = message.to_lowercase();
            let keyword_hit = keywords
                .iter()
                .any(|k| !k.is_empty() && lowered.contains(&k.to_lowercase()));
            let category_ok = !category_restricted || intersects(categories, category_ids);
            (keyword_hit && category_ok).then_some(TriggerReason::Keyword)
        }
    }
}

/// Selects skills for a request under a token budget.
pub struct SkillResolver {
    registry: Arc<SkillRegistry>,
    tokenizer: Arc<dyn Tokenizer>,
    max_total_tokens: usize,
}

impl SkillResolver {
    pub fn new(registry: Arc<SkillRegistry>) -> Self {
        Self {
            registry,
            tokenizer: Arc::new(EstimatingTokenizer),
            max_total_tokens: defaults::SKILL_MAX_TOTAL_TOKENS,
        }
    }

    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = tokenizer;
        self
    }

    pub fn with_max_total_tokens(mut self, max: usize) -> Self {
        self.max_total_tokens = max;
        self
    }

    pub fn registry(&self) -> &Arc<SkillRegistry> {
        &self.registry
    }

    #[instrument(skip(self, category_ids, message), fields(subsystem = "agent", component = "skills", op = "resolve"))]
    pub async fn resolve(&self, category_ids: &[String], message: &str) -> ResolvedSkills {
        let set = self.registry.snapshot().await;

        let mut selected: Vec<ResolvedSkill> = set
            .skills
            .iter()
            .filter(|s| s.enabled)
            .filter_map(|skill| {
                let reason = trigger_reason(&skill.trigger, category_ids, message)?;
                Some(ResolvedSkill {
                    name: skill.name.clone(),
                    prompt_fragment: skill.prompt_fragment.clone(),
                    trigger_reason: reason,
                    token_estimate: skill
                        .token_estimate
                        .unwrap_or_else(|| self.tokenizer.count_tokens(&skill.prompt_fragment)),
                    priority: skill.priority,
                })
            })
            .collect();
        selected.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));

        let mut resolved = ResolvedSkills::default();
        let mut over_budget = false;
        for skill in selected {
            if !over_budget && resolved.total_tokens + skill.token_estimate <= self.max_total_tokens {
                resolved.total_tokens += skill.token_estimate;
                resolved.skills.push(skill);
            } else {
                over_budget = true;
                resolved.dropped.push(skill.name);
            }
        }

        if !resolved.dropped.is_empty() {
            debug!(dropped = ?resolved.dropped, "Skills dropped for token budget");
        }
        debug!(
            count = resolved.skills.len(),
            tokens = resolved.total_tokens,
            generation = set.generation,
            "Resolved skills"
        );
        resolved
    }
}
