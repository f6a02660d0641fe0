//! Prompt and context assembly.
//!
//! Retrieval output becomes the context block sent with the user turn.
//! Skills, data-source capabilities, memories, and the rolling summary
//! become the system prompt.

use std::sync::Arc;

use sage_core::defaults::NO_CONTEXT_SENTINEL;
use sage_core::{Chunk, ResolvedSkills, RetrievalResult};

use crate::datasources::DataSourceRegistry;

const KNOWLEDGE_BASE_HEADING: &str = "## Knowledge Base";
const USER_DOCUMENTS_HEADING: &str = "## User Documents";
const MEMORY_HEADING: &str = "What you remember about this user:";
const SUMMARY_HEADING: &str = "Summary of the earlier conversation:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledContext {
    pub context_block: String,
    pub system_prompt: String,
}

#[derive(Default)]
pub struct ContextAssembler {
    data_sources: Option<Arc<DataSourceRegistry>>,
}

impl ContextAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data_sources(mut self, registry: Arc<DataSourceRegistry>) -> Self {
        self.data_sources = Some(registry);
        self
    }

    pub fn assemble(
        &self,
        retrieval: &RetrievalResult,
        skills: &ResolvedSkills,
        memory_text: Option<&str>,
        summary_text: Option<&str>,
        base_prompt: &str,
        categories: &[String],
    ) -> AssembledContext {
        AssembledContext {
            context_block: format_context_block(retrieval),
            system_prompt: self.system_prompt(
                skills,
                memory_text,
                summary_text,
                base_prompt,
                categories,
            ),
        }
    }

    fn system_prompt(
        &self,
        skills: &ResolvedSkills,
        memory_text: Option<&str>,
        summary_text: Option<&str>,
        base_prompt: &str,
        categories: &[String],
    ) -> String {
        let mut sections: Vec<String> = Vec::new();
        push_non_empty(&mut sections, base_prompt);

        let mut ordered: Vec<_> = skills.skills.iter().collect();
        ordered.sort_by_key(|s| s.priority);
        for skill in ordered {
            push_non_empty(&mut sections, &skill.prompt_fragment);
        }

        if let Some(description) = self
            .data_sources
            .as_ref()
            .and_then(|ds| ds.capability_description(categories))
        {
            sections.push(description);
        }

        if let Some(memory) = memory_text.filter(|m| !m.trim().is_empty()) {
            sections.push(format!("{}\n{}", MEMORY_HEADING, memory.trim()));
        }
        if let Some(summary) = summary_text.filter(|s| !s.trim().is_empty()) {
            sections.push(format!("{}\n{}", SUMMARY_HEADING, summary.trim()));
        }

        sections.join("\n\n")
    }
}

fn push_non_empty(sections: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        sections.push(trimmed.to_string());
    }
}

fn format_section(heading: &str, chunks: &[Chunk]) -> String {
    let mut out = String::from(heading);
    for (i, chunk) in chunks.iter().enumerate() {
        out.push_str(&format!(
            "\n\n[{}] {} (page {})\n{}",
            i + 1,
            chunk.document_name,
            chunk.page_number,
            chunk.text
        ));
    }
    out
}

/// Render retrieved chunks, knowledge base first, or the sentinel when empty.
pub fn format_context_block(retrieval: &RetrievalResult) -> String {
    if retrieval.is_empty() {
        return NO_CONTEXT_SENTINEL.to_string();
    }
    let mut sections = Vec::with_capacity(2);
    if !retrieval.global_chunks.is_empty() {
        sections.push(format_section(KNOWLEDGE_BASE_HEADING, &retrieval.global_chunks));
    }
    if !retrieval.user_chunks.is_empty() {
        sections.push(format_section(USER_DOCUMENTS_HEADING, &retrieval.user_chunks));
    }
    sections.join("\n\n")
}

/// Final user turn: context block followed by the question.
pub fn user_turn(context_block: &str, message: &str) -> String {
    if context_block.trim().is_empty() {
        return message.to_string();
    }
    format!("Context:\n{}\n\nQuestion: {}", context_block, message)
}
