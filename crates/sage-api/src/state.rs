use std::sync::Arc;

use sage_agent::SkillRegistry;
use sage_search::Ingestor;

use crate::cache::ResponseCache;
use crate::orchestrator::StreamOrchestrator;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<StreamOrchestrator>,
    pub ingestor: Arc<Ingestor>,
    pub skills: Arc<SkillRegistry>,
    pub cache: ResponseCache,
}
