use crate::database::{Database, DialogueScript, EpisodeMeta, EpisodeStatus, SourceDescriptor};
use crate::error::AppError;
use crate::AppState;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Divider placed between newsletters when several are combined.
const NEWSLETTER_DIVIDER: &str = "\n\n---\n\n";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateEpisodeRequest {
    pub text: Option<String>,
    #[serde(default)]
    pub newsletter_ids: Vec<String>,
}

/// Episode record plus its script, once one has been written.
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeDetail {
    #[serde(flatten)]
    pub meta: EpisodeMeta,
    pub script: Option<DialogueScript>,
}

/// Trim `text` and check it against the length limit.
pub fn validate_source_text(text: &str, max_length: usize) -> Result<&str, AppError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidInput("Text is required".to_string()));
    }
    if text.chars().count() > max_length {
        return Err(AppError::InvalidInput(format!(
            "Text exceeds maximum length of {} characters",
            max_length
        )));
    }
    Ok(trimmed)
}

/// Build the source text for a newsletter-based episode, in the order given.
pub fn assemble_newsletter_text(db: &Database, ids: &[String]) -> Result<String, AppError> {
    let mut parts = Vec::with_capacity(ids.len());
    for id in ids {
        let newsletter = db
            .get_newsletter_content(id)?
            .ok_or_else(|| AppError::NotFound(format!("Newsletter {}", id)))?;
        parts.push(format!(
            "From: {}\nSubject: {}\n\n{}",
            newsletter.sender,
            newsletter.subject,
            newsletter.content.trim()
        ));
    }
    Ok(parts.join(NEWSLETTER_DIVIDER))
}

fn dedup_ids(ids: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

/// Validate the request, write the initial record and start the pipeline
/// in the background. Returns the `processing` record right away.
pub async fn create_episode(
    state: &AppState,
    request: CreateEpisodeRequest,
) -> Result<EpisodeMeta, AppError> {
    let newsletter_ids = dedup_ids(request.newsletter_ids);

    let (raw_text, source) = if newsletter_ids.is_empty() {
        (request.text.unwrap_or_default(), SourceDescriptor::Paste)
    } else {
        if request.text.is_some() {
            return Err(AppError::InvalidInput(
                "Provide either text or newsletter ids, not both".to_string(),
            ));
        }
        let text = assemble_newsletter_text(&state.db, &newsletter_ids)?;
        (text, SourceDescriptor::Newsletters(newsletter_ids.clone()))
    };

    let text = validate_source_text(&raw_text, state.config.max_input_length)?;

    let id = uuid::Uuid::new_v4().to_string();
    let meta = state
        .runner
        .pipeline()
        .initialize_episode(&id, text, &source)?;

    log::info!("create_episode: starting pipeline for {}", id);
    state.runner.spawn(id, text.to_string(), newsletter_ids);
    Ok(meta)
}

pub async fn get_episode(state: &AppState, id: &str) -> Result<EpisodeDetail, AppError> {
    let meta = state
        .db
        .get_episode(id)?
        .ok_or_else(|| AppError::NotFound(format!("Episode {}", id)))?;
    let script = state.db.get_script(id)?;
    Ok(EpisodeDetail { meta, script })
}

pub async fn list_episodes(state: &AppState) -> Result<Vec<EpisodeMeta>, AppError> {
    Ok(state.db.list_episodes()?)
}

/// Path of the finished episode audio. Only a `complete` episode has one;
/// a file left by a run still in progress or one that failed is ignored.
pub async fn get_episode_audio(state: &AppState, id: &str) -> Result<PathBuf, AppError> {
    let meta = state
        .db
        .get_episode(id)?
        .ok_or_else(|| AppError::NotFound(format!("Episode {}", id)))?;
    if meta.status != EpisodeStatus::Complete {
        return Err(AppError::AudioNotReady);
    }
    let path = state.runner.pipeline().layout().episode_audio_path(id);
    if !tokio::fs::try_exists(&path).await? {
        return Err(AppError::AudioNotReady);
    }
    Ok(path)
}

/// Mark episodes abandoned mid-pipeline as errored. Returns how many.
pub async fn reconcile_episodes(state: &AppState) -> Result<usize, AppError> {
    let count = state.runner.pipeline().reconcile_orphans()?;
    log::info!("reconcile_episodes: {} episodes marked as errored", count);
    Ok(count)
}
