use crate::database::Newsletter;
use crate::error::AppError;
use crate::AppState;
use chrono::Utc;
use serde::Deserialize;

/// Shortest content accepted as a newsletter, in characters.
pub const MIN_NEWSLETTER_LENGTH: usize = 50;

const DEFAULT_SENDER: &str = "Manual import";
const DEFAULT_SUBJECT: &str = "Imported newsletter";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportNewsletterRequest {
    pub content: String,
    pub sender: Option<String>,
    pub subject: Option<String>,
}

fn non_empty_or(value: Option<String>, default: &str) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Store a newsletter so it can later be selected as episode source.
pub async fn import_newsletter(
    state: &AppState,
    request: ImportNewsletterRequest,
) -> Result<Newsletter, AppError> {
    let content = request.content.trim();
    if content.is_empty() {
        return Err(AppError::InvalidInput("Content is required".to_string()));
    }
    if content.chars().count() < MIN_NEWSLETTER_LENGTH {
        return Err(AppError::InvalidInput(
            "Content too short to be a newsletter".to_string(),
        ));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let sender = non_empty_or(request.sender, DEFAULT_SENDER);
    let subject = non_empty_or(request.subject, DEFAULT_SUBJECT);
    let newsletter = state
        .db
        .insert_newsletter(&id, &sender, &subject, Utc::now(), content)?;

    log::info!(
        "Imported newsletter {} from {} ({} chars)",
        id,
        sender,
        newsletter.content_length
    );
    Ok(newsletter)
}

pub async fn list_newsletters(state: &AppState) -> Result<Vec<Newsletter>, AppError> {
    Ok(state.db.list_newsletters()?)
}

pub async fn get_newsletter(state: &AppState, id: &str) -> Result<Newsletter, AppError> {
    state
        .db
        .get_newsletter(id)?
        .ok_or_else(|| AppError::NotFound(format!("Newsletter {}", id)))
}

pub async fn delete_newsletter(state: &AppState, id: &str) -> Result<(), AppError> {
    if !state.db.delete_newsletter(id)? {
        return Err(AppError::NotFound(format!("Newsletter {}", id)));
    }
    log::info!("Deleted newsletter {}", id);
    Ok(())
}
