//! REST models mirrored from the backend's response and request schemas.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ApiError;

/// Free-form metadata object attached to most backend records
pub type Metadata = Map<String, Value>;

// ============================================================================
// Auth
// ============================================================================

/// Credentials sent to `POST /auth/login-json`
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Tokens returned by login and refresh
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: u64,
    pub user: User,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// The authenticated user as reported by `/auth/me`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub last_login: Option<String>,
}

// ============================================================================
// Episodes
// ============================================================================

/// Lifecycle status of an episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Active,
    Paused,
    Completed,
    Archived,
}

impl EpisodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeStatus::Active => "active",
            EpisodeStatus::Paused => "paused",
            EpisodeStatus::Completed => "completed",
            EpisodeStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EpisodeStatus {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(EpisodeStatus::Active),
            "paused" => Ok(EpisodeStatus::Paused),
            "completed" => Ok(EpisodeStatus::Completed),
            "archived" => Ok(EpisodeStatus::Archived),
            other => Err(ApiError::Invalid(format!(
                "unknown episode status '{}' (expected active, paused, completed or archived)",
                other
            ))),
        }
    }
}

/// A persisted conversation session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub persona_pack_id: Option<Uuid>,
    pub status: String,
    pub created_by: Uuid,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub beat_count: u32,
    #[serde(default)]
    pub total_citations: u32,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Body for `POST /api/studio/episodes`
#[derive(Debug, Clone, Default, Serialize)]
pub struct NewEpisode {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona_pack_id: Option<Uuid>,
    pub metadata: Metadata,
}

impl NewEpisode {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Same bounds the backend enforces, checked before the request is sent.
    pub fn validate(&self) -> Result<(), ApiError> {
        check_len("title", self.title.trim(), 1, 200)?;
        if let Some(description) = &self.description {
            check_len("description", description, 0, 1000)?;
        }
        Ok(())
    }
}

/// One persisted user/assistant exchange inside an episode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Beat {
    pub id: Uuid,
    pub episode_id: Uuid,
    pub sequence_number: u32,
    pub user_message: String,
    pub lincoln_response: String,
    #[serde(default, deserialize_with = "present_citations")]
    pub citations: Vec<BeatCitation>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A citation as stored on a beat.
///
/// Beats recorded from a Studio reply keep the streamed shape
/// (`citation_text`, `source_title`, `confidence_score`); beats built from
/// indexed chunks carry source info instead (`title`, `author`, `year`,
/// `trust_tier`, `page`). Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BeatCitation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    /// 1 = primary ... 4 = other; some records use a label instead
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_tier: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

impl BeatCitation {
    /// Best available name for the cited work
    pub fn label(&self) -> &str {
        self.source_title
            .as_deref()
            .or(self.title.as_deref())
            .or(self.citation_text.as_deref())
            .unwrap_or("Unknown source")
    }

    pub fn author(&self) -> Option<&str> {
        self.source_author.as_deref().or(self.author.as_deref())
    }
}

/// Citations whose source could not be resolved are stored as `null`.
fn present_citations<'de, D>(deserializer: D) -> Result<Vec<BeatCitation>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Option<BeatCitation>>>::deserialize(deserializer)?;
    Ok(raw.unwrap_or_default().into_iter().flatten().collect())
}

/// Export formats offered by `GET /api/studio/episodes/{id}/export`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Markdown,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Markdown => "markdown",
        }
    }
}

/// Result of an episode export
#[derive(Debug, Clone, PartialEq)]
pub enum EpisodeExport {
    /// Rendered markdown transcript
    Markdown(String),
    /// Structured JSON export (episode header + conversation)
    Json(Value),
}

#[derive(Debug, Deserialize)]
pub(crate) struct MarkdownExport {
    pub content: String,
}

/// Aggregate counters from `GET /api/studio/stats`
#[derive(Debug, Clone, Deserialize)]
pub struct StudioStats {
    pub episodes: EpisodeCounts,
    pub conversation: ConversationCounts,
    #[serde(default)]
    pub recent_episodes: Vec<RecentEpisode>,
    #[serde(default)]
    pub active_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EpisodeCounts {
    pub total: u32,
    pub active: u32,
    pub completed: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationCounts {
    pub total_beats: u32,
    pub total_citations: u32,
    pub average_citation_accuracy: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecentEpisode {
    pub id: String,
    pub title: String,
    pub status: String,
    pub created_at: String,
}

// ============================================================================
// Sources & documents
// ============================================================================

/// Kind of material a source holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Book,
    Article,
    Document,
    Letter,
    Speech,
    Manuscript,
    Other,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Book => "book",
            SourceType::Article => "article",
            SourceType::Document => "document",
            SourceType::Letter => "letter",
            SourceType::Speech => "speech",
            SourceType::Manuscript => "manuscript",
            SourceType::Other => "other",
        }
    }
}

impl FromStr for SourceType {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "book" => Ok(SourceType::Book),
            "article" => Ok(SourceType::Article),
            "document" => Ok(SourceType::Document),
            "letter" => Ok(SourceType::Letter),
            "speech" => Ok(SourceType::Speech),
            "manuscript" => Ok(SourceType::Manuscript),
            "other" => Ok(SourceType::Other),
            other => Err(ApiError::Invalid(format!("unknown source type '{}'", other))),
        }
    }
}

/// A curated collection of documents used to ground answers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub source_type: SourceType,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub publication_date: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub isbn: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    pub reliability_score: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub updated_at: DateTime<Utc>,
    pub created_by: Uuid,
    #[serde(default)]
    pub document_count: u32,
    #[serde(default)]
    pub total_chunks: u32,
}

/// Body for `POST /api/sources`
#[derive(Debug, Clone, Serialize)]
pub struct NewSource {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub source_type: SourceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub reliability_score: f64,
    pub tags: Vec<String>,
    pub metadata: Metadata,
}

impl NewSource {
    pub fn new(title: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            title: title.into(),
            description: None,
            source_type,
            author: None,
            publisher: None,
            isbn: None,
            url: None,
            reliability_score: 0.5,
            tags: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    /// Validate and normalize in place: tags are trimmed and empties dropped.
    pub fn normalize(&mut self) -> Result<(), ApiError> {
        check_len("title", self.title.trim(), 1, 500)?;
        if let Some(description) = &self.description {
            check_len("description", description, 0, 2000)?;
        }
        check_reliability(self.reliability_score)?;
        check_url(self.url.as_deref())?;
        self.tags = clean_tags(&self.tags);
        Ok(())
    }
}

/// Body for `PUT /api/sources/{id}`; only set fields are sent
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_type: Option<SourceType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reliability_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl SourceUpdate {
    pub fn normalize(&mut self) -> Result<(), ApiError> {
        if let Some(title) = &self.title {
            check_len("title", title.trim(), 1, 500)?;
        }
        if let Some(score) = self.reliability_score {
            check_reliability(score)?;
        }
        check_url(self.url.as_deref())?;
        if let Some(tags) = &self.tags {
            self.tags = Some(clean_tags(tags));
        }
        Ok(())
    }
}

/// Filters for `GET /api/sources`
#[derive(Debug, Clone)]
pub struct SourceQuery {
    pub skip: u32,
    pub limit: u32,
    pub search: Option<String>,
    pub source_type: Option<SourceType>,
    pub tags: Vec<String>,
}

impl Default for SourceQuery {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: 100,
            search: None,
            source_type: None,
            tags: Vec::new(),
        }
    }
}

impl SourceQuery {
    pub(crate) fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("skip", self.skip.to_string()),
            ("limit", self.limit.to_string()),
        ];
        if let Some(search) = self.search.as_deref().filter(|s| !s.trim().is_empty()) {
            params.push(("search", search.trim().to_string()));
        }
        if let Some(source_type) = self.source_type {
            params.push(("source_type", source_type.as_str().to_string()));
        }
        let tags = clean_tags(&self.tags);
        if !tags.is_empty() {
            params.push(("tags", tags.join(",")));
        }
        params
    }
}

/// An uploaded file belonging to a source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub source_id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub file_size: u64,
    pub file_hash: String,
    #[serde(default)]
    pub word_count: u64,
    #[serde(default)]
    pub character_count: u64,
    #[serde(default)]
    pub chunk_count: Option<u32>,
    pub processing_status: String,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Per-source document processing summary
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingStatus {
    pub total_documents: u32,
    #[serde(default)]
    pub completed: u32,
    #[serde(default)]
    pub processing: u32,
    #[serde(default)]
    pub chunking: u32,
    #[serde(default)]
    pub indexed: u32,
    #[serde(default)]
    pub error: u32,
    #[serde(default)]
    pub documents: Vec<DocumentStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentStatus {
    pub id: String,
    pub filename: String,
    pub status: String,
    #[serde(default)]
    pub chunk_count: Option<u32>,
    #[serde(default)]
    pub error_message: Option<String>,
}

/// Document totals for one source, from `GET /api/sources/{id}/stats`
#[derive(Debug, Clone, Deserialize)]
pub struct SourceStats {
    pub source_id: Uuid,
    pub source_title: String,
    #[serde(default)]
    pub total_documents: u64,
    #[serde(default)]
    pub total_words: u64,
    #[serde(default)]
    pub total_characters: u64,
    #[serde(default)]
    pub total_chunks: u64,
    /// Document count per processing status (`completed`, `error`, ...)
    #[serde(default)]
    pub processing_status: BTreeMap<String, u64>,
    #[serde(default)]
    pub reliability_score: Option<f64>,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: DateTime<Utc>,
}

/// Outcome of `POST /api/sources/{id}/reprocess`
#[derive(Debug, Clone, Deserialize)]
pub struct ReprocessSummary {
    pub message: String,
    pub total_documents: u32,
    pub reprocessed: u32,
}

/// Generic `{"message": ...}` acknowledgement
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Ack {
    #[serde(default)]
    pub message: String,
}

// ============================================================================
// Validation helpers
// ============================================================================

fn check_len(field: &str, value: &str, min: usize, max: usize) -> Result<(), ApiError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(ApiError::Invalid(format!(
            "{} must be between {} and {} characters (got {})",
            field, min, max, len
        )));
    }
    Ok(())
}

fn check_reliability(score: f64) -> Result<(), ApiError> {
    if !(0.0..=1.0).contains(&score) {
        return Err(ApiError::Invalid(format!(
            "reliability_score must be within 0.0..=1.0 (got {})",
            score
        )));
    }
    Ok(())
}

fn check_url(url: Option<&str>) -> Result<(), ApiError> {
    match url {
        Some(u) if !u.is_empty() && !(u.starts_with("http://") || u.starts_with("https://")) => Err(
            ApiError::Invalid("URL must start with http:// or https://".to_string()),
        ),
        _ => Ok(()),
    }
}

fn clean_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Backend timestamps come both with and without an offset.
pub(crate) mod timestamp {
    use super::*;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| format!("invalid timestamp '{}': {}", raw, e))
    }
}
