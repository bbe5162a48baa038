//! Test helper factories
//!
//! Canned backend payloads and pre-authenticated clients for the wiremock
//! tests, plus citation builders for the session and panel tests.
#![allow(dead_code)]

use crate::api::{ApiClient, ApiConfig, AuthTokens};
use crate::chat::Citation;
use serde_json::{json, Value};
use wiremock::MockServer;

// ============================================================================
// Backend payloads
// ============================================================================

pub const EPISODE_ID: &str = "7f1d0e7e-3c5a-4a63-9a3e-0d0f2b6b1a11";
pub const SOURCE_ID: &str = "2c9a1d3b-8e47-4f0a-b6a2-5d1e9f7c3b20";
pub const USER_UUID: &str = "0b8f6a5e-59b0-4b8a-9f3e-1b2c3d4e5f60";

pub fn user_json() -> Value {
    json!({
        "id": "user-1",
        "username": "host",
        "email": "host@example.com",
        "name": "Studio Host",
        "role": "host",
        "is_active": true,
        "is_verified": true,
        "avatar_url": null,
        "created_at": "2024-01-01T00:00:00",
        "last_login": null
    })
}

pub fn tokens_json(access: &str, refresh: &str) -> Value {
    json!({
        "access_token": access,
        "refresh_token": refresh,
        "token_type": "bearer",
        "expires_in": 1800,
        "user": user_json()
    })
}

pub fn tokens(access: &str, refresh: &str) -> AuthTokens {
    serde_json::from_value(tokens_json(access, refresh)).expect("valid token fixture")
}

pub fn episode_json(title: &str) -> Value {
    json!({
        "id": EPISODE_ID,
        "title": title,
        "description": "A fireside conversation",
        "persona_pack_id": null,
        "status": "active",
        "created_by": USER_UUID,
        "created_at": "2024-03-01T12:30:00.123456",
        "updated_at": "2024-03-01T12:30:00.123456",
        "beat_count": 0,
        "total_citations": 0,
        "metadata": {}
    })
}

pub fn source_json(title: &str) -> Value {
    json!({
        "id": SOURCE_ID,
        "title": title,
        "description": null,
        "source_type": "book",
        "author": "Abraham Lincoln",
        "publication_date": null,
        "publisher": null,
        "isbn": null,
        "url": null,
        "reliability_score": 0.9,
        "tags": ["speeches"],
        "metadata": {},
        "created_at": "2024-02-01T09:00:00",
        "updated_at": "2024-02-01T09:00:00",
        "created_by": USER_UUID,
        "document_count": 1,
        "total_chunks": 42
    })
}

pub fn document_json(filename: &str) -> Value {
    json!({
        "id": "5e0c7a42-1d3b-4c8e-9f2a-7b6d5c4e3a10",
        "source_id": SOURCE_ID,
        "filename": filename,
        "content_type": "text/plain",
        "file_size": 12,
        "file_hash": "abc123",
        "word_count": 2,
        "character_count": 12,
        "chunk_count": 0,
        "processing_status": "processing",
        "error_message": null,
        "created_at": "2024-02-01T09:05:00",
        "updated_at": "2024-02-01T09:05:00",
        "metadata": {}
    })
}

// ============================================================================
// Clients
// ============================================================================

/// A client pointed at `server` that already holds tokens `a1` / `r1`.
pub async fn logged_in_client(server: &MockServer) -> ApiClient {
    let client = ApiClient::new(ApiConfig {
        base_url: server.uri(),
        ..Default::default()
    })
    .expect("client builds");
    client.set_tokens(tokens("a1", "r1")).await;
    client
}

// ============================================================================
// Citations
// ============================================================================

pub fn citation(title: &str, score: f64) -> Citation {
    Citation {
        id: None,
        citation_text: format!("{} (p. 1)", title),
        source_title: title.to_string(),
        source_author: None,
        confidence_score: score,
        validation_score: None,
        context_snippet: None,
    }
}

pub fn citation_full(
    title: &str,
    author: Option<&str>,
    snippet: Option<&str>,
    score: f64,
) -> Citation {
    Citation {
        source_author: author.map(String::from),
        context_snippet: snippet.map(String::from),
        ..citation(title, score)
    }
}
