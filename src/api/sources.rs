//! Source and document endpoints (`/api/sources/...`).

use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use tracing::{debug, info};
use uuid::Uuid;

use super::client::ApiClient;
use super::models::{
    Ack, Document, Metadata, NewSource, ProcessingStatus, ReprocessSummary, Source, SourceQuery,
    SourceStats, SourceUpdate,
};
use crate::error::{ApiError, ApiResult};

/// A file to attach to a source
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Bytes,
    pub metadata: Option<Metadata>,
}

impl Upload {
    /// Build an upload from a file on disk; content type is inferred from the extension.
    pub async fn from_path(path: &std::path::Path) -> ApiResult<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .map(Bytes::from)
            .map_err(|e| ApiError::Invalid(format!("cannot read {}: {}", path.display(), e)))?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ApiError::Invalid(format!("no file name in {}", path.display())))?
            .to_string();

        Ok(Self {
            content_type: mime_guess::from_path(path)
                .first_or_octet_stream()
                .to_string(),
            filename,
            bytes,
            metadata: None,
        })
    }

    fn to_form(&self) -> ApiResult<Form> {
        let part = Part::stream_with_length(self.bytes.clone(), self.bytes.len() as u64)
            .file_name(self.filename.clone())
            .mime_str(&self.content_type)?;
        let mut form = Form::new().part("file", part);
        if let Some(metadata) = &self.metadata {
            let json = serde_json::to_string(metadata)
                .map_err(|e| ApiError::Invalid(format!("metadata is not serializable: {}", e)))?;
            form = form.text("metadata", json);
        }
        Ok(form)
    }
}

impl ApiClient {
    pub async fn list_sources(&self, query: &SourceQuery) -> ApiResult<Vec<Source>> {
        let url = self.url("/api/sources/");
        let params = query.to_params();
        let response = self
            .send_authed(|http| http.get(&url).query(&params))
            .await?;
        Self::parse(response).await
    }

    pub async fn get_source(&self, id: Uuid) -> ApiResult<Source> {
        let url = self.url(&format!("/api/sources/{}", id));
        let response = self.send_authed(|http| http.get(&url)).await?;
        Self::parse(response).await
    }

    pub async fn create_source(&self, source: &NewSource) -> ApiResult<Source> {
        let mut body = source.clone();
        body.normalize()?;

        let url = self.url("/api/sources/");
        let response = self.send_authed(|http| http.post(&url).json(&body)).await?;
        let created: Source = Self::parse(response).await?;
        info!(source_id = %created.id, title = %created.title, "Source created");
        Ok(created)
    }

    pub async fn update_source(&self, id: Uuid, update: &SourceUpdate) -> ApiResult<Source> {
        let mut body = update.clone();
        body.normalize()?;

        let url = self.url(&format!("/api/sources/{}", id));
        let response = self.send_authed(|http| http.put(&url).json(&body)).await?;
        Self::parse(response).await
    }

    /// Delete a source and, server-side, all of its documents.
    pub async fn delete_source(&self, id: Uuid) -> ApiResult<()> {
        let url = self.url(&format!("/api/sources/{}", id));
        let response = self.send_authed(|http| http.delete(&url)).await?;
        let ack: Ack = Self::parse(response).await?;
        info!(source_id = %id, message = %ack.message, "Source deleted");
        Ok(())
    }

    /// Upload a document as multipart (`file` + optional JSON `metadata` field).
    pub async fn upload_document(&self, source_id: Uuid, upload: &Upload) -> ApiResult<Document> {
        if upload.bytes.is_empty() {
            return Err(ApiError::Invalid(format!("{} is empty", upload.filename)));
        }

        let url = self.url(&format!("/api/sources/{}/upload", source_id));
        let response = self
            .try_send_authed(|http| Ok(http.post(&url).multipart(upload.to_form()?)))
            .await?;

        let document: Document = Self::parse(response).await?;
        info!(
            source_id = %source_id,
            document_id = %document.id,
            filename = %document.filename,
            bytes = document.file_size,
            "Document uploaded"
        );
        Ok(document)
    }

    pub async fn list_documents(&self, source_id: Uuid, skip: u32, limit: u32) -> ApiResult<Vec<Document>> {
        let url = self.url(&format!("/api/sources/{}/documents", source_id));
        let params = [("skip", skip.to_string()), ("limit", limit.to_string())];
        let response = self
            .send_authed(|http| http.get(&url).query(&params))
            .await?;
        Self::parse(response).await
    }

    pub async fn processing_status(&self, source_id: Uuid) -> ApiResult<ProcessingStatus> {
        let url = self.url(&format!("/api/sources/{}/processing-status", source_id));
        let response = self.send_authed(|http| http.get(&url)).await?;
        Self::parse(response).await
    }

    /// Document, word and chunk totals plus a per-status document count.
    pub async fn source_stats(&self, source_id: Uuid) -> ApiResult<SourceStats> {
        let url = self.url(&format!("/api/sources/{}/stats", source_id));
        let response = self.send_authed(|http| http.get(&url)).await?;
        Self::parse(response).await
    }

    /// Ask the backend to re-run chunking/indexing for every document of a source.
    pub async fn reprocess_source(&self, source_id: Uuid) -> ApiResult<ReprocessSummary> {
        let url = self.url(&format!("/api/sources/{}/reprocess", source_id));
        let response = self.send_authed(|http| http.post(&url)).await?;
        let summary: ReprocessSummary = Self::parse(response).await?;
        debug!(
            source_id = %source_id,
            reprocessed = summary.reprocessed,
            total = summary.total_documents,
            "Reprocess started"
        );
        Ok(summary)
    }
}
