//! Studio episode endpoints (`/api/studio/...`).

use tracing::{debug, info};
use uuid::Uuid;

use super::client::ApiClient;
use super::models::{
    Ack, Beat, Episode, EpisodeExport, EpisodeStatus, ExportFormat, MarkdownExport, NewEpisode,
    StudioStats,
};
use crate::error::ApiResult;

impl ApiClient {
    /// List episodes, newest first.
    pub async fn list_episodes(
        &self,
        skip: u32,
        limit: u32,
        status: Option<EpisodeStatus>,
    ) -> ApiResult<Vec<Episode>> {
        let url = self.url("/api/studio/episodes");
        let mut params = vec![("skip", skip.to_string()), ("limit", limit.to_string())];
        if let Some(status) = status {
            params.push(("status_filter", status.as_str().to_string()));
        }

        let response = self
            .send_authed(|http| http.get(&url).query(&params))
            .await?;
        Self::parse(response).await
    }

    pub async fn get_episode(&self, id: Uuid) -> ApiResult<Episode> {
        let url = self.url(&format!("/api/studio/episodes/{}", id));
        let response = self.send_authed(|http| http.get(&url)).await?;
        Self::parse(response).await
    }

    pub async fn create_episode(&self, episode: &NewEpisode) -> ApiResult<Episode> {
        episode.validate()?;
        let url = self.url("/api/studio/episodes");
        let response = self
            .send_authed(|http| http.post(&url).json(episode))
            .await?;
        let created: Episode = Self::parse(response).await?;
        info!(episode_id = %created.id, title = %created.title, "Episode created");
        Ok(created)
    }

    /// Persisted exchanges of an episode, in sequence order.
    pub async fn episode_beats(&self, id: Uuid, skip: u32, limit: u32) -> ApiResult<Vec<Beat>> {
        let url = self.url(&format!("/api/studio/episodes/{}/beats", id));
        let params = [("skip", skip.to_string()), ("limit", limit.to_string())];
        let response = self
            .send_authed(|http| http.get(&url).query(&params))
            .await?;
        Self::parse(response).await
    }

    /// `PUT /api/studio/episodes/{id}/status?status=...`
    pub async fn update_episode_status(&self, id: Uuid, status: EpisodeStatus) -> ApiResult<()> {
        let url = self.url(&format!("/api/studio/episodes/{}/status", id));
        let response = self
            .send_authed(|http| http.put(&url).query(&[("status", status.as_str())]))
            .await?;
        let ack: Ack = Self::parse(response).await?;
        debug!(episode_id = %id, message = %ack.message, "Episode status updated");
        Ok(())
    }

    pub async fn delete_episode(&self, id: Uuid) -> ApiResult<()> {
        let url = self.url(&format!("/api/studio/episodes/{}", id));
        let response = self.send_authed(|http| http.delete(&url)).await?;
        Self::ensure_success(response).await?;
        info!(episode_id = %id, "Episode deleted");
        Ok(())
    }

    pub async fn export_episode(&self, id: Uuid, format: ExportFormat) -> ApiResult<EpisodeExport> {
        let url = self.url(&format!("/api/studio/episodes/{}/export", id));
        let response = self
            .send_authed(|http| http.get(&url).query(&[("format", format.as_str())]))
            .await?;

        match format {
            ExportFormat::Markdown => {
                let export: MarkdownExport = Self::parse(response).await?;
                Ok(EpisodeExport::Markdown(export.content))
            }
            ExportFormat::Json => Ok(EpisodeExport::Json(Self::parse(response).await?)),
        }
    }

    pub async fn studio_stats(&self) -> ApiResult<StudioStats> {
        let url = self.url("/api/studio/stats");
        let response = self.send_authed(|http| http.get(&url)).await?;
        Self::parse(response).await
    }
}
