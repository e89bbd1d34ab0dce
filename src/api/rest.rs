//! `reqwest` client for the chat REST endpoints.

use std::time::Duration;

use super::ChatApi;
use super::dto::{ApiEnvelope, ChatRoomResponse, CreatePrivateRoomRequest, HistoryEntry};
use crate::config::{RealtimeConfig, join_url};
use crate::domain::{ChatMessage, RoomId, UserId};
use crate::error::RealtimeError;

/// HTTP implementation of [`ChatApi`].
#[derive(Debug, Clone)]
pub struct RestChatApi {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl RestChatApi {
    /// Creates a client for `base_url` (e.g. `http://localhost:8080`).
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Http`] if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RealtimeError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            token,
        })
    }

    /// Creates a client from the realtime configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Http`] if the HTTP client cannot be built.
    pub fn from_config(config: &RealtimeConfig) -> Result<Self, RealtimeError> {
        Self::new(
            config.api_base_url.clone(),
            config.auth_token.clone(),
            config.send_timeout,
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn read<T>(response: reqwest::Response) -> Result<T, RealtimeError>
    where
        T: serde::de::DeserializeOwned,
    {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RealtimeError::Http(format!("{status}: {body}")));
        }
        response.json::<ApiEnvelope<T>>().await?.into_data()
    }
}

impl ChatApi for RestChatApi {
    async fn fetch_history(&self, room_id: RoomId) -> Result<Vec<ChatMessage>, RealtimeError> {
        let url = join_url(&self.base_url, &format!("/chatroom/{room_id}/messages"));
        let response = self.authorize(self.http.get(&url)).send().await?;
        let entries: Vec<HistoryEntry> = Self::read(response).await?;
        tracing::debug!(%room_id, count = entries.len(), "fetched room history");
        entries
            .into_iter()
            .map(|entry| entry.into_message(room_id))
            .collect()
    }

    async fn create_private_room(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> Result<RoomId, RealtimeError> {
        let url = join_url(&self.base_url, "/chatroom/private");
        let request = self
            .http
            .post(&url)
            .json(&CreatePrivateRoomRequest::new(user_a, user_b));
        let response = self.authorize(request).send().await?;
        let room: ChatRoomResponse = Self::read(response).await?;
        tracing::info!(room_id = %room.room_id, %user_a, %user_b, "private room ready");
        Ok(room.room_id)
    }
}
