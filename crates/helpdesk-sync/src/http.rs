use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use helpdesk_types::api::{
    AuditEntryRequest, CounterRow, DeleteResponse, MarkAllReadResponse, SendMessageRequest,
    UpsertCounterRequest,
};
use helpdesk_types::models::{ChatMessage, FileAttachment, Notification, NotificationDraft};

use crate::error::{Result, SyncError};
use crate::remote::{AuditLog, CounterTable, MessageStore, NotificationStore};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// REST client for the helpdesk API.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(SyncError::Status(status.as_u16()))
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = check(response)?.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl CounterTable for HttpBackend {
    async fn read_all(&self, user_id: Uuid) -> Result<Vec<CounterRow>> {
        let response = self
            .client
            .get(self.url(&format!("/users/{}/unread", user_id)))
            .send()
            .await?;
        decode(response).await
    }

    async fn upsert(&self, room_id: Uuid, user_id: Uuid, count: u32) -> Result<()> {
        let response = self
            .client
            .put(self.url(&format!("/rooms/{}/unread/{}", room_id, user_id)))
            .json(&UpsertCounterRequest {
                count: i64::from(count),
            })
            .send()
            .await?;
        check(response)?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for HttpBackend {
    async fn list_messages(&self, room_id: Uuid) -> Result<Vec<ChatMessage>> {
        let response = self
            .client
            .get(self.url(&format!("/rooms/{}/messages", room_id)))
            .send()
            .await?;
        decode(response).await
    }

    async fn insert_message(
        &self,
        room_id: Uuid,
        sender_id: Uuid,
        content: &str,
        attachments: &[FileAttachment],
    ) -> Result<ChatMessage> {
        let response = self
            .client
            .post(self.url(&format!("/rooms/{}/messages", room_id)))
            .json(&SendMessageRequest {
                sender_id,
                content: content.to_string(),
                attachments: attachments.to_vec(),
            })
            .send()
            .await?;
        decode(response).await
    }

    async fn delete_message(&self, message_id: Uuid) -> Result<bool> {
        let response = self
            .client
            .delete(self.url(&format!("/messages/{}", message_id)))
            .send()
            .await?;
        let body: DeleteResponse = decode(response).await?;
        Ok(body.deleted)
    }
}

#[async_trait]
impl NotificationStore for HttpBackend {
    async fn list_notifications(&self, user_id: Uuid) -> Result<Vec<Notification>> {
        let response = self
            .client
            .get(self.url(&format!("/users/{}/notifications", user_id)))
            .send()
            .await?;
        decode(response).await
    }

    async fn create_notification(&self, draft: &NotificationDraft) -> Result<Notification> {
        let response = self
            .client
            .post(self.url("/notifications"))
            .json(draft)
            .send()
            .await?;
        decode(response).await
    }

    async fn mark_read(&self, notification_id: Uuid) -> Result<bool> {
        let response = self
            .client
            .post(self.url(&format!("/notifications/{}/read", notification_id)))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check(response)?;
        Ok(true)
    }

    async fn mark_all_read(&self, user_id: Uuid) -> Result<usize> {
        let response = self
            .client
            .post(self.url(&format!("/users/{}/notifications/read", user_id)))
            .send()
            .await?;
        let body: MarkAllReadResponse = decode(response).await?;
        Ok(body.updated)
    }
}

#[async_trait]
impl AuditLog for HttpBackend {
    async fn record(&self, entry: &AuditEntryRequest) -> Result<()> {
        let response = self
            .client
            .post(self.url("/audit"))
            .json(entry)
            .send()
            .await?;
        check(response)?;
        Ok(())
    }
}
