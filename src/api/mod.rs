//! REST client for the memory-support backend.
//!
//! Covers user registration and profile, reference faces for the
//! recognition service, audio memories and their analysed export, reminders
//! and wallpapers. Every request except registration carries the user token
//! in the `Authorization` header.

pub mod export;
pub mod types;

use std::path::Path;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::config::MemlensConfig;
pub use export::{parse_memory_export, ExportError, MemoryRecord};
pub use types::{
    Frequency, NewUser, ProfileUpdate, RandomWallpaper, Reminder, ReminderRequest, Wallpaper,
};
use types::ReminderPayload;

pub const REGISTER_USER_PATH: &str = "/api/users/register/";
pub const PROFILE_PATH: &str = "/api/users/profile/";
pub const UPDATE_PROFILE_PATH: &str = "/api/users/profile/update/";
pub const REGISTER_FACE_PATH: &str = "/api/memory/register-face/";
pub const AUDIO_MEMORIES_PATH: &str = "/api/audio/memories/";
pub const MEMORY_EXPORT_PATH: &str = "/api/audio/memories/export/";
/// Create on POST, list the user's reminders on GET.
pub const REMINDERS_PATH: &str = "/api/reminders/create/";
pub const ALL_REMINDERS_PATH: &str = "/api/reminders/getall/";
/// Prefix for `<id>/` on update and delete.
pub const REMINDER_PATH: &str = "/api/reminders/reminder/";
pub const UPLOAD_WALLPAPER_PATH: &str = "/api/reminders/upload_wallpaper/";
pub const RANDOM_WALLPAPER_PATH: &str = "/api/reminders/random_wallpaper/";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid backend URL: {0}")]
    Url(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("failed to read {path}: {source}")]
    File {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no user token configured")]
    MissingToken,
    #[error("invalid memory export: {0}")]
    Export(#[from] ExportError),
}

pub struct ApiClient {
    http: Client,
    base: Url,
    token: String,
}

impl ApiClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, ApiError> {
        let token = token.into();
        if token.is_empty() {
            return Err(ApiError::MissingToken);
        }
        Ok(Self {
            http: Client::new(),
            base: Url::parse(base_url).map_err(|e| ApiError::Url(e.to_string()))?,
            token,
        })
    }

    pub fn from_config(config: &MemlensConfig) -> Result<Self, ApiError> {
        Self::new(&config.server.http_url, config.auth.token.clone())
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base
            .join(path)
            .map_err(|e| ApiError::Url(e.to_string()))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(reqwest::header::AUTHORIZATION, &self.token)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let response = self.authorized(request).send().await?;
        Ok(check(response).await?.json().await?)
    }

    /// Create the backend account. Sent without an `Authorization` header.
    pub async fn register_user(&self, user: &NewUser) -> Result<serde_json::Value, ApiError> {
        tracing::info!(email = %user.email, "registering user");
        let response = self
            .http
            .post(self.endpoint(REGISTER_USER_PATH)?)
            .json(user)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    pub async fn get_profile(&self) -> Result<serde_json::Value, ApiError> {
        self.fetch(self.http.get(self.endpoint(PROFILE_PATH)?)).await
    }

    pub async fn update_profile(
        &self,
        update: &ProfileUpdate,
    ) -> Result<serde_json::Value, ApiError> {
        self.fetch(self.http.patch(self.endpoint(UPDATE_PROFILE_PATH)?).json(update))
            .await
    }

    /// Upload a reference photo so the recognition service can name this person.
    pub async fn register_face(
        &self,
        person_name: &str,
        image: &Path,
    ) -> Result<serde_json::Value, ApiError> {
        let part = file_part(image, image_mime(image)).await?;
        let form = Form::new()
            .text("person_name", person_name.to_string())
            .part("image", part);

        tracing::info!(person = person_name, image = %image.display(), "registering face");
        self.fetch(self.http.post(self.endpoint(REGISTER_FACE_PATH)?).multipart(form))
            .await
    }

    pub async fn upload_audio_memory(
        &self,
        audio: &Path,
        environment: &str,
    ) -> Result<serde_json::Value, ApiError> {
        let extension = extension_of(audio);
        let part = file_part(audio, audio_mime(&extension))
            .await?
            .file_name(format!(
                "recording_{}.{extension}",
                chrono::Utc::now().timestamp_millis()
            ));
        let form = Form::new()
            .part("audio_file", part)
            .text("firebase_uid", self.token.clone())
            .text("environment", environment.to_string())
            .text("recording_type", "passive");

        tracing::info!(audio = %audio.display(), environment, "uploading audio memory");
        self.fetch(self.http.post(self.endpoint(AUDIO_MEMORIES_PATH)?).multipart(form))
            .await
    }

    pub async fn list_audio_memories(&self) -> Result<serde_json::Value, ApiError> {
        self.fetch(self.http.get(self.endpoint(AUDIO_MEMORIES_PATH)?)).await
    }

    /// Download the analysed memory export and parse it, newest first.
    pub async fn export_memories(&self) -> Result<Vec<MemoryRecord>, ApiError> {
        let request = self.http.get(self.endpoint(MEMORY_EXPORT_PATH)?);
        let response = check(self.authorized(request).send().await?).await?;
        let body = response.text().await?;
        let records = parse_memory_export(&body)?;
        tracing::debug!(records = records.len(), "memory export parsed");
        Ok(records)
    }

    pub async fn create_reminder(&self, reminder: &ReminderRequest) -> Result<Reminder, ApiError> {
        let payload = ReminderPayload {
            firebase_uid: &self.token,
            reminder,
        };
        tracing::info!(title = %reminder.title, "creating reminder");
        self.fetch(self.http.post(self.endpoint(REMINDERS_PATH)?).json(&payload))
            .await
    }

    /// Reminders owned by the current user.
    pub async fn list_reminders(&self) -> Result<Vec<Reminder>, ApiError> {
        self.fetch(self.http.get(self.endpoint(REMINDERS_PATH)?)).await
    }

    /// Every reminder the backend returns from its catch-all listing.
    pub async fn get_all_reminders(&self) -> Result<Vec<Reminder>, ApiError> {
        self.fetch(self.http.get(self.endpoint(ALL_REMINDERS_PATH)?)).await
    }

    pub async fn update_reminder(
        &self,
        id: i64,
        reminder: &ReminderRequest,
    ) -> Result<Reminder, ApiError> {
        let payload = ReminderPayload {
            firebase_uid: &self.token,
            reminder,
        };
        tracing::info!(id, title = %reminder.title, "updating reminder");
        self.fetch(self.http.put(self.reminder_endpoint(id)?).json(&payload))
            .await
    }

    pub async fn delete_reminder(&self, id: i64) -> Result<(), ApiError> {
        tracing::info!(id, "deleting reminder");
        let request = self.http.delete(self.reminder_endpoint(id)?);
        check(self.authorized(request).send().await?).await?;
        Ok(())
    }

    fn reminder_endpoint(&self, id: i64) -> Result<Url, ApiError> {
        self.endpoint(&format!("{REMINDER_PATH}{id}/"))
    }

    pub async fn upload_wallpaper(
        &self,
        image: &Path,
        description: &str,
    ) -> Result<Wallpaper, ApiError> {
        let part = file_part(image, image_mime(image)).await?;
        let form = Form::new()
            .part("image", part)
            .text("description", description.to_string());
        tracing::info!(image = %image.display(), "uploading wallpaper");
        self.fetch(self.http.post(self.endpoint(UPLOAD_WALLPAPER_PATH)?).multipart(form))
            .await
    }

    /// A random wallpaper, or `None` when the backend has none to offer.
    pub async fn get_random_wallpaper(&self) -> Result<Option<RandomWallpaper>, ApiError> {
        let request = self.http.get(self.endpoint(RANDOM_WALLPAPER_PATH)?);
        let response = self.authorized(request).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!("no wallpaper available");
            return Ok(None);
        }
        Ok(Some(check(response).await?.json().await?))
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::warn!(%status, body = %body, "backend request rejected");
    Err(ApiError::Status { status, body })
}

async fn file_part(path: &Path, mime: &str) -> Result<Part, ApiError> {
    let bytes = tokio::fs::read(path).await.map_err(|source| ApiError::File {
        path: path.display().to_string(),
        source,
    })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".into());
    Ok(Part::bytes(bytes).file_name(file_name).mime_str(mime)?)
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

pub fn audio_mime(extension: &str) -> &'static str {
    match extension {
        "m4a" => "audio/m4a",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        _ => "audio/mpeg",
    }
}

pub fn image_mime(path: &Path) -> &'static str {
    match extension_of(path).as_str() {
        "png" => "image/png",
        _ => "image/jpeg",
    }
}
