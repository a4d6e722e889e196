//! Request and response bodies for the backend REST endpoints.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registration body. `firebase_uid` is the same id sent as the user token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewUser {
    pub firebase_uid: String,
    pub email: String,
    pub name: String,
    pub age: u32,
    pub gender: String,
    pub language: String,
}

/// Partial profile update; only the fields that are set are sent.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<u32>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            other => Err(format!(
                "unknown frequency {other:?} (expected daily, weekly, monthly or yearly)"
            )),
        }
    }
}

/// Fields the client supplies when creating or replacing a reminder.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReminderRequest {
    pub title: String,
    pub description: String,
    pub time: DateTime<Utc>,
    pub frequency: Frequency,
}

/// Wire body for reminder writes: the request plus the owner's uid.
#[derive(Debug, Serialize)]
pub(crate) struct ReminderPayload<'a> {
    pub firebase_uid: &'a str,
    #[serde(flatten)]
    pub reminder: &'a ReminderRequest,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Reminder {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub time: DateTime<Utc>,
    pub frequency: Frequency,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// A stored wallpaper as returned by the upload endpoint.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Wallpaper {
    pub id: i64,
    pub image: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RandomWallpaper {
    pub id: i64,
    pub image_url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub file_name: String,
}
