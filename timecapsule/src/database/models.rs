//! Database models
//!
//! Rust structs representing database entities.
//! Letters serialize in camelCase so the same shape is used by
//! snapshots and the remote API.

use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// How the writer felt when sealing the letter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Happy,
    Sad,
    Calm,
    Reflective,
    Excited,
    Grateful,
    Anxious,
    Refresh,
}

impl Mood {
    pub const ALL: [Mood; 8] = [
        Mood::Happy,
        Mood::Sad,
        Mood::Calm,
        Mood::Reflective,
        Mood::Excited,
        Mood::Grateful,
        Mood::Anxious,
        Mood::Refresh,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Mood::Happy => "happy",
            Mood::Sad => "sad",
            Mood::Calm => "calm",
            Mood::Reflective => "reflective",
            Mood::Excited => "excited",
            Mood::Grateful => "grateful",
            Mood::Anxious => "anxious",
            Mood::Refresh => "refresh",
        }
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mood {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        Mood::ALL
            .into_iter()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| AppError::Validation(format!("Unknown mood: {}", s)))
    }
}

/// Image attached to a letter, hosted by the remote image store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LetterImage {
    pub url: String,
    pub storage_id: String,
    #[serde(default)]
    pub caption: Option<String>,
}

/// A letter to the writer's future self
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Letter {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub mood: Mood,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub delivery_date: DateTime<Utc>,
    pub is_delivered: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub images: Vec<LetterImage>,
    #[serde(default)]
    pub featured_image: Option<LetterImage>,
}

impl Letter {
    /// Re-derive `featured_image` from the first image
    pub fn sync_featured_image(&mut self) {
        self.featured_image = self.images.first().cloned();
    }

    /// Delivered or trashed letters never carry outstanding triggers
    pub fn is_terminal(&self) -> bool {
        self.is_delivered || self.is_deleted
    }
}

/// Raw `letters` row; images are stored as a JSON array
#[derive(Debug, Clone, FromRow)]
pub struct LetterRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub mood: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub delivery_date: DateTime<Utc>,
    pub is_delivered: bool,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub images_json: String,
}

impl TryFrom<LetterRow> for Letter {
    type Error = AppError;

    fn try_from(row: LetterRow) -> Result<Self> {
        let images: Vec<LetterImage> = serde_json::from_str(&row.images_json)?;
        let mut letter = Letter {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            content: row.content,
            mood: row.mood.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            delivery_date: row.delivery_date,
            is_delivered: row.is_delivered,
            is_deleted: row.is_deleted,
            deleted_at: row.deleted_at,
            images,
            featured_image: None,
        };
        letter.sync_featured_image();
        Ok(letter)
    }
}

/// Create letter request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLetterRequest {
    pub user_id: String,
    pub title: String,
    pub content: String,
    /// Free text, parsed into [`Mood`] during validation
    pub mood: String,
    pub delivery_date: DateTime<Utc>,
    #[serde(default)]
    pub images: Vec<LetterImage>,
}

/// Update letter request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLetterRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub mood: Option<String>,
    pub delivery_date: Option<DateTime<Utc>>,
}

/// Stored snapshot record
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Backup {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub size: i64,
    pub checksum: String,
}
