//! Letter lifecycle
//!
//! Pure state transitions and validation. Nothing here touches storage or
//! reads the clock; callers pass `now` explicitly.

use crate::config::{
    MAX_CONTENT_LENGTH, MAX_DELIVERY_DAYS, MAX_TITLE_LENGTH, MIN_CONTENT_LENGTH, MIN_DELIVERY_DAYS,
};
use crate::database::{CreateLetterRequest, Letter, LetterImage, Mood};
use crate::error::{AppError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Derived accessibility of a letter. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockState {
    Locked,
    Unlocked,
}

/// `Locked` iff the letter is undelivered and its delivery date is still ahead.
pub fn compute_lock_state(letter: &Letter, now: DateTime<Utc>) -> LockState {
    if !letter.is_delivered && letter.delivery_date > now {
        LockState::Locked
    } else {
        LockState::Unlocked
    }
}

pub fn validate_title(title: &str) -> Result<()> {
    let len = title.trim().chars().count();
    if len == 0 {
        return Err(AppError::Validation("Title must not be empty".to_string()));
    }
    if len > MAX_TITLE_LENGTH {
        return Err(AppError::Validation(format!(
            "Title must be at most {} characters (got {})",
            MAX_TITLE_LENGTH, len
        )));
    }
    Ok(())
}

pub fn validate_content(content: &str) -> Result<()> {
    let len = content.trim().chars().count();
    if !(MIN_CONTENT_LENGTH..=MAX_CONTENT_LENGTH).contains(&len) {
        return Err(AppError::Validation(format!(
            "Content must be between {} and {} characters (got {})",
            MIN_CONTENT_LENGTH, MAX_CONTENT_LENGTH, len
        )));
    }
    Ok(())
}

/// Delivery must fall within `[now + 1 day, now + 365 days]`
pub fn validate_delivery_date(delivery_date: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
    let earliest = now + Duration::days(MIN_DELIVERY_DAYS);
    let latest = now + Duration::days(MAX_DELIVERY_DAYS);

    if delivery_date < earliest {
        return Err(AppError::Validation(format!(
            "Delivery date must be at least {} day(s) in the future",
            MIN_DELIVERY_DAYS
        )));
    }
    if delivery_date > latest {
        return Err(AppError::Validation(format!(
            "Delivery date must be within {} days",
            MAX_DELIVERY_DAYS
        )));
    }
    Ok(())
}

/// Validate a create request and build the letter it describes
pub fn new_letter(req: CreateLetterRequest, now: DateTime<Utc>) -> Result<Letter> {
    if req.user_id.trim().is_empty() {
        return Err(AppError::Validation("User id must not be empty".to_string()));
    }
    validate_title(&req.title)?;
    validate_content(&req.content)?;
    let mood: Mood = req.mood.parse()?;
    validate_delivery_date(req.delivery_date, now)?;

    let mut letter = Letter {
        id: Uuid::new_v4().to_string(),
        user_id: req.user_id,
        title: req.title.trim().to_string(),
        content: req.content,
        mood,
        created_at: now,
        updated_at: now,
        delivery_date: req.delivery_date,
        is_delivered: false,
        is_deleted: false,
        deleted_at: None,
        images: req.images,
        featured_image: None,
    };
    letter.sync_featured_image();
    Ok(letter)
}

/// Idempotent. Returns whether the flag changed.
pub fn mark_delivered(letter: &mut Letter, now: DateTime<Utc>) -> bool {
    if letter.is_delivered {
        return false;
    }
    letter.is_delivered = true;
    letter.updated_at = now;
    true
}

pub fn soft_delete(letter: &mut Letter, now: DateTime<Utc>) -> Result<()> {
    if letter.is_deleted {
        return Err(AppError::InvalidState(format!(
            "Letter {} is already in the trash",
            letter.id
        )));
    }
    letter.is_deleted = true;
    letter.deleted_at = Some(now);
    Ok(())
}

pub fn restore(letter: &mut Letter) -> Result<()> {
    if !letter.is_deleted {
        return Err(AppError::InvalidState(format!(
            "Letter {} is not in the trash",
            letter.id
        )));
    }
    letter.is_deleted = false;
    letter.deleted_at = None;
    Ok(())
}

/// Remove one image by storage id, keeping `featured_image` in sync
pub fn remove_image(letter: &mut Letter, storage_id: &str) -> Option<LetterImage> {
    let index = letter
        .images
        .iter()
        .position(|img| img.storage_id == storage_id)?;
    let removed = letter.images.remove(index);
    letter.sync_featured_image();
    Some(removed)
}
