//! Letters service
//!
//! High-level business logic for the letter lifecycle. Applies the pure
//! transitions from [`crate::lifecycle`], persists through the repository
//! and notifies observers of every change.

use crate::clock::Clock;
use crate::database::{CreateLetterRequest, Letter, Repository, UpdateLetterRequest};
use crate::error::{AppError, Result};
use crate::lifecycle::{self, LockState};
use crate::remote::ImageStore;
use async_trait::async_trait;
use std::sync::Arc;

/// Lifecycle change emitted after it has been persisted
#[derive(Debug, Clone)]
pub enum LetterEvent {
    Created(Letter),
    Updated(Letter),
    SoftDeleted(Letter),
    Restored(Letter),
    Delivered(Letter),
    PermanentlyDeleted { letter_id: String },
}

#[async_trait]
pub trait LetterObserver: Send + Sync {
    async fn on_letter_event(&self, event: &LetterEvent);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDeletionFailure {
    pub storage_id: String,
    pub error: String,
}

/// Outcome of a permanent delete. Image failures never abort the delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermanentDeleteReport {
    pub letter_id: String,
    pub deleted_images: Vec<String>,
    pub failed_images: Vec<ImageDeletionFailure>,
}

impl PermanentDeleteReport {
    pub fn is_clean(&self) -> bool {
        self.failed_images.is_empty()
    }
}

/// Service for managing letters
#[derive(Clone)]
pub struct LettersService {
    repo: Repository,
    clock: Arc<dyn Clock>,
    observers: Vec<Arc<dyn LetterObserver>>,
    image_store: Option<Arc<dyn ImageStore>>,
}

impl LettersService {
    pub fn new(repo: Repository, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo,
            clock,
            observers: Vec::new(),
            image_store: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn LetterObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn with_image_store(mut self, image_store: Arc<dyn ImageStore>) -> Self {
        self.image_store = Some(image_store);
        self
    }

    async fn emit(&self, event: LetterEvent) {
        for observer in &self.observers {
            observer.on_letter_event(&event).await;
        }
    }

    /// Create and seal a new letter
    pub async fn create_letter(&self, req: CreateLetterRequest) -> Result<Letter> {
        let letter = lifecycle::new_letter(req, self.clock.now())?;

        self.repo.insert_letter(&letter).await?;

        tracing::info!(
            "Letter {} sealed until {}",
            letter.id,
            letter.delivery_date.to_rfc3339()
        );

        self.emit(LetterEvent::Created(letter.clone())).await;
        Ok(letter)
    }

    /// Get a non-trashed letter by ID
    pub async fn get_letter(&self, id: &str) -> Result<Letter> {
        self.repo.get_letter(id).await
    }

    /// Active letters, newest first
    pub async fn list_letters(&self) -> Result<Vec<Letter>> {
        self.repo.list_letters().await
    }

    /// Soft-deleted letters
    pub async fn list_trash(&self) -> Result<Vec<Letter>> {
        self.repo.list_trash().await
    }

    /// Every letter including trash, for snapshots
    pub async fn list_all_letters(&self) -> Result<Vec<Letter>> {
        self.repo.list_all_letters().await
    }

    pub fn lock_state(&self, letter: &Letter) -> LockState {
        lifecycle::compute_lock_state(letter, self.clock.now())
    }

    pub async fn list_locked(&self) -> Result<Vec<Letter>> {
        self.list_by_lock_state(LockState::Locked).await
    }

    pub async fn list_unlocked(&self) -> Result<Vec<Letter>> {
        self.list_by_lock_state(LockState::Unlocked).await
    }

    async fn list_by_lock_state(&self, state: LockState) -> Result<Vec<Letter>> {
        let now = self.clock.now();
        Ok(self
            .repo
            .list_letters()
            .await?
            .into_iter()
            .filter(|l| lifecycle::compute_lock_state(l, now) == state)
            .collect())
    }

    /// Edit a sealed letter. Delivered and trashed letters are immutable.
    pub async fn update_letter(&self, id: &str, req: UpdateLetterRequest) -> Result<Letter> {
        let mut letter = self
            .repo
            .find_letter(id)
            .await?
            .ok_or_else(|| AppError::LetterNotFound(id.to_string()))?;
        let now = self.clock.now();

        if letter.is_deleted {
            return Err(AppError::InvalidState(format!(
                "Letter {} is in the trash and must be restored before editing",
                id
            )));
        }
        if letter.is_delivered {
            return Err(AppError::InvalidState(format!(
                "Letter {} has been delivered and can no longer be edited",
                id
            )));
        }

        if let Some(title) = req.title {
            lifecycle::validate_title(&title)?;
            letter.title = title.trim().to_string();
        }
        if let Some(content) = req.content {
            lifecycle::validate_content(&content)?;
            letter.content = content;
        }
        if let Some(mood) = req.mood {
            letter.mood = mood.parse()?;
        }
        if let Some(delivery_date) = req.delivery_date {
            if delivery_date != letter.delivery_date {
                lifecycle::validate_delivery_date(delivery_date, now)?;
                letter.delivery_date = delivery_date;
            }
        }
        letter.updated_at = now;

        self.repo.save_letter(&letter).await?;
        tracing::debug!("Letter updated: {}", letter.id);

        self.emit(LetterEvent::Updated(letter.clone())).await;
        Ok(letter)
    }

    /// Idempotent; delivered letters stay delivered
    pub async fn mark_delivered(&self, id: &str) -> Result<Letter> {
        let mut letter = self.repo.get_letter(id).await?;

        if lifecycle::mark_delivered(&mut letter, self.clock.now()) {
            self.repo.save_letter(&letter).await?;
            tracing::info!("Letter {} delivered", letter.id);
            self.emit(LetterEvent::Delivered(letter.clone())).await;
        }

        Ok(letter)
    }

    /// Move a letter to the trash
    pub async fn soft_delete(&self, id: &str) -> Result<Letter> {
        let mut letter = self.repo.get_letter(id).await?;

        lifecycle::soft_delete(&mut letter, self.clock.now())?;
        self.repo.save_letter(&letter).await?;

        tracing::info!("Letter moved to trash: {}", id);

        self.emit(LetterEvent::SoftDeleted(letter.clone())).await;
        Ok(letter)
    }

    /// Bring a letter back from the trash
    pub async fn restore(&self, id: &str) -> Result<Letter> {
        let mut letter = self
            .repo
            .find_letter(id)
            .await?
            .ok_or_else(|| AppError::LetterNotFound(id.to_string()))?;

        lifecycle::restore(&mut letter)?;
        self.repo.save_letter(&letter).await?;

        tracing::info!("Letter restored from trash: {}", id);

        self.emit(LetterEvent::Restored(letter.clone())).await;
        Ok(letter)
    }

    /// Erase a letter for good, then try to delete each hosted image.
    pub async fn permanent_delete(&self, id: &str) -> Result<PermanentDeleteReport> {
        let letter = self
            .repo
            .find_letter(id)
            .await?
            .ok_or_else(|| AppError::LetterNotFound(id.to_string()))?;

        self.repo.hard_delete_letter(id).await?;
        tracing::info!("Letter permanently deleted: {}", id);

        let mut report = PermanentDeleteReport {
            letter_id: id.to_string(),
            ..PermanentDeleteReport::default()
        };

        for image in &letter.images {
            let outcome = match &self.image_store {
                Some(store) => store.delete_image(&image.storage_id).await,
                None => Err(AppError::Generic("No image store configured".to_string())),
            };

            match outcome {
                Ok(()) => report.deleted_images.push(image.storage_id.clone()),
                Err(e) => {
                    tracing::warn!("Failed to delete image {} of letter {}: {}", image.storage_id, id, e);
                    report.failed_images.push(ImageDeletionFailure {
                        storage_id: image.storage_id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        self.emit(LetterEvent::PermanentlyDeleted {
            letter_id: id.to_string(),
        })
        .await;

        Ok(report)
    }

    /// Detach one image; the featured image follows the new first image
    pub async fn remove_image(&self, id: &str, storage_id: &str) -> Result<Letter> {
        let mut letter = self.repo.get_letter(id).await?;

        if lifecycle::remove_image(&mut letter, storage_id).is_none() {
            return Err(AppError::Generic(format!(
                "Image {} not found on letter {}",
                storage_id, id
            )));
        }
        letter.updated_at = self.clock.now();
        self.repo.save_letter(&letter).await?;

        tracing::debug!("Removed image {} from letter {}", storage_id, id);
        Ok(letter)
    }

    /// Persist delivery for every letter whose date has passed
    pub async fn deliver_due(&self) -> Result<Vec<Letter>> {
        let now = self.clock.now();
        let mut delivered = Vec::new();

        for mut letter in self.repo.list_letters().await? {
            if letter.delivery_date > now {
                continue;
            }
            if lifecycle::mark_delivered(&mut letter, now) {
                self.repo.save_letter(&letter).await?;
                tracing::info!("Letter {} reached its delivery date", letter.id);
                self.emit(LetterEvent::Delivered(letter.clone())).await;
                delivered.push(letter);
            }
        }

        Ok(delivered)
    }

    /// Upsert letters coming out of a restore. Returns how many were written.
    pub async fn import_letters(&self, letters: Vec<Letter>) -> Result<usize> {
        let mut imported = 0;

        for mut letter in letters {
            letter.sync_featured_image();
            self.repo.upsert_letter(&letter).await?;

            let stored = self.repo.find_letter(&letter.id).await?;
            if let Some(stored) = stored {
                self.emit(LetterEvent::Updated(stored)).await;
            }
            imported += 1;
        }

        tracing::info!("Imported {} letters", imported);
        Ok(imported)
    }

    /// Start the background delivery sweep
    pub fn start_delivery_sweep(self, interval: std::time::Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Starting delivery sweep");

            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;

                if let Err(e) = self.deliver_due().await {
                    tracing::error!("Error delivering due letters: {}", e);
                }
            }
        })
    }
}
