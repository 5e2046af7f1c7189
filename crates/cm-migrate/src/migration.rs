//! Per-card migration of inline image payloads into media store ids.
//!
//! Each of the three image fields moves independently: a field that fails
//! keeps its inline payload and is picked up again on the next pass, since
//! [`needs_migration`] still flags it.

use cm_core::{CardRecord, ImagePayload, ImageSource, SaveOptions, ThumbnailSpec};
use cm_store::MediaStore;
use tracing::{debug, warn};

pub const AVATAR_THUMBNAIL: ThumbnailSpec = ThumbnailSpec {
    max_dimension: 400,
    quality: 85,
};

/// QR codes must stay scannable, so they are kept large and lossless-ish.
pub const QR_CODE_THUMBNAIL: ThumbnailSpec = ThumbnailSpec {
    max_dimension: 600,
    quality: 100,
};

pub const GALLERY_THUMBNAIL: ThumbnailSpec = ThumbnailSpec {
    max_dimension: 800,
    quality: 80,
};

/// What happened to one image field of a card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldOutcome {
    /// Nothing to migrate.
    Skipped,
    Migrated,
    /// Gallery only: the listed number of items could not be saved and were dropped.
    Partial { failed: usize },
    /// Left in inline form; retried on a later pass.
    Failed { reason: String },
}

impl FieldOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, FieldOutcome::Migrated | FieldOutcome::Partial { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, FieldOutcome::Failed { .. })
    }
}

/// A migrated card plus the per-field outcomes that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct CardMigration {
    pub card: CardRecord,
    pub avatar: FieldOutcome,
    pub qr_code: FieldOutcome,
    pub gallery: FieldOutcome,
}

impl CardMigration {
    pub fn changed(&self) -> bool {
        self.avatar.applied() || self.qr_code.applied() || self.gallery.applied()
    }

    pub fn failures(&self) -> usize {
        [&self.avatar, &self.qr_code, &self.gallery]
            .into_iter()
            .filter(|f| f.is_failure())
            .count()
    }
}

fn has_inline(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

fn avatar_pending(card: &CardRecord) -> bool {
    has_inline(&card.avatar_base64) && card.avatar_image_id.is_none()
}

fn qr_code_pending(card: &CardRecord) -> bool {
    has_inline(&card.qr_code_base64) && card.qr_code_image_id.is_none()
}

fn gallery_pending(card: &CardRecord) -> bool {
    let has_payloads = card
        .gallery_base64
        .as_ref()
        .is_some_and(|items| items.iter().any(|i| !i.trim().is_empty()));
    let has_ids = card
        .gallery_image_ids
        .as_ref()
        .is_some_and(|ids| !ids.is_empty());
    has_payloads && !has_ids
}

/// Whether any image field of `card` still carries an inline payload
/// without a matching id.
pub fn needs_migration(card: &CardRecord) -> bool {
    avatar_pending(card) || qr_code_pending(card) || gallery_pending(card)
}

fn options(spec: ThumbnailSpec) -> SaveOptions {
    SaveOptions::default()
        .with_offload(false)
        .with_thumbnail(spec)
        .with_source(ImageSource::External)
}

async fn save_inline(store: &MediaStore, payload: &str, spec: ThumbnailSpec) -> Result<String, String> {
    store
        .save(&ImagePayload::inline(payload), options(spec))
        .await
        .map(|outcome| outcome.into_record().id)
        .map_err(|e| e.to_string())
}

/// Moves a single inline field into the store. Returns the outcome and the
/// new id on success.
async fn migrate_single(
    store: &MediaStore,
    field: &str,
    payload: &str,
    spec: ThumbnailSpec,
) -> (FieldOutcome, Option<String>) {
    match save_inline(store, payload, spec).await {
        Ok(id) => {
            debug!(field, id = %id, "migration: field migrated");
            (FieldOutcome::Migrated, Some(id))
        }
        Err(reason) => {
            warn!(field, error = %reason, "migration: field left inline");
            (FieldOutcome::Failed { reason }, None)
        }
    }
}

/// Returns a new card with every migratable inline field replaced by a
/// media store id. The input card is consumed, never mutated in place.
pub async fn migrate_card(store: &MediaStore, card: CardRecord) -> CardMigration {
    let mut next = card;

    let avatar = match next.avatar_base64.clone().filter(|_| avatar_pending(&next)) {
        Some(payload) => {
            let (outcome, id) = migrate_single(store, "avatar", &payload, AVATAR_THUMBNAIL).await;
            if let Some(id) = id {
                next.avatar_image_id = Some(id);
                next.avatar_base64 = None;
            }
            outcome
        }
        None => FieldOutcome::Skipped,
    };

    let qr_code = match next.qr_code_base64.clone().filter(|_| qr_code_pending(&next)) {
        Some(payload) => {
            let (outcome, id) = migrate_single(store, "qr_code", &payload, QR_CODE_THUMBNAIL).await;
            if let Some(id) = id {
                next.qr_code_image_id = Some(id);
                next.qr_code_base64 = None;
            }
            outcome
        }
        None => FieldOutcome::Skipped,
    };

    let gallery = match next.gallery_base64.clone().filter(|_| gallery_pending(&next)) {
        Some(payloads) => {
            let mut ids = Vec::with_capacity(payloads.len());
            let mut failed = 0;
            let mut last_error = String::new();
            for (position, payload) in payloads.iter().enumerate() {
                if payload.trim().is_empty() {
                    continue;
                }
                match save_inline(store, payload, GALLERY_THUMBNAIL).await {
                    Ok(id) => ids.push(id),
                    Err(reason) => {
                        warn!(position, error = %reason, "migration: gallery item dropped");
                        failed += 1;
                        last_error = reason;
                    }
                }
            }

            if ids.is_empty() {
                FieldOutcome::Failed {
                    reason: format!("no gallery image could be saved: {last_error}"),
                }
            } else {
                next.gallery_image_ids = Some(ids);
                next.gallery_base64 = None;
                if failed == 0 {
                    FieldOutcome::Migrated
                } else {
                    FieldOutcome::Partial { failed }
                }
            }
        }
        None => FieldOutcome::Skipped,
    };

    CardMigration {
        card: next,
        avatar,
        qr_code,
        gallery,
    }
}
