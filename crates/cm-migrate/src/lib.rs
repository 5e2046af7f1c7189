//! # cm-migrate
//!
//! Legacy migration: card records that embedded raw image payloads are
//! rewritten to reference media store ids instead.

pub mod cards;
pub mod migration;
pub mod service;

pub use cards::KvCardStore;
pub use migration::{migrate_card, needs_migration, CardMigration, FieldOutcome};
pub use service::{MigrationReport, MigrationService};
