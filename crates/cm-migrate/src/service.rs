//! Migration orchestrator: runs the per-card transform over the primary
//! card and every exchanged card, then persists what changed.

use cm_core::{CardStore, Result};
use cm_store::MediaStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::migration::{migrate_card, needs_migration, CardMigration};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    /// At least one card changed and was persisted.
    pub migrated: bool,
    pub records_examined: usize,
    pub records_changed: usize,
    /// Fields left inline because they failed; retried on the next pass.
    pub field_failures: usize,
}

impl MigrationReport {
    fn absorb(&mut self, migration: &CardMigration) {
        if migration.changed() {
            self.records_changed += 1;
        }
        self.field_failures += migration.failures();
    }
}

pub struct MigrationService {
    store: Arc<MediaStore>,
    cards: Arc<dyn CardStore>,
}

impl MigrationService {
    pub fn new(store: Arc<MediaStore>, cards: Arc<dyn CardStore>) -> Self {
        Self { store, cards }
    }

    /// Card load/save failures abort the pass; image failures never do.
    pub async fn run(&self) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();

        if let Some(card) = self.cards.load_primary().await? {
            report.records_examined += 1;
            if needs_migration(&card) {
                let migration = migrate_card(&self.store, card).await;
                report.absorb(&migration);
                if migration.changed() {
                    self.cards.save_primary(migration.card).await?;
                }
            }
        }

        let exchanged = self.cards.load_exchanged().await?;
        let mut next = Vec::with_capacity(exchanged.len());
        let mut exchanged_changed = false;
        for card in exchanged {
            report.records_examined += 1;
            if !needs_migration(&card) {
                next.push(card);
                continue;
            }
            let migration = migrate_card(&self.store, card).await;
            report.absorb(&migration);
            exchanged_changed |= migration.changed();
            next.push(migration.card);
        }
        if exchanged_changed {
            self.cards.save_exchanged(next).await?;
        }

        report.migrated = report.records_changed > 0;
        info!(
            examined = report.records_examined,
            changed = report.records_changed,
            failures = report.field_failures,
            "migration: pass complete"
        );
        Ok(report)
    }
}
