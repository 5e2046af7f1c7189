//! `CardStore` over the device key-value store: the primary card and the
//! exchanged cards are kept as JSON under fixed keys.

use async_trait::async_trait;
use cm_core::{CardRecord, CardStore, KeyValueStore, MediaError, Result};
use serde::de::DeserializeOwned;
use std::sync::Arc;

pub const PRIMARY_CARD_KEY: &str = "card.primary";
pub const EXCHANGED_CARDS_KEY: &str = "card.exchanged";

pub struct KvCardStore {
    kv: Arc<dyn KeyValueStore>,
}

impl KvCardStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.kv.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| MediaError::Persistence(format!("{key}: {e}")))
    }

    async fn write<T: serde::Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)
            .map_err(|e| MediaError::Persistence(format!("{key}: {e}")))?;
        self.kv.set(key, raw).await
    }
}

#[async_trait]
impl CardStore for KvCardStore {
    async fn load_primary(&self) -> Result<Option<CardRecord>> {
        self.read(PRIMARY_CARD_KEY).await
    }

    async fn save_primary(&self, card: CardRecord) -> Result<()> {
        self.write(PRIMARY_CARD_KEY, &card).await
    }

    async fn load_exchanged(&self) -> Result<Vec<CardRecord>> {
        Ok(self.read(EXCHANGED_CARDS_KEY).await?.unwrap_or_default())
    }

    async fn save_exchanged(&self, cards: Vec<CardRecord>) -> Result<()> {
        self.write(EXCHANGED_CARDS_KEY, &cards).await
    }
}
