use cm_core::{encode_data_uri, CardRecord, CardStore, KeyValueStore};
use cm_migrate::cards::{EXCHANGED_CARDS_KEY, PRIMARY_CARD_KEY};
use cm_migrate::{KvCardStore, MigrationService};
use integration_tests::{png_bytes, Harness};
use serde_json::json;
use std::sync::Arc;

fn inline_png(seed: u8) -> String {
    encode_data_uri("image/png", &png_bytes(6, 6, seed))
}

#[tokio::test]
async fn second_pass_is_a_no_op() {
    let h = Harness::new().await;
    let legacy = json!({
        "id": "me",
        "name": "Ada Lovelace",
        "avatarBase64": inline_png(1),
        "qrCodeBase64": inline_png(2),
        "galleryBase64": [inline_png(3), inline_png(4)],
    });
    h.kv.set(PRIMARY_CARD_KEY, legacy.to_string()).await.unwrap();

    let cards = Arc::new(KvCardStore::new(h.kv.clone()));
    let service = MigrationService::new(h.store.clone(), cards.clone());

    let first = service.run().await.unwrap();
    assert!(first.migrated);
    let after_first = h.kv.get(PRIMARY_CARD_KEY).await.unwrap().unwrap();

    let second = service.run().await.unwrap();
    assert!(!second.migrated);
    assert_eq!(h.kv.get(PRIMARY_CARD_KEY).await.unwrap().unwrap(), after_first);

    let card: serde_json::Value = serde_json::from_str(&after_first).unwrap();
    assert_eq!(card["name"], "Ada Lovelace");
    assert!(card.get("avatarBase64").is_none());
    assert!(card.get("qrCodeBase64").is_none());
    assert!(card.get("galleryBase64").is_none());
    assert_eq!(card["galleryImageIds"].as_array().unwrap().len(), 2);
    assert_eq!(h.store.stats().await.unwrap().total_images, 4);
}

#[tokio::test]
async fn failed_gallery_item_is_dropped_and_the_rest_kept() {
    let h = Harness::new().await;
    let cards = Arc::new(KvCardStore::new(h.kv.clone()));
    cards
        .save_exchanged(vec![CardRecord {
            id: Some("ada".to_string()),
            gallery_base64: Some(vec![inline_png(10), "%%% not base64".to_string(), inline_png(30)]),
            ..CardRecord::default()
        }])
        .await
        .unwrap();

    let report = MigrationService::new(h.store.clone(), cards.clone())
        .run()
        .await
        .unwrap();
    assert!(report.migrated);

    let migrated = cards.load_exchanged().await.unwrap().remove(0);
    let ids = migrated.gallery_image_ids.unwrap();
    assert_eq!(ids.len(), 2);
    assert!(migrated.gallery_base64.is_none());
    for id in &ids {
        assert!(h.store.resolve_uri(id, false).await.unwrap().is_some());
    }

    let raw = h.kv.get(EXCHANGED_CARDS_KEY).await.unwrap().unwrap();
    assert!(!raw.contains("galleryBase64"));
}

#[tokio::test]
async fn shared_images_across_cards_are_stored_once() {
    let h = Harness::new().await;
    let cards = Arc::new(KvCardStore::new(h.kv.clone()));
    let same = inline_png(77);
    cards
        .save_exchanged(vec![
            CardRecord {
                id: Some("a".to_string()),
                avatar_base64: Some(same.clone()),
                ..CardRecord::default()
            },
            CardRecord {
                id: Some("b".to_string()),
                avatar_base64: Some(same),
                ..CardRecord::default()
            },
        ])
        .await
        .unwrap();

    MigrationService::new(h.store.clone(), cards.clone())
        .run()
        .await
        .unwrap();

    let migrated = cards.load_exchanged().await.unwrap();
    assert_eq!(migrated[0].avatar_image_id, migrated[1].avatar_image_id);
    assert_eq!(h.store.stats().await.unwrap().total_images, 1);
}
