//! OpendalRecordStore over the local filesystem backend.

use fieldseal_core::config::StorageConfig;
use fieldseal_core::StoredField;
use fieldseal_storage::{build_from_config, FieldRecord, OpendalRecordStore, RecordStore};
use tempfile::TempDir;

fn fs_store(tmp: &TempDir) -> OpendalRecordStore {
    let storage = StorageConfig {
        backend: "fs".into(),
        root: tmp.path().join("records"),
        ..Default::default()
    };
    OpendalRecordStore::new(build_from_config(&storage).expect("fs operator"))
}

#[tokio::test]
async fn rows_persist_across_store_instances() {
    let tmp = TempDir::new().unwrap();
    let record = FieldRecord {
        id: "0001".into(),
        user_id: "user-1".into(),
        field: StoredField {
            encrypted: "fallback-v1:AAAA".into(),
            hash: "abc".into(),
        },
    };

    fs_store(&tmp)
        .put_record("collections", "name", &record)
        .await
        .unwrap();

    let reopened = fs_store(&tmp);
    let got = reopened
        .get_record("collections", "name", "0001")
        .await
        .unwrap()
        .expect("row exists");
    assert_eq!(got, record);
    assert!(tmp.path().join("records/collections/0001.json").is_file());
    reopened.ping().await.unwrap();
}

#[tokio::test]
async fn scan_walks_whole_table_in_batches() {
    let tmp = TempDir::new().unwrap();
    let store = fs_store(&tmp);
    for i in 0..7 {
        let record = FieldRecord {
            id: format!("{i:04}"),
            user_id: "user-1".into(),
            field: StoredField {
                encrypted: String::new(),
                hash: format!("h{i}"),
            },
        };
        store.put_record("items", "label", &record).await.unwrap();
    }

    let mut seen = Vec::new();
    let mut offset = 0;
    loop {
        let batch = store.scan("items", "label", offset, 3).await.unwrap();
        if batch.is_empty() {
            break;
        }
        offset += batch.len();
        seen.extend(batch.into_iter().map(|r| r.field.hash));
    }
    assert_eq!(seen, (0..7).map(|i| format!("h{i}")).collect::<Vec<_>>());
}
