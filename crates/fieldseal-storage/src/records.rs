//! Row-oriented record storage for encrypted text fields.
//!
//! Layout in the OpenDAL namespace:
//! ```text
//! {table}/{id}.json   {"user_id": "...", "<field>_encrypted": "...", "<field>_hash": "...", ...}
//! ```
//!
//! Each row write replaces one object, so a single record update is atomic.
//! Columns other than the ones being written are preserved.
//!
//! There is no secondary index. Every `scan` lists the whole table prefix and
//! sorts the names before paging, then reads only the rows of the requested
//! page. `query_by_hash` reads every row of the table. Both are linear in
//! table size; a datastore with a hash index should implement [`RecordStore`]
//! directly rather than go through this adapter.

use async_trait::async_trait;
use fieldseal_core::{FieldColumns, SealError, SealResult, StoredField};
use opendal::{ErrorKind, Operator};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// One text field of one row, as seen by the encryption subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRecord {
    pub id: String,
    pub user_id: String,
    pub field: StoredField,
}

/// The storage contract the subsystem consumes.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_record(&self, table: &str, field: &str, id: &str)
        -> SealResult<Option<FieldRecord>>;

    /// Write both columns of `record.field` (and the owner) in one update.
    async fn put_record(&self, table: &str, field: &str, record: &FieldRecord) -> SealResult<()>;

    /// Rewrite only the hash column of an existing row, provided it still
    /// holds `expected`. Returns `false` (and writes nothing) otherwise.
    async fn put_hash(
        &self,
        table: &str,
        field: &str,
        id: &str,
        expected: &str,
        hash: &str,
    ) -> SealResult<bool>;

    /// Ids of `user_id`'s rows whose `<field>_hash` equals `hash`.
    async fn query_by_hash(
        &self,
        table: &str,
        field: &str,
        user_id: &str,
        hash: &str,
    ) -> SealResult<Vec<String>>;

    /// Up to `limit` rows starting at `offset`, ordered by id. Empty when exhausted.
    async fn scan(
        &self,
        table: &str,
        field: &str,
        offset: usize,
        limit: usize,
    ) -> SealResult<Vec<FieldRecord>>;

    async fn ping(&self) -> SealResult<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Row {
    #[serde(default)]
    user_id: String,
    #[serde(flatten)]
    columns: Map<String, Value>,
}

impl Row {
    fn column(&self, name: &str) -> String {
        self.columns
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    fn into_record(self, id: String, cols: &FieldColumns) -> FieldRecord {
        FieldRecord {
            field: StoredField {
                encrypted: self.column(&cols.encrypted),
                hash: self.column(&cols.hash),
            },
            user_id: self.user_id,
            id,
        }
    }
}

/// [`RecordStore`] over any OpenDAL operator (fs, S3, memory).
#[derive(Clone)]
pub struct OpendalRecordStore {
    op: Operator,
}

impl OpendalRecordStore {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    async fn read_row(&self, table: &str, id: &str) -> SealResult<Option<Row>> {
        let path = row_path(table, id)?;
        match self.op.read(&path).await {
            Ok(buf) => serde_json::from_slice(&buf.to_vec())
                .map(Some)
                .map_err(|e| SealError::Storage(format!("corrupt row {path}: {e}"))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_err(&path, e)),
        }
    }

    async fn write_row(&self, table: &str, id: &str, row: &Row) -> SealResult<()> {
        let path = row_path(table, id)?;
        let bytes = serde_json::to_vec(row)
            .map_err(|e| SealError::Storage(format!("serializing row {path}: {e}")))?;
        self.op
            .write(&path, bytes)
            .await
            .map_err(|e| storage_err(&path, e))?;
        debug!(path = %path, "row written");
        Ok(())
    }

    /// Sorted row ids of `table`. One full listing of the prefix per call;
    /// objects that are not `<id>.json` files are ignored.
    async fn ids(&self, table: &str) -> SealResult<Vec<String>> {
        let dir = format!("{}/", validate_segment("table", table)?);
        let entries = match self.op.list(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_err(&dir, e)),
        };
        let mut ids: Vec<String> = entries
            .iter()
            .filter(|entry| entry.metadata().mode().is_file())
            .filter_map(|entry| entry.name().strip_suffix(".json"))
            .map(str::to_string)
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl RecordStore for OpendalRecordStore {
    async fn get_record(
        &self,
        table: &str,
        field: &str,
        id: &str,
    ) -> SealResult<Option<FieldRecord>> {
        let cols = FieldColumns::for_field(field);
        Ok(self
            .read_row(table, id)
            .await?
            .map(|row| row.into_record(id.to_string(), &cols)))
    }

    async fn put_record(&self, table: &str, field: &str, record: &FieldRecord) -> SealResult<()> {
        let cols = FieldColumns::for_field(field);
        let mut row = self.read_row(table, &record.id).await?.unwrap_or_default();
        row.user_id = record.user_id.clone();
        row.columns
            .insert(cols.encrypted, Value::String(record.field.encrypted.clone()));
        row.columns
            .insert(cols.hash, Value::String(record.field.hash.clone()));
        self.write_row(table, &record.id, &row).await
    }

    async fn put_hash(
        &self,
        table: &str,
        field: &str,
        id: &str,
        expected: &str,
        hash: &str,
    ) -> SealResult<bool> {
        let cols = FieldColumns::for_field(field);
        let mut row = self
            .read_row(table, id)
            .await?
            .ok_or_else(|| SealError::Storage(format!("row {table}/{id} does not exist")))?;
        if row.column(&cols.hash) != expected {
            debug!(table = %table, id = %id, "hash changed since read; not rewriting");
            return Ok(false);
        }
        row.columns.insert(cols.hash, Value::String(hash.to_string()));
        self.write_row(table, id, &row).await?;
        Ok(true)
    }

    async fn query_by_hash(
        &self,
        table: &str,
        field: &str,
        user_id: &str,
        hash: &str,
    ) -> SealResult<Vec<String>> {
        let cols = FieldColumns::for_field(field);
        let mut matches = Vec::new();
        for id in self.ids(table).await? {
            if let Some(row) = self.read_row(table, &id).await? {
                if row.user_id == user_id && row.column(&cols.hash) == hash {
                    matches.push(id);
                }
            }
        }
        Ok(matches)
    }

    async fn scan(
        &self,
        table: &str,
        field: &str,
        offset: usize,
        limit: usize,
    ) -> SealResult<Vec<FieldRecord>> {
        let cols = FieldColumns::for_field(field);
        let ids = self.ids(table).await?;
        let mut records = Vec::with_capacity(limit.min(ids.len()));
        for id in ids.into_iter().skip(offset).take(limit) {
            if let Some(row) = self.read_row(table, &id).await? {
                records.push(row.into_record(id, &cols));
            }
        }
        Ok(records)
    }

    async fn ping(&self) -> SealResult<()> {
        crate::health::check_health(&self.op).await
    }
}

fn row_path(table: &str, id: &str) -> SealResult<String> {
    Ok(format!(
        "{}/{}.json",
        validate_segment("table", table)?,
        validate_segment("record id", id)?
    ))
}

fn validate_segment<'a>(what: &str, s: &'a str) -> SealResult<&'a str> {
    if s.is_empty() || s.contains('/') || s == "." || s == ".." {
        return Err(SealError::InvalidArgument(format!(
            "invalid {what}: {s:?}"
        )));
    }
    Ok(s)
}

fn storage_err(path: &str, e: opendal::Error) -> SealError {
    SealError::Storage(format!("{path}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> OpendalRecordStore {
        OpendalRecordStore::new(crate::operator::build_memory_operator().unwrap())
    }

    fn record(id: &str, user: &str, hash: &str) -> FieldRecord {
        FieldRecord {
            id: id.into(),
            user_id: user.into(),
            field: StoredField {
                encrypted: format!("primary:{id}"),
                hash: hash.into(),
            },
        }
    }

    #[tokio::test]
    async fn test_put_get() {
        let store = store();
        store
            .put_record("items", "name", &record("a", "user-1", "h1"))
            .await
            .unwrap();
        let got = store.get_record("items", "name", "a").await.unwrap().unwrap();
        assert_eq!(got, record("a", "user-1", "h1"));
        assert!(store.get_record("items", "name", "b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fields_share_a_row() {
        let store = store();
        store
            .put_record("items", "name", &record("a", "user-1", "name-hash"))
            .await
            .unwrap();
        store
            .put_record("items", "label", &record("a", "user-1", "label-hash"))
            .await
            .unwrap();

        let raw = store.operator().read("items/a.json").await.unwrap().to_vec();
        let json: Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json["name_hash"], "name-hash");
        assert_eq!(json["label_hash"], "label-hash");
        assert_eq!(json["user_id"], "user-1");
    }

    #[tokio::test]
    async fn test_put_hash_keeps_ciphertext() {
        let store = store();
        store
            .put_record("items", "name", &record("a", "user-1", "old"))
            .await
            .unwrap();
        assert!(store.put_hash("items", "name", "a", "old", "new").await.unwrap());
        let got = store.get_record("items", "name", "a").await.unwrap().unwrap();
        assert_eq!(got.field.hash, "new");
        assert_eq!(got.field.encrypted, "primary:a");
    }

    #[tokio::test]
    async fn test_put_hash_skips_concurrently_changed_row() {
        let store = store();
        store
            .put_record("items", "name", &record("a", "user-1", "rewritten-live"))
            .await
            .unwrap();
        let written = store
            .put_hash("items", "name", "a", "stale", "new")
            .await
            .unwrap();
        assert!(!written);
        let got = store.get_record("items", "name", "a").await.unwrap().unwrap();
        assert_eq!(got.field.hash, "rewritten-live");
    }

    #[tokio::test]
    async fn test_put_hash_missing_row() {
        let err = store()
            .put_hash("items", "name", "ghost", "", "h")
            .await
            .unwrap_err();
        assert!(matches!(err, SealError::Storage(_)));
    }

    #[tokio::test]
    async fn test_scan_is_ordered_and_paged() {
        let store = store();
        for id in ["c", "a", "b", "d"] {
            store
                .put_record("items", "name", &record(id, "user-1", "h"))
                .await
                .unwrap();
        }
        let page1: Vec<_> = store
            .scan("items", "name", 0, 3)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        let page2: Vec<_> = store
            .scan("items", "name", 3, 3)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(page1, vec!["a", "b", "c"]);
        assert_eq!(page2, vec!["d"]);
        assert!(store.scan("items", "name", 4, 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scan_ignores_non_row_objects() {
        let store = store();
        for id in ["b", "a"] {
            store
                .put_record("items", "name", &record(id, "user-1", "h"))
                .await
                .unwrap();
        }
        store
            .operator()
            .write("items/notes.txt", b"x".to_vec())
            .await
            .unwrap();
        store
            .operator()
            .write("items/archive/c.json", br#"{"user_id":"user-1"}"#.to_vec())
            .await
            .unwrap();

        let ids: Vec<_> = store
            .scan("items", "name", 0, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_scan_unknown_table_is_empty() {
        assert!(store().scan("nothing", "name", 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_query_by_hash_scoped_to_user() {
        let store = store();
        store
            .put_record("items", "name", &record("a", "user-1", "h"))
            .await
            .unwrap();
        store
            .put_record("items", "name", &record("b", "user-2", "h"))
            .await
            .unwrap();
        store
            .put_record("items", "name", &record("c", "user-1", "other"))
            .await
            .unwrap();
        let ids = store
            .query_by_hash("items", "name", "user-1", "h")
            .await
            .unwrap();
        assert_eq!(ids, vec!["a"]);
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let err = store()
            .get_record("items", "name", "../secrets")
            .await
            .unwrap_err();
        assert!(matches!(err, SealError::InvalidArgument(_)));
    }
}
