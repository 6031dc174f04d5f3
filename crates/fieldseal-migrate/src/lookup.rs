//! Read path: find a user's rows by exact text and open them for display.
//!
//! ```text
//! text -> salted term -> query_by_hash --(no rows)--> legacy term -> query_by_hash
//!      -> get_record per id -> decrypt_many
//! ```
//!
//! The legacy term is only queried when the salted one matched nothing, so
//! rows a migration has not reached yet stay findable.

use fieldseal_core::{SealResult, StoredField};
use fieldseal_crypto::{DecryptOutcome, EncryptionEngine};
use fieldseal_storage::RecordStore;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Which search term produced the hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedTerm {
    Salted,
    Legacy,
}

impl MatchedTerm {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchedTerm::Salted => "salted",
            MatchedTerm::Legacy => "legacy",
        }
    }
}

impl fmt::Display for MatchedTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct SearchResults {
    /// `None` when neither term matched.
    pub term: Option<MatchedTerm>,
    /// One entry per matching row, in id order. Rows that fail to open keep
    /// their error in place.
    pub hits: Vec<DecryptOutcome>,
}

impl SearchResults {
    fn miss() -> Self {
        Self {
            term: None,
            hits: Vec::new(),
        }
    }

    /// `(id, plaintext)` of every row that opened.
    pub fn plaintexts(&self) -> Vec<(&str, &str)> {
        self.hits
            .iter()
            .filter_map(|hit| {
                hit.result
                    .as_deref()
                    .ok()
                    .map(|text| (hit.id.as_str(), text))
            })
            .collect()
    }

    /// Number of matching rows that did not open.
    pub fn failures(&self) -> usize {
        self.hits.iter().filter(|hit| hit.result.is_err()).count()
    }
}

/// Exact-match search over one encrypted text field.
pub struct FieldSearch {
    engine: Arc<EncryptionEngine>,
    store: Arc<dyn RecordStore>,
}

impl FieldSearch {
    pub fn new(engine: Arc<EncryptionEngine>, store: Arc<dyn RecordStore>) -> Self {
        Self { engine, store }
    }

    pub async fn search(
        &self,
        table: &str,
        field: &str,
        text: &str,
        user_id: &str,
    ) -> SealResult<SearchResults> {
        let [salted, legacy] = self.engine.search_terms(text, user_id)?;

        let mut term = MatchedTerm::Salted;
        let mut ids = self.store.query_by_hash(table, field, user_id, &salted).await?;
        if ids.is_empty() {
            term = MatchedTerm::Legacy;
            ids = self.store.query_by_hash(table, field, user_id, &legacy).await?;
        }
        if ids.is_empty() {
            debug!(table = %table, field = %field, user_id = %user_id, "search: no rows");
            return Ok(SearchResults::miss());
        }
        ids.sort();

        let mut rows: Vec<(String, StoredField)> = Vec::with_capacity(ids.len());
        for id in ids {
            match self.store.get_record(table, field, &id).await? {
                Some(record) => rows.push((record.id, record.field)),
                None => debug!(id = %id, "search: row removed after query"),
            }
        }

        let hits = self
            .engine
            .decrypt_many(
                user_id,
                rows.iter()
                    .map(|(id, field)| (id.as_str(), field.encrypted.as_str())),
            )
            .await;
        debug!(
            table = %table,
            field = %field,
            user_id = %user_id,
            term = %term,
            hits = hits.len(),
            "search: rows matched"
        );
        Ok(SearchResults {
            term: Some(term),
            hits,
        })
    }
}
