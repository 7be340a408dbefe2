//! Tantivy-based station search.
//!
//! Station names are matched with a boost over ids; the whole index is
//! rebuilt whenever a new dataset revision is published.

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, Occur, QueryParser};
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};
use tokio::sync::RwLock;

use crate::errors::AppError;
use crate::models::Station;

const BOOST_NAME: f32 = 10.0;
const BOOST_ID_TEXT: f32 = 6.0;

/// Search hit with relevance score.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub station_id: String,
    pub score: f32,
}

struct SearchFields {
    station_id: Field,
    name: Field,
    id_text: Field,
}

pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    writer: Arc<RwLock<IndexWriter>>,
    /// Revision of the stations currently indexed; only written under `writer`.
    indexed_revision: AtomicI64,
    fields: SearchFields,
}

impl SearchIndex {
    /// Create or open a search index at the specified path.
    pub fn open(index_path: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(index_path)
            .map_err(|e| AppError::Search(format!("Failed to create index directory: {}", e)))?;

        let mut schema_builder = Schema::builder();
        let station_id = schema_builder.add_text_field("station_id", STRING | STORED);
        let name = schema_builder.add_text_field("name", TEXT);
        let id_text = schema_builder.add_text_field("id_text", TEXT);
        let schema = schema_builder.build();

        let fields = SearchFields {
            station_id,
            name,
            id_text,
        };

        let index = Index::open_in_dir(index_path)
            .or_else(|_| Index::create_in_dir(index_path, schema.clone()))
            .map_err(|e| AppError::Search(format!("Failed to open/create index: {}", e)))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .map_err(|e| AppError::Search(format!("Failed to create reader: {}", e)))?;

        let writer = index
            .writer(50_000_000) // 50MB buffer
            .map_err(|e| AppError::Search(format!("Failed to create writer: {}", e)))?;

        Ok(Self {
            index,
            reader,
            writer: Arc::new(RwLock::new(writer)),
            indexed_revision: AtomicI64::new(i64::MIN),
            fields,
        })
    }

    /// Replace the index contents with the stations of `revision`.
    ///
    /// Returns `false` without touching the index when a newer revision is
    /// already indexed.
    pub async fn rebuild(&self, revision: i64, stations: &[Station]) -> Result<bool, AppError> {
        let mut writer = self.writer.write().await;
        let indexed = self.indexed_revision.load(Ordering::Acquire);
        if revision < indexed {
            tracing::debug!(
                "Skipping index rebuild for revision {}, revision {} is already indexed",
                revision,
                indexed
            );
            return Ok(false);
        }

        writer.delete_all_documents()?;
        for station in stations {
            writer.add_document(self.create_document(station))?;
        }
        writer.commit()?;

        self.reader.reload()?;
        self.indexed_revision.store(revision, Ordering::Release);

        tracing::info!(
            "Search index rebuilt with {} stations at revision {}",
            stations.len(),
            revision
        );
        Ok(true)
    }

    /// Stations matching `query_str`, best first.
    pub fn search(
        &self,
        query_str: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SearchResult>, AppError> {
        if query_str.trim().is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();

        let mut subqueries: Vec<(Occur, Box<dyn tantivy::query::Query>)> = Vec::new();
        for (field, boost) in [
            (self.fields.name, BOOST_NAME),
            (self.fields.id_text, BOOST_ID_TEXT),
        ] {
            let mut parser = QueryParser::for_index(&self.index, vec![field]);
            parser.set_field_fuzzy(field, true, 1, true);
            if let Ok(field_query) = parser.parse_query(query_str) {
                subqueries.push((Occur::Should, Box::new(BoostQuery::new(field_query, boost))));
            }
        }

        if subqueries.is_empty() {
            return Err(AppError::BadRequest(format!(
                "Invalid search query: {}",
                query_str
            )));
        }
        let query = BooleanQuery::new(subqueries);

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(limit + offset))
            .map_err(|e| AppError::Search(format!("Search failed: {}", e)))?;

        let results = top_docs
            .into_iter()
            .skip(offset)
            .take(limit)
            .filter_map(|(score, doc_address)| {
                let doc: TantivyDocument = searcher.doc(doc_address).ok()?;
                let station_id = doc.get_first(self.fields.station_id)?.as_str()?.to_string();
                Some(SearchResult { station_id, score })
            })
            .collect();

        Ok(results)
    }

    fn create_document(&self, station: &Station) -> TantivyDocument {
        doc!(
            self.fields.station_id => station.id.clone(),
            self.fields.name => station.name.clone(),
            self.fields.id_text => station.id.clone()
        )
    }
}
