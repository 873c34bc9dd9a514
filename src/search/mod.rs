//! Tantivy-based search index module.
//!
//! Provides full-text search over context notes with field boosting.

use std::path::Path;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, Occur, QueryParser};
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};
use tokio::sync::RwLock;

use crate::errors::AppError;
use crate::models::ContextNote;

/// Field boost values.
const BOOST_TOPIC: f32 = 10.0;
const BOOST_TAGS: f32 = 6.0;
const BOOST_INFORMATION: f32 = 4.0;

/// Search result with note ID and relevance score.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub note_id: i64,
    pub score: f32,
}

/// Search index schema fields.
struct SearchFields {
    note_id: Field,
    topic: Field,
    information: Field,
    tags: Field,
}

/// Tantivy search index for context notes.
pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    writer: Arc<RwLock<IndexWriter>>,
    fields: SearchFields,
}

impl SearchIndex {
    /// Create or open a search index at the specified path.
    pub fn open(index_path: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(index_path)
            .map_err(|e| AppError::Search(format!("Failed to create index directory: {}", e)))?;

        // Define schema
        let mut schema_builder = Schema::builder();
        let note_id = schema_builder.add_text_field("note_id", STRING | STORED);
        let topic = schema_builder.add_text_field("topic", TEXT | STORED);
        let information = schema_builder.add_text_field("information", TEXT);
        let tags = schema_builder.add_text_field("tags", TEXT);
        let schema = schema_builder.build();

        let fields = SearchFields {
            note_id,
            topic,
            information,
            tags,
        };

        // Try to open existing index or create new one
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
            fields,
        })
    }

    /// Rebuild the entire index from notes.
    pub async fn rebuild(&self, notes: &[ContextNote]) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        // Clear existing index
        writer.delete_all_documents()?;

        for note in notes {
            writer.add_document(self.create_document(note))?;
        }

        writer.commit()?;

        // Reload reader to see new documents
        self.reader.reload()?;

        tracing::info!("Search index rebuilt with {} context notes", notes.len());
        Ok(())
    }

    /// Index a single note, replacing any previous version.
    pub async fn index_note(&self, note: &ContextNote) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        let term = tantivy::Term::from_field_text(self.fields.note_id, &note.id.to_string());
        writer.delete_term(term);

        writer.add_document(self.create_document(note))?;
        writer.commit()?;

        self.reader.reload()?;

        Ok(())
    }

    /// Remove a note from the index.
    pub async fn remove_note(&self, note_id: i64) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        let term = tantivy::Term::from_field_text(self.fields.note_id, &note_id.to_string());
        writer.delete_term(term);
        writer.commit()?;

        self.reader.reload()?;

        Ok(())
    }

    /// Search for notes matching the query.
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

        let query_parser = QueryParser::for_index(
            &self.index,
            vec![self.fields.topic, self.fields.information, self.fields.tags],
        );

        // Parse the user query
        let base_query = query_parser
            .parse_query(query_str)
            .map_err(|e| AppError::Search(format!("Invalid search query: {}", e)))?;

        let mut subqueries: Vec<(Occur, Box<dyn tantivy::query::Query>)> = Vec::new();

        let field_queries = [
            (self.fields.topic, BOOST_TOPIC),
            (self.fields.tags, BOOST_TAGS),
            (self.fields.information, BOOST_INFORMATION),
        ];

        for (field, boost) in field_queries {
            let field_parser = QueryParser::for_index(&self.index, vec![field]);
            if let Ok(field_query) = field_parser.parse_query(query_str) {
                let boosted = BoostQuery::new(field_query, boost);
                subqueries.push((Occur::Should, Box::new(boosted)));
            }
        }

        // Combine with OR semantics
        let combined_query = if subqueries.is_empty() {
            base_query
        } else {
            Box::new(BooleanQuery::new(subqueries))
        };

        let top_docs = searcher
            .search(&combined_query, &TopDocs::with_limit(limit + offset))
            .map_err(|e| AppError::Search(format!("Search failed: {}", e)))?;

        let results: Vec<SearchResult> = top_docs
            .into_iter()
            .skip(offset)
            .take(limit)
            .filter_map(|(score, doc_address)| {
                let doc: TantivyDocument = searcher.doc(doc_address).ok()?;
                let note_id = doc.get_first(self.fields.note_id)?.as_str()?.parse().ok()?;
                Some(SearchResult { note_id, score })
            })
            .collect();

        Ok(results)
    }

    fn create_document(&self, note: &ContextNote) -> TantivyDocument {
        doc!(
            self.fields.note_id => note.id.to_string(),
            self.fields.topic => note.topic.clone(),
            self.fields.information => note.information.clone(),
            self.fields.tags => note.tags.join(" ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn note(id: i64, topic: &str, information: &str, tags: &[&str]) -> ContextNote {
        ContextNote {
            id,
            topic: topic.to_string(),
            information: information.to_string(),
            priority: 0,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            is_active: true,
            created_at: "2025-01-01T00:00:00Z".to_string(),
            updated_at: "2025-01-01T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn test_search_prefers_topic_matches() {
        let temp_dir = TempDir::new().unwrap();
        let index = SearchIndex::open(temp_dir.path()).unwrap();

        let notes = vec![
            note(1, "Hostel facilities", "Separate hostels with mess and wifi", &["Campus"]),
            note(2, "Fee structure", "Tuition is 50000 per year, hostel extra", &["Fees"]),
        ];
        index.rebuild(&notes).await.unwrap();

        let results = index.search("hostel", 10, 0).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].note_id, 1);
    }

    #[tokio::test]
    async fn test_reindex_and_remove() {
        let temp_dir = TempDir::new().unwrap();
        let index = SearchIndex::open(temp_dir.path()).unwrap();

        let mut n = note(7, "Scholarship", "Merit scholarship for toppers", &[]);
        index.index_note(&n).await.unwrap();
        n.topic = "Bursary".to_string();
        n.information = "Need based bursary".to_string();
        index.index_note(&n).await.unwrap();

        assert!(index.search("merit", 10, 0).unwrap().is_empty());
        assert_eq!(index.search("bursary", 10, 0).unwrap()[0].note_id, 7);

        index.remove_note(7).await.unwrap();
        assert!(index.search("bursary", 10, 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_empty_query() {
        let temp_dir = TempDir::new().unwrap();
        let index = SearchIndex::open(temp_dir.path()).unwrap();

        let results = index.search("", 10, 0).unwrap();
        assert!(results.is_empty());
    }
}
