//! Tantivy-based search index module.
//!
//! Provides full-text search over events, trocs and services with field
//! boosting. Every listing is one document keyed by `kind:id`; queries are
//! restricted to one kind and optionally one quartier.

use std::path::Path;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, BoostQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Schema, Value, INDEXED, STORED, STRING, TEXT};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tokio::sync::RwLock;

use crate::errors::AppError;
use crate::models::{AnnonceTroc, Evenement, Service};

const BOOST_TITLE: f32 = 10.0;
const BOOST_TAGS: f32 = 6.0;
const BOOST_BODY: f32 = 3.0;

/// The kind of listing a document describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingKind {
    Evenement,
    Troc,
    Service,
}

impl ListingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingKind::Evenement => "evenement",
            ListingKind::Troc => "troc",
            ListingKind::Service => "service",
        }
    }
}

/// Searchable projection of a listing.
#[derive(Debug, Clone)]
pub struct Listing {
    pub kind: ListingKind,
    pub id: i64,
    pub quartier_id: Option<i64>,
    pub title: String,
    pub tags: Vec<String>,
    pub body: Vec<String>,
}

impl Listing {
    fn key(&self) -> String {
        listing_key(self.kind, self.id)
    }
}

fn listing_key(kind: ListingKind, id: i64) -> String {
    format!("{}:{}", kind.as_str(), id)
}

fn present(values: &[&Option<String>]) -> Vec<String> {
    values.iter().filter_map(|v| v.as_ref().cloned()).collect()
}

impl From<&Evenement> for Listing {
    fn from(event: &Evenement) -> Self {
        let mut tags = present(&[&event.type_evenement]);
        tags.push(event.lieu.clone());
        Self {
            kind: ListingKind::Evenement,
            id: event.id,
            quartier_id: event.quartier_id,
            title: event.nom.clone(),
            tags,
            body: present(&[&event.description]),
        }
    }
}

impl From<&AnnonceTroc> for Listing {
    fn from(troc: &AnnonceTroc) -> Self {
        let mut tags = present(&[&troc.categorie, &troc.etat_produit]);
        tags.push(troc.type_annonce.as_str().to_string());
        tags.push(troc.mode_echange.as_str().to_string());
        Self {
            kind: ListingKind::Troc,
            id: troc.id,
            quartier_id: Some(troc.quartier_id),
            title: troc.titre.clone(),
            tags,
            body: present(&[&troc.description, &troc.objet_propose, &troc.objet_recherche]),
        }
    }
}

impl From<&Service> for Listing {
    fn from(service: &Service) -> Self {
        let mut tags = present(&[&service.lieu, &service.competences_requises]);
        tags.push(service.categorie.clone());
        tags.push(service.type_service.as_str().to_string());
        Self {
            kind: ListingKind::Service,
            id: service.id,
            quartier_id: Some(service.quartier_id),
            title: service.titre.clone(),
            tags,
            body: vec![service.description.clone()],
        }
    }
}

/// Search index schema fields.
struct ListingFields {
    key: Field,
    kind: Field,
    id: Field,
    quartier_id: Field,
    title: Field,
    tags: Field,
    body: Field,
}

/// Tantivy search index for listings.
pub struct ListingIndex {
    index: Index,
    reader: IndexReader,
    writer: Arc<RwLock<IndexWriter>>,
    fields: ListingFields,
}

impl ListingIndex {
    /// Create or open a search index at the specified path.
    pub fn open(index_path: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(index_path)
            .map_err(|e| AppError::Search(format!("Failed to create index directory: {}", e)))?;

        let mut schema_builder = Schema::builder();
        schema_builder.add_text_field("key", STRING);
        schema_builder.add_text_field("kind", STRING);
        schema_builder.add_u64_field("id", STORED);
        schema_builder.add_u64_field("quartier_id", INDEXED);
        schema_builder.add_text_field("title", TEXT);
        schema_builder.add_text_field("tags", TEXT);
        schema_builder.add_text_field("body", TEXT);
        let schema = schema_builder.build();

        let index = Index::open_in_dir(index_path)
            .or_else(|_| Index::create_in_dir(index_path, schema))
            .map_err(|e| AppError::Search(format!("Failed to open/create index: {}", e)))?;

        let schema = index.schema();
        let field = |name: &str| {
            schema
                .get_field(name)
                .map_err(|e| AppError::Search(format!("Index schema mismatch: {}", e)))
        };
        let fields = ListingFields {
            key: field("key")?,
            kind: field("kind")?,
            id: field("id")?,
            quartier_id: field("quartier_id")?,
            title: field("title")?,
            tags: field("tags")?,
            body: field("body")?,
        };

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

    /// Replace the whole index content.
    pub async fn rebuild(&self, listings: &[Listing]) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_all_documents()?;
        for listing in listings {
            writer.add_document(self.create_document(listing))?;
        }
        writer.commit()?;

        self.reader.reload()?;

        tracing::info!("Search index rebuilt with {} listings", listings.len());
        Ok(())
    }

    /// Add or replace a single listing.
    pub async fn index(&self, listing: impl Into<Listing>) -> Result<(), AppError> {
        let listing = listing.into();
        let mut writer = self.writer.write().await;

        writer.delete_term(Term::from_field_text(self.fields.key, &listing.key()));
        writer.add_document(self.create_document(&listing))?;
        writer.commit()?;

        self.reader.reload()?;

        Ok(())
    }

    /// Remove a listing from the index.
    pub async fn remove(&self, kind: ListingKind, id: i64) -> Result<(), AppError> {
        let mut writer = self.writer.write().await;

        writer.delete_term(Term::from_field_text(self.fields.key, &listing_key(kind, id)));
        writer.commit()?;

        self.reader.reload()?;

        Ok(())
    }

    /// Ids of the listings of `kind` matching the query, best first.
    pub fn search(
        &self,
        kind: ListingKind,
        query_str: &str,
        quartier_id: Option<i64>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<i64>, AppError> {
        if query_str.trim().is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();

        let query_parser = QueryParser::for_index(
            &self.index,
            vec![self.fields.title, self.fields.tags, self.fields.body],
        );
        let base_query = query_parser
            .parse_query(query_str)
            .map_err(|e| AppError::BadRequest(format!("Requête de recherche invalide: {}", e)))?;

        let mut text_queries: Vec<(Occur, Box<dyn Query>)> = Vec::new();
        let field_queries = [
            (self.fields.title, BOOST_TITLE),
            (self.fields.tags, BOOST_TAGS),
            (self.fields.body, BOOST_BODY),
        ];
        for (field, boost) in field_queries {
            let field_parser = QueryParser::for_index(&self.index, vec![field]);
            if let Ok(field_query) = field_parser.parse_query(query_str) {
                text_queries.push((Occur::Should, Box::new(BoostQuery::new(field_query, boost))));
            }
        }
        let text_query: Box<dyn Query> = if text_queries.is_empty() {
            base_query
        } else {
            Box::new(BooleanQuery::new(text_queries))
        };

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![
            (
                Occur::Must,
                Box::new(TermQuery::new(
                    Term::from_field_text(self.fields.kind, kind.as_str()),
                    IndexRecordOption::Basic,
                )),
            ),
            (Occur::Must, text_query),
        ];
        if let Some(quartier_id) = quartier_id {
            clauses.push((
                Occur::Must,
                Box::new(TermQuery::new(
                    Term::from_field_u64(self.fields.quartier_id, quartier_id as u64),
                    IndexRecordOption::Basic,
                )),
            ));
        }
        let combined_query = BooleanQuery::new(clauses);

        let top_docs = searcher
            .search(&combined_query, &TopDocs::with_limit(limit + offset))
            .map_err(|e| AppError::Search(format!("Search failed: {}", e)))?;

        let ids = top_docs
            .into_iter()
            .skip(offset)
            .take(limit)
            .filter_map(|(_score, doc_address)| {
                let doc: TantivyDocument = searcher.doc(doc_address).ok()?;
                doc.get_first(self.fields.id)?.as_u64().map(|id| id as i64)
            })
            .collect();

        Ok(ids)
    }

    fn create_document(&self, listing: &Listing) -> TantivyDocument {
        let mut doc = TantivyDocument::default();
        doc.add_text(self.fields.key, listing.key());
        doc.add_text(self.fields.kind, listing.kind.as_str());
        doc.add_u64(self.fields.id, listing.id as u64);
        if let Some(quartier_id) = listing.quartier_id {
            doc.add_u64(self.fields.quartier_id, quartier_id as u64);
        }
        doc.add_text(self.fields.title, &listing.title);
        doc.add_text(self.fields.tags, listing.tags.join(" "));
        doc.add_text(self.fields.body, listing.body.join(" "));
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn listing(kind: ListingKind, id: i64, quartier_id: i64, title: &str, body: &str) -> Listing {
        Listing {
            kind,
            id,
            quartier_id: Some(quartier_id),
            title: title.to_string(),
            tags: Vec::new(),
            body: vec![body.to_string()],
        }
    }

    #[tokio::test]
    async fn test_search_by_kind_and_quartier() {
        let temp_dir = TempDir::new().unwrap();
        let index = ListingIndex::open(temp_dir.path()).unwrap();

        index
            .rebuild(&[
                listing(ListingKind::Troc, 1, 1, "Vélo de course", "Bon état"),
                listing(ListingKind::Troc, 2, 2, "Vélo enfant", "Petite taille"),
                listing(ListingKind::Service, 1, 1, "Réparation vélo", "Atelier"),
            ])
            .await
            .unwrap();

        let all_trocs = index.search(ListingKind::Troc, "vélo", None, 10, 0).unwrap();
        assert_eq!(all_trocs.len(), 2);

        let local = index.search(ListingKind::Troc, "vélo", Some(1), 10, 0).unwrap();
        assert_eq!(local, vec![1]);

        let services = index.search(ListingKind::Service, "vélo", None, 10, 0).unwrap();
        assert_eq!(services, vec![1]);
    }

    #[tokio::test]
    async fn test_title_outranks_body() {
        let temp_dir = TempDir::new().unwrap();
        let index = ListingIndex::open(temp_dir.path()).unwrap();

        index
            .rebuild(&[
                listing(ListingKind::Evenement, 1, 1, "Pique-nique", "Apportez une guitare"),
                listing(ListingKind::Evenement, 2, 1, "Concert de guitare", "Place du marché"),
            ])
            .await
            .unwrap();

        let ids = index.search(ListingKind::Evenement, "guitare", None, 10, 0).unwrap();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_reindex_and_remove() {
        let temp_dir = TempDir::new().unwrap();
        let index = ListingIndex::open(temp_dir.path()).unwrap();

        index
            .index(listing(ListingKind::Troc, 5, 1, "Perceuse", "Outil"))
            .await
            .unwrap();
        index
            .index(listing(ListingKind::Troc, 5, 1, "Ponceuse", "Outil"))
            .await
            .unwrap();

        assert!(index.search(ListingKind::Troc, "perceuse", None, 10, 0).unwrap().is_empty());
        assert_eq!(index.search(ListingKind::Troc, "outil", None, 10, 0).unwrap(), vec![5]);

        index.remove(ListingKind::Troc, 5).await.unwrap();
        assert!(index.search(ListingKind::Troc, "outil", None, 10, 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_empty_query() {
        let temp_dir = TempDir::new().unwrap();
        let index = ListingIndex::open(temp_dir.path()).unwrap();

        let results = index.search(ListingKind::Troc, "  ", None, 10, 0).unwrap();
        assert!(results.is_empty());
    }
}
