//! Schema Index
//!
//! Persists table schemas with embeddings and retrieves the ones relevant
//! to a query, assembling the focused context block handed to the LLM.

use crate::error::{InsightError, Result};
use crate::schema_rag::embedder::Embedder;
use crate::schema_rag::vector_store::{Document, VectorStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::info;

/// Default number of tables retrieved per query.
pub const DEFAULT_TOP_K: usize = 3;
/// Hard cap on retrieval fan-out.
pub const MAX_TOP_K: usize = 10;

/// Sentinel context returned when nothing has been indexed yet.
pub const EMPTY_INDEX_CONTEXT: &str = "No relevant schemas found in the index.";

/// One column of a physical table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One indexed table schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaEntry {
    pub table_name: String,
    pub ddl: String,
    pub columns: Vec<ColumnInfo>,
    pub embedding: Vec<f32>,
}

impl SchemaEntry {
    /// The composed document that gets embedded for this entry.
    fn embedding_document(table_name: &str, ddl: &str, columns: &[ColumnInfo]) -> String {
        let mut parts = vec![table_name.to_string(), ddl.to_string()];
        for col in columns {
            match &col.description {
                Some(desc) => parts.push(format!("{}: {}", col.name, desc)),
                None => parts.push(col.name.clone()),
            }
        }
        parts.join("\n")
    }
}

/// A table schema before it has been embedded and indexed.
#[derive(Debug, Clone, Deserialize)]
pub struct TableSchemaSpec {
    pub table_name: String,
    pub ddl: String,
    pub columns: Vec<ColumnInfo>,
}

struct IndexState {
    entries: BTreeMap<String, SchemaEntry>,
    store: VectorStore,
}

/// Semantic schema index. Writes are exclusive (admin indexing operations);
/// retrieval takes a shared lock only.
pub struct SchemaIndex {
    state: RwLock<IndexState>,
    embedder: Arc<dyn Embedder>,
    snapshot_path: Option<PathBuf>,
}

impl SchemaIndex {
    /// Purely in-memory index (tests, ephemeral runs).
    pub fn in_memory(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            state: RwLock::new(IndexState {
                entries: BTreeMap::new(),
                store: VectorStore::new(),
            }),
            embedder,
            snapshot_path: None,
        }
    }

    /// Open an index persisted under `dir/entries.json`.
    pub fn open(dir: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let snapshot_path = dir.join("entries.json");

        let mut entries = BTreeMap::new();
        let mut store = VectorStore::new();
        if snapshot_path.exists() {
            let raw = std::fs::read_to_string(&snapshot_path)?;
            let loaded: Vec<SchemaEntry> = serde_json::from_str(&raw)
                .map_err(|e| InsightError::Schema(format!("corrupt schema snapshot: {}", e)))?;
            for entry in loaded {
                store.upsert(Document {
                    id: entry.table_name.clone(),
                    text: SchemaEntry::embedding_document(
                        &entry.table_name,
                        &entry.ddl,
                        &entry.columns,
                    ),
                    embedding: entry.embedding.clone(),
                });
                entries.insert(entry.table_name.clone(), entry);
            }
            info!("Loaded {} schema entries from {:?}", entries.len(), snapshot_path);
        }

        Ok(Self {
            state: RwLock::new(IndexState { entries, store }),
            embedder,
            snapshot_path: Some(snapshot_path),
        })
    }

    /// Index one table schema. The entry is embedded first; an embedding
    /// failure surfaces loudly and leaves the index unchanged.
    pub async fn index_table(
        &self,
        table_name: &str,
        ddl: &str,
        columns: Vec<ColumnInfo>,
    ) -> Result<()> {
        let document = SchemaEntry::embedding_document(table_name, ddl, &columns);
        let embedding = self.embedder.embed(&document).await?;

        let entry = SchemaEntry {
            table_name: table_name.to_string(),
            ddl: ddl.to_string(),
            columns,
            embedding: embedding.clone(),
        };

        {
            let mut state = self
                .state
                .write()
                .map_err(|_| InsightError::Internal("schema index lock poisoned".to_string()))?;
            state.store.upsert(Document {
                id: entry.table_name.clone(),
                text: document,
                embedding,
            });
            state.entries.insert(entry.table_name.clone(), entry);
            self.persist(&state.entries)?;
        }

        info!("Indexed schema for table: {}", table_name);
        Ok(())
    }

    fn persist(&self, entries: &BTreeMap<String, SchemaEntry>) -> Result<()> {
        if let Some(ref path) = self.snapshot_path {
            let all: Vec<&SchemaEntry> = entries.values().collect();
            std::fs::write(path, serde_json::to_string(&all)?)?;
        }
        Ok(())
    }

    /// Retrieve up to `top_k` entries by descending semantic similarity.
    /// An empty index yields an empty result, never an error.
    pub async fn retrieve(&self, query_text: &str, top_k: usize) -> Result<Vec<SchemaEntry>> {
        let top_k = top_k.clamp(1, MAX_TOP_K);

        let is_empty = {
            let state = self
                .state
                .read()
                .map_err(|_| InsightError::Internal("schema index lock poisoned".to_string()))?;
            state.store.is_empty()
        };
        if is_empty {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(query_text).await?;

        let state = self
            .state
            .read()
            .map_err(|_| InsightError::Internal("schema index lock poisoned".to_string()))?;
        let hits = state.store.search(&query_embedding, top_k);
        Ok(hits
            .into_iter()
            .filter_map(|hit| state.entries.get(&hit.id).cloned())
            .collect())
    }

    /// Build the focused context block used as LLM input: the top-k DDLs
    /// with column-level annotations.
    pub async fn build_context(&self, query_text: &str, top_k: usize) -> Result<String> {
        let entries = self.retrieve(query_text, top_k).await?;
        if entries.is_empty() {
            return Ok(EMPTY_INDEX_CONTEXT.to_string());
        }

        let mut sections = Vec::new();
        for entry in &entries {
            let mut lines = vec![
                format!("Table: {}", entry.table_name),
                format!("Schema: {}", entry.ddl.trim()),
            ];
            let column_details: Vec<String> = entry
                .columns
                .iter()
                .map(|col| match &col.description {
                    Some(desc) => format!("{} ({}) - {}", col.name, col.data_type, desc),
                    None => format!("{} ({})", col.name, col.data_type),
                })
                .collect();
            lines.push(format!("Columns: {}", column_details.join(", ")));
            sections.push(lines.join("\n"));
        }

        Ok(format!(
            "Relevant Database Schemas:\n\n{}",
            sections.join("\n\n")
        ))
    }

    /// Union of column names across all indexed tables. Used by the
    /// glossary to validate its `related_columns` references.
    pub fn known_columns(&self) -> Vec<String> {
        let state = match self.state.read() {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        let mut columns: Vec<String> = state
            .entries
            .values()
            .flat_map(|e| e.columns.iter().map(|c| c.name.clone()))
            .collect();
        columns.sort();
        columns.dedup();
        columns
    }

    /// Table names present in the index.
    pub fn table_names(&self) -> Vec<String> {
        match self.state.read() {
            Ok(state) => state.entries.keys().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read table schemas out of a SQLite database for indexing.
pub async fn load_sqlite_schemas(pool: &sqlx::SqlitePool) -> Result<Vec<TableSchemaSpec>> {
    use sqlx::Row;

    let rows = sqlx::query(
        "SELECT name, sql FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(pool)
    .await?;

    let mut specs = Vec::new();
    for row in rows {
        let table_name: String = row.try_get("name")?;
        let ddl: Option<String> = row.try_get("sql")?;

        let column_rows = sqlx::query(&format!("PRAGMA table_info('{}')", table_name))
            .fetch_all(pool)
            .await?;
        let columns = column_rows
            .iter()
            .map(|col| {
                Ok(ColumnInfo {
                    name: col.try_get::<String, _>("name")?,
                    data_type: col.try_get::<String, _>("type")?,
                    description: None,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        specs.push(TableSchemaSpec {
            table_name: table_name.clone(),
            ddl: ddl.unwrap_or_else(|| format!("CREATE TABLE {} (...)", table_name)),
            columns,
        });
    }
    Ok(specs)
}

/// Read table schemas from a YAML document (`tables:` list).
pub fn load_yaml_schemas(path: &Path) -> Result<Vec<TableSchemaSpec>> {
    #[derive(Deserialize)]
    struct SchemaDoc {
        tables: Vec<TableSchemaSpec>,
    }

    let raw = std::fs::read_to_string(path)?;
    let doc: SchemaDoc = serde_yaml::from_str(&raw)
        .map_err(|e| InsightError::Schema(format!("invalid schema document: {}", e)))?;
    Ok(doc.tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema_rag::embedder::HashEmbedder;

    fn orders_columns() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo {
                name: "order_date".to_string(),
                data_type: "DATE".to_string(),
                description: Some("date the order was placed".to_string()),
            },
            ColumnInfo {
                name: "total_amount".to_string(),
                data_type: "REAL".to_string(),
                description: Some("order revenue".to_string()),
            },
        ]
    }

    #[tokio::test]
    async fn test_indexed_entry_is_first_for_its_own_name() {
        let index = SchemaIndex::in_memory(Arc::new(HashEmbedder::default()));
        index
            .index_table("orders", "CREATE TABLE orders (order_date DATE, total_amount REAL)", orders_columns())
            .await
            .unwrap();
        index
            .index_table("customers", "CREATE TABLE customers (id INTEGER, name TEXT)", vec![])
            .await
            .unwrap();

        let hits = index.retrieve("orders", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].table_name, "orders");
    }

    #[tokio::test]
    async fn test_empty_index_returns_sentinel() {
        let index = SchemaIndex::in_memory(Arc::new(HashEmbedder::default()));
        assert!(index.retrieve("anything", 3).await.unwrap().is_empty());
        assert_eq!(index.build_context("anything", 3).await.unwrap(), EMPTY_INDEX_CONTEXT);
    }

    #[tokio::test]
    async fn test_double_index_is_idempotent() {
        let index = SchemaIndex::in_memory(Arc::new(HashEmbedder::default()));
        for _ in 0..2 {
            index
                .index_table("orders", "CREATE TABLE orders (order_date DATE)", orders_columns())
                .await
                .unwrap();
        }
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let embedder: Arc<HashEmbedder> = Arc::new(HashEmbedder::default());

        {
            let index = SchemaIndex::open(dir.path(), embedder.clone()).unwrap();
            index
                .index_table("orders", "CREATE TABLE orders (order_date DATE)", orders_columns())
                .await
                .unwrap();
        }

        let reopened = SchemaIndex::open(dir.path(), embedder).unwrap();
        assert_eq!(reopened.len(), 1);
        let hits = reopened.retrieve("orders", 1).await.unwrap();
        assert_eq!(hits[0].table_name, "orders");
    }

    #[tokio::test]
    async fn test_context_contains_ddl_and_columns() {
        let index = SchemaIndex::in_memory(Arc::new(HashEmbedder::default()));
        index
            .index_table("orders", "CREATE TABLE orders (order_date DATE, total_amount REAL)", orders_columns())
            .await
            .unwrap();
        let context = index.build_context("orders revenue", 3).await.unwrap();
        assert!(context.contains("Table: orders"));
        assert!(context.contains("CREATE TABLE orders"));
        assert!(context.contains("total_amount (REAL)"));
    }
}
