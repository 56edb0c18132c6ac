//! End-to-end query tests over the real SQLite stack: store, role
//! resolver, audit sink, and pipeline wired together the way the server
//! wires them.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use docvault::audit::{list_events, SqlAuditSink};
use docvault::auth::{hash_password, SqlRoleResolver};
use docvault::embedding::HashEmbedder;
use docvault::sqlite_store::SqliteChunkStore;
use docvault::{migrate, workspace};
use docvault_core::chunk::chunk_document;
use docvault_core::embedding::EmbeddingProvider;
use docvault_core::models::{ClassificationLabel, Document, WorkspaceRole};
use docvault_core::pipeline::{Caller, PolicyFilteringMode, QueryPipeline, NO_RESULTS_ANSWER};
use docvault_core::store::ChunkStore;
use docvault_core::Result;

/// Embedder with a fixed text → vector table, so test geometry is exact.
struct TableEmbedder {
    table: Vec<(String, Vec<f32>)>,
}

impl TableEmbedder {
    fn new(table: &[(&str, &[f32])]) -> Self {
        Self {
            table: table
                .iter()
                .map(|(text, vector)| (text.to_string(), vector.to_vec()))
                .collect(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for TableEmbedder {
    fn model_name(&self) -> &str {
        "table"
    }

    fn dims(&self) -> usize {
        2
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                self.table
                    .iter()
                    .find(|(key, _)| key == text)
                    .map(|(_, vector)| vector.clone())
                    .unwrap_or_else(|| vec![1.0, 0.0])
            })
            .collect())
    }
}

struct TestEnv {
    pool: SqlitePool,
    store: Arc<SqliteChunkStore>,
    workspace_id: String,
    admin: Caller,
    member: Caller,
}

async fn setup() -> TestEnv {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let hash = hash_password("a-strong-password").unwrap();
    let admin_id = workspace::create_user(&pool, "admin@local", &hash).await.unwrap();
    let member_id = workspace::create_user(&pool, "member@local", &hash).await.unwrap();
    let ws = workspace::create_workspace(&pool, "Research", &admin_id).await.unwrap();
    workspace::add_member(&pool, &ws.id, "member@local", WorkspaceRole::Member)
        .await
        .unwrap();

    let store = Arc::new(SqliteChunkStore::new(pool.clone()));

    // Three single-chunk documents; vectors place the restricted chunk
    // closest to the [1, 0] query.
    let specs = [
        ("Public", "public chunk", ClassificationLabel::Public, vec![0.8f32, 0.6]),
        ("Internal", "internal chunk", ClassificationLabel::Internal, vec![0.95, 0.312]),
        ("Restricted", "restricted chunk", ClassificationLabel::Restricted, vec![1.0, 0.0]),
    ];
    for (title, body, label, vector) in specs {
        let mut doc = Document::new(ws.id.clone(), title, body);
        doc.classification = label;
        let chunks = chunk_document(&doc, 600, 120).unwrap();
        assert_eq!(chunks.len(), 1);
        store.add_many(&[doc], &chunks, &[vector]).await.unwrap();
    }

    TestEnv {
        pool,
        store,
        workspace_id: ws.id,
        admin: Caller {
            user_id: admin_id,
            email: "admin@local".to_string(),
        },
        member: Caller {
            user_id: member_id,
            email: "member@local".to_string(),
        },
    }
}

fn pipeline_for(env: &TestEnv) -> QueryPipeline {
    QueryPipeline::new(
        env.store.clone(),
        Arc::new(TableEmbedder::new(&[("test question", &[1.0, 0.0])])),
        Arc::new(SqlRoleResolver::new(env.pool.clone(), false)),
        Arc::new(SqlAuditSink::new(env.pool.clone())),
    )
}

#[tokio::test]
async fn test_member_query_end_to_end() {
    let env = setup().await;
    let pipeline = pipeline_for(&env);

    let result = pipeline
        .execute_query(&env.workspace_id, "test question", 3, &env.member)
        .await
        .unwrap();

    // The restricted chunk ranks first but is filtered for a member.
    assert_eq!(result.answer, "internal chunk");
    let titles: Vec<&str> = result
        .citations
        .iter()
        .map(|c| c.source_title.as_str())
        .collect();
    assert_eq!(titles, vec!["Internal", "Public"]);
    assert_eq!(result.policy.candidate_results, 3);
    assert_eq!(result.policy.returned_results, 2);
    assert_eq!(result.policy.access_role, "member");
    assert_eq!(
        result.policy.allowed_classification_labels,
        vec!["internal", "public"]
    );

    // The audit trail carries the accounting, with the question redacted.
    let events = list_events(&env.pool, &env.workspace_id, 10).await.unwrap();
    let query_event = events.iter().find(|e| e.action == "query").unwrap();
    assert_eq!(query_event.payload["candidate_results"], 3);
    assert_eq!(query_event.payload["results"], 2);
    assert_eq!(query_event.payload["filtered_by_policy"], 1);
    assert_eq!(query_event.payload["filtered_missing_metadata"], 0);
    assert_eq!(query_event.payload["question"], "[redacted]");
    assert_eq!(query_event.payload["outcome"], "success");
}

#[tokio::test]
async fn test_admin_query_end_to_end() {
    let env = setup().await;
    let pipeline = pipeline_for(&env);

    let result = pipeline
        .execute_query(&env.workspace_id, "test question", 3, &env.admin)
        .await
        .unwrap();

    assert_eq!(result.answer, "restricted chunk");
    assert_eq!(result.citations.len(), 3);
    assert_eq!(result.citations[0].source_title, "Restricted");
    assert_eq!(result.policy.access_role, "admin");
}

#[tokio::test]
async fn test_in_retrieval_mode_end_to_end() {
    let env = setup().await;
    let pipeline = pipeline_for(&env).with_filtering_mode(PolicyFilteringMode::InRetrieval);

    let result = pipeline
        .execute_query(&env.workspace_id, "test question", 3, &env.member)
        .await
        .unwrap();

    let titles: Vec<&str> = result
        .citations
        .iter()
        .map(|c| c.source_title.as_str())
        .collect();
    assert_eq!(titles, vec!["Internal", "Public"]);
    assert_eq!(result.policy.candidate_results, 2);
    assert_eq!(result.policy.returned_results, 2);
}

#[tokio::test]
async fn test_outsider_is_forbidden() {
    let env = setup().await;
    let pipeline = pipeline_for(&env);

    let hash = hash_password("a-strong-password").unwrap();
    let outsider_id = workspace::create_user(&env.pool, "outsider@local", &hash)
        .await
        .unwrap();
    let outsider = Caller {
        user_id: outsider_id,
        email: "outsider@local".to_string(),
    };

    let err = pipeline
        .execute_query(&env.workspace_id, "test question", 3, &outsider)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "forbidden");
}

#[tokio::test]
async fn test_query_against_empty_workspace() {
    let env = setup().await;
    let pipeline = pipeline_for(&env);

    // A second workspace owned by the same admin, with no corpus.
    let empty_ws = workspace::create_workspace(&env.pool, "Empty", &env.admin.user_id)
        .await
        .unwrap();
    let err = pipeline
        .execute_query(&empty_ws.id, "test question", 3, &env.admin)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "no_data_ingested");
}

#[tokio::test]
async fn test_hash_embedder_retrieves_by_vocabulary() {
    let env = setup().await;

    // Replace the corpus with real hash-embedded content.
    let embedder = Arc::new(HashEmbedder::new(256));
    let texts = [
        ("Glaciers", "glaciers carve alpine valleys over centuries of slow movement"),
        ("Sourdough", "sourdough bread rises through wild yeast fermentation"),
    ];
    let mut documents = Vec::new();
    let mut all_chunks = Vec::new();
    for (title, body) in texts {
        let doc = Document::new(env.workspace_id.clone(), title, body);
        let chunks = chunk_document(&doc, 600, 120).unwrap();
        documents.push(doc);
        all_chunks.extend(chunks);
    }
    let contents: Vec<String> = all_chunks.iter().map(|c| c.content.clone()).collect();
    let vectors = embedder.embed_batch(&contents).await.unwrap();
    env.store
        .replace_workspace(&env.workspace_id, &documents, &all_chunks, &vectors)
        .await
        .unwrap();

    let pipeline = QueryPipeline::new(
        env.store.clone(),
        embedder,
        Arc::new(SqlRoleResolver::new(env.pool.clone(), false)),
        Arc::new(SqlAuditSink::new(env.pool.clone())),
    );

    let result = pipeline
        .execute_query(&env.workspace_id, "how do glaciers shape valleys", 1, &env.admin)
        .await
        .unwrap();
    assert_eq!(result.citations.len(), 1);
    assert_eq!(result.citations[0].source_title, "Glaciers");
}

#[tokio::test]
async fn test_member_blocked_entirely_gets_sentinel() {
    let env = setup().await;
    let pipeline = pipeline_for(&env);

    // Raise everything out of the member's reach.
    for doc in env
        .store
        .list_documents(&env.workspace_id, 10, 0)
        .await
        .unwrap()
    {
        env.store
            .update_classification(&env.workspace_id, &doc.id, ClassificationLabel::Restricted)
            .await
            .unwrap();
    }

    let result = pipeline
        .execute_query(&env.workspace_id, "test question", 3, &env.member)
        .await
        .unwrap();
    assert_eq!(result.answer, NO_RESULTS_ANSWER);
    assert!(result.citations.is_empty());
    assert_eq!(result.policy.candidate_results, 3);
    assert_eq!(result.policy.returned_results, 0);
}
