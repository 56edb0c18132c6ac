//! Integration tests for users, workspaces, membership, and auditing.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use docvault::audit::{list_events, SqlAuditSink};
use docvault::auth::{hash_password, require_workspace_role};
use docvault::{migrate, workspace};
use docvault_core::audit::{actions, AuditSink, REDACTED_PLACEHOLDER};
use docvault_core::models::WorkspaceRole;

async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    pool
}

async fn register(pool: &SqlitePool, email: &str) -> String {
    let hash = hash_password("a-strong-password").unwrap();
    workspace::create_user(pool, email, &hash).await.unwrap()
}

#[tokio::test]
async fn test_duplicate_email_rejected() {
    let pool = memory_pool().await;
    register(&pool, "a@local").await;
    let hash = hash_password("another-password").unwrap();
    let err = workspace::create_user(&pool, "a@local", &hash)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "validation_error");
}

#[tokio::test]
async fn test_workspace_creation_and_roles() {
    let pool = memory_pool().await;
    let owner = register(&pool, "owner@local").await;
    let ws = workspace::create_workspace(&pool, "Research", &owner)
        .await
        .unwrap();
    assert_eq!(ws.role, "admin");

    let role = require_workspace_role(&pool, false, &ws.id, &owner, None)
        .await
        .unwrap();
    assert_eq!(role, "admin");

    // A non-member is denied before any data access.
    let outsider = register(&pool, "outsider@local").await;
    let err = require_workspace_role(&pool, false, &ws.id, &outsider, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "forbidden");

    // Holding a role is not the same as holding the required one.
    workspace::add_member(&pool, &ws.id, "outsider@local", WorkspaceRole::Member)
        .await
        .unwrap();
    let err = require_workspace_role(&pool, false, &ws.id, &outsider, Some(WorkspaceRole::Admin))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "forbidden");
}

#[tokio::test]
async fn test_member_management() {
    let pool = memory_pool().await;
    let owner = register(&pool, "owner@local").await;
    register(&pool, "teammate@local").await;
    let ws = workspace::create_workspace(&pool, "Research", &owner)
        .await
        .unwrap();

    let member = workspace::add_member(&pool, &ws.id, "teammate@local", WorkspaceRole::Member)
        .await
        .unwrap();
    assert_eq!(member.role, "member");

    // Adding twice is a validation error, not an upsert.
    let err = workspace::add_member(&pool, &ws.id, "teammate@local", WorkspaceRole::Member)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "validation_error");

    // Unknown email is not found.
    let err = workspace::add_member(&pool, &ws.id, "ghost@local", WorkspaceRole::Member)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_found");

    let members = workspace::list_members(&pool, &ws.id).await.unwrap();
    assert_eq!(members.len(), 2);
    assert_eq!(members[0].email, "owner@local");
}

#[tokio::test]
async fn test_last_admin_guard() {
    let pool = memory_pool().await;
    let owner = register(&pool, "owner@local").await;
    let second = register(&pool, "second@local").await;
    let ws = workspace::create_workspace(&pool, "Research", &owner)
        .await
        .unwrap();

    // Sole admin cannot be demoted or removed.
    let err = workspace::update_member_role(&pool, &ws.id, &owner, WorkspaceRole::Member)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "validation_error");
    let err = workspace::remove_member(&pool, &ws.id, &owner).await.unwrap_err();
    assert_eq!(err.code(), "validation_error");

    // With two admins, either may step down.
    workspace::add_member(&pool, &ws.id, "second@local", WorkspaceRole::Admin)
        .await
        .unwrap();
    workspace::update_member_role(&pool, &ws.id, &owner, WorkspaceRole::Member)
        .await
        .unwrap();

    // Back to one admin; the guard re-engages.
    let err = workspace::remove_member(&pool, &ws.id, &second).await.unwrap_err();
    assert_eq!(err.code(), "validation_error");

    // A plain member can always be removed.
    workspace::remove_member(&pool, &ws.id, &owner).await.unwrap();
    let members = workspace::list_members(&pool, &ws.id).await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].role, "admin");
}

#[tokio::test]
async fn test_membership_without_user_is_integrity_error() {
    let pool = memory_pool().await;
    let owner = register(&pool, "owner@local").await;
    let ws = workspace::create_workspace(&pool, "Research", &owner)
        .await
        .unwrap();

    // Simulate the breakage: a dangling membership row.
    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(&owner)
        .execute(&pool)
        .await
        .unwrap();

    let err = workspace::list_members(&pool, &ws.id).await.unwrap_err();
    assert_eq!(err.code(), "integrity_error");
}

#[tokio::test]
async fn test_audit_sink_roundtrip() {
    let pool = memory_pool().await;
    let owner = register(&pool, "owner@local").await;
    let ws = workspace::create_workspace(&pool, "Research", &owner)
        .await
        .unwrap();

    let sink = SqlAuditSink::new(pool.clone());
    sink.record(
        &ws.id,
        Some(&owner),
        actions::QUERY,
        serde_json::json!({"question": "what is hidden?", "results": 2}),
    )
    .await;
    sink.record(
        &ws.id,
        Some(&owner),
        actions::INGEST_DEMO,
        serde_json::json!({"documents": 3, "chunks": 9}),
    )
    .await;
    // Invalid workspace id: dropped, never an error.
    sink.record("not-a-uuid", Some(&owner), actions::QUERY, serde_json::json!({}))
        .await;

    let events = list_events(&pool, &ws.id, 50).await.unwrap();
    assert_eq!(events.len(), 2);
    // Newest first.
    assert_eq!(events[0].action, "ingest_demo");
    assert_eq!(events[1].action, "query");
    assert_eq!(events[1].payload["question"], REDACTED_PLACEHOLDER);
    assert_eq!(events[1].payload["results"], 2);
    assert_eq!(events[1].payload["outcome"], "success");
    assert_eq!(events[1].user_id.as_deref(), Some(owner.as_str()));
}

#[tokio::test]
async fn test_audit_limit_clamped() {
    let pool = memory_pool().await;
    let owner = register(&pool, "owner@local").await;
    let ws = workspace::create_workspace(&pool, "Research", &owner)
        .await
        .unwrap();
    let sink = SqlAuditSink::new(pool.clone());
    for _ in 0..5 {
        sink.record(&ws.id, None, actions::QUERY, serde_json::json!({}))
            .await;
    }

    // limit 0 clamps to 1.
    let events = list_events(&pool, &ws.id, 0).await.unwrap();
    assert_eq!(events.len(), 1);

    let err = list_events(&pool, "not-a-uuid", 10).await.unwrap_err();
    assert_eq!(err.code(), "validation_error");
}
