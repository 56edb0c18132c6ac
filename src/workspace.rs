//! Users, workspaces, and membership management.
//!
//! Plain service functions over the pool so handlers and tests share one
//! code path. The one non-obvious rule lives here: a workspace must
//! retain at least one `admin` member at all times, checked on every
//! demote and remove.

use serde::Serialize;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use docvault_core::models::WorkspaceRole;
use docvault_core::{Error, Result};

/// Workspace as seen by its member.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceOut {
    pub id: String,
    pub name: String,
    pub role: String,
}

/// Membership row joined with the user's email.
#[derive(Debug, Clone, Serialize)]
pub struct MemberOut {
    pub user_id: String,
    pub email: String,
    pub role: String,
    pub created_at: String,
}

fn store_err(e: sqlx::Error) -> Error {
    Error::Store(e.to_string())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Create a user account. The email must be unique.
pub async fn create_user(pool: &SqlitePool, email: &str, password_hash: &str) -> Result<String> {
    let user_id = Uuid::new_v4().to_string();
    let result = sqlx::query(
        "INSERT INTO users (id, email, password_hash, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(&user_id)
    .bind(email)
    .bind(password_hash)
    .bind(chrono::Utc::now().timestamp())
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(user_id),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Err(Error::validation("Email already registered."))
        }
        Err(e) => Err(store_err(e)),
    }
}

/// Look up `(id, password_hash)` by email.
pub async fn find_user_by_email(
    pool: &SqlitePool,
    email: &str,
) -> Result<Option<(String, String)>> {
    let row = sqlx::query("SELECT id, password_hash FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await
        .map_err(store_err)?;
    Ok(row.map(|r| (r.get("id"), r.get("password_hash"))))
}

/// Create a workspace with `owner` as its first admin.
pub async fn create_workspace(
    pool: &SqlitePool,
    name: &str,
    owner_user_id: &str,
) -> Result<WorkspaceOut> {
    let name = name.trim();
    if name.len() < 2 || name.len() > 80 {
        return Err(Error::validation(
            "Workspace name must be between 2 and 80 characters.",
        ));
    }

    let workspace_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();

    let mut tx = pool.begin().await.map_err(store_err)?;
    sqlx::query("INSERT INTO workspaces (id, name, created_at) VALUES (?, ?, ?)")
        .bind(&workspace_id)
        .bind(name)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;
    sqlx::query(
        "INSERT INTO workspace_members (workspace_id, user_id, role, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(&workspace_id)
    .bind(owner_user_id)
    .bind(WorkspaceRole::Admin.as_str())
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(store_err)?;
    tx.commit().await.map_err(store_err)?;

    Ok(WorkspaceOut {
        id: workspace_id,
        name: name.to_string(),
        role: WorkspaceRole::Admin.as_str().to_string(),
    })
}

/// Workspaces the user belongs to, with their role in each.
pub async fn list_workspaces(pool: &SqlitePool, user_id: &str) -> Result<Vec<WorkspaceOut>> {
    let rows = sqlx::query(
        r#"
        SELECT w.id, w.name, m.role
        FROM workspaces w
        JOIN workspace_members m ON m.workspace_id = w.id
        WHERE m.user_id = ?
        ORDER BY w.created_at ASC, w.rowid ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .map_err(store_err)?;

    Ok(rows
        .iter()
        .map(|r| WorkspaceOut {
            id: r.get("id"),
            name: r.get("name"),
            role: r.get("role"),
        })
        .collect())
}

/// All members of a workspace, oldest membership first.
///
/// A membership row whose user no longer exists is an integrity failure,
/// not a row to skip — a partial member list would silently hide the
/// breakage.
pub async fn list_members(pool: &SqlitePool, workspace_id: &str) -> Result<Vec<MemberOut>> {
    let rows = sqlx::query(
        r#"
        SELECT m.user_id, m.role, m.created_at, u.email
        FROM workspace_members m
        LEFT JOIN users u ON u.id = m.user_id
        WHERE m.workspace_id = ?
        ORDER BY m.created_at ASC, m.rowid ASC
        "#,
    )
    .bind(workspace_id)
    .fetch_all(pool)
    .await
    .map_err(store_err)?;

    rows.iter()
        .map(|r| {
            let email: Option<String> = r.get("email");
            let user_id: String = r.get("user_id");
            let email = email.ok_or_else(|| {
                Error::integrity(format!(
                    "membership references a missing user row: {}",
                    user_id
                ))
            })?;
            let created_at: i64 = r.get("created_at");
            Ok(MemberOut {
                user_id,
                email,
                role: r.get("role"),
                created_at: format_ts_iso(created_at),
            })
        })
        .collect()
}

async fn admin_count(pool: &SqlitePool, workspace_id: &str) -> Result<i64> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM workspace_members WHERE workspace_id = ? AND role = ?",
    )
    .bind(workspace_id)
    .bind(WorkspaceRole::Admin.as_str())
    .fetch_one(pool)
    .await
    .map_err(store_err)
}

async fn member_role(
    pool: &SqlitePool,
    workspace_id: &str,
    user_id: &str,
) -> Result<Option<String>> {
    sqlx::query_scalar(
        "SELECT role FROM workspace_members WHERE workspace_id = ? AND user_id = ?",
    )
    .bind(workspace_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(store_err)
}

/// Add a user (looked up by email) to a workspace.
pub async fn add_member(
    pool: &SqlitePool,
    workspace_id: &str,
    email: &str,
    role: WorkspaceRole,
) -> Result<MemberOut> {
    let user: Option<(String, String)> = {
        let row = sqlx::query("SELECT id, email FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(pool)
            .await
            .map_err(store_err)?;
        row.map(|r| (r.get("id"), r.get("email")))
    };
    let (user_id, email) = user.ok_or_else(|| Error::not_found("User not found."))?;

    if member_role(pool, workspace_id, &user_id).await?.is_some() {
        return Err(Error::validation(
            "User is already a member of this workspace.",
        ));
    }

    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        "INSERT INTO workspace_members (workspace_id, user_id, role, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(workspace_id)
    .bind(&user_id)
    .bind(role.as_str())
    .bind(now)
    .execute(pool)
    .await
    .map_err(store_err)?;

    Ok(MemberOut {
        user_id,
        email,
        role: role.as_str().to_string(),
        created_at: format_ts_iso(now),
    })
}

/// Change a member's role, refusing to demote the last admin.
pub async fn update_member_role(
    pool: &SqlitePool,
    workspace_id: &str,
    user_id: &str,
    new_role: WorkspaceRole,
) -> Result<()> {
    let current = member_role(pool, workspace_id, user_id)
        .await?
        .ok_or_else(|| Error::not_found("Membership not found."))?;

    if current == WorkspaceRole::Admin.as_str()
        && new_role != WorkspaceRole::Admin
        && admin_count(pool, workspace_id).await? <= 1
    {
        return Err(Error::validation(
            "Workspace must retain at least one admin.",
        ));
    }

    sqlx::query("UPDATE workspace_members SET role = ? WHERE workspace_id = ? AND user_id = ?")
        .bind(new_role.as_str())
        .bind(workspace_id)
        .bind(user_id)
        .execute(pool)
        .await
        .map_err(store_err)?;
    Ok(())
}

/// Remove a member, refusing to remove the last admin.
pub async fn remove_member(pool: &SqlitePool, workspace_id: &str, user_id: &str) -> Result<()> {
    let current = member_role(pool, workspace_id, user_id)
        .await?
        .ok_or_else(|| Error::not_found("Membership not found."))?;

    if current == WorkspaceRole::Admin.as_str() && admin_count(pool, workspace_id).await? <= 1 {
        return Err(Error::validation(
            "Workspace must retain at least one admin.",
        ));
    }

    sqlx::query("DELETE FROM workspace_members WHERE workspace_id = ? AND user_id = ?")
        .bind(workspace_id)
        .bind(user_id)
        .execute(pool)
        .await
        .map_err(store_err)?;
    Ok(())
}
