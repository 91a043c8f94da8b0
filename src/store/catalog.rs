//! Catalogue table operations, parameterised by artifact kind.
//!
//! Table names come from [`ArtifactKind::table`] (compile-time constants);
//! every other value is bound. Queries use the runtime-checked sqlx API so
//! one method body serves all three kind tables.

use chrono::{DateTime, Utc};
use sqlx::{Executor, FromRow, Postgres};

use crate::error::{AppError, Result};
use crate::models::{ArtifactDescriptor, ArtifactKind, ArtifactStatus, OfficialMeta, StoredVersion};

use super::cursor::Cursor;
use super::{Store, Tx};

/// Filter options for [`Store::list_versions`].
#[derive(Debug, Clone, Default)]
pub struct VersionFilter {
    /// Case-insensitive substring match on name or description.
    pub search: Option<String>,
    /// Exact version match.
    pub version: Option<String>,
    /// Only rows updated at or after this instant.
    pub updated_since: Option<DateTime<Utc>>,
    /// Exact remote URL claim match.
    pub remote_url: Option<String>,
}

/// One page of catalogue rows plus the continuation cursor.
#[derive(Debug, Clone)]
pub struct VersionPage {
    pub items: Vec<StoredVersion>,
    pub next_cursor: Option<String>,
}

/// Raw catalogue row; `value` is the stored descriptor document.
#[derive(Debug, FromRow)]
struct VersionRow {
    name: String,
    version: String,
    status: String,
    published_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    is_latest: bool,
    value: serde_json::Value,
}

impl VersionRow {
    fn into_stored(self, kind: ArtifactKind) -> Result<StoredVersion> {
        let mut descriptor: ArtifactDescriptor = serde_json::from_value(self.value)?;
        // The key columns are authoritative over whatever the document says.
        descriptor.name = self.name;
        descriptor.version = self.version;
        Ok(StoredVersion {
            kind,
            descriptor,
            meta: OfficialMeta {
                status: ArtifactStatus::parse(&self.status)?,
                published_at: self.published_at,
                updated_at: self.updated_at,
                is_latest: self.is_latest,
            },
        })
    }
}

const VERSION_COLUMNS: &str = "name, version, status, published_at, updated_at, is_latest, value";

fn remote_claim(url: &str) -> serde_json::Value {
    serde_json::json!([{ "url": url }])
}

async fn list_on<'e, E>(
    exec: E,
    kind: ArtifactKind,
    filter: &VersionFilter,
    cursor: Option<&str>,
    limit: i64,
) -> Result<VersionPage>
where
    E: Executor<'e, Database = Postgres>,
{
    let cursor = cursor.filter(|c| !c.is_empty()).map(Cursor::decode).transpose()?;
    let (cursor_ts, cursor_name, cursor_version) = match &cursor {
        Some(c) => (Some(c.updated_at), c.name.as_str(), c.version.as_str()),
        None => (None, "", ""),
    };

    let sql = format!(
        r#"
        SELECT {VERSION_COLUMNS}
        FROM {table}
        WHERE ($1::text IS NULL OR name ILIKE '%' || $1 || '%' OR value->>'description' ILIKE '%' || $1 || '%')
          AND ($2::text IS NULL OR version = $2)
          AND ($3::timestamptz IS NULL OR updated_at >= $3)
          AND ($4::jsonb IS NULL OR value->'remotes' @> $4)
          AND ($5::timestamptz IS NULL
               OR updated_at < $5
               OR (updated_at = $5 AND (name, version) > ($6, $7)))
        ORDER BY updated_at DESC, name ASC, version ASC
        LIMIT $8
        "#,
        table = kind.table(),
    );

    // Fetch one extra row to know whether a next page exists.
    let rows: Vec<VersionRow> = sqlx::query_as(&sql)
        .bind(filter.search.as_deref())
        .bind(filter.version.as_deref())
        .bind(filter.updated_since)
        .bind(filter.remote_url.as_deref().map(remote_claim))
        .bind(cursor_ts)
        .bind(cursor_name)
        .bind(cursor_version)
        .bind(limit + 1)
        .fetch_all(exec)
        .await?;

    let has_more = rows.len() as i64 > limit;
    let mut items = Vec::with_capacity(rows.len().min(limit as usize));
    for row in rows.into_iter().take(limit as usize) {
        items.push(row.into_stored(kind)?);
    }

    let next_cursor = if has_more {
        items.last().map(|last| {
            Cursor {
                updated_at: last.meta.updated_at,
                name: last.descriptor.name.clone(),
                version: last.descriptor.version.clone(),
            }
            .encode()
        })
    } else {
        None
    };

    Ok(VersionPage { items, next_cursor })
}

async fn get_on<'e, E>(
    exec: E,
    kind: ArtifactKind,
    name: &str,
    version: &str,
) -> Result<StoredVersion>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!(
        "SELECT {VERSION_COLUMNS} FROM {table} WHERE name = $1 AND version = $2",
        table = kind.table(),
    );
    let row: Option<VersionRow> = sqlx::query_as(&sql)
        .bind(name)
        .bind(version)
        .fetch_optional(exec)
        .await?;

    row.ok_or_else(|| AppError::NotFound(format!("{kind} {name} version {version} not found")))?
        .into_stored(kind)
}

async fn get_latest_on<'e, E>(exec: E, kind: ArtifactKind, name: &str) -> Result<StoredVersion>
where
    E: Executor<'e, Database = Postgres>,
{
    let sql = format!(
        "SELECT {VERSION_COLUMNS} FROM {table} WHERE name = $1 AND is_latest",
        table = kind.table(),
    );
    let row: Option<VersionRow> = sqlx::query_as(&sql).bind(name).fetch_optional(exec).await?;

    row.ok_or_else(|| AppError::NotFound(format!("{kind} {name} not found")))?
        .into_stored(kind)
}

impl Store {
    // ── Reads (pool) ─────────────────────────────────────────────────────

    pub async fn list_versions(
        &self,
        kind: ArtifactKind,
        filter: &VersionFilter,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<VersionPage> {
        list_on(self.pool(), kind, filter, cursor, limit).await
    }

    pub async fn get_version(
        &self,
        kind: ArtifactKind,
        name: &str,
        version: &str,
    ) -> Result<StoredVersion> {
        get_on(self.pool(), kind, name, version).await
    }

    pub async fn get_latest(&self, kind: ArtifactKind, name: &str) -> Result<StoredVersion> {
        get_latest_on(self.pool(), kind, name).await
    }

    pub async fn get_all_versions(
        &self,
        kind: ArtifactKind,
        name: &str,
    ) -> Result<Vec<StoredVersion>> {
        let sql = format!(
            "SELECT {VERSION_COLUMNS} FROM {table} WHERE name = $1 ORDER BY published_at DESC, version ASC",
            table = kind.table(),
        );
        let rows: Vec<VersionRow> = sqlx::query_as(&sql)
            .bind(name)
            .fetch_all(self.pool())
            .await?;

        if rows.is_empty() {
            return Err(AppError::NotFound(format!("{kind} {name} not found")));
        }

        rows.into_iter().map(|r| r.into_stored(kind)).collect()
    }

    // ── Transactional catalogue writes ───────────────────────────────────

    /// Acquire the per-name advisory lock. Transaction-scoped: released on
    /// commit or rollback. Blocks while another writer holds the same name.
    pub async fn acquire_publish_lock(
        &self,
        tx: &mut Tx,
        kind: ArtifactKind,
        name: &str,
    ) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("{}:{name}", kind.table()))
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn list_versions_tx(
        &self,
        tx: &mut Tx,
        kind: ArtifactKind,
        filter: &VersionFilter,
        cursor: Option<&str>,
        limit: i64,
    ) -> Result<VersionPage> {
        list_on(&mut **tx, kind, filter, cursor, limit).await
    }

    pub async fn get_version_tx(
        &self,
        tx: &mut Tx,
        kind: ArtifactKind,
        name: &str,
        version: &str,
    ) -> Result<StoredVersion> {
        get_on(&mut **tx, kind, name, version).await
    }

    pub async fn count_versions(
        &self,
        tx: &mut Tx,
        kind: ArtifactKind,
        name: &str,
    ) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {table} WHERE name = $1",
            table = kind.table(),
        );
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(name)
            .fetch_one(&mut **tx)
            .await?;
        Ok(count)
    }

    pub async fn version_exists(
        &self,
        tx: &mut Tx,
        kind: ArtifactKind,
        name: &str,
        version: &str,
    ) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {table} WHERE name = $1 AND version = $2)",
            table = kind.table(),
        );
        let exists: bool = sqlx::query_scalar(&sql)
            .bind(name)
            .bind(version)
            .fetch_one(&mut **tx)
            .await?;
        Ok(exists)
    }

    /// Current latest row for a name, or None when the name is unpublished.
    pub async fn get_current_latest(
        &self,
        tx: &mut Tx,
        kind: ArtifactKind,
        name: &str,
    ) -> Result<Option<StoredVersion>> {
        match get_latest_on(&mut **tx, kind, name).await {
            Ok(v) => Ok(Some(v)),
            Err(AppError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn unmark_latest(&self, tx: &mut Tx, kind: ArtifactKind, name: &str) -> Result<()> {
        let sql = format!(
            "UPDATE {table} SET is_latest = FALSE WHERE name = $1 AND is_latest",
            table = kind.table(),
        );
        sqlx::query(&sql).bind(name).execute(&mut **tx).await?;
        Ok(())
    }

    /// Insert a new version row. Must be called with the advisory lock for
    /// `descriptor.name` already held by this transaction.
    pub async fn create_version(
        &self,
        tx: &mut Tx,
        kind: ArtifactKind,
        descriptor: &ArtifactDescriptor,
        meta: &OfficialMeta,
    ) -> Result<StoredVersion> {
        let sql = format!(
            r#"
            INSERT INTO {table} (name, version, status, published_at, updated_at, is_latest, value)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {VERSION_COLUMNS}
            "#,
            table = kind.table(),
        );
        let row: VersionRow = sqlx::query_as(&sql)
            .bind(&descriptor.name)
            .bind(&descriptor.version)
            .bind(meta.status.as_str())
            .bind(meta.published_at)
            .bind(meta.updated_at)
            .bind(meta.is_latest)
            .bind(serde_json::to_value(descriptor)?)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    AppError::InvalidVersion(format!(
                        "{} version {} already exists for {}",
                        kind, descriptor.version, descriptor.name
                    ))
                }
                sqlx::Error::Database(db) if db.is_check_violation() => {
                    AppError::ValidationFailed(format!(
                        "descriptor violates schema constraints: {}",
                        db.message()
                    ))
                }
                _ => AppError::Sqlx(e),
            })?;
        row.into_stored(kind)
    }

    pub async fn update_version(
        &self,
        tx: &mut Tx,
        kind: ArtifactKind,
        name: &str,
        version: &str,
        descriptor: &ArtifactDescriptor,
    ) -> Result<StoredVersion> {
        let sql = format!(
            r#"
            UPDATE {table} SET value = $3, updated_at = now()
            WHERE name = $1 AND version = $2
            RETURNING {VERSION_COLUMNS}
            "#,
            table = kind.table(),
        );
        let row: Option<VersionRow> = sqlx::query_as(&sql)
            .bind(name)
            .bind(version)
            .bind(serde_json::to_value(descriptor)?)
            .fetch_optional(&mut **tx)
            .await?;

        row.ok_or_else(|| AppError::NotFound(format!("{kind} {name} version {version} not found")))?
            .into_stored(kind)
    }

    pub async fn set_status(
        &self,
        tx: &mut Tx,
        kind: ArtifactKind,
        name: &str,
        version: &str,
        status: ArtifactStatus,
    ) -> Result<StoredVersion> {
        let sql = format!(
            r#"
            UPDATE {table} SET status = $3, updated_at = now()
            WHERE name = $1 AND version = $2
            RETURNING {VERSION_COLUMNS}
            "#,
            table = kind.table(),
        );
        let row: Option<VersionRow> = sqlx::query_as(&sql)
            .bind(name)
            .bind(version)
            .bind(status.as_str())
            .fetch_optional(&mut **tx)
            .await?;

        row.ok_or_else(|| AppError::NotFound(format!("{kind} {name} version {version} not found")))?
            .into_stored(kind)
    }
}
