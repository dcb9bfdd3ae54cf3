//! PostgreSQL-backed store implementations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::types::{
    EntityType, FieldMap, ImportRun, ImportRunStatus, RunProgress, RunSummary,
};

use super::{MatchQuery, MatchScope, RecordStore, RecordTx, RunStore, StoreError, StoredRecord};

// ==========================================================================
// Record store
// ==========================================================================

#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn begin(&self) -> Result<Box<dyn RecordTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

struct PgTx {
    tx: sqlx::Transaction<'static, Postgres>,
}

fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<StoredRecord, StoreError> {
    let entity_raw: String = row.try_get("entity_type").map_err(StoreError::from)?;
    let entity_type = EntityType::parse(&entity_raw)
        .ok_or_else(|| StoreError::Query(format!("unknown entity type '{entity_raw}'")))?;
    let fields: Json<FieldMap> = row.try_get("fields").map_err(StoreError::from)?;
    Ok(StoredRecord {
        id: row.try_get("id").map_err(StoreError::from)?,
        owner_id: row.try_get("owner_id").map_err(StoreError::from)?,
        entity_type,
        fields: fields.0,
        archived: row.try_get("archived").map_err(StoreError::from)?,
        created_at: row.try_get("created_at").map_err(StoreError::from)?,
    })
}

#[async_trait]
impl RecordTx for PgTx {
    async fn find_match(&mut self, query: &MatchQuery) -> Result<Option<StoredRecord>, StoreError> {
        if query.any_of.is_empty() {
            return Ok(None);
        }

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT id, owner_id, entity_type, fields, archived, created_at \
             FROM crm_records WHERE owner_id = ",
        );
        qb.push_bind(query.owner_id);
        qb.push(" AND entity_type = ");
        qb.push_bind(query.entity_type.as_str());

        match query.scope {
            MatchScope::Any => {}
            MatchScope::ActiveOnly => {
                qb.push(" AND archived = FALSE");
            }
            MatchScope::OpenOrCreatedSince(since) => {
                qb.push(" AND (COALESCE((fields->>'done')::boolean, FALSE) = FALSE OR created_at >= ");
                qb.push_bind(since);
                qb.push(")");
            }
        }

        qb.push(" AND (");
        for (i, (field, value)) in query.any_of.iter().enumerate() {
            if i > 0 {
                qb.push(" OR ");
            }
            qb.push("fields -> ");
            qb.push_bind(field.as_str());
            qb.push(" = ");
            qb.push_bind(Json(value.clone()));
        }
        qb.push(") LIMIT 1");

        let row = qb.build().fetch_optional(&mut *self.tx).await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn create(
        &mut self,
        entity_type: EntityType,
        owner_id: Uuid,
        fields: FieldMap,
    ) -> Result<StoredRecord, StoreError> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO crm_records (id, owner_id, entity_type, fields, archived, created_at, updated_at)
            VALUES ($1, $2, $3, $4, FALSE, $5, $5)
            "#,
        )
        .bind(id)
        .bind(owner_id)
        .bind(entity_type.as_str())
        .bind(Json(&fields))
        .bind(now)
        .execute(&mut *self.tx)
        .await?;

        Ok(StoredRecord {
            id,
            owner_id,
            entity_type,
            fields,
            archived: false,
            created_at: now,
        })
    }

    async fn update(
        &mut self,
        record: &StoredRecord,
        fields: FieldMap,
    ) -> Result<StoredRecord, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE crm_records
            SET fields = fields || $2::jsonb, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(Json(&fields))
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(record.id));
        }

        let mut updated = record.clone();
        updated.fields.extend(fields);
        Ok(updated)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(StoreError::from)
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await.map_err(StoreError::from)
    }
}

// ==========================================================================
// Run store
// ==========================================================================

#[derive(Clone)]
pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn run_from_row(row: &sqlx::postgres::PgRow) -> Result<ImportRun, StoreError> {
    let status_raw: String = row.try_get("status").map_err(StoreError::from)?;
    let status = ImportRunStatus::parse(&status_raw)
        .ok_or_else(|| StoreError::Query(format!("unknown run status '{status_raw}'")))?;

    let column_mapping: Option<Json<_>> = row.try_get("column_mapping").map_err(StoreError::from)?;
    let error_log: Json<_> = row.try_get("error_log").map_err(StoreError::from)?;
    let entity_stats: Json<_> = row.try_get("entity_stats").map_err(StoreError::from)?;
    let options: Option<Json<_>> = row.try_get("options").map_err(StoreError::from)?;

    Ok(ImportRun {
        id: row.try_get("id").map_err(StoreError::from)?,
        session_id: row.try_get("session_id").map_err(StoreError::from)?,
        owner_id: row.try_get("owner_id").map_err(StoreError::from)?,
        file_path: row.try_get("file_path").map_err(StoreError::from)?,
        file_type: row.try_get("file_type").map_err(StoreError::from)?,
        column_mapping: column_mapping.map(|j| j.0),
        status,
        total_rows: row.try_get::<i32, _>("total_rows").map_err(StoreError::from)? as u32,
        processed_rows: row.try_get::<i32, _>("processed_rows").map_err(StoreError::from)? as u32,
        successful_imports: row
            .try_get::<i32, _>("successful_imports")
            .map_err(StoreError::from)? as u32,
        failed_imports: row.try_get::<i32, _>("failed_imports").map_err(StoreError::from)? as u32,
        duplicates_skipped: row
            .try_get::<i32, _>("duplicates_skipped")
            .map_err(StoreError::from)? as u32,
        progress: row.try_get::<i32, _>("progress").map_err(StoreError::from)? as u32,
        error_log: error_log.0,
        entity_stats: entity_stats.0,
        options: options.map(|j| j.0),
        error_report_path: row.try_get("error_report_path").map_err(StoreError::from)?,
        failure_reason: row.try_get("failure_reason").map_err(StoreError::from)?,
        started_at: row
            .try_get::<Option<DateTime<Utc>>, _>("started_at")
            .map_err(StoreError::from)?,
        finished_at: row
            .try_get::<Option<DateTime<Utc>>, _>("finished_at")
            .map_err(StoreError::from)?,
    })
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn load(&self, session_id: &str) -> Result<Option<ImportRun>, StoreError> {
        let row = sqlx::query("SELECT * FROM import_runs WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn mark_importing(&self, run_id: Uuid, total_rows: u32) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE import_runs
            SET status = 'importing', total_rows = $2, started_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(total_rows as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_progress(&self, run_id: Uuid, progress: &RunProgress) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE import_runs
            SET processed_rows = $2,
                successful_imports = $3,
                failed_imports = $4,
                duplicates_skipped = $5,
                progress = $6,
                error_log = $7,
                entity_stats = $8,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(progress.processed_rows as i32)
        .bind(progress.successful_imports as i32)
        .bind(progress.failed_imports as i32)
        .bind(progress.duplicates_skipped as i32)
        .bind(progress.percent() as i32)
        .bind(Json(&progress.error_log))
        .bind(Json(&progress.entity_stats))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_completed(&self, run_id: Uuid, summary: &RunSummary) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE import_runs
            SET status = 'completed',
                processed_rows = $2,
                successful_imports = $3,
                failed_imports = $4,
                duplicates_skipped = $5,
                entity_stats = $6,
                error_report_path = $7,
                progress = 100,
                finished_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(summary.processed_rows as i32)
        .bind(summary.successful_imports as i32)
        .bind(summary.failed_imports as i32)
        .bind(summary.duplicates_skipped as i32)
        .bind(Json(&summary.entity_stats))
        .bind(summary.error_report_path.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, run_id: Uuid, reason: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE import_runs
            SET status = 'failed', failure_reason = $2, finished_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
