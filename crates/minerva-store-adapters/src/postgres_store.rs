use async_trait::async_trait;
use chrono::{DateTime, Utc};
use minerva_contract::{
    LogLevel, LogRecord, Report, ResearchTask, TaskListPage, TaskListQuery, TaskReader,
    TaskStatus, TaskStatusUpdate, TaskStoreError, TaskWriter,
};
use serde_json::Value;

/// Durable task store over PostgreSQL, used as an async document store:
/// full records live in JSONB columns, with the queried fields (status,
/// timestamps) mirrored into indexed columns.
pub struct PostgresTaskStore {
    pool: sqlx::PgPool,
    tasks_table: String,
    reports_table: String,
    logs_table: String,
}

impl PostgresTaskStore {
    /// Create a store using the given pool. Tables are named
    /// `{prefix}_tasks`, `{prefix}_reports`, `{prefix}_logs`.
    pub fn new(pool: sqlx::PgPool, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            pool,
            tasks_table: format!("{prefix}_tasks"),
            reports_table: format!("{prefix}_reports"),
            logs_table: format!("{prefix}_logs"),
        }
    }

    /// Ensure the storage tables and indexes exist (idempotent).
    pub async fn ensure_tables(&self) -> Result<(), TaskStoreError> {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {tasks} (
                id         TEXT PRIMARY KEY,
                status     TEXT NOT NULL,
                data       JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE INDEX IF NOT EXISTS idx_{tasks}_status
                ON {tasks} (status);
            CREATE INDEX IF NOT EXISTS idx_{tasks}_created
                ON {tasks} (created_at DESC);
            CREATE TABLE IF NOT EXISTS {reports} (
                task_id    TEXT PRIMARY KEY,
                data       JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE INDEX IF NOT EXISTS idx_{reports}_created
                ON {reports} (created_at);
            CREATE TABLE IF NOT EXISTS {logs} (
                seq     BIGSERIAL PRIMARY KEY,
                task_id TEXT NOT NULL,
                level   TEXT NOT NULL,
                message TEXT NOT NULL,
                data    JSONB,
                ts      TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{logs}_task_ts
                ON {logs} (task_id, ts);
            CREATE INDEX IF NOT EXISTS idx_{logs}_level
                ON {logs} (level);
            "#,
            tasks = self.tasks_table,
            reports = self.reports_table,
            logs = self.logs_table,
        );
        sqlx::raw_sql(&sql)
            .execute(&self.pool)
            .await
            .map_err(Self::sql_err)?;
        Ok(())
    }

    fn sql_err(e: sqlx::Error) -> TaskStoreError {
        TaskStoreError::Unavailable(e.to_string())
    }

    fn is_unique_violation(e: &sqlx::Error) -> bool {
        let msg = e.to_string();
        msg.contains("duplicate key") || msg.contains("unique constraint")
    }

    fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, TaskStoreError> {
        serde_json::from_value(value).map_err(|e| TaskStoreError::Serialization(e.to_string()))
    }

    fn encode<T: serde::Serialize>(record: &T) -> Result<Value, TaskStoreError> {
        serde_json::to_value(record).map_err(|e| TaskStoreError::Serialization(e.to_string()))
    }
}

#[async_trait]
impl TaskReader for PostgresTaskStore {
    async fn get_task(&self, id: &str) -> Result<Option<ResearchTask>, TaskStoreError> {
        let sql = format!("SELECT data FROM {} WHERE id = $1", self.tasks_table);
        let row: Option<(Value,)> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::sql_err)?;
        row.map(|(data,)| Self::decode(data)).transpose()
    }

    async fn list_tasks(&self, query: &TaskListQuery) -> Result<TaskListPage, TaskStoreError> {
        let limit = query.limit.clamp(1, 200) as i64;
        let offset = query.offset as i64;
        let status_clause = if query.status.is_some() {
            " WHERE status = $3"
        } else {
            ""
        };

        let count_sql = format!(
            "SELECT COUNT(*)::bigint FROM {}{}",
            self.tasks_table,
            if query.status.is_some() {
                " WHERE status = $1"
            } else {
                ""
            }
        );
        let mut count_q = sqlx::query_scalar::<_, i64>(&count_sql);
        if let Some(status) = query.status {
            count_q = count_q.bind(status.to_string());
        }
        let total = count_q.fetch_one(&self.pool).await.map_err(Self::sql_err)?;

        let data_sql = format!(
            "SELECT data FROM {}{} ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            self.tasks_table, status_clause
        );
        let mut data_q = sqlx::query_as::<_, (Value,)>(&data_sql)
            .bind(limit + 1)
            .bind(offset);
        if let Some(status) = query.status {
            data_q = data_q.bind(status.to_string());
        }
        let rows = data_q.fetch_all(&self.pool).await.map_err(Self::sql_err)?;

        let has_more = rows.len() as i64 > limit;
        let items = rows
            .into_iter()
            .take(limit as usize)
            .map(|(data,)| Self::decode(data))
            .collect::<Result<Vec<ResearchTask>, _>>()?;
        Ok(TaskListPage {
            items,
            total: total as usize,
            has_more,
        })
    }

    async fn get_report(&self, task_id: &str) -> Result<Option<Report>, TaskStoreError> {
        let sql = format!("SELECT data FROM {} WHERE task_id = $1", self.reports_table);
        let row: Option<(Value,)> = sqlx::query_as(&sql)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Self::sql_err)?;
        row.map(|(data,)| Self::decode(data)).transpose()
    }

    async fn list_logs(
        &self,
        task_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<LogRecord>, TaskStoreError> {
        let since_clause = if since.is_some() { " AND ts > $2" } else { "" };
        let sql = format!(
            "SELECT task_id, level, message, data, ts FROM {} \
             WHERE task_id = $1{} ORDER BY ts, seq",
            self.logs_table, since_clause
        );
        let mut q =
            sqlx::query_as::<_, (String, String, String, Option<Value>, DateTime<Utc>)>(&sql)
                .bind(task_id);
        if let Some(since) = since {
            q = q.bind(since);
        }
        let rows = q.fetch_all(&self.pool).await.map_err(Self::sql_err)?;

        rows.into_iter()
            .map(|(task_id, level, message, data, timestamp)| {
                let level: LogLevel =
                    serde_json::from_value(Value::String(level))
                        .map_err(|e| TaskStoreError::Serialization(e.to_string()))?;
                Ok(LogRecord {
                    task_id,
                    level,
                    message,
                    timestamp,
                    data,
                })
            })
            .collect()
    }
}

#[async_trait]
impl TaskWriter for PostgresTaskStore {
    async fn create_task(&self, task: &ResearchTask) -> Result<(), TaskStoreError> {
        let data = Self::encode(task)?;
        let sql = format!(
            "INSERT INTO {} (id, status, data, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5)",
            self.tasks_table
        );
        sqlx::query(&sql)
            .bind(&task.id)
            .bind(task.status.to_string())
            .bind(&data)
            .bind(task.created_at)
            .bind(task.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if Self::is_unique_violation(&e) {
                    TaskStoreError::AlreadyExists
                } else {
                    Self::sql_err(e)
                }
            })?;
        Ok(())
    }

    async fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        extras: TaskStatusUpdate,
    ) -> Result<(), TaskStoreError> {
        let mut tx = self.pool.begin().await.map_err(Self::sql_err)?;

        // Lock the row for atomic read-modify-write.
        let sql = format!(
            "SELECT data FROM {} WHERE id = $1 FOR UPDATE",
            self.tasks_table
        );
        let row: Option<(Value,)> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(Self::sql_err)?;
        let Some((data,)) = row else {
            return Err(TaskStoreError::NotFound(id.to_string()));
        };

        let mut task: ResearchTask = Self::decode(data)?;
        extras.apply(&mut task, status);

        let update_sql = format!(
            "UPDATE {} SET status = $1, data = $2, updated_at = $3 WHERE id = $4",
            self.tasks_table
        );
        sqlx::query(&update_sql)
            .bind(task.status.to_string())
            .bind(Self::encode(&task)?)
            .bind(task.updated_at)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Self::sql_err)?;

        tx.commit().await.map_err(Self::sql_err)?;
        Ok(())
    }

    async fn create_report(&self, report: &Report) -> Result<(), TaskStoreError> {
        let sql = format!(
            "INSERT INTO {} (task_id, data, created_at) VALUES ($1, $2, $3)",
            self.reports_table
        );
        sqlx::query(&sql)
            .bind(&report.task_id)
            .bind(Self::encode(report)?)
            .bind(report.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if Self::is_unique_violation(&e) {
                    TaskStoreError::AlreadyExists
                } else {
                    Self::sql_err(e)
                }
            })?;
        Ok(())
    }

    async fn append_log(
        &self,
        task_id: &str,
        level: LogLevel,
        message: &str,
        data: Option<Value>,
    ) -> Result<(), TaskStoreError> {
        let sql = format!(
            "INSERT INTO {} (task_id, level, message, data, ts) VALUES ($1, $2, $3, $4, $5)",
            self.logs_table
        );
        sqlx::query(&sql)
            .bind(task_id)
            .bind(level.to_string())
            .bind(message)
            .bind(data)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(Self::sql_err)?;
        Ok(())
    }
}
