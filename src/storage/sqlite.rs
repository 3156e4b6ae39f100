use super::{BindingKey, LogEntry, SandboxId, SessionId, SessionStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        // Run migrations
        sqlx::migrate!("./migrations/sqlite")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn sandbox_for(&self, key: &BindingKey) -> Result<Option<SandboxId>> {
        let row = sqlx::query(
            "SELECT sandbox_id FROM bindings WHERE session_id = ? AND exercise_id = ?",
        )
        .bind(key.session.as_str())
        .bind(key.exercise.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .and_then(|r| r.get::<Option<String>, _>("sandbox_id"))
            .map(SandboxId::from))
    }

    async fn bind_sandbox(&self, key: &BindingKey, sandbox: &SandboxId) -> Result<()> {
        sqlx::query(
            "INSERT INTO bindings (session_id, exercise_id, sandbox_id, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (session_id, exercise_id)
             DO UPDATE SET sandbox_id = excluded.sandbox_id, updated_at = excluded.updated_at",
        )
        .bind(key.session.as_str())
        .bind(key.exercise.0)
        .bind(sandbox.as_str())
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn last_entry(&self, key: &BindingKey) -> Result<Option<LogEntry>> {
        let row = sqlx::query(
            "SELECT mode, message FROM command_log
             WHERE session_id = ? AND exercise_id = ?
             ORDER BY seq DESC LIMIT 1",
        )
        .bind(key.session.as_str())
        .bind(key.exercise.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(LogEntry {
                mode: super::LogMode::from_str(r.get::<String, _>("mode").as_str())?,
                message: r.get("message"),
            })
        })
        .transpose()
    }

    async fn append_entry(&self, key: &BindingKey, entry: LogEntry) -> Result<()> {
        // Single statement keeps the seq allocation atomic per key
        sqlx::query(
            "INSERT INTO command_log (session_id, exercise_id, seq, mode, message, created_at)
             SELECT ?, ?, COALESCE(MAX(seq) + 1, 0), ?, ?, ?
             FROM command_log WHERE session_id = ? AND exercise_id = ?",
        )
        .bind(key.session.as_str())
        .bind(key.exercise.0)
        .bind(entry.mode.as_str())
        .bind(&entry.message)
        .bind(Utc::now())
        .bind(key.session.as_str())
        .bind(key.exercise.0)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn entries(&self, key: &BindingKey) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query(
            "SELECT mode, message FROM command_log
             WHERE session_id = ? AND exercise_id = ?
             ORDER BY seq ASC",
        )
        .bind(key.session.as_str())
        .bind(key.exercise.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(LogEntry {
                    mode: super::LogMode::from_str(r.get::<String, _>("mode").as_str())?,
                    message: r.get("message"),
                })
            })
            .collect()
    }

    async fn remove_binding(&self, key: &BindingKey) -> Result<()> {
        sqlx::query("DELETE FROM command_log WHERE session_id = ? AND exercise_id = ?")
            .bind(key.session.as_str())
            .bind(key.exercise.0)
            .execute(&self.pool)
            .await?;

        sqlx::query("DELETE FROM bindings WHERE session_id = ? AND exercise_id = ?")
            .bind(key.session.as_str())
            .bind(key.exercise.0)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn session_bindings(&self, session: &SessionId) -> Result<Vec<BindingKey>> {
        let rows = sqlx::query("SELECT exercise_id FROM bindings WHERE session_id = ?")
            .bind(session.as_str())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| BindingKey {
                session: session.clone(),
                exercise: super::ExerciseId(r.get("exercise_id")),
            })
            .collect())
    }
}
