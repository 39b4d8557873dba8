use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use mailward_core::{
    AuthResult, AuthStatus, EmailEvent, EmailStatus, NewEmailEvent, SandboxReport,
};

use crate::config::PostgresConfig;
use crate::error::StoreError;
use crate::store::{EventStore, IntentUpdate};

/// PostgreSQL-backed implementation of [`EventStore`].
///
/// Uses `sqlx::PgPool` for connection pooling. Enumerated columns use
/// provider-native enum types (`email_status_enum`, `risk_tier_enum`); the
/// unique index on `message_id` is what enforces the dedup invariant.
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Connect to `PostgreSQL`, create the connection pool, and run
    /// migrations to ensure the required types and tables exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if pool creation fails, or
    /// [`StoreError::Backend`] if migrations fail.
    pub async fn new(config: &PostgresConfig) -> Result<Self, StoreError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect(&config.url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        run_migrations(&pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Create a store from an existing pool. Runs migrations on creation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if migrations fail.
    pub async fn from_pool(pool: PgPool) -> Result<Self, StoreError> {
        run_migrations(&pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self { pool })
    }

    fn map_row(row: &PgRow) -> Result<EmailEvent, StoreError> {
        let backend = |e: sqlx::Error| StoreError::Backend(e.to_string());

        let status: String = row.try_get("status_text").map_err(backend)?;
        let status = parse_status(&status)?;

        let risk_tier: Option<String> = row.try_get("risk_tier_text").map_err(backend)?;
        let risk_tier = risk_tier
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(StoreError::Serialization)?;

        let risk_score: Option<i32> = row.try_get("risk_score").map_err(backend)?;
        let risk_score = risk_score
            .map(u8::try_from)
            .transpose()
            .map_err(|e| StoreError::Serialization(format!("risk_score out of range: {e}")))?;

        let intent: Option<String> = row.try_get("intent").map_err(backend)?;
        let intent = intent
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(StoreError::Serialization)?;

        let intent_indicators: Option<serde_json::Value> =
            row.try_get("intent_indicators").map_err(backend)?;
        let intent_indicators = intent_indicators
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        Ok(EmailEvent {
            id: row.try_get("id").map_err(backend)?,
            user_id: row.try_get("user_id").map_err(backend)?,
            sender: row.try_get("sender").map_err(backend)?,
            recipient: row.try_get("recipient").map_err(backend)?,
            subject: row.try_get("subject").map_err(backend)?,
            message_id: row.try_get("message_id").map_err(backend)?,
            body_preview: row.try_get("body_preview").map_err(backend)?,
            received_at: row.try_get("received_at").map_err(backend)?,
            auth_status: AuthStatus {
                spf: parse_auth(row.try_get("spf_status").map_err(backend)?),
                dkim: parse_auth(row.try_get("dkim_status").map_err(backend)?),
                dmarc: parse_auth(row.try_get("dmarc_status").map_err(backend)?),
            },
            sender_ip: row.try_get("sender_ip").map_err(backend)?,
            status,
            risk_score,
            risk_tier,
            intent,
            intent_confidence: row.try_get("intent_confidence").map_err(backend)?,
            intent_indicators,
            intent_processed_at: row.try_get("intent_processed_at").map_err(backend)?,
            sandboxed: row.try_get("sandboxed").map_err(backend)?,
            sandbox_result: row.try_get("sandbox_result").map_err(backend)?,
            created_at: row.try_get("created_at").map_err(backend)?,
            updated_at: row.try_get("updated_at").map_err(backend)?,
        })
    }
}

const SELECT_COLUMNS: &str = "id, user_id, sender, recipient, subject, message_id, body_preview, \
     received_at, spf_status, dkim_status, dmarc_status, sender_ip, \
     status::TEXT AS status_text, risk_score, risk_tier::TEXT AS risk_tier_text, \
     intent, intent_confidence, intent_indicators, intent_processed_at, \
     sandboxed, sandbox_result, created_at, updated_at";

fn parse_status(value: &str) -> Result<EmailStatus, StoreError> {
    match value {
        "PENDING" => Ok(EmailStatus::Pending),
        "PROCESSING" => Ok(EmailStatus::Processing),
        "COMPLETED" => Ok(EmailStatus::Completed),
        "FAILED" => Ok(EmailStatus::Failed),
        "SPAM" => Ok(EmailStatus::Spam),
        other => Err(StoreError::Serialization(format!(
            "unknown email status `{other}`"
        ))),
    }
}

/// Tolerant parse for header-derived auth results; anything unrecognized
/// reads as absent rather than failing the whole row.
fn parse_auth(value: Option<String>) -> Option<AuthResult> {
    match value.as_deref() {
        Some("PASS") => Some(AuthResult::Pass),
        Some("FAIL") => Some(AuthResult::Fail),
        Some("NEUTRAL") => Some(AuthResult::Neutral),
        Some("NONE") => Some(AuthResult::None),
        _ => None,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}

/// Run database migrations, creating required enum types and tables if they
/// do not exist.
///
/// # Errors
///
/// Returns a [`sqlx::Error`] if any DDL statement fails.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    let statements = [
        "DO $$ BEGIN
            CREATE TYPE email_status_enum AS ENUM
                ('PENDING', 'PROCESSING', 'COMPLETED', 'FAILED', 'SPAM');
        EXCEPTION WHEN duplicate_object THEN NULL;
        END $$",
        "DO $$ BEGIN
            CREATE TYPE risk_tier_enum AS ENUM ('SAFE', 'CAUTIOUS', 'THREAT');
        EXCEPTION WHEN duplicate_object THEN NULL;
        END $$",
        "CREATE TABLE IF NOT EXISTS users (
            id UUID PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            refresh_token TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
        "CREATE TABLE IF NOT EXISTS email_events (
            id UUID PRIMARY KEY,
            user_id UUID NOT NULL REFERENCES users (id),
            sender TEXT NOT NULL,
            recipient TEXT NOT NULL,
            subject TEXT NOT NULL,
            message_id TEXT NOT NULL,
            body_preview TEXT NOT NULL DEFAULT '',
            received_at TIMESTAMPTZ,
            spf_status TEXT,
            dkim_status TEXT,
            dmarc_status TEXT,
            sender_ip TEXT,
            status email_status_enum NOT NULL DEFAULT 'PROCESSING',
            risk_score INTEGER,
            risk_tier risk_tier_enum,
            intent TEXT,
            intent_confidence DOUBLE PRECISION,
            intent_indicators JSONB,
            intent_processed_at TIMESTAMPTZ,
            sandboxed BOOLEAN NOT NULL DEFAULT FALSE,
            sandbox_result JSONB,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
        "CREATE UNIQUE INDEX IF NOT EXISTS email_events_message_id_key
            ON email_events (message_id)",
        "CREATE INDEX IF NOT EXISTS email_events_user_id_idx
            ON email_events (user_id)",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn insert(&self, event: NewEmailEvent) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO email_events \
                (id, user_id, sender, recipient, subject, message_id, body_preview, \
                 received_at, spf_status, dkim_status, dmarc_status, sender_ip, \
                 status, sandboxed) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, \
                     'PROCESSING', $13)",
        )
        .bind(event.id)
        .bind(event.user_id)
        .bind(&event.sender)
        .bind(&event.recipient)
        .bind(&event.subject)
        .bind(&event.message_id)
        .bind(&event.body_preview)
        .bind(event.received_at)
        .bind(event.auth_status.spf.map(AuthResult::as_str))
        .bind(event.auth_status.dkim.map(AuthResult::as_str))
        .bind(event.auth_status.dmarc.map(AuthResult::as_str))
        .bind(&event.sender_ip)
        .bind(event.sandboxed)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                Err(StoreError::DuplicateMessageId(event.message_id))
            }
            Err(e) => Err(StoreError::Backend(e.to_string())),
        }
    }

    async fn find_by_provider_id(&self, message_id: &str) -> Result<Option<Uuid>, StoreError> {
        let row: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM email_events WHERE message_id = $1")
                .bind(message_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(row.map(|(id,)| id))
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<EmailEvent>, StoreError> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM email_events WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn record_intent(&self, id: Uuid, update: &IntentUpdate) -> Result<bool, StoreError> {
        let indicators = serde_json::to_value(&update.indicators)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            "UPDATE email_events SET \
                intent = $2, intent_confidence = $3, intent_indicators = $4, \
                intent_processed_at = $5, risk_score = $6, \
                risk_tier = $7::risk_tier_enum, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(update.intent.as_str())
        .bind(update.confidence)
        .bind(indicators)
        .bind(update.processed_at)
        .bind(i32::from(update.risk_score))
        .bind(update.risk_tier.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_sandbox(&self, id: Uuid, report: &SandboxReport) -> Result<bool, StoreError> {
        let report_json = serde_json::to_value(report)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            "UPDATE email_events SET sandbox_result = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(report_json)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_status(&self, id: Uuid, status: EmailStatus) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE email_events SET status = $2::email_status_enum, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete(&self, id: Uuid) -> Result<Option<String>, StoreError> {
        let row: Option<(String,)> = sqlx::query_as(
            "UPDATE email_events SET status = 'COMPLETED', updated_at = NOW() \
             WHERE id = $1 RETURNING message_id",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(row.map(|(message_id,)| message_id))
    }
}
