//! Application state for DocSign API

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use docsign_core::{
    AuditRenderer, Collaborators, Contact, Engine, InMemoryDirectory, InMemoryLedger,
    InMemoryStore, Notifier, OsCodeGenerator, Package, PackageStore, QuotaLedger, SystemClock,
    TracingSink,
};
use shared_types::{InitiatorId, PackageId};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::config::ApiConfig;

pub struct AppState {
    pub db: SqlitePool,
    pub engine: Engine,
    pub directory: Arc<InMemoryDirectory>,
    pub ledger: Arc<InMemoryLedger>,
    pub store: Arc<InMemoryStore>,
    pub config: ApiConfig,
    /// Initiators that already received their starting credits
    seen: Mutex<HashSet<InitiatorId>>,
}

impl AppState {
    pub async fn new(config: ApiConfig) -> Result<Self> {
        Self::with_notifier(config, Arc::new(TracingSink)).await
    }

    /// Build with a custom delivery sink; the audit renderer is the same sink
    pub async fn with_notifier<N>(config: ApiConfig, notifier: Arc<N>) -> Result<Self>
    where
        N: Notifier + AuditRenderer + 'static,
    {
        tracing::info!("Connecting to database: {}", config.database_url);
        if config.api_key.is_none() {
            tracing::warn!("DOCSIGN_API_KEY not configured - operator endpoints are unprotected!");
        }

        // Every connection to `sqlite::memory:` opens its own database, so
        // keep exactly one alive for the life of the pool
        let pool = if config.database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        }
        .connect(&config.database_url)
        .await?;

        Self::run_migrations(&pool).await?;

        let store = Arc::new(InMemoryStore::new());
        let restored = Self::rehydrate(&pool, store.as_ref()).await?;
        tracing::info!("Restored {} packages", restored);

        let directory = Arc::new(InMemoryDirectory::new());
        let contacts = Self::rehydrate_contacts(&pool, directory.as_ref()).await?;
        let ledger = Arc::new(InMemoryLedger::new());
        let seen = Self::rehydrate_balances(&pool, ledger.as_ref()).await?;
        tracing::info!(
            "Restored {} contacts and {} credit balances",
            contacts,
            seen.len()
        );
        let engine = Engine::new(
            config.engine.clone(),
            Collaborators {
                directory: directory.clone(),
                ledger: ledger.clone(),
                store: store.clone(),
                notifier: notifier.clone(),
                renderer: notifier,
                clock: Arc::new(SystemClock),
                codes: Arc::new(OsCodeGenerator),
            },
        );

        Ok(Self {
            db: pool,
            engine,
            directory,
            ledger,
            store,
            config,
            seen: Mutex::new(seen),
        })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        tracing::info!("Running database migrations...");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS packages (
                id TEXT PRIMARY KEY,
                initiator_id TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                version INTEGER NOT NULL,
                body_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                storage_key TEXT PRIMARY KEY,
                sha256 TEXT NOT NULL,
                pdf_data BLOB NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS contacts (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                body_json TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credit_balances (
                initiator_id TEXT PRIMARY KEY,
                balance INTEGER NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(pool)
        .await?;

        // Index for fast lookups
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_packages_status ON packages(status)
            "#,
        )
        .execute(pool)
        .await?;

        tracing::info!("Migrations complete");
        Ok(())
    }

    /// Load every stored package into the engine's store
    async fn rehydrate(pool: &SqlitePool, store: &InMemoryStore) -> Result<usize> {
        let rows = sqlx::query("SELECT id, body_json FROM packages")
            .fetch_all(pool)
            .await?;

        let mut restored = 0;
        for row in rows {
            let id: String = row.try_get("id")?;
            let body: String = row.try_get("body_json")?;
            let package: Package = match serde_json::from_str(&body) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(package_id = %id, error = %e, "skipping unreadable package row");
                    continue;
                }
            };
            if let Err(e) = store.save(&package, None) {
                tracing::warn!(package_id = %id, error = %e, "skipping package row");
                continue;
            }
            restored += 1;
        }
        Ok(restored)
    }

    async fn rehydrate_contacts(pool: &SqlitePool, directory: &InMemoryDirectory) -> Result<usize> {
        let rows = sqlx::query("SELECT id, body_json FROM contacts")
            .fetch_all(pool)
            .await?;

        let mut restored = 0;
        for row in rows {
            let id: String = row.try_get("id")?;
            let body: String = row.try_get("body_json")?;
            match serde_json::from_str::<Contact>(&body) {
                Ok(contact) => {
                    directory.upsert(contact);
                    restored += 1;
                }
                Err(e) => {
                    tracing::warn!(contact_id = %id, error = %e, "skipping unreadable contact row")
                }
            }
        }
        Ok(restored)
    }

    async fn rehydrate_balances(
        pool: &SqlitePool,
        ledger: &InMemoryLedger,
    ) -> Result<HashSet<InitiatorId>> {
        let rows = sqlx::query("SELECT initiator_id, balance FROM credit_balances")
            .fetch_all(pool)
            .await?;

        let mut seen = HashSet::new();
        for row in rows {
            let id: String = row.try_get("initiator_id")?;
            let balance: i64 = row.try_get("balance")?;
            let initiator = InitiatorId::from(id);
            ledger.grant(&initiator, u32::try_from(balance).unwrap_or(0));
            seen.insert(initiator);
        }
        Ok(seen)
    }

    /// Write a committed package through to sqlite; older versions never win
    pub async fn persist(&self, package: &Package) -> Result<(), sqlx::Error> {
        let body = serde_json::to_string(package).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        sqlx::query(
            r#"
            INSERT INTO packages (id, initiator_id, name, status, version, body_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                version = excluded.version,
                body_json = excluded.body_json,
                updated_at = excluded.updated_at
            WHERE excluded.version > packages.version
            "#,
        )
        .bind(package.id.as_str())
        .bind(package.initiator_id.as_str())
        .bind(&package.name)
        .bind(package.status.to_string())
        .bind(package.version as i64)
        .bind(&body)
        .bind(package.created_at.to_rfc3339())
        .bind(package.updated_at.to_rfc3339())
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Re-persist whatever the engine holds for `id`
    pub async fn mirror(&self, id: &PackageId) -> Result<(), sqlx::Error> {
        match self.store.load(id) {
            Ok(Some(package)) => self.persist(&package).await,
            Ok(None) => Ok(()),
            Err(e) => {
                tracing::warn!(package_id = %id, error = %e, "could not mirror package");
                Ok(())
            }
        }
    }

    /// Mirror every package, used after sweeps that touch many of them
    pub async fn mirror_all(&self) -> Result<(), sqlx::Error> {
        let ids = match self.store.list_ids() {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "could not list packages");
                return Ok(());
            }
        };
        for id in ids {
            self.mirror(&id).await?;
        }
        Ok(())
    }

    pub async fn save_contact(&self, contact: &Contact) -> Result<(), sqlx::Error> {
        let body = serde_json::to_string(contact).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        sqlx::query(
            r#"
            INSERT INTO contacts (id, owner, body_json) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET owner = excluded.owner, body_json = excluded.body_json
            "#,
        )
        .bind(contact.id.as_str())
        .bind(contact.owner.as_str())
        .bind(&body)
        .execute(&self.db)
        .await?;

        self.directory.upsert(contact.clone());
        Ok(())
    }

    /// Copy the ledger's balance for `initiator` into sqlite
    pub async fn sync_balance(&self, initiator: &InitiatorId) -> Result<u32, sqlx::Error> {
        let balance = match self.ledger.balance(initiator) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(initiator_id = %initiator, error = %e, "could not read balance");
                return Ok(0);
            }
        };
        sqlx::query(
            r#"
            INSERT INTO credit_balances (initiator_id, balance, updated_at) VALUES (?, ?, datetime('now'))
            ON CONFLICT(initiator_id) DO UPDATE SET
                balance = excluded.balance,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(initiator.as_str())
        .bind(i64::from(balance))
        .execute(&self.db)
        .await?;
        Ok(balance)
    }

    /// Grant the configured starting credits the first time an initiator shows up
    pub async fn welcome(&self, initiator: &InitiatorId) -> Result<(), sqlx::Error> {
        let first_visit = self
            .seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(initiator.clone());
        if first_visit && self.config.default_credits > 0 {
            let balance = self.ledger.grant(initiator, self.config.default_credits);
            tracing::info!(initiator_id = %initiator, balance, "granted starting credits");
            self.sync_balance(initiator).await?;
        }
        Ok(())
    }

    pub async fn store_document(
        &self,
        storage_key: &str,
        sha256: &str,
        pdf: &[u8],
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO documents (storage_key, sha256, pdf_data)
            VALUES (?, ?, ?)
            ON CONFLICT(storage_key) DO NOTHING
            "#,
        )
        .bind(storage_key)
        .bind(sha256)
        .bind(pdf)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn load_document(&self, storage_key: &str) -> Result<Option<Vec<u8>>, sqlx::Error> {
        let row = sqlx::query("SELECT pdf_data FROM documents WHERE storage_key = ?")
            .bind(storage_key)
            .fetch_optional(&self.db)
            .await?;
        row.map(|r| r.try_get("pdf_data")).transpose()
    }
}
