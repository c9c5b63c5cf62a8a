//! # PostgreSQL Catalog
//!
//! Persists packages in `aip_sip` and versions in `aip_xml` (see
//! `migrations/`). Each trait method runs in its own transaction. Methods
//! that check a package's state first lock its row with `FOR UPDATE`, so
//! two concurrent transitions on one package serialize and the loser sees
//! the winner's state.
//!
//! Primary-key and `(sip_id, version)` uniqueness are enforced by the
//! schema. A unique violation that slips past the explicit existence check
//! (two creators racing) is reported as `ConflictObject`.

use aip_core::{FixityDigest, SipId, XmlId};
use aip_state::{AipSip, AipXml, SipState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::error::CatalogError;
use crate::{AipRegistration, MetadataCatalog, StaleRecords};

const UNIQUE_VIOLATION: &str = "23505";

/// Connect to PostgreSQL and run migrations.
///
/// Returns `None` if no URL is configured (in-memory-only mode).
/// Returns `Err` if the URL is set but the connection or migration fails.
pub async fn init_pool(database_url: Option<&str>) -> Result<Option<PgPool>, sqlx::Error> {
    let url = match database_url {
        Some(url) => url,
        None => {
            tracing::warn!(
                "DATABASE_URL not set, running with the in-memory catalog. \
                 Catalog state will not survive restarts."
            );
            return Ok(None);
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    Ok(Some(pool))
}

/// Catalog backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ── Rows ─────────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct SipRow {
    id: Uuid,
    name: String,
    digest: String,
    state: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SipRow {
    fn into_record(self, xmls: Vec<AipXml>) -> Result<AipSip, CatalogError> {
        let state = SipState::from_name(&self.state).ok_or_else(|| {
            CatalogError::CorruptRow(format!("sip {}: unknown state {:?}", self.id, self.state))
        })?;
        let digest = FixityDigest::from_hex(&self.digest)
            .map_err(|e| CatalogError::CorruptRow(format!("sip {}: {e}", self.id)))?;
        Ok(AipSip {
            id: SipId::from_uuid(self.id),
            name: self.name,
            digest,
            state,
            created_at: self.created_at,
            updated_at: self.updated_at,
            xmls,
            consistent: None,
        })
    }
}

#[derive(sqlx::FromRow)]
struct XmlRow {
    id: Uuid,
    sip_id: Uuid,
    name: String,
    digest: String,
    version: i32,
    processing: bool,
    created_at: DateTime<Utc>,
}

impl XmlRow {
    fn into_record(self) -> Result<AipXml, CatalogError> {
        let digest = FixityDigest::from_hex(&self.digest)
            .map_err(|e| CatalogError::CorruptRow(format!("xml {}: {e}", self.id)))?;
        let version = u32::try_from(self.version).map_err(|_| {
            CatalogError::CorruptRow(format!("xml {}: negative version {}", self.id, self.version))
        })?;
        Ok(AipXml {
            id: XmlId::from_uuid(self.id),
            sip_id: SipId::from_uuid(self.sip_id),
            name: self.name,
            digest,
            version,
            processing: self.processing,
            created_at: self.created_at,
            consistent: None,
        })
    }
}

const SIP_COLUMNS: &str = "id, name, digest, state, created_at, updated_at";
const XML_COLUMNS: &str = "id, sip_id, name, digest, version, processing, created_at";

fn map_unique(err: sqlx::Error, what: String) -> CatalogError {
    let is_unique = err
        .as_database_error()
        .and_then(|d| d.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION);
    if is_unique {
        CatalogError::ConflictObject(what)
    } else {
        CatalogError::Database(err)
    }
}

// ── Transaction helpers ──────────────────────────────────────────────

async fn lock_sip_state(
    tx: &mut Transaction<'_, Postgres>,
    sip_id: SipId,
) -> Result<SipState, CatalogError> {
    let state: Option<String> =
        sqlx::query_scalar("SELECT state FROM aip_sip WHERE id = $1 FOR UPDATE")
            .bind(sip_id.as_uuid())
            .fetch_optional(&mut **tx)
            .await?;
    let state = state.ok_or_else(|| CatalogError::MissingObject(format!("sip {sip_id}")))?;
    SipState::from_name(&state)
        .ok_or_else(|| CatalogError::CorruptRow(format!("sip {sip_id}: unknown state {state:?}")))
}

async fn set_sip_state(
    tx: &mut Transaction<'_, Postgres>,
    sip_id: SipId,
    state: SipState,
) -> Result<(), CatalogError> {
    sqlx::query("UPDATE aip_sip SET state = $1, updated_at = $2 WHERE id = $3")
        .bind(state.name())
        .bind(Utc::now())
        .bind(sip_id.as_uuid())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn xml_exists(
    tx: &mut Transaction<'_, Postgres>,
    xml_id: XmlId,
) -> Result<bool, CatalogError> {
    let found: Option<i32> = sqlx::query_scalar("SELECT 1 FROM aip_xml WHERE id = $1")
        .bind(xml_id.as_uuid())
        .fetch_optional(&mut **tx)
        .await?;
    Ok(found.is_some())
}

async fn load_xmls(
    tx: &mut Transaction<'_, Postgres>,
    sip_id: Uuid,
) -> Result<Vec<AipXml>, CatalogError> {
    let rows = sqlx::query_as::<_, XmlRow>(&format!(
        "SELECT {XML_COLUMNS} FROM aip_xml WHERE sip_id = $1 ORDER BY version"
    ))
    .bind(sip_id)
    .fetch_all(&mut **tx)
    .await?;
    rows.into_iter().map(XmlRow::into_record).collect()
}

impl PgCatalog {
    /// Read-only transaction whose queries all see one snapshot, so a
    /// package and its versions are never read across a concurrent commit.
    async fn begin_snapshot(&self) -> Result<Transaction<'static, Postgres>, CatalogError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    async fn transition(&self, sip_id: SipId, to: SipState) -> Result<(), CatalogError> {
        let mut tx = self.pool.begin().await?;
        let current = lock_sip_state(&mut tx, sip_id).await?;
        current.try_transition(to)?;
        set_sip_state(&mut tx, sip_id, to).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl MetadataCatalog for PgCatalog {
    async fn register_aip_creation(&self, reg: &AipRegistration) -> Result<(), CatalogError> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<i32> = sqlx::query_scalar("SELECT 1 FROM aip_sip WHERE id = $1")
            .bind(reg.sip_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_some() {
            return Err(CatalogError::ConflictObject(format!("sip {}", reg.sip_id)));
        }
        if xml_exists(&mut tx, reg.xml_id).await? {
            return Err(CatalogError::ConflictObject(format!("xml {}", reg.xml_id)));
        }

        let now = Utc::now();
        sqlx::query(
            "INSERT INTO aip_sip (id, name, digest, state, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $5)",
        )
        .bind(reg.sip_id.as_uuid())
        .bind(&reg.sip_name)
        .bind(reg.sip_digest.to_hex())
        .bind(SipState::Processing.name())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unique(e, format!("sip {}", reg.sip_id)))?;

        sqlx::query(
            "INSERT INTO aip_xml (id, sip_id, name, digest, version, processing, created_at)
             VALUES ($1, $2, $3, $4, 1, TRUE, $5)",
        )
        .bind(reg.xml_id.as_uuid())
        .bind(reg.sip_id.as_uuid())
        .bind(&reg.xml_name)
        .bind(reg.xml_digest.to_hex())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unique(e, format!("xml {}", reg.xml_id)))?;

        tx.commit()
            .await
            .map_err(|e| map_unique(e, format!("sip {}", reg.sip_id)))?;
        Ok(())
    }

    async fn finish_aip_creation(&self, sip_id: SipId, xml_id: XmlId) -> Result<(), CatalogError> {
        let mut tx = self.pool.begin().await?;
        let current = lock_sip_state(&mut tx, sip_id).await?;

        let processing: Option<bool> = sqlx::query_scalar(
            "SELECT processing FROM aip_xml WHERE id = $1 AND sip_id = $2 FOR UPDATE",
        )
        .bind(xml_id.as_uuid())
        .bind(sip_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        let processing = processing.ok_or_else(|| {
            CatalogError::MissingObject(format!("xml {xml_id} of sip {sip_id}"))
        })?;
        if !processing {
            return Err(CatalogError::IllegalState(format!(
                "xml {xml_id} is not being processed"
            )));
        }
        current.try_transition(SipState::Archived)?;

        set_sip_state(&mut tx, sip_id, SipState::Archived).await?;
        sqlx::query("UPDATE aip_xml SET processing = FALSE WHERE id = $1")
            .bind(xml_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn register_xml_update(
        &self,
        sip_id: SipId,
        xml_id: XmlId,
        name: &str,
        digest: FixityDigest,
    ) -> Result<u32, CatalogError> {
        let mut tx = self.pool.begin().await?;
        let state = lock_sip_state(&mut tx, sip_id).await?;
        if xml_exists(&mut tx, xml_id).await? {
            return Err(CatalogError::ConflictObject(format!("xml {xml_id}")));
        }
        if state == SipState::Processing {
            return Err(CatalogError::IllegalState(format!("sip {sip_id} is {state}")));
        }

        // The sip row lock serializes concurrent version allocation.
        let pending: Option<i32> = sqlx::query_scalar(
            "SELECT version FROM aip_xml WHERE sip_id = $1 AND processing LIMIT 1",
        )
        .bind(sip_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(pending) = pending {
            return Err(CatalogError::IllegalState(format!(
                "sip {sip_id} has xml version {pending} in flight"
            )));
        }

        let max: i32 =
            sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM aip_xml WHERE sip_id = $1")
                .bind(sip_id.as_uuid())
                .fetch_one(&mut *tx)
                .await?;
        let version = max + 1;

        sqlx::query(
            "INSERT INTO aip_xml (id, sip_id, name, digest, version, processing, created_at)
             VALUES ($1, $2, $3, $4, $5, TRUE, $6)",
        )
        .bind(xml_id.as_uuid())
        .bind(sip_id.as_uuid())
        .bind(name)
        .bind(digest.to_hex())
        .bind(version)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unique(e, format!("xml {xml_id}")))?;
        tx.commit().await?;

        u32::try_from(version)
            .map_err(|_| CatalogError::CorruptRow(format!("xml {xml_id}: version {version}")))
    }

    async fn finish_xml_process(&self, xml_id: XmlId) -> Result<(), CatalogError> {
        let mut tx = self.pool.begin().await?;
        let processing: Option<bool> =
            sqlx::query_scalar("SELECT processing FROM aip_xml WHERE id = $1 FOR UPDATE")
                .bind(xml_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        match processing {
            None => return Err(CatalogError::MissingObject(format!("xml {xml_id}"))),
            Some(false) => {
                return Err(CatalogError::IllegalState(format!(
                    "xml {xml_id} is not being processed"
                )))
            }
            Some(true) => {}
        }
        sqlx::query("UPDATE aip_xml SET processing = FALSE WHERE id = $1")
            .bind(xml_id.as_uuid())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn register_sip_deletion(&self, sip_id: SipId) -> Result<(), CatalogError> {
        let mut tx = self.pool.begin().await?;
        let current = lock_sip_state(&mut tx, sip_id).await?;
        if !current.accepts_deletion() {
            return Err(CatalogError::IllegalState(format!(
                "sip {sip_id} is {current} and cannot be deleted"
            )));
        }
        set_sip_state(&mut tx, sip_id, SipState::Processing).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn finish_sip_deletion(&self, sip_id: SipId) -> Result<(), CatalogError> {
        self.transition(sip_id, SipState::Deleted).await
    }

    async fn remove_sip(&self, sip_id: SipId) -> Result<(), CatalogError> {
        self.transition(sip_id, SipState::Removed).await
    }

    async fn get_aip(&self, sip_id: SipId) -> Result<AipSip, CatalogError> {
        let mut tx = self.begin_snapshot().await?;
        let row = sqlx::query_as::<_, SipRow>(&format!(
            "SELECT {SIP_COLUMNS} FROM aip_sip WHERE id = $1"
        ))
        .bind(sip_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| CatalogError::MissingObject(format!("sip {sip_id}")))?;

        let xmls = load_xmls(&mut tx, row.id).await?;
        tx.commit().await?;
        let mut sip = row.into_record(xmls)?;
        if let Err(e) = sip.normalize_versions() {
            tracing::warn!(sip_id = %sip_id, error = %e, "xml version sequence has a gap");
        }
        Ok(sip)
    }

    async fn delete_aip_record(&self, sip_id: SipId) -> Result<(), CatalogError> {
        let result = sqlx::query("DELETE FROM aip_sip WHERE id = $1")
            .bind(sip_id.as_uuid())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CatalogError::MissingObject(format!("sip {sip_id}")));
        }
        Ok(())
    }

    async fn delete_xml_record(&self, xml_id: XmlId) -> Result<(), CatalogError> {
        let result = sqlx::query("DELETE FROM aip_xml WHERE id = $1")
            .bind(xml_id.as_uuid())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CatalogError::MissingObject(format!("xml {xml_id}")));
        }
        Ok(())
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<StaleRecords, CatalogError> {
        let mut tx = self.begin_snapshot().await?;
        let sip_rows = sqlx::query_as::<_, SipRow>(&format!(
            "SELECT {SIP_COLUMNS} FROM aip_sip
             WHERE state = 'PROCESSING' AND updated_at < $1
             ORDER BY updated_at"
        ))
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        let mut sips = Vec::with_capacity(sip_rows.len());
        for row in sip_rows {
            let xmls = load_xmls(&mut tx, row.id).await?;
            match row.into_record(xmls) {
                Ok(sip) => sips.push(sip),
                Err(e) => tracing::error!(error = %e, "skipping undecodable sip row"),
            }
        }

        let xml_rows = sqlx::query_as::<_, XmlRow>(
            "SELECT x.id, x.sip_id, x.name, x.digest, x.version, x.processing, x.created_at
             FROM aip_xml x JOIN aip_sip s ON s.id = x.sip_id
             WHERE x.processing AND x.created_at < $1 AND s.state <> 'PROCESSING'
             ORDER BY x.created_at",
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let mut xmls = Vec::with_capacity(xml_rows.len());
        for row in xml_rows {
            match row.into_record() {
                Ok(xml) => xmls.push(xml),
                Err(e) => tracing::error!(error = %e, "skipping undecodable xml row"),
            }
        }

        Ok(StaleRecords { sips, xmls })
    }

    async fn ping(&self) -> Result<(), CatalogError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
