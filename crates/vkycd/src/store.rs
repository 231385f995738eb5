use chrono::NaiveDateTime;
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;
use vkyc_core::revalidation::parse_verification_timestamp;
use vkyc_core::{KycRecord, RiskCategory, VerificationResult};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("rusqlite error: {0}")]
    Rusqlite(#[from] rusqlite::Error),
    #[error("invalid finalize request: {0}")]
    InvalidRequest(String),
}

/// Whether a finalized verification was the customer's first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KycType {
    #[default]
    NewKyc,
    ReKyc,
}

impl KycType {
    pub fn as_str(self) -> &'static str {
        match self {
            KycType::NewKyc => "new_kyc",
            KycType::ReKyc => "re_kyc",
        }
    }
}

/// A verifier's decision on a completed verification, as submitted to `Finalize`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalizeRequest {
    pub doc_id_1: String,
    pub doc_id_2: String,
    pub customer_name: Option<String>,
    /// Defaults to `KYC<YYYYmmddHHMMSS>` of the finalize time.
    pub kyc_id: Option<String>,
    pub kyc_type: KycType,
    /// Defaults to "Accepted".
    pub decision: Option<String>,
    /// Defaults to Low.
    pub risk_category: Option<RiskCategory>,
    pub verifier: Option<String>,
    /// Defaults to the finalize time.
    pub last_verification: Option<String>,
    pub match_label: Option<String>,
    pub face_match_score: f32,
    pub liveness_label: Option<String>,
    pub blinks: u32,
    pub max_face_angle: f32,
    pub smile_detected: bool,
}

impl FinalizeRequest {
    /// Copy the scalar outcome of a verification run into the request.
    pub fn with_result(mut self, result: &VerificationResult) -> Self {
        self.match_label = Some(result.match_label.as_str().to_string());
        self.face_match_score = result.score;
        self.liveness_label = Some(result.liveness_label.clone());
        self.blinks = result.blinks;
        self.max_face_angle = result.max_angle;
        self.smile_detected = result.smile;
        self
    }
}

/// One append-only audit row written by a finalize.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub doc_id_1: String,
    pub doc_id_2: String,
    pub customer_name: Option<String>,
    pub kyc_id: String,
    pub kyc_type: String,
    pub decision: String,
    pub verifier: Option<String>,
    pub risk_category: String,
    pub last_verification: String,
    pub match_label: Option<String>,
    pub face_match_score: f32,
    pub liveness_label: Option<String>,
    pub blinks: u32,
    pub max_face_angle: f32,
    pub smile_detected: bool,
    pub recorded_at: String,
}

/// Fully resolved values written by one finalize.
struct FinalizeRow {
    doc_id_1: String,
    doc_id_2: String,
    customer_name: Option<String>,
    kyc_id: String,
    kyc_type: &'static str,
    decision: String,
    verifier: Option<String>,
    risk_category: &'static str,
    last_verification: String,
    match_label: Option<String>,
    face_match_score: f64,
    liveness_label: Option<String>,
    blinks: i64,
    max_face_angle: f64,
    smile_detected: bool,
    written_at: String,
}

impl FinalizeRow {
    fn resolve(request: FinalizeRequest, now: NaiveDateTime) -> Result<Self, StoreError> {
        let doc_id_1 = request.doc_id_1.trim().to_string();
        let doc_id_2 = request.doc_id_2.trim().to_string();
        if doc_id_1.is_empty() || doc_id_2.is_empty() {
            return Err(StoreError::InvalidRequest(
                "both document numbers are required".to_string(),
            ));
        }

        let last_verification = match request.last_verification {
            Some(raw) => {
                let parsed = parse_verification_timestamp(&raw).ok_or_else(|| {
                    StoreError::InvalidRequest(format!("unparseable last_verification: '{raw}'"))
                })?;
                parsed.format(TIMESTAMP_FORMAT).to_string()
            }
            None => now.format(TIMESTAMP_FORMAT).to_string(),
        };

        Ok(Self {
            doc_id_1,
            doc_id_2,
            customer_name: request.customer_name,
            kyc_id: request
                .kyc_id
                .unwrap_or_else(|| now.format("KYC%Y%m%d%H%M%S").to_string()),
            kyc_type: request.kyc_type.as_str(),
            decision: request.decision.unwrap_or_else(|| "Accepted".to_string()),
            verifier: request.verifier,
            risk_category: request.risk_category.unwrap_or(RiskCategory::Low).as_str(),
            last_verification,
            match_label: request.match_label,
            face_match_score: f64::from(request.face_match_score),
            liveness_label: request.liveness_label,
            blinks: i64::from(request.blinks),
            max_face_angle: f64::from(request.max_face_angle),
            smile_detected: request.smile_detected,
            written_at: now.format(TIMESTAMP_FORMAT).to_string(),
        })
    }
}

const RECORD_COLUMNS: &str = "doc_id_1, doc_id_2, last_verification, risk_category, customer_name, \
     kyc_id, kyc_type, decision, verifier, match_label, face_match_score, liveness_label, \
     blinks, max_face_angle, smile_detected, updated_at";

/// SQLite-backed KYC records plus their append-only history.
///
/// `kyc_records` holds one current row per document-number pair; every
/// finalize also appends to `kyc_history`, whose rows are never updated.
#[derive(Clone)]
pub struct KycStore {
    conn: Connection,
}

impl KycStore {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 CREATE TABLE IF NOT EXISTS kyc_records (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     doc_id_1 TEXT NOT NULL,
                     doc_id_2 TEXT NOT NULL,
                     last_verification TEXT,
                     risk_category TEXT,
                     customer_name TEXT,
                     kyc_id TEXT,
                     kyc_type TEXT,
                     decision TEXT,
                     verifier TEXT,
                     match_label TEXT,
                     face_match_score REAL NOT NULL DEFAULT 0.0,
                     liveness_label TEXT,
                     blinks INTEGER NOT NULL DEFAULT 0,
                     max_face_angle REAL NOT NULL DEFAULT 0.0,
                     smile_detected INTEGER NOT NULL DEFAULT 0,
                     updated_at TEXT NOT NULL,
                     UNIQUE(doc_id_1, doc_id_2)
                 );
                 CREATE TABLE IF NOT EXISTS kyc_history (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     doc_id_1 TEXT NOT NULL,
                     doc_id_2 TEXT NOT NULL,
                     customer_name TEXT,
                     kyc_id TEXT NOT NULL,
                     kyc_type TEXT NOT NULL,
                     decision TEXT NOT NULL,
                     verifier TEXT,
                     risk_category TEXT NOT NULL,
                     last_verification TEXT NOT NULL,
                     match_label TEXT,
                     face_match_score REAL NOT NULL,
                     liveness_label TEXT,
                     blinks INTEGER NOT NULL,
                     max_face_angle REAL NOT NULL,
                     smile_detected INTEGER NOT NULL,
                     recorded_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS idx_history_docs ON kyc_history(doc_id_1, doc_id_2);",
            )?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    /// Current record for a document-number pair.
    pub async fn get_record(
        &self,
        doc_id_1: &str,
        doc_id_2: &str,
    ) -> Result<Option<KycRecord>, StoreError> {
        let doc_id_1 = doc_id_1.trim().to_string();
        let doc_id_2 = doc_id_2.trim().to_string();

        self.conn
            .call(move |conn| {
                let record = conn
                    .query_row(
                        &format!(
                            "SELECT {RECORD_COLUMNS} FROM kyc_records
                             WHERE doc_id_1 = ?1 AND doc_id_2 = ?2"
                        ),
                        [&doc_id_1, &doc_id_2],
                        |row| {
                            Ok(KycRecord {
                                doc_id_1: row.get(0)?,
                                doc_id_2: row.get(1)?,
                                last_verification: row.get(2)?,
                                risk_category: row.get(3)?,
                                customer_name: row.get(4)?,
                                kyc_id: row.get(5)?,
                                kyc_type: row.get(6)?,
                                decision: row.get(7)?,
                                verifier: row.get(8)?,
                                match_label: row.get(9)?,
                                face_match_score: row.get::<_, f64>(10)? as f32,
                                liveness_label: row.get(11)?,
                                blinks: row.get::<_, i64>(12)?.clamp(0, u32::MAX as i64) as u32,
                                max_face_angle: row.get::<_, f64>(13)? as f32,
                                smile_detected: row.get(14)?,
                                updated_at: row.get(15)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(record)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Record a verifier's decision at the current local time.
    pub async fn finalize(&self, request: FinalizeRequest) -> Result<KycRecord, StoreError> {
        self.finalize_at(request, chrono::Local::now().naive_local())
            .await
    }

    /// Upsert the current record and append one history row, atomically.
    pub async fn finalize_at(
        &self,
        request: FinalizeRequest,
        now: NaiveDateTime,
    ) -> Result<KycRecord, StoreError> {
        let row = FinalizeRow::resolve(request, now)?;
        let (doc_id_1, doc_id_2) = (row.doc_id_1.clone(), row.doc_id_2.clone());

        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    &format!(
                        "INSERT INTO kyc_records ({RECORD_COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                         ON CONFLICT(doc_id_1, doc_id_2) DO UPDATE SET
                             last_verification = excluded.last_verification,
                             risk_category = excluded.risk_category,
                             customer_name = COALESCE(excluded.customer_name, kyc_records.customer_name),
                             kyc_id = excluded.kyc_id,
                             kyc_type = excluded.kyc_type,
                             decision = excluded.decision,
                             verifier = COALESCE(excluded.verifier, kyc_records.verifier),
                             match_label = excluded.match_label,
                             face_match_score = excluded.face_match_score,
                             liveness_label = excluded.liveness_label,
                             blinks = excluded.blinks,
                             max_face_angle = excluded.max_face_angle,
                             smile_detected = excluded.smile_detected,
                             updated_at = excluded.updated_at"
                    ),
                    rusqlite::params![
                        row.doc_id_1,
                        row.doc_id_2,
                        row.last_verification,
                        row.risk_category,
                        row.customer_name,
                        row.kyc_id,
                        row.kyc_type,
                        row.decision,
                        row.verifier,
                        row.match_label,
                        row.face_match_score,
                        row.liveness_label,
                        row.blinks,
                        row.max_face_angle,
                        row.smile_detected,
                        row.written_at,
                    ],
                )?;
                tx.execute(
                    "INSERT INTO kyc_history (doc_id_1, doc_id_2, customer_name, kyc_id, kyc_type,
                         decision, verifier, risk_category, last_verification, match_label,
                         face_match_score, liveness_label, blinks, max_face_angle, smile_detected,
                         recorded_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                    rusqlite::params![
                        row.doc_id_1,
                        row.doc_id_2,
                        row.customer_name,
                        row.kyc_id,
                        row.kyc_type,
                        row.decision,
                        row.verifier,
                        row.risk_category,
                        row.last_verification,
                        row.match_label,
                        row.face_match_score,
                        row.liveness_label,
                        row.blinks,
                        row.max_face_angle,
                        row.smile_detected,
                        row.written_at,
                    ],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;

        tracing::info!(doc_id_1 = %doc_id_1, "kyc record finalized");
        self.get_record(&doc_id_1, &doc_id_2).await?.ok_or_else(|| {
            StoreError::InvalidRequest("record missing after finalize".to_string())
        })
    }

    /// History rows for a document-number pair, newest first.
    pub async fn history(
        &self,
        doc_id_1: &str,
        doc_id_2: &str,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let doc_id_1 = doc_id_1.trim().to_string();
        let doc_id_2 = doc_id_2.trim().to_string();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, doc_id_1, doc_id_2, customer_name, kyc_id, kyc_type, decision,
                            verifier, risk_category, last_verification, match_label,
                            face_match_score, liveness_label, blinks, max_face_angle,
                            smile_detected, recorded_at
                     FROM kyc_history
                     WHERE doc_id_1 = ?1 AND doc_id_2 = ?2
                     ORDER BY id DESC",
                )?;
                let rows = stmt
                    .query_map([&doc_id_1, &doc_id_2], |row| {
                        Ok(HistoryEntry {
                            id: row.get(0)?,
                            doc_id_1: row.get(1)?,
                            doc_id_2: row.get(2)?,
                            customer_name: row.get(3)?,
                            kyc_id: row.get(4)?,
                            kyc_type: row.get(5)?,
                            decision: row.get(6)?,
                            verifier: row.get(7)?,
                            risk_category: row.get(8)?,
                            last_verification: row.get(9)?,
                            match_label: row.get(10)?,
                            face_match_score: row.get::<_, f64>(11)? as f32,
                            liveness_label: row.get(12)?,
                            blinks: row.get::<_, i64>(13)?.clamp(0, u32::MAX as i64) as u32,
                            max_face_angle: row.get::<_, f64>(14)? as f32,
                            smile_detected: row.get(15)?,
                            recorded_at: row.get(16)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(StoreError::from)
    }

    /// Number of distinct customers with a current record.
    pub async fn count_records(&self) -> Result<u64, StoreError> {
        self.conn
            .call(|conn| {
                let count: u64 =
                    conn.query_row("SELECT COUNT(*) FROM kyc_records", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
            .map_err(StoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use vkyc_core::{check_revalidation, MatchLabel, RevalidationState};

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(10, 15, 0)
            .unwrap()
    }

    fn request(risk: RiskCategory) -> FinalizeRequest {
        FinalizeRequest {
            doc_id_1: "111122223333".to_string(),
            doc_id_2: "ABCDE1234F".to_string(),
            customer_name: Some("Asha Rao".to_string()),
            risk_category: Some(risk),
            verifier: Some("ops-7".to_string()),
            match_label: Some("Match".to_string()),
            face_match_score: 0.82,
            liveness_label: Some("Passed (2 blinks)".to_string()),
            blinks: 2,
            ..Default::default()
        }
    }

    async fn store() -> KycStore {
        KycStore::open(Path::new(":memory:")).await.unwrap()
    }

    #[tokio::test]
    async fn test_unknown_pair_has_no_record() {
        let store = store().await;
        assert!(store.get_record("1", "2").await.unwrap().is_none());
        assert!(store.history("1", "2").await.unwrap().is_empty());
        assert_eq!(store.count_records().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_finalize_applies_defaults() {
        let store = store().await;
        let now = at(2025, 1, 10);
        let record = store
            .finalize_at(
                FinalizeRequest {
                    doc_id_1: " 111122223333 ".to_string(),
                    doc_id_2: "ABCDE1234F".to_string(),
                    ..Default::default()
                },
                now,
            )
            .await
            .unwrap();

        assert_eq!(record.doc_id_1, "111122223333");
        assert_eq!(record.kyc_id.as_deref(), Some("KYC20250110101500"));
        assert_eq!(record.decision.as_deref(), Some("Accepted"));
        assert_eq!(record.risk_category.as_deref(), Some("Low"));
        assert_eq!(record.kyc_type.as_deref(), Some("new_kyc"));
        assert_eq!(record.last_verification.as_deref(), Some("2025-01-10T10:15:00"));
    }

    #[tokio::test]
    async fn test_refinalize_updates_in_place_and_appends_history() {
        let store = store().await;
        store
            .finalize_at(request(RiskCategory::High), at(2024, 1, 5))
            .await
            .unwrap();

        let mut second = request(RiskCategory::Medium);
        second.kyc_type = KycType::ReKyc;
        second.customer_name = None;
        second.decision = Some("Rejected".to_string());
        let record = store.finalize_at(second, at(2024, 6, 1)).await.unwrap();

        assert_eq!(store.count_records().await.unwrap(), 1);
        assert_eq!(record.risk_category.as_deref(), Some("Medium"));
        assert_eq!(record.kyc_type.as_deref(), Some("re_kyc"));
        // An omitted name keeps the stored one.
        assert_eq!(record.customer_name.as_deref(), Some("Asha Rao"));

        let history = store.history("111122223333", "ABCDE1234F").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].decision, "Rejected");
        assert_eq!(history[1].decision, "Accepted");
        assert!(history[0].id > history[1].id);
        assert_eq!(history[1].risk_category, "High");
    }

    #[tokio::test]
    async fn test_rejects_blank_documents_and_bad_dates() {
        let store = store().await;
        let mut blank = request(RiskCategory::Low);
        blank.doc_id_2 = "  ".to_string();
        assert!(matches!(
            store.finalize_at(blank, at(2025, 1, 1)).await,
            Err(StoreError::InvalidRequest(_))
        ));

        let mut bad_date = request(RiskCategory::Low);
        bad_date.last_verification = Some("yesterday".to_string());
        assert!(matches!(
            store.finalize_at(bad_date, at(2025, 1, 1)).await,
            Err(StoreError::InvalidRequest(_))
        ));
        assert_eq!(store.count_records().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_revalidation_after_finalize() {
        let store = store().await;
        let finalized = at(2025, 2, 1);
        store
            .finalize_at(request(RiskCategory::High), finalized)
            .await
            .unwrap();
        let record = store.get_record("111122223333", "ABCDE1234F").await.unwrap();

        let soon = check_revalidation(record.as_ref(), finalized + Duration::days(30));
        assert_eq!(soon.status, RevalidationState::ValidKyc);
        let late = check_revalidation(record.as_ref(), finalized + Duration::days(91));
        assert_eq!(late.status, RevalidationState::RekycDue);
    }

    #[tokio::test]
    async fn test_supplied_verification_date_and_result() {
        let store = store().await;
        let mut result = VerificationResult::error(vkyc_core::FailureKind::Internal, "x");
        result.match_label = MatchLabel::NoMatch;
        result.score = 0.31;
        result.blinks = 0;
        result.liveness_label = "Failed (0 blinks)".to_string();
        result.smile = true;

        let mut req = request(RiskCategory::Low).with_result(&result);
        req.last_verification = Some("2024-03-04 08:00".to_string());
        let record = store.finalize_at(req, at(2025, 1, 1)).await.unwrap();

        assert_eq!(record.last_verification.as_deref(), Some("2024-03-04T08:00:00"));
        assert_eq!(record.match_label.as_deref(), Some("No Match"));
        assert!((record.face_match_score - 0.31).abs() < 1e-6);
        assert!(record.smile_detected);
        assert_eq!(record.updated_at, "2025-01-01T10:15:00");
    }

    #[test]
    fn test_request_json_defaults() {
        let req: FinalizeRequest =
            serde_json::from_str(r#"{"doc_id_1":"1","doc_id_2":"2","kyc_type":"re_kyc","risk_category":"High"}"#)
                .unwrap();
        assert_eq!(req.kyc_type, KycType::ReKyc);
        assert_eq!(req.risk_category, Some(RiskCategory::High));
        assert_eq!(req.blinks, 0);
    }
}
