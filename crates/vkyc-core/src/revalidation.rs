//! Risk-based re-verification ("re-KYC") policy.
//!
//! [`check_revalidation`] is a pure, total function of the stored record and
//! the current time. Missing, empty and unparseable dates are ordinary inputs
//! that resolve to `rekyc_due`; nothing here returns an error or panics.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Customer risk classification governing the validity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskCategory {
    Low,
    Medium,
    High,
}

impl RiskCategory {
    /// Days a verification stays valid for this category.
    pub fn expiry_days(self) -> i64 {
        match self {
            RiskCategory::Low => 365,
            RiskCategory::Medium => 180,
            RiskCategory::High => 90,
        }
    }

    /// Exact, case-sensitive match on the stored label.
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "Low" => Some(RiskCategory::Low),
            "Medium" => Some(RiskCategory::Medium),
            "High" => Some(RiskCategory::High),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RiskCategory::Low => "Low",
            RiskCategory::Medium => "Medium",
            RiskCategory::High => "High",
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expiry window for a stored (possibly missing or unknown) category label.
/// Anything unrecognised gets the Low window.
pub fn expiry_days_for(label: Option<&str>) -> i64 {
    label
        .and_then(RiskCategory::parse)
        .unwrap_or(RiskCategory::Low)
        .expiry_days()
}

/// Current identity record, keyed by the document-number pair.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KycRecord {
    pub doc_id_1: String,
    pub doc_id_2: String,
    /// Raw stored timestamp of the last successful verification.
    pub last_verification: Option<String>,
    /// Raw stored category label; may be missing or unrecognised.
    pub risk_category: Option<String>,
    pub customer_name: Option<String>,
    pub kyc_id: Option<String>,
    pub kyc_type: Option<String>,
    pub decision: Option<String>,
    pub verifier: Option<String>,
    pub match_label: Option<String>,
    pub face_match_score: f32,
    pub liveness_label: Option<String>,
    pub blinks: u32,
    pub max_face_angle: f32,
    pub smile_detected: bool,
    /// When this row was last written.
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevalidationState {
    NewUser,
    ValidKyc,
    RekycDue,
}

impl RevalidationState {
    pub fn as_str(self) -> &'static str {
        match self {
            RevalidationState::NewUser => "new_user",
            RevalidationState::ValidKyc => "valid_kyc",
            RevalidationState::RekycDue => "rekyc_due",
        }
    }
}

impl fmt::Display for RevalidationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision on whether a stored verification can be reused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevalidationStatus {
    pub status: RevalidationState,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_verification: Option<NaiveDateTime>,
    /// "<m> months and <d> days ago", with 30-day months.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kyc_age: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<NaiveDateTime>,
}

impl RevalidationStatus {
    fn bare(status: RevalidationState, message: String) -> Self {
        Self {
            status,
            message,
            risk_category: None,
            last_verification: None,
            kyc_age: None,
            valid_until: None,
        }
    }
}

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse a stored verification timestamp.
///
/// Tries ISO 8601 date-time forms first (with or without seconds, `T` or
/// space separator, RFC 3339 offsets keep their wall-clock time), then a
/// plain `YYYY-MM-DD` date at midnight.
pub fn parse_verification_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Whole 30-day months and remaining days between `since` and `now`,
/// using floored day counts.
pub fn elapsed_months_days(since: NaiveDateTime, now: NaiveDateTime) -> (i64, i64) {
    let days = now
        .signed_duration_since(since)
        .num_seconds()
        .div_euclid(86_400);
    (days.div_euclid(30), days.rem_euclid(30))
}

/// Decide whether a new verification is required.
///
/// Rules, first match wins: no record → `new_user`; missing/empty date →
/// `rekyc_due`; unparseable date → `rekyc_due`; otherwise compare `now`
/// against `last + window(risk_category)` (inclusive).
pub fn check_revalidation(record: Option<&KycRecord>, now: NaiveDateTime) -> RevalidationStatus {
    let Some(record) = record else {
        return RevalidationStatus::bare(
            RevalidationState::NewUser,
            "No existing KYC found. Please proceed with fresh KYC.".to_string(),
        );
    };

    let raw = match record.last_verification.as_deref() {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => {
            return RevalidationStatus::bare(
                RevalidationState::RekycDue,
                "Last KYC date is missing or empty. Please proceed with fresh KYC.".to_string(),
            );
        }
    };

    let Some(last) = parse_verification_timestamp(raw) else {
        return RevalidationStatus::bare(
            RevalidationState::RekycDue,
            format!("Invalid last KYC date format: '{raw}'. Please proceed with re-KYC."),
        );
    };

    let category = record
        .risk_category
        .clone()
        .unwrap_or_else(|| RiskCategory::Low.to_string());
    let expiry_days = expiry_days_for(record.risk_category.as_deref());
    let valid_until = last
        .checked_add_signed(Duration::days(expiry_days))
        .unwrap_or(NaiveDateTime::MAX);

    let (months, days) = elapsed_months_days(last, now);
    let last_date = last.format("%Y-%m-%d");
    let until_date = valid_until.format("%Y-%m-%d");

    let (status, message) = if now <= valid_until {
        (
            RevalidationState::ValidKyc,
            format!(
                "KYC done on {last_date} ({months} months {days} days ago), \
                 Risk Category: {category}, valid until {until_date}."
            ),
        )
    } else {
        (
            RevalidationState::RekycDue,
            format!(
                "KYC expired. Last KYC was on {last_date} ({months} months {days} days ago), \
                 Risk Category: {category}, KYC expired on {until_date}. Please proceed with re-KYC."
            ),
        )
    };

    RevalidationStatus {
        status,
        message,
        risk_category: Some(category),
        last_verification: Some(last),
        kyc_age: Some(format!("{months} months and {days} days ago")),
        valid_until: Some(valid_until),
    }
}
