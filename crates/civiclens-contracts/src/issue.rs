use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Ordinal hazard ranking; variant order drives `Ord` (`High` outranks all).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Severity {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::None,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
            Severity::None => "None",
        }
    }

    pub fn parse(raw: &str) -> Option<Severity> {
        match raw.trim() {
            "High" => Some(Severity::High),
            "Medium" => Some(Severity::Medium),
            "Low" => Some(Severity::Low),
            "None" => Some(Severity::None),
            _ => None,
        }
    }
}

/// Closed issue vocabulary the classifier is constrained to. "None" is the
/// qualifying answer for images that show nothing reportable.
pub const ISSUE_TYPES: &[&str] = &[
    "Pothole",
    "Garbage Dump",
    "Broken Street Light",
    "Open Manhole",
    "Water Leakage",
    "Illegal Parking",
    "Stray Animal Obstruction",
    "Graffiti / Vandalism",
    "Broken Sidewalk",
    "None",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub issue_type: String,
    pub severity: Severity,
    pub confidence: u8,
    pub description: String,
    pub recommended_action: String,
}

impl AnalysisResult {
    /// Fixed degraded-but-valid value returned whenever classification fails.
    /// Callers render it like any other result instead of branching on errors.
    pub fn degraded() -> Self {
        Self {
            issue_type: "Error".to_string(),
            severity: Severity::Low,
            confidence: 0,
            description: "Failed to analyze image. Please try again.".to_string(),
            recommended_action: "Retry upload.".to_string(),
        }
    }
}

/// Confidence arrives as an uncalibrated number; clamp into 0..=100 on
/// ingestion rather than rejecting near-miss values.
pub fn clamp_confidence(raw: f64) -> u8 {
    if !raw.is_finite() {
        return 0;
    }
    raw.round().clamp(0.0, 100.0) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketStatus {
    Open,
    #[serde(rename = "In Progress")]
    InProgress,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketLocation {
    pub lat: f64,
    pub lng: f64,
    pub address: String,
}

/// Record seeded from a completed analysis; persistence belongs to an
/// external store, this crate only shapes the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub image_ref: String,
    pub issue_type: String,
    pub severity: Severity,
    pub status: TicketStatus,
    pub timestamp: String,
    pub location: TicketLocation,
}

impl Ticket {
    pub fn from_analysis(
        analysis: &AnalysisResult,
        image_bytes: &[u8],
        location: TicketLocation,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            image_ref: image_ref(image_bytes),
            issue_type: analysis.issue_type.clone(),
            severity: analysis.severity,
            status: TicketStatus::Open,
            timestamp: now_utc_iso(),
            location,
        }
    }
}

/// Boundary value handed to the outbound alert notifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRequest {
    pub location: String,
    pub issue_type: String,
    pub severity: Severity,
    pub image_ref: String,
    pub timestamp: String,
}

impl AlertRequest {
    pub fn from_ticket(ticket: &Ticket) -> Self {
        Self {
            location: ticket.location.address.clone(),
            issue_type: ticket.issue_type.clone(),
            severity: ticket.severity,
            image_ref: ticket.image_ref.clone(),
            timestamp: ticket.timestamp.clone(),
        }
    }
}

/// Content digest used as a stable reference to an uploaded image.
pub fn image_ref(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
