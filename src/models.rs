use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Homeowner,
    Contractor,
    Worker,
    Admin,
}

/// Job-site coordinates in decimal degrees.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: String,
    pub url: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    Pending,
    Submitted,
    ChangesRequested,
    Approved,
}

impl MilestoneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MilestoneStatus::Pending => "pending",
            MilestoneStatus::Submitted => "submitted",
            MilestoneStatus::ChangesRequested => "changes_requested",
            MilestoneStatus::Approved => "approved",
        }
    }
}

/// A discrete, independently payable unit of project work.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub name: String,
    pub amount_cents: i64,
    pub description: String,
    pub status: MilestoneStatus,
    /// Photo URLs attached at submission.
    pub evidence: Vec<String>,
    pub submission_note: Option<String>,
    pub review_note: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub title: String,
    pub description: String,
    pub project_type: String,
    pub estimated_budget_cents: i64,
    pub timeline: String,
    pub address: String,
    pub site: GeoPoint,
    pub owner_id: String,
    pub assigned_contractor: Option<String>,
    pub milestones: Vec<Milestone>,
    pub media: Vec<MediaItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn milestone(&self, milestone_id: &str) -> Option<&Milestone> {
        self.milestones.iter().find(|m| m.id == milestone_id)
    }

    pub fn milestone_mut(&mut self, milestone_id: &str) -> Option<&mut Milestone> {
        self.milestones.iter_mut().find(|m| m.id == milestone_id)
    }
}

/// A GPS-verified attendance event bounding a work session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckIn {
    pub check_in_id: String,
    pub project_id: String,
    pub user_id: String,
    pub user_type: UserRole,
    pub check_in_time: DateTime<Utc>,
    pub check_out_time: Option<DateTime<Utc>>,
    /// Meters from the job site at check-in.
    pub distance_m: f64,
    pub duration_seconds: Option<i64>,
}

impl CheckIn {
    pub fn is_open(&self) -> bool {
        self.check_out_time.is_none()
    }

    /// Closes the session, deriving the elapsed duration.
    pub fn close(&mut self, at: DateTime<Utc>) {
        self.duration_seconds = Some((at - self.check_in_time).num_seconds());
        self.check_out_time = Some(at);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationStatus {
    Pending,
    Accepted,
    Denied,
    Withdrawn,
}

impl ApplicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Accepted => "accepted",
            ApplicationStatus::Denied => "denied",
            ApplicationStatus::Withdrawn => "withdrawn",
        }
    }
}

/// What an application is for: the exclusive contractor slot on a
/// project, or a seat on a gig.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "id")]
pub enum ApplicationTarget {
    Project(String),
    Gig(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub target: ApplicationTarget,
    pub applicant_id: String,
    pub status: ApplicationStatus,
    pub message: String,
    pub decided_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A short-term work assignment posted by a contractor, applied to by
/// workers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Gig {
    pub id: String,
    pub project_id: String,
    pub posted_by: String,
    pub title: String,
    pub description: String,
    pub pay_cents: i64,
    pub workers: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    Pending,
    Approved,
    Rejected,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::Pending => "pending",
            ContractStatus::Approved => "approved",
            ContractStatus::Rejected => "rejected",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContractSignature {
    pub user_id: String,
    pub signed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Contract {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub terms: String,
    pub total_budget_cents: i64,
    pub currency: String,
    pub status: ContractStatus,
    pub required_signers: Vec<String>,
    pub signatures: Vec<ContractSignature>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    pub fn has_signed(&self, user_id: &str) -> bool {
        self.signatures.iter().any(|s| s.user_id == user_id)
    }

    pub fn fully_signed(&self) -> bool {
        self.required_signers.iter().all(|s| self.has_signed(s))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// One line of the global, ordered audit trail.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub actor: String,
    pub entity: String,
    pub action: String,
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MilestoneDraft {
    pub name: String,
    pub amount_cents: i64,
    pub description: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewProject {
    pub title: String,
    pub description: String,
    pub project_type: String,
    pub estimated_budget_cents: i64,
    pub timeline: String,
    pub address: String,
    pub site: GeoPoint,
    pub milestones: Vec<MilestoneDraft>,
    #[serde(default)]
    pub media: Vec<MediaItem>,
}

/// Homeowner-editable project fields; absent fields are left alone.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProjectEdits {
    pub title: Option<String>,
    pub description: Option<String>,
    pub project_type: Option<String>,
    pub estimated_budget_cents: Option<i64>,
    pub timeline: Option<String>,
    pub address: Option<String>,
    pub site: Option<GeoPoint>,
}
