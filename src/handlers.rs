use std::sync::Arc;

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::{self, AuthUser};
use crate::config::AppConfig;
use crate::error::EngineError;
use crate::models::{
    ContractStatus, NewProject, PaymentMethod, ProjectEdits, UserRole,
};
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<Store>,
}

fn require_role(user: &AuthUser, role: UserRole) -> Result<(), EngineError> {
    if user.role != role && user.role != UserRole::Admin {
        return Err(EngineError::Forbidden(format!(
            "this action requires the {role:?} role"
        )));
    }
    Ok(())
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub user_id: String,
    pub role: UserRole,
}

/// Demo token mint. A real deployment fronts this with the actual
/// identity provider.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<Value>, EngineError> {
    let token = auth::create_token(&req.user_id, req.role, &state.config.jwt_secret)
        .map_err(|e| EngineError::Validation(format!("could not issue token: {e}")))?;
    log::info!("Issued token for {} ({:?})", req.user_id, req.role);
    Ok(Json(json!({ "success": true, "token": token })))
}

// ---- Projects ----

pub async fn create_project(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<NewProject>,
) -> Result<Json<Value>, EngineError> {
    require_role(&user, UserRole::Homeowner)?;
    let project = state.store.create_project(&user.id, req)?;
    log::info!("Project {} created by {}", project.id, user.id);
    Ok(Json(json!({ "success": true, "project": project })))
}

pub async fn list_projects(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "success": true, "projects": state.store.list_projects() }))
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<Value>, EngineError> {
    let project = state.store.get_project(&project_id)?;
    let ledger = state.store.ledger(&project_id)?;
    Ok(Json(json!({ "success": true, "project": project, "ledger": ledger })))
}

pub async fn update_project(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(project_id): Path<String>,
    Json(edits): Json<ProjectEdits>,
) -> Result<Json<Value>, EngineError> {
    let project = state.store.update_project(&project_id, &user.id, edits)?;
    Ok(Json(json!({ "success": true, "project": project })))
}

pub async fn delete_project(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(project_id): Path<String>,
) -> Result<Json<Value>, EngineError> {
    state.store.delete_project(&project_id, &user.id)?;
    log::info!("Project {} deleted by {}", project_id, user.id);
    Ok(Json(json!({ "success": true, "message": "Project deleted" })))
}

// ---- Escrow ----

#[derive(Deserialize)]
pub struct FundRequest {
    pub amount_cents: i64,
    pub payment_method: PaymentMethod,
    pub terms_accepted: bool,
    pub idempotency_key: String,
}

pub async fn fund_project(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(project_id): Path<String>,
    Json(req): Json<FundRequest>,
) -> Result<Json<Value>, EngineError> {
    let receipt = state.store.fund_project(
        &project_id,
        &user.id,
        req.amount_cents,
        req.payment_method,
        req.terms_accepted,
        &req.idempotency_key,
    )?;
    let ledger = state.store.ledger(&project_id)?;
    log::info!("Project {} funded with {} cents by {}", project_id, req.amount_cents, user.id);
    Ok(Json(json!({ "success": true, "receipt": receipt, "ledger": ledger })))
}

// ---- Milestones ----

#[derive(Deserialize)]
pub struct SubmitMilestoneRequest {
    pub description: String,
    pub photos: Vec<String>,
}

pub async fn submit_milestone(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(milestone_id): Path<String>,
    Json(req): Json<SubmitMilestoneRequest>,
) -> Result<Json<Value>, EngineError> {
    require_role(&user, UserRole::Contractor)?;
    let milestone =
        state
            .store
            .submit_milestone(&milestone_id, &user.id, &req.description, &req.photos)?;
    Ok(Json(json!({ "success": true, "milestone": milestone })))
}

pub async fn approve_milestone(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(milestone_id): Path<String>,
) -> Result<Json<Value>, EngineError> {
    let milestone = state.store.approve_milestone(&milestone_id, &user.id)?;
    log::info!("Milestone {} approved by {}", milestone_id, user.id);
    Ok(Json(json!({ "success": true, "milestone": milestone })))
}

#[derive(Deserialize)]
pub struct RequestChangesRequest {
    pub note: String,
}

pub async fn request_changes(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(milestone_id): Path<String>,
    Json(req): Json<RequestChangesRequest>,
) -> Result<Json<Value>, EngineError> {
    let milestone = state.store.request_changes(&milestone_id, &user.id, &req.note)?;
    Ok(Json(json!({ "success": true, "milestone": milestone })))
}

// ---- Check-in ----

#[derive(Deserialize)]
pub struct CheckInRequest {
    pub project_id: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

pub async fn check_in(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CheckInRequest>,
) -> Result<Json<Value>, EngineError> {
    let session = state
        .store
        .check_in(&req.project_id, &user.id, user.role, req.lat, req.lng)?;
    log::info!(
        "{} checked in to {} at {:.0}m from site",
        user.id,
        req.project_id,
        session.distance_m
    );
    Ok(Json(json!({ "success": true, "check_in": session })))
}

#[derive(Deserialize)]
pub struct CheckOutRequest {
    pub project_id: String,
    pub check_in_id: String,
}

pub async fn check_out(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CheckOutRequest>,
) -> Result<Json<Value>, EngineError> {
    let session = state
        .store
        .check_out(&req.project_id, &user.id, &req.check_in_id)?;
    let elapsed = session.duration_seconds.unwrap_or(0);
    Ok(Json(json!({
        "success": true,
        "check_in": session,
        "duration": crate::checkin::format_duration(elapsed),
    })))
}

pub async fn check_in_status(
    State(state): State<AppState>,
    Path((project_id, user_id)): Path<(String, String)>,
) -> Json<Value> {
    let status = state.store.check_in_status(&project_id, &user_id);
    Json(json!({ "success": true, "status": status }))
}

// ---- Applications ----

#[derive(Deserialize)]
pub struct ApplyRequest {
    pub project_id: Option<String>,
    pub gig_id: Option<String>,
    #[serde(default)]
    pub message: String,
}

pub async fn apply(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<ApplyRequest>,
) -> Result<Json<Value>, EngineError> {
    let application = match (req.project_id, req.gig_id) {
        (Some(project_id), None) => {
            require_role(&user, UserRole::Contractor)?;
            state.store.apply_to_project(&project_id, &user.id, &req.message)?
        }
        (None, Some(gig_id)) => {
            require_role(&user, UserRole::Worker)?;
            state.store.apply_to_gig(&gig_id, &user.id, &req.message)?
        }
        _ => {
            return Err(EngineError::Validation(
                "exactly one of project_id or gig_id is required".to_string(),
            ))
        }
    };
    Ok(Json(json!({ "success": true, "application": application })))
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecideAction {
    Accept,
    Deny,
}

#[derive(Deserialize)]
pub struct DecideRequest {
    pub action: DecideAction,
}

pub async fn decide_application(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(application_id): Path<String>,
    Json(req): Json<DecideRequest>,
) -> Result<Json<Value>, EngineError> {
    let accept = matches!(req.action, DecideAction::Accept);
    let application = state.store.decide_application(&application_id, &user.id, accept)?;
    log::info!(
        "Application {} {} by {}",
        application_id,
        application.status.as_str(),
        user.id
    );
    Ok(Json(json!({ "success": true, "application": application })))
}

pub async fn withdraw_application(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(application_id): Path<String>,
) -> Result<Json<Value>, EngineError> {
    let application = state.store.withdraw_application(&application_id, &user.id)?;
    Ok(Json(json!({ "success": true, "application": application })))
}

// ---- Gigs ----

#[derive(Deserialize)]
pub struct PostGigRequest {
    pub project_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub pay_cents: i64,
}

pub async fn post_gig(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<PostGigRequest>,
) -> Result<Json<Value>, EngineError> {
    require_role(&user, UserRole::Contractor)?;
    let gig = state
        .store
        .post_gig(&req.project_id, &user.id, &req.title, &req.description, req.pay_cents)?;
    Ok(Json(json!({ "success": true, "gig": gig })))
}

pub async fn list_gigs(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "success": true, "gigs": state.store.list_gigs() }))
}

// ---- Contracts ----

#[derive(Deserialize)]
pub struct CreateContractRequest {
    pub project_id: String,
    pub title: String,
    pub terms: String,
    pub total_budget_cents: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub required_signers: Vec<String>,
}

fn default_currency() -> String {
    "USD".to_string()
}

pub async fn create_contract(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateContractRequest>,
) -> Result<Json<Value>, EngineError> {
    let contract = state.store.create_contract(
        &req.project_id,
        &user.id,
        &req.title,
        &req.terms,
        req.total_budget_cents,
        &req.currency,
        req.required_signers,
    )?;
    Ok(Json(json!({ "success": true, "contract": contract })))
}

pub async fn get_contract(
    State(state): State<AppState>,
    Path(contract_id): Path<String>,
) -> Result<Json<Value>, EngineError> {
    let contract = state.store.get_contract(&contract_id)?;
    Ok(Json(json!({ "success": true, "contract": contract })))
}

pub async fn sign_contract(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(contract_id): Path<String>,
) -> Result<Json<Value>, EngineError> {
    let contract = state.store.sign_contract(&contract_id, &user.id)?;
    log::info!("Contract {} signed by {}", contract_id, user.id);
    Ok(Json(json!({ "success": true, "contract": contract })))
}

#[derive(Deserialize)]
pub struct ContractStatusRequest {
    pub status: ContractStatus,
}

pub async fn set_contract_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(contract_id): Path<String>,
    Json(req): Json<ContractStatusRequest>,
) -> Result<Json<Value>, EngineError> {
    let contract = state.store.set_contract_status(&contract_id, &user.id, req.status)?;
    Ok(Json(json!({ "success": true, "contract": contract })))
}

// ---- Notifications ----

pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, EngineError> {
    if user.id != user_id && user.role != UserRole::Admin {
        return Err(EngineError::Forbidden(
            "you can only read your own notifications".to_string(),
        ));
    }
    Ok(Json(json!({
        "success": true,
        "notifications": state.store.notifications_for(&user_id),
    })))
}

#[derive(Deserialize)]
pub struct MarkReadRequest {
    pub ids: Vec<String>,
}

pub async fn mark_read(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<MarkReadRequest>,
) -> Result<Json<Value>, EngineError> {
    let changed = state.store.mark_read(&user.id, &req.ids);
    Ok(Json(json!({ "success": true, "marked": changed })))
}

// ---- Admin ----

pub async fn audit_log(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Value>, EngineError> {
    require_role(&user, UserRole::Admin)?;
    Ok(Json(json!({ "success": true, "audit": state.store.audit_log() })))
}

pub async fn analytics(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Value>, EngineError> {
    require_role(&user, UserRole::Admin)?;
    Ok(Json(json!({ "success": true, "analytics": state.store.analytics() })))
}
