//! REST API handlers for protocol operations

use crate::api::websocket::WsBroadcaster;
use crate::clock::{format_timestamp, Timestamp};
use crate::crypto::hash_parts;
use crate::events::EventRecord;
use crate::guardian::{GuardianError, KeyBlob, ProtectedAccount};
use crate::identity::{call_message, Address, CallParams, Principal, SELF_TARGET};
use crate::monitor::{MonitorError, TransactionPattern};
use crate::protocol::{AccountManager, ProtocolError};
use crate::recovery::{ApprovalOutcome, RecoveryError, RecoverySnapshot};
use crate::storage::Storage;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Max distance between a signed call's `issued_at` and server time
pub const MAX_CALL_SKEW_SECS: u64 = 300;

pub const OP_CREATE_ACCOUNT: &str = "create_account";
pub const OP_ADD_GUARDIAN: &str = "add_guardian";
pub const OP_UPDATE_THRESHOLD: &str = "update_threshold";
pub const OP_SET_PATTERN: &str = "set_pattern";
pub const OP_INITIATE_RECOVERY: &str = "initiate_recovery";
pub const OP_APPROVE_RECOVERY: &str = "approve_recovery";
pub const OP_EXPIRE_RECOVERY: &str = "expire_recovery";

/// Shared application state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<RwLock<AccountManager>>,
    pub storage: Arc<Storage>,
    pub ws_broadcaster: Arc<WsBroadcaster>,
    /// Signed calls already accepted, by digest, with their `issued_at`
    pub seen_calls: Arc<Mutex<HashMap<String, Timestamp>>>,
}

impl ApiState {
    pub fn new(manager: AccountManager, storage: Storage) -> Self {
        Self {
            manager: Arc::new(RwLock::new(manager)),
            storage: Arc::new(storage),
            ws_broadcaster: Arc::new(WsBroadcaster::new()),
            seen_calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Persist state after a mutation and push its records to subscribers.
    ///
    /// The call is already applied in memory, so subscribers get the records
    /// either way; a failed save is reported to the caller as a 500.
    fn committed(
        &self,
        manager: &AccountManager,
        records: &[EventRecord],
    ) -> Result<(), (StatusCode, Json<ApiError>)> {
        let saved = self.storage.save(manager);
        self.ws_broadcaster.publish(records);

        saved.map_err(|e| {
            log::error!("Failed to save protocol state: {}", e);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Call applied but state not saved: {}", e),
            )
        })
    }

    /// Verify a signed call for `operation` on `target` and mark it used
    async fn authenticate(
        &self,
        call: &impl SignedCall,
        operation: &str,
        target: &str,
        now: Timestamp,
    ) -> Result<Principal, (StatusCode, Json<ApiError>)> {
        let auth = call.auth();
        if auth.issued_at.abs_diff(now) > MAX_CALL_SKEW_SECS {
            return Err(api_error(
                StatusCode::UNAUTHORIZED,
                format!("Stale call: issued at {}, server time {}", auth.issued_at, now),
            ));
        }

        let message = call_message(operation, target, auth.issued_at, &call.params());
        let caller = Principal::authenticate(&auth.public_key, &message, &auth.signature)
            .map_err(|e| {
                api_error(
                    StatusCode::UNAUTHORIZED,
                    format!("Authentication failed: {}", e),
                )
            })?;

        let digest = hash_parts(&[caller.address().as_str().as_bytes(), message.as_slice()]);
        let mut seen = self.seen_calls.lock().await;
        seen.retain(|_, issued_at| issued_at.abs_diff(now) <= MAX_CALL_SKEW_SECS);
        if seen.insert(digest, auth.issued_at).is_some() {
            log::warn!("Rejected replayed {} call from {}", operation, caller.address());
            return Err(api_error(StatusCode::UNAUTHORIZED, "Replayed call"));
        }

        Ok(caller)
    }
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub owner: Address,
    pub guardians: Vec<Address>,
    pub threshold: u32,
    pub is_active: bool,
    pub encrypted_key: String,
    pub created_at: String,
}

impl From<&ProtectedAccount> for AccountResponse {
    fn from(account: &ProtectedAccount) -> Self {
        Self {
            owner: account.owner.clone(),
            guardians: account.guardians().to_vec(),
            threshold: account.threshold(),
            is_active: account.is_active,
            encrypted_key: account.encrypted_key.to_hex(),
            created_at: format_timestamp(account.created_at),
        }
    }
}

/// Value of a mutating call with the ledger records it appended
#[derive(Debug, Serialize)]
pub struct CallResponse<T> {
    #[serde(flatten)]
    pub result: T,
    pub events: Vec<EventRecord>,
}

#[derive(Debug, Serialize)]
pub struct GuardianCountResponse {
    pub guardians: usize,
}

#[derive(Debug, Serialize)]
pub struct ThresholdResponse {
    pub threshold: u32,
}

#[derive(Debug, Serialize)]
pub struct IsGuardianResponse {
    pub account: Address,
    pub candidate: Address,
    pub is_guardian: bool,
}

#[derive(Debug, Serialize)]
pub struct PatternResponse {
    pub account: Address,
    pub frequency: u32,
    pub max_amount: String,
    pub time_window: u64,
}

impl PatternResponse {
    fn new(account: Address, pattern: &TransactionPattern) -> Self {
        Self {
            account,
            frequency: pattern.frequency,
            max_amount: pattern.max_amount.to_string(),
            time_window: pattern.time_window,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TransferCheckResponse {
    pub account: Address,
    pub amount: String,
    pub allowed: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApprovalResponse {
    pub completed: bool,
    pub approvals: usize,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub total: usize,
    pub latest_hash: String,
    pub records: Vec<EventRecord>,
}

// ============================================================================
// Request Types
// ============================================================================

/// Proof that the caller holds the key of the address it acts as
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CallerAuth {
    pub public_key: String,
    pub signature: String,
    pub issued_at: Timestamp,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateAccountRequest {
    pub auth: CallerAuth,
    pub guardians: Vec<String>,
    pub threshold: u32,
    /// Hex key blob; a random one is generated when absent
    pub key_blob: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AddGuardianRequest {
    pub auth: CallerAuth,
    pub guardian: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UpdateThresholdRequest {
    pub auth: CallerAuth,
    pub threshold: u32,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SetPatternRequest {
    pub auth: CallerAuth,
    pub frequency: u32,
    pub max_amount: String,
    pub time_window: u64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TransferCheckRequest {
    pub account: String,
    pub amount: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RecoveryCallRequest {
    pub auth: CallerAuth,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub since: Option<u64>,
    pub account: Option<String>,
}

/// A request whose arguments are covered by the caller's signature
pub trait SignedCall {
    fn auth(&self) -> &CallerAuth;

    /// Arguments bound into the signed message, in a fixed order
    fn params(&self) -> CallParams;
}

impl SignedCall for CreateAccountRequest {
    fn auth(&self) -> &CallerAuth {
        &self.auth
    }

    fn params(&self) -> CallParams {
        CallParams::new()
            .with_list(&self.guardians)
            .with_u32(self.threshold)
            .with_option(self.key_blob.as_deref())
    }
}

impl SignedCall for AddGuardianRequest {
    fn auth(&self) -> &CallerAuth {
        &self.auth
    }

    fn params(&self) -> CallParams {
        CallParams::new().with(&self.guardian)
    }
}

impl SignedCall for UpdateThresholdRequest {
    fn auth(&self) -> &CallerAuth {
        &self.auth
    }

    fn params(&self) -> CallParams {
        CallParams::new().with_u32(self.threshold)
    }
}

impl SignedCall for SetPatternRequest {
    fn auth(&self) -> &CallerAuth {
        &self.auth
    }

    fn params(&self) -> CallParams {
        CallParams::new()
            .with_u32(self.frequency)
            .with(&self.max_amount)
            .with_u64(self.time_window)
    }
}

impl SignedCall for RecoveryCallRequest {
    fn auth(&self) -> &CallerAuth {
        &self.auth
    }

    fn params(&self) -> CallParams {
        CallParams::new()
    }
}

// ============================================================================
// Errors and authentication
// ============================================================================

fn api_error(status: StatusCode, error: impl Into<String>) -> (StatusCode, Json<ApiError>) {
    (
        status,
        Json(ApiError {
            error: error.into(),
        }),
    )
}

fn status_for(err: &ProtocolError) -> StatusCode {
    match err {
        ProtocolError::Guardian(e) => match e {
            GuardianError::InvalidThreshold { .. }
            | GuardianError::DuplicateGuardian(_)
            | GuardianError::InvalidKeyBlob(_) => StatusCode::BAD_REQUEST,
            GuardianError::DuplicateAccount(_) | GuardianError::AlreadyGuardian(_) => {
                StatusCode::CONFLICT
            }
            GuardianError::AccountNotFound(_) => StatusCode::NOT_FOUND,
            GuardianError::NotOwner(_) => StatusCode::FORBIDDEN,
        },
        ProtocolError::Monitor(MonitorError::PatternNotSet(_)) => StatusCode::NOT_FOUND,
        ProtocolError::Recovery(e) => match e {
            RecoveryError::NotGuardian(_) => StatusCode::FORBIDDEN,
            RecoveryError::NoActiveRecovery(_) => StatusCode::NOT_FOUND,
            RecoveryError::RecoveryInProgress(_)
            | RecoveryError::AlreadyApproved(_)
            | RecoveryError::RecoveryNotExpired { .. } => StatusCode::CONFLICT,
            RecoveryError::RecoveryTimeout { .. } => StatusCode::GONE,
        },
        ProtocolError::EventLog(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn protocol_error(err: ProtocolError) -> (StatusCode, Json<ApiError>) {
    api_error(status_for(&err), err.to_string())
}

fn parse_amount(raw: &str) -> Result<u128, (StatusCode, Json<ApiError>)> {
    raw.parse()
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, format!("Invalid amount: {}", raw)))
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health - Health check
pub async fn health_check() -> &'static str {
    "OK"
}

/// GET /api/accounts - List protected accounts
pub async fn list_accounts(State(state): State<ApiState>) -> Json<Vec<AccountResponse>> {
    let manager = state.manager.read().await;
    Json(manager.accounts().into_iter().map(AccountResponse::from).collect())
}

/// POST /api/accounts - Create the caller's protected account
pub async fn create_account(
    State(state): State<ApiState>,
    Json(req): Json<CreateAccountRequest>,
) -> ApiResult<CallResponse<AccountResponse>> {
    let key_blob = match &req.key_blob {
        Some(hex_blob) => KeyBlob::from_hex(hex_blob)
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?,
        None => KeyBlob::random(),
    };

    let mut manager = state.manager.write().await;
    let caller = state
        .authenticate(&req, OP_CREATE_ACCOUNT, SELF_TARGET, manager.now())
        .await?;
    let guardians = req.guardians.into_iter().map(Address::from).collect();

    let receipt = manager
        .create_account(&caller, key_blob, guardians, req.threshold)
        .map_err(protocol_error)?;
    state.committed(&manager, &receipt.events)?;

    Ok(Json(CallResponse {
        result: AccountResponse::from(&receipt.value),
        events: receipt.events,
    }))
}

/// GET /api/accounts/{address} - Get a protected account
pub async fn get_account(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> ApiResult<AccountResponse> {
    let manager = state.manager.read().await;
    manager
        .account(&Address::from(address.as_str()))
        .map(|account| Json(AccountResponse::from(account)))
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                format!("Account {} not found", address),
            )
        })
}

/// POST /api/accounts/{address}/guardians - Add a guardian
pub async fn add_guardian(
    State(state): State<ApiState>,
    Path(address): Path<String>,
    Json(req): Json<AddGuardianRequest>,
) -> ApiResult<CallResponse<GuardianCountResponse>> {
    let account = Address::from(address.as_str());

    let mut manager = state.manager.write().await;
    let caller = state
        .authenticate(&req, OP_ADD_GUARDIAN, &address, manager.now())
        .await?;

    let receipt = manager
        .add_guardian(&caller, &account, Address::from(req.guardian))
        .map_err(protocol_error)?;
    state.committed(&manager, &receipt.events)?;

    Ok(Json(CallResponse {
        result: GuardianCountResponse {
            guardians: receipt.value,
        },
        events: receipt.events,
    }))
}

/// PUT /api/accounts/{address}/threshold - Change the threshold
pub async fn update_threshold(
    State(state): State<ApiState>,
    Path(address): Path<String>,
    Json(req): Json<UpdateThresholdRequest>,
) -> ApiResult<CallResponse<ThresholdResponse>> {
    let account = Address::from(address.as_str());

    let mut manager = state.manager.write().await;
    let caller = state
        .authenticate(&req, OP_UPDATE_THRESHOLD, &address, manager.now())
        .await?;

    let receipt = manager
        .update_threshold(&caller, &account, req.threshold)
        .map_err(protocol_error)?;
    state.committed(&manager, &receipt.events)?;

    Ok(Json(CallResponse {
        result: ThresholdResponse {
            threshold: receipt.value,
        },
        events: receipt.events,
    }))
}

/// GET /api/accounts/{address}/guardians/{candidate} - Membership query
pub async fn is_guardian(
    State(state): State<ApiState>,
    Path((address, candidate)): Path<(String, String)>,
) -> Json<IsGuardianResponse> {
    let manager = state.manager.read().await;
    let account = Address::from(address);
    let candidate = Address::from(candidate);
    let is_guardian = manager.is_guardian(&account, &candidate);

    Json(IsGuardianResponse {
        account,
        candidate,
        is_guardian,
    })
}

/// PUT /api/patterns - Set the caller's transfer pattern
pub async fn set_pattern(
    State(state): State<ApiState>,
    Json(req): Json<SetPatternRequest>,
) -> ApiResult<PatternResponse> {
    let max_amount = parse_amount(&req.max_amount)?;

    let mut manager = state.manager.write().await;
    let caller = state
        .authenticate(&req, OP_SET_PATTERN, SELF_TARGET, manager.now())
        .await?;

    let receipt = manager.set_pattern(&caller, req.frequency, max_amount, req.time_window);
    state.committed(&manager, &receipt.events)?;

    Ok(Json(PatternResponse::new(
        caller.address().clone(),
        &receipt.value,
    )))
}

/// GET /api/patterns/{address} - Get an account's pattern
pub async fn get_pattern(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> ApiResult<PatternResponse> {
    let manager = state.manager.read().await;
    let account = Address::from(address);

    match manager.pattern(&account) {
        Some(pattern) => Ok(Json(PatternResponse::new(account, pattern))),
        None => Err(protocol_error(MonitorError::PatternNotSet(account).into())),
    }
}

/// POST /api/transfers/check - Run the anomaly gate
pub async fn check_transfer(
    State(state): State<ApiState>,
    Json(req): Json<TransferCheckRequest>,
) -> ApiResult<CallResponse<TransferCheckResponse>> {
    let amount = parse_amount(&req.amount)?;
    let account = Address::from(req.account);

    let mut manager = state.manager.write().await;
    let receipt = manager
        .check_transaction(&account, amount)
        .map_err(protocol_error)?;
    state.committed(&manager, &receipt.events)?;

    Ok(Json(CallResponse {
        result: TransferCheckResponse {
            account,
            amount: amount.to_string(),
            allowed: receipt.value.is_allowed(),
            reason: receipt.value.reason().map(|r| r.to_string()),
        },
        events: receipt.events,
    }))
}

/// POST /api/recovery/{address}/initiate - Open a recovery request
pub async fn initiate_recovery(
    State(state): State<ApiState>,
    Path(address): Path<String>,
    Json(req): Json<RecoveryCallRequest>,
) -> ApiResult<CallResponse<RecoverySnapshot>> {
    let account = Address::from(address.as_str());

    let mut manager = state.manager.write().await;
    let caller = state
        .authenticate(&req, OP_INITIATE_RECOVERY, &address, manager.now())
        .await?;

    let receipt = manager
        .initiate_recovery(&caller, &account)
        .map_err(protocol_error)?;
    state.committed(&manager, &receipt.events)?;

    Ok(Json(CallResponse {
        result: receipt.value,
        events: receipt.events,
    }))
}

/// POST /api/recovery/{address}/approve - Approve the active request
pub async fn approve_recovery(
    State(state): State<ApiState>,
    Path(address): Path<String>,
    Json(req): Json<RecoveryCallRequest>,
) -> ApiResult<CallResponse<ApprovalResponse>> {
    let account = Address::from(address.as_str());

    let mut manager = state.manager.write().await;
    let caller = state
        .authenticate(&req, OP_APPROVE_RECOVERY, &address, manager.now())
        .await?;

    let receipt = manager
        .approve_recovery(&caller, &account)
        .map_err(protocol_error)?;
    state.committed(&manager, &receipt.events)?;

    let approvals = match receipt.value {
        ApprovalOutcome::Approved { approvals, .. } | ApprovalOutcome::Completed { approvals } => {
            approvals
        }
    };

    Ok(Json(CallResponse {
        result: ApprovalResponse {
            completed: receipt.value.is_completed(),
            approvals,
        },
        events: receipt.events,
    }))
}

/// POST /api/recovery/{address}/expire - Close a timed-out request
pub async fn expire_recovery(
    State(state): State<ApiState>,
    Path(address): Path<String>,
    Json(req): Json<RecoveryCallRequest>,
) -> ApiResult<CallResponse<RecoverySnapshot>> {
    let account = Address::from(address.as_str());

    let mut manager = state.manager.write().await;
    let caller = state
        .authenticate(&req, OP_EXPIRE_RECOVERY, &address, manager.now())
        .await?;

    let receipt = manager
        .expire_recovery(&caller, &account)
        .map_err(protocol_error)?;
    state.committed(&manager, &receipt.events)?;

    Ok(Json(CallResponse {
        result: receipt.value,
        events: receipt.events,
    }))
}

/// GET /api/recovery/{address} - Recovery request snapshot
pub async fn get_recovery(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> ApiResult<RecoverySnapshot> {
    let manager = state.manager.read().await;
    manager
        .recovery_request(&Address::from(address.as_str()))
        .map(Json)
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                format!("No recovery request for {}", address),
            )
        })
}

/// GET /api/events?since=N&account=A - Ledger records from sequence N,
/// optionally only those of one account
pub async fn get_events(
    State(state): State<ApiState>,
    Query(query): Query<EventsQuery>,
) -> Json<EventsResponse> {
    let manager = state.manager.read().await;
    let log = manager.event_log();
    let since = query.since.unwrap_or(0);

    let records = match query.account {
        Some(account) => manager
            .account_events(&Address::from(account), since)
            .into_iter()
            .cloned()
            .collect(),
        None => manager.events(since).to_vec(),
    };

    Json(EventsResponse {
        total: log.len(),
        latest_hash: log.latest_hash(),
        records,
    })
}

/// GET /api/guardians/{address}/accounts - Accounts the address guards
pub async fn guarded_accounts(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> Json<Vec<AccountResponse>> {
    let manager = state.manager.read().await;
    Json(
        manager
            .guarded_by(&Address::from(address))
            .into_iter()
            .map(AccountResponse::from)
            .collect(),
    )
}
