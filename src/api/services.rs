use std::collections::BTreeMap;

use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use tracing::{info, warn};

use super::{
    error::ApiError,
    models::{
        AccountRequest, AccountView, BillingRecordView, EventAck, HealthResponse, JobStatusAck,
        JobStatusUpdate, JobView, SubscriptionRequest, SubscriptionResponse, UploadResponse,
    },
    state::AppState,
    utils::{account_id, content_type, media_type_for_key, parse_video_content_type, read_body, read_json},
    validation::{validate_account, validate_filename},
};
use crate::billing::PaymentEvent;
use crate::ledger::{Account, AccountPatch, Artifacts, BillingPlan, JobId, JobStatus, LedgerError};
use crate::lifecycle::{StatusReport, Submission};
use crate::pipeline::PipelineEvent;

async fn require_account(state: &AppState, id: &str) -> Result<Account, ApiError> {
    state
        .store
        .get_account(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("account {id}")))
}

fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::InvalidPayload(format!("invalid job id '{raw}'")))
}

/// Health check endpoint (GET /health)
///
/// Reports the record store, pipeline and payment components plus the
/// process counters. Returns 503 when the record store cannot be reached.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = BTreeMap::new();
    components.insert("api".to_string(), "healthy".to_string());

    let store_healthy = match state.store.health_check().await {
        Ok(()) => {
            components.insert(
                format!("store.{}", state.store.backend()),
                "healthy".to_string(),
            );
            true
        }
        Err(e) => {
            warn!(error = %e, "Record store health check failed");
            components.insert(
                format!("store.{}", state.store.backend()),
                format!("unhealthy: {e}"),
            );
            false
        }
    };
    components.insert("pipeline".to_string(), state.dispatcher.name().to_string());
    components.insert("payments".to_string(), state.billing.provider_name().to_string());

    let (status_code, overall_status) = if store_healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    let response = HealthResponse {
        status: overall_status.to_string(),
        components,
        metrics: state.metrics.snapshot(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}

/// Create or update the caller's profile (PUT /api/account)
///
/// A new account starts on the free tier with zero minutes and is announced
/// to the pipeline with an `account_created` event.
pub async fn upsert_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let id = account_id(&headers)?;
    let request: AccountRequest = read_json(&headers, body, state.max_json_bytes()).await?;
    validate_account(&request).map_err(|e| ApiError::InvalidPayload(e.to_string()))?;

    let patch = AccountPatch {
        email: request.email.map(|e| e.trim().to_string()),
        first_name: request.first_name,
        last_name: request.last_name,
        ..Default::default()
    };

    if state.store.get_account(&id).await?.is_some() {
        let account = state.store.update_account(&id, &patch).await?;
        return Ok((StatusCode::OK, Json(AccountView::from(account))));
    }

    let mut account = Account::new(id.clone());
    let created_at = account.created_at;
    patch.apply(&mut account, created_at);

    match state.store.create_account(&account).await {
        Ok(()) => {}
        // Created concurrently by another request
        Err(LedgerError::AccountExists(_)) => {
            let account = state.store.update_account(&id, &patch).await?;
            return Ok((StatusCode::OK, Json(AccountView::from(account))));
        }
        Err(e) => return Err(e.into()),
    }

    info!(account_id = %account.id, "Account created");
    let event = PipelineEvent::account_created(&account, &state.limits);
    let dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        if let Err(e) = dispatcher.notify(&event).await {
            warn!(error = %e, "Failed to send account_created event");
        }
    });

    Ok((StatusCode::CREATED, Json(AccountView::from(account))))
}

/// GET /api/account
pub async fn get_account(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let id = account_id(&headers)?;
    let account = require_account(&state, &id).await?;
    Ok(Json(AccountView::from(account)))
}

/// Minutes used and remaining in each band (GET /api/usage)
pub async fn get_usage(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let id = account_id(&headers)?;
    let account = require_account(&state, &id).await?;
    Ok(Json(state.limits.summarize(&account)))
}

/// Store a raw video body (POST /api/uploads/{filename})
///
/// The returned `videoFileUrl` is what a submission references.
pub async fn upload_video(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(filename): Path<String>,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let id = account_id(&headers)?;
    require_account(&state, &id).await?;

    let media_type = content_type(&headers)
        .ok_or_else(|| ApiError::UnsupportedMediaType("missing Content-Type header".into()))?;
    parse_video_content_type(media_type)?;
    validate_filename(&filename).map_err(|e| ApiError::InvalidPayload(e.to_string()))?;

    let data = read_body(body, state.max_upload_bytes()).await?;
    if data.is_empty() {
        return Err(ApiError::InvalidPayload("upload body is empty".into()));
    }

    let stored = state.storage.upload(&id, filename.trim(), data).await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            key: stored.key,
            video_file_url: stored.url,
            size: stored.size,
        }),
    ))
}

/// Submit a caption job (POST /api/jobs)
///
/// ## Flow:
/// 1. Validate duration, filename and caption options
/// 2. Gate the job on the account's usage snapshot (403 past the limit)
/// 3. Persist the job as `pending` with its watermark decision
/// 4. Dispatch to the pipeline; `processing` on success, `failed` otherwise
/// 5. Return 202 with the job id, watermark flag and a wait estimate
pub async fn submit_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let id = account_id(&headers)?;
    let mut submission: Submission = read_json(&headers, body, state.max_json_bytes()).await?;
    submission.account_id = id;

    let receipt = state.submissions.submit(submission).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

/// The caller's jobs, newest first (GET /api/jobs)
pub async fn list_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let id = account_id(&headers)?;
    require_account(&state, &id).await?;

    let jobs: Vec<JobView> = state
        .store
        .list_jobs(&id)
        .await?
        .into_iter()
        .map(JobView::from)
        .collect();
    Ok(Json(jobs))
}

/// GET /api/jobs/{job_id}
///
/// Another account's job is reported as missing.
pub async fn get_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = account_id(&headers)?;
    let job_id = parse_job_id(&job_id)?;

    let job = state
        .store
        .get_job(job_id)
        .await?
        .filter(|job| job.account_id == id)
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id}")))?;

    Ok(Json(JobView::from(job)))
}

/// Status callback from the pipeline (POST /api/webhooks/job-status)
pub async fn job_status_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let update: JobStatusUpdate = read_json(&headers, body, state.max_json_bytes()).await?;
    let status: JobStatus = update
        .status
        .parse()
        .map_err(ApiError::InvalidPayload)?;

    info!(job_id = update.job_id, %status, "Job status reported");

    let report = StatusReport {
        status: Some(status),
        outputs: Artifacts {
            caption_file: update.output_caption_file,
            video_file: update.output_video_file,
        },
        error_text: update.error_log,
    };
    let outcome = state.submissions.report(update.job_id, report).await?;

    Ok(Json(JobStatusAck {
        success: true,
        job_id: update.job_id,
        status: outcome.job().status,
    }))
}

/// Start a paid subscription (POST /api/subscriptions)
pub async fn create_subscription(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let id = account_id(&headers)?;
    let request: SubscriptionRequest = read_json(&headers, body, state.max_json_bytes()).await?;
    let plan = request.plan.unwrap_or(BillingPlan::Monthly);

    let started = state.billing.start_subscription(&id, plan).await?;
    Ok(Json(SubscriptionResponse {
        subscription_id: started.subscription_id,
        client_secret: started.client_secret,
    }))
}

/// Confirm a client-side payment (POST /api/payments/complete)
pub async fn complete_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let id = account_id(&headers)?;
    let account = state.billing.complete_payment(&id).await?;
    Ok(Json(AccountView::from(account)))
}

/// Payment provider events (POST /api/webhooks/payments)
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let event: PaymentEvent = read_json(&headers, body, state.max_json_bytes()).await?;
    state.billing.handle_event(&event).await?;
    Ok(Json(EventAck { received: true }))
}

/// GET /api/billing
pub async fn list_billing(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let id = account_id(&headers)?;
    let records: Vec<BillingRecordView> = state
        .billing
        .history(&id)
        .await?
        .into_iter()
        .map(BillingRecordView::from)
        .collect();
    Ok(Json(records))
}

/// Serve an uploaded object (GET /files/{*key})
pub async fn serve_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let data = state.storage.download(&key).await?;
    Ok(([(header::CONTENT_TYPE, media_type_for_key(&key))], data))
}
