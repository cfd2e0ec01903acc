use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::access::{AccessError, AccessMode, CallerIdentity};
use super::commission::BrokerId;
use super::domain::{RecordId, SalePatch, SaleRecord, SignerTracking, TaxId};
use super::lifecycle::SkipReason;
use super::repository::{DraftCache, RepositoryError, SaleRepository, SignatureWorkflow};
use super::service::{FinalizeRequest, PersistOutcome, SaleRecordService, SaleServiceError};
use super::session::{SaleSession, SessionContext};
use super::share::ShareLinkParams;

pub const CALLER_HEADER: &str = "x-caller-cpf";
pub const SELECTED_BROKER_HEADER: &str = "x-selected-broker";

/// Router builder exposing the sale record endpoints.
pub fn sale_router<R, S, C>(service: Arc<SaleRecordService<R, S, C>>) -> Router
where
    R: SaleRepository + 'static,
    S: SignatureWorkflow + 'static,
    C: DraftCache + 'static,
{
    Router::new()
        .route("/api/v1/sales", post(create_handler::<R, S, C>))
        .route("/api/v1/sales/prefill", post(prefill_handler::<R, S, C>))
        .route(
            "/api/v1/sales/:record_id",
            get(open_handler::<R, S, C>).patch(edit_handler::<R, S, C>),
        )
        .route(
            "/api/v1/sales/:record_id/share",
            post(share_handler::<R, S, C>),
        )
        .route(
            "/api/v1/sales/:record_id/finalize",
            post(finalize_handler::<R, S, C>),
        )
        .route(
            "/api/v1/sales/:record_id/signatures",
            post(signatures_handler::<R, S, C>),
        )
        .with_state(service)
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct LinkQuery {
    #[serde(default)]
    link: bool,
}

impl LinkQuery {
    fn mode(&self) -> AccessMode {
        AccessMode::from_link_flag(self.link)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct PrefillBody {
    token: String,
}

/// Record plus the editing state a client needs to render it.
#[derive(Debug, Serialize)]
struct RecordView<'a> {
    record: &'a SaleRecord,
    editable: bool,
    dirty: bool,
    access: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    missing_fields: Option<&'a [String]>,
}

impl<'a> RecordView<'a> {
    fn of(session: &'a SaleSession) -> Self {
        Self {
            record: session.record(),
            editable: session.is_editable(),
            dirty: session.is_dirty(),
            access: session.grant().mode.label(),
            missing_fields: None,
        }
    }

    fn after_save(session: &'a SaleSession, outcome: &'a PersistOutcome) -> Self {
        let mut view = Self::of(session);
        if let PersistOutcome::Skipped(SkipReason::MissingFields(fields)) = outcome {
            view.missing_fields = Some(fields);
        }
        view
    }
}

/// Status code for a service failure.
pub fn status_for(error: &SaleServiceError) -> StatusCode {
    match error {
        SaleServiceError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SaleServiceError::Access(AccessError::Denied { .. }) => StatusCode::FORBIDDEN,
        SaleServiceError::Access(AccessError::NotFound { .. })
        | SaleServiceError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
        SaleServiceError::Decode(_) => StatusCode::BAD_REQUEST,
        SaleServiceError::NotEditable { .. } => StatusCode::CONFLICT,
        SaleServiceError::TransientWrite(_)
        | SaleServiceError::Repository(RepositoryError::Unavailable(_)) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        SaleServiceError::Repository(RepositoryError::Rejected(_)) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub(crate) fn error_response(error: SaleServiceError) -> Response {
    let payload = json!({
        "error": error.to_string(),
    });
    (status_for(&error), axum::Json(payload)).into_response()
}

fn session_context(headers: &HeaderMap) -> Result<SessionContext, Response> {
    let cpf = headers
        .get(CALLER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(TaxId::new)
        .filter(|cpf| !cpf.is_empty())
        .ok_or_else(|| {
            let payload = json!({
                "error": format!("missing {CALLER_HEADER} header"),
            });
            (StatusCode::UNAUTHORIZED, axum::Json(payload)).into_response()
        })?;

    let mut context = SessionContext::new(CallerIdentity::new(cpf));
    let broker = headers
        .get(SELECTED_BROKER_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
        .map(|value| BrokerId(value.trim().to_string()));
    context.select_broker(broker);
    Ok(context)
}

async fn open<R, S, C>(
    service: &SaleRecordService<R, S, C>,
    headers: &HeaderMap,
    record_id: String,
    mode: AccessMode,
) -> Result<SaleSession, Response>
where
    R: SaleRepository + 'static,
    S: SignatureWorkflow + 'static,
    C: DraftCache + 'static,
{
    let context = session_context(headers)?;
    service
        .open_session(context, &RecordId(record_id), mode)
        .await
        .map_err(error_response)
}

pub(crate) async fn create_handler<R, S, C>(
    State(service): State<Arc<SaleRecordService<R, S, C>>>,
    headers: HeaderMap,
    axum::Json(patch): axum::Json<SalePatch>,
) -> Response
where
    R: SaleRepository + 'static,
    S: SignatureWorkflow + 'static,
    C: DraftCache + 'static,
{
    let context = match session_context(&headers) {
        Ok(context) => context,
        Err(response) => return response,
    };
    let mut session = service.start_session(context);
    let result = service
        .submit(&mut session, patch, service.write_timeout())
        .await;

    match result {
        Ok(outcome) => {
            let status = match outcome {
                PersistOutcome::Written(_) => StatusCode::CREATED,
                _ => StatusCode::ACCEPTED,
            };
            (status, axum::Json(RecordView::after_save(&session, &outcome))).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn open_handler<R, S, C>(
    State(service): State<Arc<SaleRecordService<R, S, C>>>,
    headers: HeaderMap,
    Path(record_id): Path<String>,
    Query(query): Query<LinkQuery>,
) -> Response
where
    R: SaleRepository + 'static,
    S: SignatureWorkflow + 'static,
    C: DraftCache + 'static,
{
    match open(service.as_ref(), &headers, record_id, query.mode()).await {
        Ok(session) => (StatusCode::OK, axum::Json(RecordView::of(&session))).into_response(),
        Err(response) => response,
    }
}

pub(crate) async fn edit_handler<R, S, C>(
    State(service): State<Arc<SaleRecordService<R, S, C>>>,
    headers: HeaderMap,
    Path(record_id): Path<String>,
    Query(query): Query<LinkQuery>,
    axum::Json(patch): axum::Json<SalePatch>,
) -> Response
where
    R: SaleRepository + 'static,
    S: SignatureWorkflow + 'static,
    C: DraftCache + 'static,
{
    let mut session = match open(service.as_ref(), &headers, record_id, query.mode()).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    let result = service
        .submit(&mut session, patch, service.write_timeout())
        .await;

    match result {
        Ok(outcome) => (
            StatusCode::OK,
            axum::Json(RecordView::after_save(&session, &outcome)),
        )
            .into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn share_handler<R, S, C>(
    State(service): State<Arc<SaleRecordService<R, S, C>>>,
    headers: HeaderMap,
    Path(record_id): Path<String>,
    Query(query): Query<LinkQuery>,
) -> Response
where
    R: SaleRepository + 'static,
    S: SignatureWorkflow + 'static,
    C: DraftCache + 'static,
{
    let opened = open(service.as_ref(), &headers, record_id.clone(), query.mode()).await;
    let mut session = match opened {
        Ok(session) => session,
        Err(response) => return response,
    };
    match service.share(&mut session, service.write_timeout()).await {
        Ok(token) => {
            let params = ShareLinkParams {
                id: Some(record_id),
                link: true,
                token: Some(token.clone()),
            };
            let payload = json!({
                "token": token,
                "query": params.to_query(),
            });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn prefill_handler<R, S, C>(
    State(service): State<Arc<SaleRecordService<R, S, C>>>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<PrefillBody>,
) -> Response
where
    R: SaleRepository + 'static,
    S: SignatureWorkflow + 'static,
    C: DraftCache + 'static,
{
    let context = match session_context(&headers) {
        Ok(context) => context,
        Err(response) => return response,
    };
    match service.prefill_session(context, &body.token) {
        Ok(session) => (StatusCode::OK, axum::Json(RecordView::of(&session))).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn finalize_handler<R, S, C>(
    State(service): State<Arc<SaleRecordService<R, S, C>>>,
    headers: HeaderMap,
    Path(record_id): Path<String>,
    Query(query): Query<LinkQuery>,
    axum::Json(request): axum::Json<FinalizeRequest>,
) -> Response
where
    R: SaleRepository + 'static,
    S: SignatureWorkflow + 'static,
    C: DraftCache + 'static,
{
    let mut session = match open(service.as_ref(), &headers, record_id, query.mode()).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    match service
        .finalize(&mut session, request, service.write_timeout())
        .await
    {
        Ok(outcome) => (StatusCode::OK, axum::Json(outcome)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn signatures_handler<R, S, C>(
    State(service): State<Arc<SaleRecordService<R, S, C>>>,
    headers: HeaderMap,
    Path(record_id): Path<String>,
    Query(query): Query<LinkQuery>,
    axum::Json(entries): axum::Json<Vec<SignerTracking>>,
) -> Response
where
    R: SaleRepository + 'static,
    S: SignatureWorkflow + 'static,
    C: DraftCache + 'static,
{
    let mut session = match open(service.as_ref(), &headers, record_id, query.mode()).await {
        Ok(session) => session,
        Err(response) => return response,
    };
    match service
        .record_signature_status(&mut session, entries, service.write_timeout())
        .await
    {
        Ok(()) => (StatusCode::OK, axum::Json(RecordView::of(&session))).into_response(),
        Err(error) => error_response(error),
    }
}
