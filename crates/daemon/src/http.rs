use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use fleet_core::api::{
    CommandResultRequest, CommandResultResponse, ErrorResponse, ExecuteRequest, ExecuteResponse,
    LatestResultResponse, MachinesResponse, PendingCommandsResponse, RegisterMachineRequest,
    RegisterMachineResponse, RegisterScriptRequest, RegisterScriptResponse,
};
use fleet_core::dispatch::Dispatcher;
use fleet_core::error::DispatchError;
use fleet_core::model::CommandId;
use fleet_core::now_ms;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    dispatcher: Dispatcher,
    operator_token: Option<Arc<str>>,
}

/// Build the daemon router. When `operator_token` is set, script registration
/// and execution require `Authorization: Bearer <token>`; agent routes stay open.
pub fn router(dispatcher: Dispatcher, operator_token: Option<String>) -> Router {
    let state = AppState {
        dispatcher,
        operator_token: operator_token.map(Arc::from),
    };

    let operator = Router::new()
        .route("/v1/scripts", post(register_script))
        .route("/v1/execute", post(execute))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_operator,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/machines", get(list_machines))
        .route("/v1/machines/register", post(register_machine))
        .route("/v1/machines/{name}/latest", get(latest_by_name))
        .route("/v1/commands/{id}", get(pending_commands))
        .route("/v1/commands/{id}/result", post(command_result))
        .route("/v1/results/{machine_id}/latest", get(latest_result))
        .merge(operator)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn require_operator(
    State(st): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = st.operator_token.as_deref() else {
        return next.run(req).await;
    };
    let authorized = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        == Some(expected);
    if authorized {
        return next.run(req).await;
    }

    tracing::warn!(path = %req.uri().path(), "operator request without a valid token");
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: "missing or invalid operator token".to_string(),
            kind: "unauthorized".to_string(),
        }),
    )
        .into_response()
}

async fn healthz() -> &'static str {
    "ok"
}

async fn list_machines(State(st): State<AppState>) -> Result<Json<MachinesResponse>, AppError> {
    let machines = st.dispatcher.active_machines(now_ms()).await?;
    Ok(Json(MachinesResponse { machines }))
}

async fn register_machine(
    State(st): State<AppState>,
    Json(req): Json<RegisterMachineRequest>,
) -> Result<Json<RegisterMachineResponse>, AppError> {
    let reg = st.dispatcher.register_machine(&req.name).await?;
    Ok(Json(RegisterMachineResponse {
        machine_id: reg.machine_id,
        created: reg.created,
    }))
}

async fn latest_by_name(
    State(st): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<LatestResultResponse>, AppError> {
    let command = st.dispatcher.latest_result_by_name(&name).await?;
    Ok(Json(LatestResultResponse { command }))
}

async fn register_script(
    State(st): State<AppState>,
    Json(req): Json<RegisterScriptRequest>,
) -> Result<(StatusCode, Json<RegisterScriptResponse>), AppError> {
    let reg = st.dispatcher.register_script(&req.name, &req.content).await?;
    let status = if reg.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(RegisterScriptResponse {
            name: reg.name,
            created: reg.created,
        }),
    ))
}

async fn execute(
    State(st): State<AppState>,
    Json(req): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, AppError> {
    let command_id = st
        .dispatcher
        .submit(&req.machine_name, &req.script_name)
        .await?;
    Ok(Json(ExecuteResponse { command_id }))
}

async fn pending_commands(
    State(st): State<AppState>,
    Path(machine_id): Path<String>,
) -> Result<Json<PendingCommandsResponse>, AppError> {
    let commands = st.dispatcher.poll_pending(&machine_id).await?;
    Ok(Json(PendingCommandsResponse { commands }))
}

async fn command_result(
    State(st): State<AppState>,
    Path(command_id): Path<CommandId>,
    Json(req): Json<CommandResultRequest>,
) -> Result<Json<CommandResultResponse>, AppError> {
    let command = st.dispatcher.complete(command_id, req.output).await?;
    Ok(Json(CommandResultResponse {
        command_id: command.id,
        status: command.status,
    }))
}

async fn latest_result(
    State(st): State<AppState>,
    Path(machine_id): Path<String>,
) -> Result<Json<LatestResultResponse>, AppError> {
    let command = st.dispatcher.latest_result(&machine_id).await?;
    Ok(Json(LatestResultResponse { command }))
}

#[derive(Debug)]
pub struct AppError(DispatchError);

impl From<DispatchError> for AppError {
    fn from(value: DispatchError) -> Self {
        Self(value)
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            DispatchError::NotFound { .. } => StatusCode::NOT_FOUND,
            DispatchError::RejectedUnsafe { .. } | DispatchError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            DispatchError::AlreadyCompleted(_) => StatusCode::CONFLICT,
            DispatchError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, kind = self.0.kind(), "request refused");
        }
        let body = Json(ErrorResponse {
            error: self.0.to_string(),
            kind: self.0.kind().to_string(),
        });
        (status, body).into_response()
    }
}
