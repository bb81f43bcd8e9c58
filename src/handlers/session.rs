use axum::{Json, extract::State, http::HeaderMap};
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AppError;
use crate::handlers::client_fingerprint;
use crate::services::SessionStats;
use crate::state::AppState;

/// セッション情報レスポンス
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user_id: Uuid,
    pub is_authenticated: bool,
    pub two_factor_verified: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// セッション検証ハンドラー
///
/// GET /api/session
///
/// x-session-id ヘッダーのセッションを検証し、クライアント指紋の
/// ドリフトを監査する。IP不一致の場合はセッションが破棄されて401。
/// 特権リクエストごとの検証・監査の入口にあたる。
pub async fn current_session(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SessionResponse>, AppError> {
    let session_id = headers
        .get("x-session-id")
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::SessionNotFound)?;

    let (ip_address, user_agent) = client_fingerprint(&headers);
    if !state
        .session_manager
        .audit_session(session_id, &ip_address, &user_agent)
        .await
    {
        return Err(AppError::SessionNotFound);
    }

    let session = state
        .session_manager
        .validate_session(session_id)
        .await
        .ok_or(AppError::SessionNotFound)?;

    Ok(Json(SessionResponse {
        user_id: session.user_id,
        is_authenticated: session.is_authenticated,
        two_factor_verified: session.two_factor_verified,
        expires_at: session.expires_at,
        created_at: session.created_at,
    }))
}

/// セッション統計ハンドラー
///
/// GET /api/session/stats
///
/// # Note
/// インメモリキャッシュ上の集計値（プロセスローカル）。
pub async fn session_stats(State(state): State<AppState>) -> Json<SessionStats> {
    Json(state.session_manager.session_stats().await)
}
