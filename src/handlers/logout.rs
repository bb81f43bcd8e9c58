use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::state::AppState;

/// ログアウトリクエスト
#[derive(Debug, Deserialize)]
pub struct LogoutRequest {
    pub session_id: String,
}

/// ログアウトレスポンス
#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub logged_out: bool,
}

/// ログアウトハンドラー
///
/// POST /api/logout
///
/// セッションをキャッシュとストアの両方から破棄する。
/// 存在しないセッションIDに対しても成功を返す（冪等）。
pub async fn logout(
    State(state): State<AppState>,
    Json(request): Json<LogoutRequest>,
) -> Result<Json<LogoutResponse>, AppError> {
    validate_session_id(&request.session_id)?;

    let logged_out = state.session_manager.destroy_session(&request.session_id).await;

    Ok(Json(LogoutResponse { logged_out }))
}

/// 全デバイスからのログアウトハンドラー
///
/// POST /api/logout/all
///
/// 呼び出し元セッションの所有ユーザーに属する全セッションを破棄する。
/// セッションが無効なら 401（所有者確認なしの一括破棄は許可しない）。
pub async fn logout_all(
    State(state): State<AppState>,
    Json(request): Json<LogoutRequest>,
) -> Result<Json<LogoutResponse>, AppError> {
    validate_session_id(&request.session_id)?;

    let session = state
        .session_manager
        .validate_session(&request.session_id)
        .await
        .ok_or(AppError::SessionNotFound)?;

    let logged_out = state
        .session_manager
        .destroy_all_user_sessions(session.user_id)
        .await;

    Ok(Json(LogoutResponse { logged_out }))
}

/// セッションIDバリデーション（32バイト乱数のhex表現、64文字）
fn validate_session_id(session_id: &str) -> Result<(), AppError> {
    if session_id.len() != 64 || !session_id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AppError::Validation("セッションIDが不正です".to_string()));
    }
    Ok(())
}
