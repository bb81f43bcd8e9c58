use axum::{Json, extract::State, http::HeaderMap};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::handlers::client_fingerprint;
use crate::services::{AuthService, SessionUpdate};
use crate::state::AppState;

/// ログインリクエスト
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// 管理者のメールアドレス
    pub email: String,
    /// 管理者のパスワード
    pub password: String,
}

/// ログインレスポンス
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    /// セッションID（以降のリクエストでベアラートークンとして使用）
    pub session_id: String,
    /// 2FA検証が必要かどうか（true の間はセッションが完全認証でない）
    pub requires_2fa: bool,
}

/// ログインハンドラー
///
/// POST /api/login
///
/// 処理フロー:
/// 1. リクエストバリデーション
/// 2. パスワード認証（DB照合、argon2）
/// 3. セッション作成（両認証フラグは false で開始）
/// 4. is_authenticated を立てる（パスワード段階の完了）
/// 5. 2FA有効ユーザーには requires_2fa: true を返却
///    （呼び出し側は /api/2fa/verify で検証を完了させる）
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    // 1. リクエストバリデーション
    validate_login_request(&request)?;

    // 2. パスワード認証
    let auth_service = AuthService::new(state.admin_repo.clone());
    let admin = auth_service
        .authenticate(&request.email, &request.password)
        .await?;

    // 3. セッション作成（作成時のクライアント指紋を監査用に束縛）
    let (ip_address, user_agent) = client_fingerprint(&headers);
    let session_id = state
        .session_manager
        .create_session(
            admin.id,
            &ip_address,
            &user_agent,
            state.config.session_validity_minutes,
        )
        .await?;

    // 4. パスワード段階の完了を記録
    if !state
        .session_manager
        .update_session(
            &session_id,
            SessionUpdate {
                is_authenticated: Some(true),
                ..Default::default()
            },
        )
        .await
    {
        tracing::error!(user_id = %admin.id, "作成直後のセッション更新に失敗");
        return Err(AppError::SessionCreation);
    }

    tracing::info!(
        user_id = %admin.id,
        requires_2fa = admin.two_factor_enabled,
        "ログイン成功（パスワード段階）"
    );

    Ok(Json(LoginResponse {
        session_id,
        requires_2fa: admin.two_factor_enabled,
    }))
}

/// ログインリクエストのバリデーション
fn validate_login_request(request: &LoginRequest) -> Result<(), AppError> {
    // email: 必須、メール形式
    if request.email.trim().is_empty() {
        return Err(AppError::Validation("メールアドレスは必須です".to_string()));
    }

    // 簡易的なメール形式チェック（@ が含まれているか）
    if !request.email.contains('@') {
        return Err(AppError::Validation(
            "有効なメールアドレスを入力してください".to_string(),
        ));
    }

    // password: 必須、8文字以上
    if request.password.is_empty() {
        return Err(AppError::Validation("パスワードは必須です".to_string()));
    }

    if request.password.len() < 8 {
        return Err(AppError::Validation(
            "パスワードは8文字以上で入力してください".to_string(),
        ));
    }

    Ok(())
}
