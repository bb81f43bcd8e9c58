use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{AdminUser, Session};
use crate::services::{AuthService, SessionUpdate};
use crate::state::AppState;

// === 2FA Setup ===

#[derive(Debug, Deserialize)]
pub struct SetupRequest {
    pub session_id: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SetupResponse {
    pub secret: String,
    pub qr_code: String,
    pub backup_codes: Vec<String>,
}

/// POST /api/2fa/setup
///
/// 2FA登録を開始（シークレット生成、QRコード・バックアップコード返却）
///
/// # Security
/// - 有効なセッション + パスワード確認必須
/// - シークレット・バックアップコードの平文はログ出力禁止
pub async fn setup_2fa(
    State(state): State<AppState>,
    Json(request): Json<SetupRequest>,
) -> Result<Json<SetupResponse>, AppError> {
    // バリデーション
    validate_password(&request.password)?;

    // セッション確認 + パスワード確認
    let session = require_session(&state, &request.session_id).await?;
    let admin = verify_admin_password(&state, &session, &request.password).await?;

    // 既に2FA有効なら再登録は拒否（無効化してから）
    if admin.two_factor_enabled {
        return Err(AppError::TotpAlreadyEnabled);
    }

    // シークレット + QRコード + バックアップコード一式を生成
    let setup = state.two_factor_service.setup_two_factor(&admin.email)?;

    // enabled = false のまま保存（初回コード検証成功で有効化）
    state
        .admin_repo
        .setup_two_factor(admin.id, &setup.secret, &setup.backup_codes)
        .await?;

    tracing::info!(user_id = %admin.id, "2FA登録開始");

    Ok(Json(SetupResponse {
        secret: setup.secret,
        qr_code: setup.qr_code_url,
        backup_codes: setup.backup_codes,
    }))
}

// === 2FA Confirm（登録確認） ===

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub session_id: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    pub enabled: bool,
}

/// POST /api/2fa/confirm
///
/// 2FA登録確認（初回コード検証で有効化）
///
/// # Security
/// - コードはログ出力禁止
pub async fn confirm_2fa(
    State(state): State<AppState>,
    Json(request): Json<ConfirmRequest>,
) -> Result<Json<ConfirmResponse>, AppError> {
    // バリデーション
    validate_totp_code(&request.code)?;

    let session = require_session(&state, &request.session_id).await?;

    let admin = state
        .admin_repo
        .find_by_id(session.user_id)
        .await?
        .ok_or(AppError::SessionNotFound)?;

    if admin.two_factor_enabled {
        return Err(AppError::TotpAlreadyEnabled);
    }

    let secret = admin
        .two_factor_secret
        .as_deref()
        .ok_or(AppError::TotpNotEnabled)?;

    // コード検証
    if !state.two_factor_service.verify_token(secret, &request.code) {
        return Err(AppError::TotpInvalid);
    }

    // 2FAを有効化し、このセッションは検証済みとして扱う
    state.admin_repo.enable_two_factor(admin.id).await?;
    state
        .session_manager
        .update_session(
            &request.session_id,
            SessionUpdate {
                two_factor_verified: Some(true),
                ..Default::default()
            },
        )
        .await;

    tracing::info!(user_id = %admin.id, "2FA有効化完了");

    Ok(Json(ConfirmResponse { enabled: true }))
}

// === 2FA Verify（ログイン時の検証） ===

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub session_id: String,
    /// TOTPコード（バックアップコード使用時は省略）
    pub code: Option<String>,
    /// バックアップコード（認証デバイス喪失時）
    pub backup_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub verified: bool,
}

/// POST /api/2fa/verify
///
/// ログイン後の2FA検証。成功でセッションが完全認証になる。
///
/// # Security
/// - 失敗理由（コード不一致・リプレイ・ユーザー不在）は区別せず401
pub async fn verify_2fa(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, AppError> {
    // バリデーション: TOTPコードかバックアップコードのどちらかが必須
    match (&request.code, &request.backup_code) {
        (None, None) => {
            return Err(AppError::Validation("認証コードは必須です".to_string()));
        }
        (Some(code), _) => validate_totp_code(code)?,
        _ => {}
    }

    let verified = state
        .session_manager
        .verify_two_factor(
            &request.session_id,
            request.code.as_deref().unwrap_or_default(),
            request.backup_code.as_deref(),
        )
        .await;

    if !verified {
        return Err(AppError::TotpInvalid);
    }

    Ok(Json(VerifyResponse { verified: true }))
}

// === 2FA Disable ===

#[derive(Debug, Deserialize)]
pub struct DisableRequest {
    pub session_id: String,
    pub password: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct DisableResponse {
    pub disabled: bool,
}

/// POST /api/2fa/disable
///
/// 2FA無効化（シークレット・バックアップコードも破棄）
///
/// # Security
/// - パスワード確認必須
/// - TOTPコード確認必須
pub async fn disable_2fa(
    State(state): State<AppState>,
    Json(request): Json<DisableRequest>,
) -> Result<Json<DisableResponse>, AppError> {
    // バリデーション
    validate_password(&request.password)?;
    validate_totp_code(&request.code)?;

    // セッション確認 + パスワード確認
    let session = require_session(&state, &request.session_id).await?;
    let admin = verify_admin_password(&state, &session, &request.password).await?;

    if !admin.two_factor_enabled {
        return Err(AppError::TotpNotEnabled);
    }

    // コード検証（リプレイガードを含む通常経路で実施）
    if !state
        .session_manager
        .verify_two_factor(&request.session_id, &request.code, None)
        .await
    {
        return Err(AppError::TotpInvalid);
    }

    state.admin_repo.disable_two_factor(admin.id).await?;

    tracing::info!(user_id = %admin.id, "2FA無効化完了");

    Ok(Json(DisableResponse { disabled: true }))
}

// === Helper Functions ===

/// セッションを検証して返す（無効なら401）
async fn require_session(state: &AppState, session_id: &str) -> Result<Session, AppError> {
    state
        .session_manager
        .validate_session(session_id)
        .await
        .ok_or(AppError::SessionNotFound)
}

/// セッション所有者のパスワードを検証し、管理者情報を返す
async fn verify_admin_password(
    state: &AppState,
    session: &Session,
    password: &str,
) -> Result<AdminUser, AppError> {
    let admin = state
        .admin_repo
        .find_by_id(session.user_id)
        .await?
        .ok_or_else(|| AppError::Authentication("user not found".to_string()))?;

    let auth_service = AuthService::new(state.admin_repo.clone());
    auth_service.authenticate(&admin.email, password).await
}

/// パスワードバリデーション
fn validate_password(password: &str) -> Result<(), AppError> {
    if password.is_empty() {
        return Err(AppError::Validation("パスワードは必須です".to_string()));
    }
    if password.len() < 8 {
        return Err(AppError::Validation(
            "パスワードは8文字以上で入力してください".to_string(),
        ));
    }
    Ok(())
}

/// TOTPコードバリデーション
fn validate_totp_code(code: &str) -> Result<(), AppError> {
    if code.is_empty() {
        return Err(AppError::Validation("認証コードは必須です".to_string()));
    }
    if code.len() != 6 || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(AppError::Validation(
            "認証コードは6桁の数字で入力してください".to_string(),
        ));
    }
    Ok(())
}
