use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// 管理者セッション
///
/// 認証状態マシン:
/// 未認証（作成直後） → パスワード認証済み（is_authenticated = true）
/// → 2FA認証済み（two_factor_verified = true）
///
/// 作成後に変更可能なのは is_authenticated / two_factor_verified のみ。
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Session {
    /// セッションID（32バイト乱数のhex表現、64文字）
    pub id: String,
    pub user_id: Uuid,
    pub is_authenticated: bool,
    pub two_factor_verified: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    /// 作成時のクライアントIP（監査用）
    pub ip_address: String,
    /// 作成時のUser-Agent（監査用）
    pub user_agent: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Session {
    /// expires_at を過ぎていれば true
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }
}
