use uuid::Uuid;

use crate::error::AppError;
use crate::models::{AdminUser, Session};

pub mod admin;
pub mod session;

pub use admin::AdminRepository;
pub use session::SessionRepository;

/// セッション永続化の境界
///
/// 本番実装は Postgres（SessionRepository）。
/// SessionManager のテストではインメモリ実装に差し替える。
#[allow(async_fn_in_trait)]
pub trait SessionStore: Send + Sync {
    /// 新しいセッションを挿入
    async fn save(&self, session: &Session) -> Result<(), AppError>;

    /// IDで検索（期限切れ行はクエリレベルで除外）
    async fn find(&self, id: &str) -> Result<Option<Session>, AppError>;

    /// is_authenticated / two_factor_verified のみ更新（None は変更なし）
    async fn update_flags(
        &self,
        id: &str,
        is_authenticated: Option<bool>,
        two_factor_verified: Option<bool>,
    ) -> Result<(), AppError>;

    async fn delete(&self, id: &str) -> Result<(), AppError>;

    async fn delete_all_for_user(&self, user_id: Uuid) -> Result<(), AppError>;
}

/// 管理者ユーザー読み取り・バックアップコード書き戻しの境界
#[allow(async_fn_in_trait)]
pub trait AdminStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<AdminUser>, AppError>;

    /// バックアップコードリストを楽観的に置き換える
    ///
    /// 現在の値が expected と一致する場合のみ new に更新し true を返す。
    /// 並行リクエストで同じコードが二重消費されるのを防ぐ。
    async fn replace_backup_codes(
        &self,
        id: Uuid,
        expected: &[String],
        new: &[String],
    ) -> Result<bool, AppError>;
}
