use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use crate::config::Config;
use crate::repositories::{AdminRepository, SessionRepository};
use crate::services::{PgSessionManager, ReplayGuard, SessionManager, TwoFactorService};

/// アプリケーション共有状態
///
/// axum の State として全ハンドラーで共有される。
/// Clone は必須（axum が内部で clone するため）。SessionManager の
/// キャッシュと ReplayGuard は Arc 共有なので、clone 後も
/// プロセス内で単一のインスタンスとして振る舞う。
#[derive(Clone)]
pub struct AppState {
    /// PostgreSQL コネクションプール
    pub db_pool: PgPool,
    /// アプリケーション設定（Arc で共有）
    pub config: Arc<Config>,
    /// 管理者リポジトリ
    pub admin_repo: AdminRepository,
    /// 2FAサービス
    pub two_factor_service: TwoFactorService,
    /// セッション管理（プロセス起動時に一度だけ構築）
    pub session_manager: PgSessionManager,
}

impl AppState {
    /// 新しい AppState を作成
    pub fn new(db_pool: PgPool, config: Config) -> Self {
        let config = Arc::new(config);
        let admin_repo = AdminRepository::new(db_pool.clone());
        let session_repo = SessionRepository::new(db_pool.clone());

        let replay_guard = ReplayGuard::new(Duration::from_secs(config.token_reuse_ttl_secs));
        let two_factor_service = TwoFactorService::new(config.totp_issuer.clone(), replay_guard);

        let session_manager = SessionManager::new(
            session_repo,
            admin_repo.clone(),
            two_factor_service.clone(),
        );

        Self {
            db_pool,
            config,
            admin_repo,
            two_factor_service,
            session_manager,
        }
    }
}
