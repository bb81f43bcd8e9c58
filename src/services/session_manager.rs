use std::collections::HashMap;
use std::sync::Arc;

use data_encoding::HEXLOWER;
use rand::RngCore;
use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::Session;
use crate::repositories::{AdminRepository, AdminStore, SessionRepository, SessionStore};
use crate::services::TwoFactorService;

/// セッション状態の部分更新
///
/// 作成後に変更可能なのは認証フラグ2つのみ。None は変更なし。
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionUpdate {
    pub is_authenticated: Option<bool>,
    pub two_factor_verified: Option<bool>,
}

/// セッション統計
///
/// # Note
/// インメモリキャッシュ上の集計値。キャッシュから追い出されたが
/// ストアにはまだ生きているセッションは反映されない
/// （プロセスローカルな指標であり、全体の値ではない）。
#[derive(Debug, Serialize)]
pub struct SessionStats {
    pub active_sessions: usize,
    pub total_sessions: usize,
    pub expired_sessions: usize,
}

/// セッション管理の中核
///
/// 状態マシン: 未認証 → パスワード認証済み → 2FA認証済み → 破棄/期限切れ。
///
/// ストアの前段にread-throughキャッシュを持つ。期限切れエントリの
/// 追い出しは遅延方式で、アクセス時の検出と create_session 内の
/// 日和見スイープのみ（バックグラウンドタスクなし）。
///
/// # Failure semantics
/// - 作成系（create_session）: 永続化失敗はエラーとして伝播する
/// - 検証系（validate / verify / audit）: ストア障害はログに記録して
///   None / false に縮退する（セキュリティ判定に内部障害を漏らさない）
#[derive(Clone)]
pub struct SessionManager<S, A> {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
    store: S,
    admins: A,
    two_factor: TwoFactorService,
}

/// 本番構成（Postgres永続化）
pub type PgSessionManager = SessionManager<SessionRepository, AdminRepository>;

impl<S: SessionStore, A: AdminStore> SessionManager<S, A> {
    /// 新しい SessionManager を作成
    ///
    /// プロセス起動時に一度だけ構築し、ハンドラー間で共有する
    /// （キャッシュ・使用済みコードガードはプロセスローカル）。
    pub fn new(store: S, admins: A, two_factor: TwoFactorService) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            store,
            admins,
            two_factor,
        }
    }

    /// 新しいセッションを作成し、セッションIDを返す
    ///
    /// 両認証フラグは false で開始する（パスワード検証は呼び出し側が
    /// 事前に済ませ、update_session で is_authenticated を立てる）。
    ///
    /// # Errors
    /// 永続化に失敗した場合は SessionCreation（作成失敗は呼び出し側が
    /// 知る必要があるため、縮退せずエラーを返す）。
    pub async fn create_session(
        &self,
        user_id: Uuid,
        ip_address: &str,
        user_agent: &str,
        validity_minutes: i64,
    ) -> Result<String, AppError> {
        // 日和見スイープ: キャッシュ内の期限切れエントリを掃除
        self.sweep_expired_cache_entries().await;

        let now = OffsetDateTime::now_utc();
        let session = Session {
            id: generate_session_id(),
            user_id,
            is_authenticated: false,
            two_factor_verified: false,
            expires_at: now + Duration::minutes(validity_minutes),
            ip_address: ip_address.to_string(),
            user_agent: user_agent.to_string(),
            created_at: now,
        };

        self.store.save(&session).await.map_err(|e| {
            tracing::error!(error = %e, user_id = %user_id, "セッションの永続化に失敗");
            AppError::SessionCreation
        })?;

        let session_id = session.id.clone();
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), session);

        tracing::info!(
            user_id = %user_id,
            session_id = %truncate_id(&session_id),
            "セッション作成"
        );

        Ok(session_id)
    }

    /// セッションを検証して返す
    ///
    /// キャッシュ優先。ミス時はストアから読み込んでキャッシュに再投入
    /// する（read-through）。期限切れは両層から削除して None。
    /// エラーは返さない: ストア障害はログに記録して None（フェイルクローズ）。
    pub async fn validate_session(&self, session_id: &str) -> Option<Session> {
        let now = OffsetDateTime::now_utc();

        // キャッシュ参照
        let cached = self.sessions.read().await.get(session_id).cloned();
        if let Some(session) = cached {
            if session.is_expired(now) {
                self.remove_session(session_id).await;
                return None;
            }
            return Some(session);
        }

        // キャッシュミス: ストアから読み込み（クエリレベルで期限切れ除外）
        let session = match self.store.find(session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    session_id = %truncate_id(session_id),
                    "セッション読み込みに失敗（無効として扱う）"
                );
                return None;
            }
        };

        // 念のための再チェック（クエリ時点とのずれを考慮）
        if session.is_expired(now) {
            self.remove_session(session_id).await;
            return None;
        }

        self.sessions
            .write()
            .await
            .insert(session_id.to_string(), session.clone());

        Some(session)
    }

    /// セッションの認証フラグを更新する
    ///
    /// # Note
    /// キャッシュに存在しないセッションは更新しない（ストアへの
    /// フォールバックは意図的に行わない。状態遷移はこのプロセスで
    /// 既に触れたセッションに対してのみ適用する）。
    pub async fn update_session(&self, session_id: &str, update: SessionUpdate) -> bool {
        if !self.sessions.read().await.contains_key(session_id) {
            return false;
        }

        // 指定されたフィールドのみ永続化。キャッシュへの反映は
        // ストアが受理した後（失敗時にキャッシュだけが進まないように）
        if let Err(e) = self
            .store
            .update_flags(session_id, update.is_authenticated, update.two_factor_verified)
            .await
        {
            tracing::error!(
                error = %e,
                session_id = %truncate_id(session_id),
                "セッション更新の永続化に失敗"
            );
            return false;
        }

        let mut sessions = self.sessions.write().await;
        let Some(session) = sessions.get_mut(session_id) else {
            return false;
        };
        if let Some(is_authenticated) = update.is_authenticated {
            session.is_authenticated = is_authenticated;
        }
        if let Some(two_factor_verified) = update.two_factor_verified {
            session.two_factor_verified = two_factor_verified;
        }

        true
    }

    /// セッションを破棄する（ログアウト）
    pub async fn destroy_session(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id);

        if let Err(e) = self.store.delete(session_id).await {
            tracing::error!(
                error = %e,
                session_id = %truncate_id(session_id),
                "セッション削除に失敗"
            );
            return false;
        }

        tracing::info!(session_id = %truncate_id(session_id), "セッション破棄");
        true
    }

    /// ユーザーの全セッションを破棄する（全デバイスからログアウト）
    pub async fn destroy_all_user_sessions(&self, user_id: Uuid) -> bool {
        self.sessions
            .write()
            .await
            .retain(|_, session| session.user_id != user_id);

        if let Err(e) = self.store.delete_all_for_user(user_id).await {
            tracing::error!(error = %e, user_id = %user_id, "全セッション削除に失敗");
            return false;
        }

        tracing::info!(user_id = %user_id, "全セッション破棄");
        true
    }

    /// 2FAコード（TOTPまたはバックアップコード）を検証する
    ///
    /// 成功時はセッションの two_factor_verified を立てる。
    /// エラーは返さない: ユーザー不在・ストア障害・リプレイ検出は
    /// いずれも false（攻撃者に失敗理由を区別させない）。
    pub async fn verify_two_factor(
        &self,
        session_id: &str,
        token: &str,
        backup_code: Option<&str>,
    ) -> bool {
        let Some(session) = self.validate_session(session_id).await else {
            return false;
        };

        let admin = match self.admins.find_by_id(session.user_id).await {
            Ok(Some(admin)) => admin,
            Ok(None) => {
                tracing::warn!(user_id = %session.user_id, "2FA検証: ユーザー不在");
                return false;
            }
            Err(e) => {
                tracing::error!(error = %e, user_id = %session.user_id, "2FA検証: ユーザー読み込み失敗");
                return false;
            }
        };

        if !admin.two_factor_enabled {
            tracing::warn!(user_id = %admin.id, "2FA検証: 2FAが有効化されていない");
            return false;
        }

        if let Some(backup_code) = backup_code {
            // バックアップコード経路: 消費したコードを除いたリストを
            // 楽観的更新で書き戻す（並行リクエストでの二重消費を防ぐ）
            let current_codes = admin.backup_codes();
            let check = TwoFactorService::verify_backup_code(current_codes, backup_code);
            if !check.is_valid {
                tracing::warn!(user_id = %admin.id, "バックアップコード不一致");
                return false;
            }

            match self
                .admins
                .replace_backup_codes(admin.id, current_codes, &check.remaining_codes)
                .await
            {
                Ok(true) => {
                    tracing::info!(
                        user_id = %admin.id,
                        remaining = check.remaining_codes.len(),
                        "バックアップコード消費"
                    );
                }
                Ok(false) => {
                    // 並行リクエストに負けた（コードは既に消費済み）
                    tracing::warn!(user_id = %admin.id, "バックアップコードの書き戻しが競合");
                    return false;
                }
                Err(e) => {
                    tracing::error!(error = %e, user_id = %admin.id, "バックアップコードの書き戻しに失敗");
                    return false;
                }
            }
        } else {
            // TOTP経路
            let Some(secret) = admin.two_factor_secret.as_deref() else {
                tracing::warn!(user_id = %admin.id, "2FA有効だがシークレット未設定");
                return false;
            };

            if !self.two_factor.verify_token(secret, token) {
                return false;
            }

            // リプレイ検出: 判定と記録を mark_token_used 一回で行う
            // （同一コードを持つ並行リクエストで通過するのは一つだけ）。
            // 使用済みコードはセッション状態を変えずに拒否され、
            // 応答上は「コード不一致」と区別できない。
            if !self.two_factor.mark_token_used(token).await {
                tracing::warn!(user_id = %admin.id, "使用済みTOTPコードの再利用を拒否");
                return false;
            }
        }

        self.update_session(
            session_id,
            SessionUpdate {
                two_factor_verified: Some(true),
                ..Default::default()
            },
        )
        .await
    }

    /// セッションをIP・User-Agentドリフトに対して監査する
    ///
    /// IP不一致は即座にセッションを破棄して false（厳格）。
    /// User-Agent不一致は警告ログのみで true（寛容）。
    /// この非対称性は意図的な設計判断であり、変更しない
    /// （モバイルのUAはIPの所有者より遥かに頻繁に無害に変わる）。
    pub async fn audit_session(&self, session_id: &str, ip_address: &str, user_agent: &str) -> bool {
        let Some(session) = self.validate_session(session_id).await else {
            return false;
        };

        if session.ip_address != ip_address {
            tracing::warn!(
                user_id = %session.user_id,
                session_id = %truncate_id(session_id),
                recorded_ip = %session.ip_address,
                request_ip = %ip_address,
                "IPアドレス不一致のためセッションを破棄"
            );
            self.destroy_session(session_id).await;
            return false;
        }

        if session.user_agent != user_agent {
            tracing::warn!(
                user_id = %session.user_id,
                session_id = %truncate_id(session_id),
                "User-Agentが変化（セッションは維持）"
            );
        }

        true
    }

    /// キャッシュローカルなセッション統計を返す
    pub async fn session_stats(&self) -> SessionStats {
        let now = OffsetDateTime::now_utc();
        let sessions = self.sessions.read().await;

        let total_sessions = sessions.len();
        let expired_sessions = sessions
            .values()
            .filter(|session| session.is_expired(now))
            .count();

        SessionStats {
            active_sessions: total_sessions - expired_sessions,
            total_sessions,
            expired_sessions,
        }
    }

    /// キャッシュ内の期限切れエントリを削除する（日和見スイープ）
    async fn sweep_expired_cache_entries(&self) {
        let now = OffsetDateTime::now_utc();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired(now));

        let swept = before - sessions.len();
        if swept > 0 {
            tracing::debug!(swept, "期限切れセッションをキャッシュから掃除");
        }
    }

    /// キャッシュとストアの両方からセッションを削除する
    async fn remove_session(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
        if let Err(e) = self.store.delete(session_id).await {
            tracing::error!(
                error = %e,
                session_id = %truncate_id(session_id),
                "期限切れセッションの削除に失敗"
            );
        }
    }
}

/// 推測不能なセッションIDを生成（32バイト乱数のhex表現、64文字）
fn generate_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    HEXLOWER.encode(&bytes)
}

/// ログ用にセッションIDを先頭8文字に切り詰める
fn truncate_id(session_id: &str) -> &str {
    session_id.get(..8).unwrap_or(session_id)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use data_encoding::BASE32_NOPAD;
    use sqlx::types::Json;
    use totp_rs::{Algorithm, TOTP};

    use super::*;
    use crate::models::AdminUser;
    use crate::services::ReplayGuard;

    /// テスト用インメモリセッションストア
    #[derive(Clone, Default)]
    struct MemorySessionStore {
        rows: Arc<Mutex<HashMap<String, Session>>>,
        fail_writes: Arc<Mutex<bool>>,
    }

    impl MemorySessionStore {
        fn set_fail_writes(&self, fail: bool) {
            *self.fail_writes.lock().unwrap() = fail;
        }

        fn write_error(&self) -> Option<AppError> {
            if *self.fail_writes.lock().unwrap() {
                Some(AppError::Internal(anyhow::anyhow!("store unavailable")))
            } else {
                None
            }
        }
    }

    impl SessionStore for MemorySessionStore {
        async fn save(&self, session: &Session) -> Result<(), AppError> {
            if let Some(e) = self.write_error() {
                return Err(e);
            }
            self.rows
                .lock()
                .unwrap()
                .insert(session.id.clone(), session.clone());
            Ok(())
        }

        async fn find(&self, id: &str) -> Result<Option<Session>, AppError> {
            let now = OffsetDateTime::now_utc();
            Ok(self
                .rows
                .lock()
                .unwrap()
                .get(id)
                .filter(|session| !session.is_expired(now))
                .cloned())
        }

        async fn update_flags(
            &self,
            id: &str,
            is_authenticated: Option<bool>,
            two_factor_verified: Option<bool>,
        ) -> Result<(), AppError> {
            if let Some(e) = self.write_error() {
                return Err(e);
            }
            if let Some(session) = self.rows.lock().unwrap().get_mut(id) {
                if let Some(value) = is_authenticated {
                    session.is_authenticated = value;
                }
                if let Some(value) = two_factor_verified {
                    session.two_factor_verified = value;
                }
            }
            Ok(())
        }

        async fn delete(&self, id: &str) -> Result<(), AppError> {
            if let Some(e) = self.write_error() {
                return Err(e);
            }
            self.rows.lock().unwrap().remove(id);
            Ok(())
        }

        async fn delete_all_for_user(&self, user_id: Uuid) -> Result<(), AppError> {
            if let Some(e) = self.write_error() {
                return Err(e);
            }
            self.rows
                .lock()
                .unwrap()
                .retain(|_, session| session.user_id != user_id);
            Ok(())
        }
    }

    /// テスト用インメモリ管理者ストア
    #[derive(Clone, Default)]
    struct MemoryAdminStore {
        rows: Arc<Mutex<HashMap<Uuid, AdminUser>>>,
    }

    impl MemoryAdminStore {
        fn insert(&self, admin: AdminUser) {
            self.rows.lock().unwrap().insert(admin.id, admin);
        }

        fn backup_codes_of(&self, id: Uuid) -> Vec<String> {
            self.rows
                .lock()
                .unwrap()
                .get(&id)
                .map(|admin| admin.backup_codes().to_vec())
                .unwrap_or_default()
        }
    }

    impl AdminStore for MemoryAdminStore {
        async fn find_by_id(&self, id: Uuid) -> Result<Option<AdminUser>, AppError> {
            Ok(self.rows.lock().unwrap().get(&id).cloned())
        }

        async fn replace_backup_codes(
            &self,
            id: Uuid,
            expected: &[String],
            new: &[String],
        ) -> Result<bool, AppError> {
            let mut rows = self.rows.lock().unwrap();
            let Some(admin) = rows.get_mut(&id) else {
                return Ok(false);
            };
            if admin.backup_codes() != expected {
                return Ok(false);
            }
            admin.two_factor_backup_codes = Some(Json(new.to_vec()));
            Ok(true)
        }
    }

    const TEST_SECRET: &str = "JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP";

    fn test_admin(two_factor_enabled: bool) -> AdminUser {
        AdminUser {
            id: Uuid::new_v4(),
            email: "admin@example.com".to_string(),
            name: "Admin".to_string(),
            password_hash: None,
            two_factor_enabled,
            two_factor_secret: two_factor_enabled.then(|| TEST_SECRET.to_string()),
            two_factor_backup_codes: Some(Json(vec![
                "ABCD1234".to_string(),
                "EFGH5678".to_string(),
            ])),
        }
    }

    fn test_manager() -> (
        SessionManager<MemorySessionStore, MemoryAdminStore>,
        MemorySessionStore,
        MemoryAdminStore,
    ) {
        let store = MemorySessionStore::default();
        let admins = MemoryAdminStore::default();
        let two_factor = TwoFactorService::new("TestApp".to_string(), ReplayGuard::default());
        let manager = SessionManager::new(store.clone(), admins.clone(), two_factor);
        (manager, store, admins)
    }

    /// 現在時刻のTOTPコードを生成
    fn current_code(secret: &str) -> String {
        let secret_bytes = BASE32_NOPAD.decode(secret.as_bytes()).unwrap();
        let totp = TOTP::new(Algorithm::SHA1, 6, 2, 30, secret_bytes, None, String::new()).unwrap();
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        totp.generate(now)
    }

    /// キャッシュ・ストア双方のセッションを過去に失効させる
    async fn force_expire(
        manager: &SessionManager<MemorySessionStore, MemoryAdminStore>,
        store: &MemorySessionStore,
        session_id: &str,
    ) {
        let past = OffsetDateTime::now_utc() - Duration::minutes(1);
        if let Some(session) = manager.sessions.write().await.get_mut(session_id) {
            session.expires_at = past;
        }
        if let Some(session) = store.rows.lock().unwrap().get_mut(session_id) {
            session.expires_at = past;
        }
    }

    #[tokio::test]
    async fn test_create_then_validate_preserves_fields() {
        let (manager, _, _) = test_manager();
        let user_id = Uuid::new_v4();

        let session_id = manager
            .create_session(user_id, "203.0.113.10", "Mozilla/5.0", 30)
            .await
            .unwrap();
        assert_eq!(session_id.len(), 64);
        assert!(session_id.chars().all(|c| c.is_ascii_hexdigit()));

        let session = manager.validate_session(&session_id).await.unwrap();
        assert_eq!(session.user_id, user_id);
        assert_eq!(session.ip_address, "203.0.113.10");
        assert_eq!(session.user_agent, "Mozilla/5.0");
        assert!(!session.is_authenticated);
        assert!(!session.two_factor_verified);
        assert!(session.expires_at > session.created_at);
    }

    #[tokio::test]
    async fn test_create_session_fails_loudly_on_store_error() {
        let (manager, store, _) = test_manager();
        store.set_fail_writes(true);

        let result = manager
            .create_session(Uuid::new_v4(), "203.0.113.10", "Mozilla/5.0", 30)
            .await;
        assert!(matches!(result, Err(AppError::SessionCreation)));
    }

    #[tokio::test]
    async fn test_expired_session_is_tombstoned() {
        let (manager, store, _) = test_manager();
        let session_id = manager
            .create_session(Uuid::new_v4(), "203.0.113.10", "Mozilla/5.0", 30)
            .await
            .unwrap();

        force_expire(&manager, &store, &session_id).await;

        assert!(manager.validate_session(&session_id).await.is_none());
        // 両層から削除されている
        assert!(!manager.sessions.read().await.contains_key(&session_id));
        assert!(!store.rows.lock().unwrap().contains_key(&session_id));

        let stats = manager.session_stats().await;
        assert_eq!(stats.active_sessions, 0);
        assert_eq!(stats.total_sessions, 0);
    }

    #[tokio::test]
    async fn test_validate_repopulates_cache_from_store() {
        let (manager, _store, _) = test_manager();
        let session_id = manager
            .create_session(Uuid::new_v4(), "203.0.113.10", "Mozilla/5.0", 30)
            .await
            .unwrap();

        // キャッシュから追い出してもストアから復元される（read-through）
        manager.sessions.write().await.remove(&session_id);
        assert!(manager.validate_session(&session_id).await.is_some());
        assert!(manager.sessions.read().await.contains_key(&session_id));
    }

    #[tokio::test]
    async fn test_update_session_requires_cached_entry() {
        let (manager, store, _) = test_manager();
        let session_id = manager
            .create_session(Uuid::new_v4(), "203.0.113.10", "Mozilla/5.0", 30)
            .await
            .unwrap();

        // キャッシュにないセッションは更新されない（ストアへのフォールバックなし）
        manager.sessions.write().await.remove(&session_id);
        let updated = manager
            .update_session(
                &session_id,
                SessionUpdate {
                    is_authenticated: Some(true),
                    ..Default::default()
                },
            )
            .await;
        assert!(!updated);
        assert!(!store.rows.lock().unwrap()[&session_id].is_authenticated);
    }

    #[tokio::test]
    async fn test_update_session_persists_supplied_fields() {
        let (manager, store, _) = test_manager();
        let session_id = manager
            .create_session(Uuid::new_v4(), "203.0.113.10", "Mozilla/5.0", 30)
            .await
            .unwrap();

        let updated = manager
            .update_session(
                &session_id,
                SessionUpdate {
                    is_authenticated: Some(true),
                    ..Default::default()
                },
            )
            .await;
        assert!(updated);

        let row = store.rows.lock().unwrap()[&session_id].clone();
        assert!(row.is_authenticated);
        assert!(!row.two_factor_verified);
    }

    #[tokio::test]
    async fn test_update_session_keeps_cache_unchanged_on_store_error() {
        let (manager, store, _) = test_manager();
        let session_id = manager
            .create_session(Uuid::new_v4(), "203.0.113.10", "Mozilla/5.0", 30)
            .await
            .unwrap();

        store.set_fail_writes(true);
        let updated = manager
            .update_session(
                &session_id,
                SessionUpdate {
                    is_authenticated: Some(true),
                    ..Default::default()
                },
            )
            .await;
        assert!(!updated);

        // 永続化に失敗した遷移はキャッシュにも現れない
        let session = manager.validate_session(&session_id).await.unwrap();
        assert!(!session.is_authenticated);
    }

    #[tokio::test]
    async fn test_verify_two_factor_with_totp_and_replay_rejection() {
        let (manager, _, admins) = test_manager();
        let admin = test_admin(true);
        let user_id = admin.id;
        admins.insert(admin);

        let session_id = manager
            .create_session(user_id, "203.0.113.10", "Mozilla/5.0", 30)
            .await
            .unwrap();

        let code = current_code(TEST_SECRET);
        assert!(manager.verify_two_factor(&session_id, &code, None).await);

        let session = manager.validate_session(&session_id).await.unwrap();
        assert!(session.two_factor_verified);

        // 同一コードの再利用は、時間的にまだ有効でも拒否される（同一セッション）
        assert!(!manager.verify_two_factor(&session_id, &code, None).await);

        // 別セッションでも拒否される
        let other_session = manager
            .create_session(user_id, "203.0.113.10", "Mozilla/5.0", 30)
            .await
            .unwrap();
        assert!(!manager.verify_two_factor(&other_session, &code, None).await);
        let other = manager.validate_session(&other_session).await.unwrap();
        assert!(!other.two_factor_verified);
    }

    #[tokio::test]
    async fn test_verify_two_factor_rejects_wrong_code() {
        let (manager, _, admins) = test_manager();
        let admin = test_admin(true);
        let user_id = admin.id;
        admins.insert(admin);

        let session_id = manager
            .create_session(user_id, "203.0.113.10", "Mozilla/5.0", 30)
            .await
            .unwrap();

        assert!(!manager.verify_two_factor(&session_id, "000000", None).await);
        let session = manager.validate_session(&session_id).await.unwrap();
        assert!(!session.two_factor_verified);
    }

    #[tokio::test]
    async fn test_verify_two_factor_requires_enabled_user() {
        let (manager, _, admins) = test_manager();
        let admin = test_admin(false);
        let user_id = admin.id;
        admins.insert(admin);

        let session_id = manager
            .create_session(user_id, "203.0.113.10", "Mozilla/5.0", 30)
            .await
            .unwrap();

        let code = current_code(TEST_SECRET);
        assert!(!manager.verify_two_factor(&session_id, &code, None).await);

        // ユーザー不在も同様に false（区別されない）
        let orphan_session = manager
            .create_session(Uuid::new_v4(), "203.0.113.10", "Mozilla/5.0", 30)
            .await
            .unwrap();
        assert!(!manager.verify_two_factor(&orphan_session, &code, None).await);
    }

    #[tokio::test]
    async fn test_verify_two_factor_with_backup_code_persists_reduction() {
        let (manager, _, admins) = test_manager();
        let admin = test_admin(true);
        let user_id = admin.id;
        admins.insert(admin);

        let session_id = manager
            .create_session(user_id, "203.0.113.10", "Mozilla/5.0", 30)
            .await
            .unwrap();

        // 大文字小文字を区別せず一致し、縮小後リストが永続化される
        assert!(
            manager
                .verify_two_factor(&session_id, "", Some("abcd1234"))
                .await
        );
        assert_eq!(
            admins.backup_codes_of(user_id),
            vec!["EFGH5678".to_string()]
        );

        let session = manager.validate_session(&session_id).await.unwrap();
        assert!(session.two_factor_verified);

        // 消費済みコードの再利用は失敗する（使い切り）
        assert!(
            !manager
                .verify_two_factor(&session_id, "", Some("ABCD1234"))
                .await
        );
        assert_eq!(
            admins.backup_codes_of(user_id),
            vec!["EFGH5678".to_string()]
        );
    }

    #[tokio::test]
    async fn test_audit_session_ip_strict_ua_lenient() {
        let (manager, _, _) = test_manager();
        let session_id = manager
            .create_session(Uuid::new_v4(), "203.0.113.10", "Mozilla/5.0", 30)
            .await
            .unwrap();

        // 一致: 監査通過
        assert!(
            manager
                .audit_session(&session_id, "203.0.113.10", "Mozilla/5.0")
                .await
        );

        // UAドリフトは警告のみでセッション維持
        assert!(
            manager
                .audit_session(&session_id, "203.0.113.10", "Different/1.0")
                .await
        );
        assert!(manager.validate_session(&session_id).await.is_some());

        // IPドリフトは即破棄
        assert!(
            !manager
                .audit_session(&session_id, "198.51.100.7", "Mozilla/5.0")
                .await
        );
        assert!(manager.validate_session(&session_id).await.is_none());
    }

    #[tokio::test]
    async fn test_destroy_all_user_sessions_is_scoped() {
        let (manager, _, _) = test_manager();
        let target_user = Uuid::new_v4();
        let other_user = Uuid::new_v4();

        let target_a = manager
            .create_session(target_user, "203.0.113.10", "Mozilla/5.0", 30)
            .await
            .unwrap();
        let target_b = manager
            .create_session(target_user, "203.0.113.11", "Mozilla/5.0", 30)
            .await
            .unwrap();
        let unrelated = manager
            .create_session(other_user, "203.0.113.12", "Mozilla/5.0", 30)
            .await
            .unwrap();

        assert!(manager.destroy_all_user_sessions(target_user).await);

        assert!(manager.validate_session(&target_a).await.is_none());
        assert!(manager.validate_session(&target_b).await.is_none());
        assert!(manager.validate_session(&unrelated).await.is_some());
    }

    #[tokio::test]
    async fn test_destroy_session_reports_store_failure() {
        let (manager, store, _) = test_manager();
        let session_id = manager
            .create_session(Uuid::new_v4(), "203.0.113.10", "Mozilla/5.0", 30)
            .await
            .unwrap();

        store.set_fail_writes(true);
        assert!(!manager.destroy_session(&session_id).await);
    }

    #[tokio::test]
    async fn test_session_stats_counts_cache_only() {
        let (manager, store, _) = test_manager();
        let _active = manager
            .create_session(Uuid::new_v4(), "203.0.113.10", "Mozilla/5.0", 30)
            .await
            .unwrap();
        let expiring = manager
            .create_session(Uuid::new_v4(), "203.0.113.11", "Mozilla/5.0", 30)
            .await
            .unwrap();

        // キャッシュ内で失効させる（アクセスしない限り残る）
        force_expire(&manager, &store, &expiring).await;

        let stats = manager.session_stats().await;
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.active_sessions, 1);
        assert_eq!(stats.expired_sessions, 1);

        // 次の create_session の日和見スイープで掃除される
        manager
            .create_session(Uuid::new_v4(), "203.0.113.12", "Mozilla/5.0", 30)
            .await
            .unwrap();
        let stats = manager.session_stats().await;
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.expired_sessions, 0);
    }

    #[test]
    fn test_generate_session_id_shape() {
        let id = generate_session_id();
        assert_eq!(id.len(), 64);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_session_id());
    }
}
