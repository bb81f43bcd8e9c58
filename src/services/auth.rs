use argon2::{Argon2, PasswordHash, PasswordVerifier};

use crate::error::AppError;
use crate::models::AdminUser;
use crate::repositories::AdminRepository;

/// 管理者認証サービス（パスワード検証）
///
/// セッション作成の前段で呼び出される。セッション管理の中核は
/// パスワード検証結果（成功した AdminUser）だけを受け取る。
#[derive(Clone)]
pub struct AuthService {
    admin_repo: AdminRepository,
}

impl AuthService {
    /// 新しい AuthService を作成
    pub fn new(admin_repo: AdminRepository) -> Self {
        Self { admin_repo }
    }

    /// 管理者認証を実行
    ///
    /// タイミング攻撃対策: ユーザーが存在しない場合もダミーのパスワード検証を実行
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<AdminUser, AppError> {
        let admin = self.admin_repo.find_by_email(email).await?;

        match admin {
            Some(admin) => {
                let password_hash = match &admin.password_hash {
                    Some(hash) => hash,
                    None => {
                        // タイミング攻撃対策: ダミーのパスワード検証を実行
                        let dummy_hash = "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHQ$RWh6";
                        let _ = self.verify_password(password, dummy_hash);
                        tracing::warn!(email = %email, "認証失敗: パスワード未設定");
                        return Err(AppError::Authentication("invalid_credentials".to_string()));
                    }
                };

                if self.verify_password(password, password_hash)? {
                    tracing::info!(email = %email, "認証成功");
                    Ok(admin)
                } else {
                    tracing::warn!(email = %email, "認証失敗: パスワード不一致");
                    Err(AppError::Authentication("invalid_credentials".to_string()))
                }
            }
            None => {
                // タイミング攻撃対策: ユーザーが存在しない場合もダミーのパスワード検証を実行
                // これにより、ユーザーの存在有無を応答時間から推測できなくなる
                let dummy_hash = "$argon2id$v=19$m=19456,t=2,p=1$c29tZXNhbHQ$RWh6";
                let _ = self.verify_password(password, dummy_hash);
                tracing::warn!(email = %email, "認証失敗: ユーザー不在");
                Err(AppError::Authentication("invalid_credentials".to_string()))
            }
        }
    }

    /// パスワードを検証
    fn verify_password(&self, password: &str, hash: &str) -> Result<bool, AppError> {
        let parsed_hash = PasswordHash::new(hash).map_err(|e| {
            tracing::error!(error = ?e, "パスワードハッシュのパースエラー");
            AppError::Internal(anyhow::anyhow!("password hash parse error"))
        })?;

        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }
}
