use serde::Serialize;
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

/// 管理者ユーザー
///
/// 本体はアイデンティティストア側で管理される。
/// このサービスが書き換えるのは2FA関連フィールドのみ
/// （バックアップコード消費時の two_factor_backup_codes など）。
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AdminUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(skip)]
    pub password_hash: Option<String>,
    pub two_factor_enabled: bool,
    /// Base32エンコードされたTOTPシークレット（2FA設定済みの場合のみ）
    #[serde(skip)]
    pub two_factor_secret: Option<String>,
    /// 未使用バックアップコード（JSON配列、各コードは使い切り）
    #[serde(skip)]
    pub two_factor_backup_codes: Option<Json<Vec<String>>>,
}

impl AdminUser {
    /// 未使用バックアップコードのスライスを返す（未設定なら空）
    pub fn backup_codes(&self) -> &[String] {
        self.two_factor_backup_codes
            .as_ref()
            .map(|codes| codes.0.as_slice())
            .unwrap_or_default()
    }
}
