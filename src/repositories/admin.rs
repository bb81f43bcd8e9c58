use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::AdminUser;
use crate::repositories::AdminStore;

#[derive(Clone)]
pub struct AdminRepository {
    pool: PgPool,
}

impl AdminRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 管理者IDで検索
    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<AdminUser>, sqlx::Error> {
        sqlx::query_as::<_, AdminUser>(
            r#"
            SELECT id, email, name, password_hash, two_factor_enabled,
                   two_factor_secret, two_factor_backup_codes
            FROM admins
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// メールアドレスで検索
    pub async fn find_by_email(&self, email: &str) -> Result<Option<AdminUser>, sqlx::Error> {
        sqlx::query_as::<_, AdminUser>(
            r#"
            SELECT id, email, name, password_hash, two_factor_enabled,
                   two_factor_secret, two_factor_backup_codes
            FROM admins
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
    }

    /// 2FA設定を保存（シークレット + バックアップコード）
    ///
    /// # Note
    /// 保存時点では two_factor_enabled = false。
    /// 初回コード検証成功後に enable_two_factor() を呼び出す。
    pub async fn setup_two_factor(
        &self,
        id: Uuid,
        secret: &str,
        backup_codes: &[String],
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE admins
            SET two_factor_secret = $2,
                two_factor_backup_codes = $3,
                two_factor_enabled = false
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(secret)
        .bind(Json(backup_codes))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 2FAを有効化
    pub async fn enable_two_factor(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE admins
            SET two_factor_enabled = true
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 2FAを無効化（シークレット・バックアップコードも破棄）
    pub async fn disable_two_factor(&self, id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE admins
            SET two_factor_enabled = false,
                two_factor_secret = NULL,
                two_factor_backup_codes = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// バックアップコードリストを楽観的に置き換える
    ///
    /// 現在の値が expected と一致する場合のみ更新する（比較はJSONB構造比較）。
    /// 並行リクエストに負けた側は false を受け取る。
    pub async fn replace_backup_codes(
        &self,
        id: Uuid,
        expected: &[String],
        new: &[String],
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE admins
            SET two_factor_backup_codes = $2
            WHERE id = $1 AND two_factor_backup_codes = $3
            "#,
        )
        .bind(id)
        .bind(Json(new))
        .bind(Json(expected))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

impl AdminStore for AdminRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<AdminUser>, AppError> {
        Ok(AdminRepository::find_by_id(self, id).await?)
    }

    async fn replace_backup_codes(
        &self,
        id: Uuid,
        expected: &[String],
        new: &[String],
    ) -> Result<bool, AppError> {
        Ok(AdminRepository::replace_backup_codes(self, id, expected, new).await?)
    }
}
