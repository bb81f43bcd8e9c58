use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::Session;
use crate::repositories::SessionStore;

#[derive(Clone)]
pub struct SessionRepository {
    pool: PgPool,
}

impl SessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 新しいセッションを挿入
    pub async fn save(&self, session: &Session) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO admin_sessions
                (id, user_id, expires_at, ip_address, user_agent,
                 created_at, is_authenticated, two_factor_verified)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&session.id)
        .bind(session.user_id)
        .bind(session.expires_at)
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(session.created_at)
        .bind(session.is_authenticated)
        .bind(session.two_factor_verified)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// セッションIDで検索
    ///
    /// # Note
    /// 期限切れ行はクエリレベルで除外する（expires_at > NOW()）。
    /// 呼び出し側（SessionManager）でも念のため再チェックされる。
    pub async fn find(&self, id: &str) -> Result<Option<Session>, sqlx::Error> {
        sqlx::query_as::<_, Session>(
            r#"
            SELECT id, user_id, expires_at, ip_address, user_agent,
                   created_at, is_authenticated, two_factor_verified
            FROM admin_sessions
            WHERE id = $1 AND expires_at > NOW()
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    /// 認証フラグのみ更新
    ///
    /// # Note
    /// 作成後に変更可能なのは is_authenticated / two_factor_verified のみ。
    /// None のフィールドは変更しない。
    pub async fn update_flags(
        &self,
        id: &str,
        is_authenticated: Option<bool>,
        two_factor_verified: Option<bool>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE admin_sessions
            SET is_authenticated = COALESCE($2, is_authenticated),
                two_factor_verified = COALESCE($3, two_factor_verified)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(is_authenticated)
        .bind(two_factor_verified)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// セッションを削除
    pub async fn delete(&self, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            DELETE FROM admin_sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// ユーザーの全セッションを削除（全デバイスからログアウト）
    pub async fn delete_all_for_user(&self, user_id: Uuid) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            DELETE FROM admin_sessions
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl SessionStore for SessionRepository {
    async fn save(&self, session: &Session) -> Result<(), AppError> {
        Ok(SessionRepository::save(self, session).await?)
    }

    async fn find(&self, id: &str) -> Result<Option<Session>, AppError> {
        Ok(SessionRepository::find(self, id).await?)
    }

    async fn update_flags(
        &self,
        id: &str,
        is_authenticated: Option<bool>,
        two_factor_verified: Option<bool>,
    ) -> Result<(), AppError> {
        Ok(SessionRepository::update_flags(self, id, is_authenticated, two_factor_verified).await?)
    }

    async fn delete(&self, id: &str) -> Result<(), AppError> {
        Ok(SessionRepository::delete(self, id).await?)
    }

    async fn delete_all_for_user(&self, user_id: Uuid) -> Result<(), AppError> {
        Ok(SessionRepository::delete_all_for_user(self, user_id).await?)
    }
}
