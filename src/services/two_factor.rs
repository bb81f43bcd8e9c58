use std::collections::HashSet;

use data_encoding::BASE32_NOPAD;
use rand::{Rng, RngCore};
use totp_rs::{Algorithm, TOTP};

use crate::error::AppError;
use crate::services::ReplayGuard;

/// TOTPコードの許容ウィンドウ（前後ステップ数、±60秒）
const TOTP_SKEW: u8 = 2;
/// TOTPステップ（秒）
const TOTP_STEP: u64 = 30;
/// TOTPコード桁数
const TOTP_DIGITS: usize = 6;
/// バックアップコード文字種（大文字英数字）
const BACKUP_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
/// バックアップコード長
const BACKUP_CODE_LEN: usize = 8;
/// バックアップコード既定生成数
pub const DEFAULT_BACKUP_CODE_COUNT: usize = 10;

/// 2FA登録時に返す一式
#[derive(Debug)]
pub struct TwoFactorSetup {
    /// Base32エンコードされたシークレット（パディングなし）
    pub secret: String,
    /// QRコード（data:image/png;base64,... 形式）
    pub qr_code_url: String,
    /// 使い切りバックアップコード
    pub backup_codes: Vec<String>,
}

/// バックアップコード検証結果
///
/// 一致した場合、remaining_codes は該当コードを除いたリスト。
/// 使い切りの強制は、呼び出し側がこのリストを永続化することで成立する。
#[derive(Debug)]
pub struct BackupCodeCheck {
    pub is_valid: bool,
    pub remaining_codes: Vec<String>,
}

/// 二要素認証（TOTP + バックアップコード）サービス
///
/// # Security
/// - シークレット・コードはログに出力しない
/// - コード値の使用済み管理は ReplayGuard に委譲（共有インスタンス）
#[derive(Clone)]
pub struct TwoFactorService {
    issuer: String,
    replay_guard: ReplayGuard,
}

impl TwoFactorService {
    /// 新しい TwoFactorService を作成
    ///
    /// # Arguments
    /// * `issuer` - TOTP発行者名（認証アプリに表示される）
    /// * `replay_guard` - プロセス内で共有する使用済みコードガード
    pub fn new(issuer: String, replay_guard: ReplayGuard) -> Self {
        Self {
            issuer,
            replay_guard,
        }
    }

    /// 32バイト（256ビット）のランダムシークレットを生成し、
    /// パディングなしBase32でエンコード
    pub fn generate_secret() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        BASE32_NOPAD.encode(&bytes)
    }

    /// otpauth://totp/... URIを構築
    ///
    /// SHA1 / 6桁 / 30秒周期で発行者とユーザー名を埋め込む。
    /// 認証アプリ（Google Authenticator等）がこのURIを読み取る。
    pub fn otpauth_url(&self, username: &str, secret: &str) -> String {
        format!(
            "otpauth://totp/{issuer}:{username}?secret={secret}&issuer={issuer}&algorithm=SHA1&digits={digits}&period={step}",
            issuer = self.issuer,
            username = username,
            secret = secret,
            digits = TOTP_DIGITS,
            step = TOTP_STEP,
        )
    }

    /// otpauth URIからQRコードを生成（PNG形式、data URL）
    pub fn generate_qr_code(&self, otpauth_url: &str) -> Result<String, AppError> {
        let totp = TOTP::from_url(otpauth_url).map_err(|e| {
            tracing::error!(error = %e, "otpauth URIのパースエラー");
            AppError::QrGeneration
        })?;

        let qr_base64 = totp.get_qr_base64().map_err(|e| {
            tracing::error!(error = %e, "QRコード生成エラー");
            AppError::QrGeneration
        })?;

        Ok(format!("data:image/png;base64,{}", qr_base64))
    }

    /// TOTPコードを検証（RFC 6238）
    ///
    /// 前後2ステップ（±60秒）の時間ウィンドウを許容する。
    /// エラーは返さない: 不正な形式のシークレット・コードは false。
    pub fn verify_token(&self, secret: &str, token: &str) -> bool {
        // 入力検証: コードは6桁の数字のみ
        if token.len() != TOTP_DIGITS || !token.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }

        let secret_bytes = match BASE32_NOPAD.decode(secret.as_bytes()) {
            Ok(bytes) => bytes,
            Err(_) => {
                tracing::warn!("シークレットのBase32デコードに失敗");
                return false;
            }
        };

        let totp = match TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW,
            TOTP_STEP,
            secret_bytes,
            None,
            String::new(),
        ) {
            Ok(totp) => totp,
            Err(e) => {
                tracing::warn!(error = %e, "TOTP作成エラー");
                return false;
            }
        };

        let now = match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
            Ok(duration) => duration.as_secs(),
            Err(e) => {
                tracing::error!(error = ?e, "システム時刻取得エラー");
                return false;
            }
        };

        // check は内部で skew を考慮して検証（コード比較は定数時間）
        totp.check(token, now)
    }

    /// 使い切りバックアップコードを生成
    ///
    /// 8文字の大文字英数字、相互に重複しない。CSPRNG使用。
    pub fn generate_backup_codes(count: usize) -> Vec<String> {
        let mut rng = rand::thread_rng();
        let mut seen = HashSet::with_capacity(count);
        let mut codes = Vec::with_capacity(count);

        while codes.len() < count {
            let code: String = (0..BACKUP_CODE_LEN)
                .map(|_| BACKUP_CODE_CHARSET[rng.gen_range(0..BACKUP_CODE_CHARSET.len())] as char)
                .collect();
            if seen.insert(code.clone()) {
                codes.push(code);
            }
        }

        codes
    }

    /// バックアップコードを検証
    ///
    /// 大文字小文字を区別しない完全一致。一致した場合は該当コードを
    /// 除いたリストを返す（使い切りの強制は呼び出し側の永続化責任）。
    pub fn verify_backup_code(codes: &[String], candidate: &str) -> BackupCodeCheck {
        let position = codes
            .iter()
            .position(|code| code.eq_ignore_ascii_case(candidate));

        match position {
            Some(index) => {
                let mut remaining = codes.to_vec();
                remaining.remove(index);
                BackupCodeCheck {
                    is_valid: true,
                    remaining_codes: remaining,
                }
            }
            None => BackupCodeCheck {
                is_valid: false,
                remaining_codes: codes.to_vec(),
            },
        }
    }

    /// 2FA登録一式を生成（シークレット + QRコード + バックアップコード）
    pub fn setup_two_factor(&self, username: &str) -> Result<TwoFactorSetup, AppError> {
        let secret = Self::generate_secret();
        let otpauth_url = self.otpauth_url(username, &secret);
        let qr_code_url = self.generate_qr_code(&otpauth_url)?;
        let backup_codes = Self::generate_backup_codes(DEFAULT_BACKUP_CODE_COUNT);

        Ok(TwoFactorSetup {
            secret,
            qr_code_url,
            backup_codes,
        })
    }

    /// コードが使用済みか（ReplayGuard への委譲）
    pub async fn is_token_used(&self, token: &str) -> bool {
        self.replay_guard.is_used(token).await
    }

    /// コードを使用済みとして記録（ReplayGuard への委譲）
    ///
    /// 戻り値は「新規に記録したか」。false なら使用済みコード。
    pub async fn mark_token_used(&self, token: &str) -> bool {
        self.replay_guard.mark_used(token).await
    }
}
