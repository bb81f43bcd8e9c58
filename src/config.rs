use secrecy::SecretBox;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub database_url: SecretBox<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    // 2FA (TOTP) 設定
    /// TOTP発行者名（認証アプリに表示される）
    pub totp_issuer: String,

    // セッション設定
    /// セッション有効期間（分）
    #[serde(default = "default_session_validity_minutes")]
    pub session_validity_minutes: i64,
    /// 使用済みTOTPコードの保持期間（秒）
    #[serde(default = "default_token_reuse_ttl_secs")]
    pub token_reuse_ttl_secs: u64,
}

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_SESSION_VALIDITY_MINUTES: i64 = 30;
const DEFAULT_TOKEN_REUSE_TTL_SECS: u64 = 300;

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_session_validity_minutes() -> i64 {
    DEFAULT_SESSION_VALIDITY_MINUTES
}

fn default_token_reuse_ttl_secs() -> u64 {
    DEFAULT_TOKEN_REUSE_TTL_SECS
}

impl Config {
    pub fn load() -> Result<Self, envy::Error> {
        envy::from_env()
    }
}
