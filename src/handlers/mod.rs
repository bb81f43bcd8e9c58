use axum::http::HeaderMap;

pub mod health;
pub mod login;
pub mod logout;
pub mod session;
pub mod two_factor;

pub use health::health_check;
pub use login::login;
pub use logout::{logout, logout_all};
pub use session::{current_session, session_stats};
pub use two_factor::{confirm_2fa, disable_2fa, setup_2fa, verify_2fa};

/// リクエストヘッダーからクライアント指紋（IP・User-Agent）を取り出す
///
/// IPはリバースプロキシ経由を想定して x-forwarded-for の先頭を採用する。
/// どちらも欠けている場合は "unknown" として記録する（監査は文字列比較
/// なので、作成時と検証時で同じ規則が適用されていればよい）。
pub(crate) fn client_fingerprint(headers: &HeaderMap) -> (String, String) {
    let ip_address = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
        .unwrap_or_else(|| "unknown".to_string());

    (ip_address, user_agent)
}
