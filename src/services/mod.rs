pub mod auth;
pub mod replay_guard;
pub mod session_manager;
pub mod two_factor;

pub use auth::AuthService;
pub use replay_guard::ReplayGuard;
pub use session_manager::{PgSessionManager, SessionManager, SessionStats, SessionUpdate};
pub use two_factor::TwoFactorService;
