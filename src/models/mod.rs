pub mod admin;
pub mod session;

pub use admin::AdminUser;
pub use session::Session;
