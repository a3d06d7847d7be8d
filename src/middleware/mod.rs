pub mod admin;
pub mod audit;
pub mod auth;
pub mod cross_check;
pub mod tenant;

pub use admin::require_admin_middleware;
pub use audit::audit_middleware;
pub use auth::verify_token_middleware;
pub use cross_check::{cross_check_middleware, RequestIdentity};
pub use tenant::resolve_tenant_middleware;
