pub mod credentials;
pub mod pool;
pub mod registry;
pub mod resolver;
pub mod token;

pub use credentials::{CredentialCache, CredentialSource};
pub use pool::{ConnectionOpener, PoolManager, PooledConnection, TenantConnection};
pub use registry::TenantRegistry;
pub use resolver::{TenantContext, TenantDirectory, TenantResolver};
pub use token::{IdentityClaims, TokenService};
