pub mod tenant;

pub use tenant::{
    validate_subdomain, CreateTenantRequest, RotateCredentialsRequest, Tenant, TenantPage,
    TenantResponse, UpdateTenantRequest,
};
