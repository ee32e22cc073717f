//! Tenant resolution, validation and the request-scoped tenant context.

mod context;
mod resolver;
mod validator;

pub use context::{TenantContext, TenantSource};
pub use resolver::{TenantCandidate, TenantInputs, TenantResolver};
pub use validator::{RejectionReason, TenantResolution, TenantValidator};
