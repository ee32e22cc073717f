//! Pipeline stages, in the order [`crate::pipeline::STAGES`] applies them.

mod authentication;
mod client_ip;
mod context;
mod login_guard;
mod rate_limit;
mod request_id;
mod session;
mod tenant;

pub use authentication::{AUTH_STATUS_HEADER, authentication_middleware};
pub use client_ip::{ClientIp, ClientIpResolver};
pub use context::{
    TENANT_ID_HEADER, TENANT_NAME_HEADER, TENANT_STATUS_HEADER, tenant_context_middleware,
};
pub use login_guard::login_guard_middleware;
pub use rate_limit::{RATE_LIMIT_LIMIT_HEADER, RATE_LIMIT_REMAINING_HEADER, rate_limit_middleware};
pub use request_id::{REQUEST_ID_HEADER, RequestId, request_id_middleware};
pub use session::session_middleware;
pub use tenant::{TenantOutcome, tenant_middleware};
