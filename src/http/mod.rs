//! HTTP integration: request classification, governance middleware,
//! operational endpoints and the server.

mod client;
mod handlers;
mod middleware;
mod router;
mod server;
mod tracker;

pub use client::{client_identifier, ClientIdentity, UNKNOWN_CLIENT};
pub use handlers::{
    health_router, metrics_handler, metrics_router, operational_router, reset_metrics_handler,
};
pub use middleware::{
    apply_rate_limit_headers, governance_middleware, throttled_response, Governance,
    RequestDescriptor, ThrottleBody, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET,
};
pub use router::{RouteRule, TierRouter};
pub use server::HttpServer;
pub use tracker::{RequestTracker, CANCELLED_STATUS};
