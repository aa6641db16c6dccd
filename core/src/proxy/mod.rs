//! Proxy module - Moodle REST facade server

pub mod cookies;
pub mod dispatcher;
pub mod extract;
pub mod handlers;
pub mod rate_limit;
pub mod relay;
pub mod routes;
pub mod server;
pub mod upstream;

pub use dispatcher::{ProxyDispatcher, ProxyOutcome};
pub use routes::RouteTable;
pub use server::ProxyServer;
