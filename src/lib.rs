pub mod balancer;
pub mod cache;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod proxy;

/// Product token advertised in the `Via` header, e.g. `v1.0.0 relais`.
pub fn versioned_name() -> String {
    format!("v{} {}", env!("CARGO_PKG_VERSION"), env!("CARGO_PKG_NAME"))
}
