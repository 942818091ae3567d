//! Keel Load Balancer
//!
//! Fans HTTP requests across a pool of stateless application replicas:
//!
//! - [`prober::HealthProber`]: probes every backend's `/health` on a fixed
//!   interval and atomically publishes the set that passed
//! - [`dispatcher`]: picks a backend by CRC-32 over the request path and
//!   forwards the request, so a given path always lands on the same
//!   backend for a fixed healthy-set
//!
//! Selection is deterministic given the healthy-set but intentionally not
//! stable across membership changes: simplicity over stability.

pub mod dispatcher;
pub mod prober;

pub use dispatcher::{choose_backend, Dispatcher};
pub use prober::HealthProber;
