//! slipway-platform: clients for the systems Slipway drives.
//!
//! Slipway consumes three external interfaces and owns none of them:
//! the deployment platform (declarative state in, instance groups out),
//! the image registry (content-addressed push/pull), and the traffic
//! layer (which backends the load balancer actually routes to).
//!
//! # Architecture
//!
//! Each interface is a trait (`PlatformApi`, `RegistryApi`,
//! `TrafficLayer`) held behind `Arc<dyn ...>` by consumers. The `http`
//! module provides the real reqwest-backed implementations; the `fake`
//! module provides scriptable in-memory stand-ins used by tests and by
//! the daemon's local development mode.
//!
//! Credentials are injected, not owned: HTTP clients call a
//! `TokenSource` for a fresh bearer token per request, so this crate
//! never sees the brokering logic.

pub mod api;
pub mod error;
pub mod fake;
pub mod http;
pub mod types;

pub use api::{BoxTokenFuture, PlatformApi, RegistryApi, TokenSource, TrafficLayer};
pub use error::{PlatformError, PlatformResult, RegistryError, RegistryResult};
pub use fake::{FakePlatform, FakeRegistry, FakeTrafficLayer};
pub use http::{HttpPlatform, HttpRegistry, HttpTrafficLayer};
pub use types::*;
