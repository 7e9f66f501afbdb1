//! Health verification for rollouts.
//!
//! A release is healthy when enough instances are ready, and an instance
//! is ready only if its own probe passes **and** the traffic layer lists
//! it as a registered backend. A healthy process nobody routes to is not
//! serving anyone.

pub mod probe;
pub mod verifier;
pub mod window;

pub use probe::{FakeProber, HttpProber, InstanceProber, ProbeOutcome, http_probe};
pub use verifier::{FakeVerifier, HealthVerdict, HealthVerifier, Verifier};
pub use window::VerdictWindow;
