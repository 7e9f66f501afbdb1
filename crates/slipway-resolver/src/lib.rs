//! Artifact reference resolution.
//!
//! Turns a source revision identifier into an immutable content-addressed
//! [`ArtifactRef`](slipway_core::ArtifactRef): the revision's checked-out
//! tree is packed into a deterministic image, digested, and pushed to the
//! registry. Identical trees always produce identical references, and a
//! revision identifier can never silently point at two different trees.

pub mod error;
pub mod resolver;

pub use error::{ResolveError, ResolveResult};
pub use resolver::Resolver;
