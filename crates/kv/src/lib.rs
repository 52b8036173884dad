//! The node facade: `put`/`get`/`delete`/`watch` over the composed store,
//! replicated log, and watch bus. This is the surface the HTTP layer and
//! any other external collaborator consumes.

pub mod node;

pub use node::{Node, NodeError, DEFAULT_APPLY_TIMEOUT};
