//! Unbundled development server.
//!
//! Serves individual ES modules on demand instead of a bundle, and forwards
//! requests under configured URL prefixes to a backend origin. Each local
//! request runs URL → file → transpile → import rewrite against the live
//! source tree.

pub mod proxy;
pub mod rewrite;
pub mod server;
pub mod transform;

pub use proxy::{ProxyClient, ProxyError};
pub use rewrite::ImportRewriter;
pub use server::{route, DevError, DevServer, DevServerHandle, Route};
pub use transform::{ModuleTransformError, ModuleTransformer, Served, TransformErrorKind};
