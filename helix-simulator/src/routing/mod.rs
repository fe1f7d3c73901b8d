//! Request routing coordinates
//!
//! [`PathResolver`] turns a request URL into mount, resource path, selector and
//! extension relative to the selected strain. [`RequestRoutingContext`] carries the
//! result through dispatch.

mod context;
mod path;

pub use context::{IncomingRequest, RequestIds, RequestRoutingContext, BACKEND_NAME, CGI_PREFIX};
pub use path::{PathResolver, ResolvedPath};
