//! ctxcell HTTP - Request Scopes
//!
//! Binds a [`ctxcell_core::Store`] to the lifetime of one HTTP request and
//! layers the well-known request values on top of it: the request head,
//! the response sink, a mutable title and the lazily parsed query string.
//!
//! ```
//! use ctxcell_http::{RequestContext, ResponseSink};
//! use http::Request;
//!
//! let req = Request::builder().uri("/search?q=cells").body(()).unwrap();
//! let (req, ctx) = RequestContext::attach(req, ResponseSink::new()).unwrap();
//!
//! // deeper layers only holding the request can recover the scope
//! let same = RequestContext::from_request(&req).unwrap();
//! same.set_title("Search");
//!
//! assert_eq!(ctx.title(), "Search");
//! assert_eq!(ctx.url_query().unwrap().get("q"), Some("cells"));
//! ctx.finish().unwrap();
//! ```

pub mod context;
pub mod error;
pub mod key;
pub mod query;
pub mod response;

pub use context::{RequestContext, ScopeStore, DEFAULT_TITLE};
pub use error::{QueryError, ScopeError, ScopeResult};
pub use key::{ScopeKey, ScopeValue, TitleCell};
pub use query::UrlQuery;
pub use response::ResponseSink;
