//! Request-scoped context.
//!
//! A [`RequestContext`] owns one [`Store`] for the lifetime of a request,
//! seeded with the reserved keys. It is threaded explicitly through
//! handlers; [`RequestContext::attach`] additionally parks a handle in the
//! request's extensions for layers that only see the `http::Request`.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use ctxcell_core::{RetryPolicy, Store};
use http::request::Parts;
use http::Request;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ScopeError, ScopeResult};
use crate::key::{ScopeKey, ScopeValue, TitleCell};
use crate::query::UrlQuery;
use crate::response::ResponseSink;

/// Title every request starts with.
pub const DEFAULT_TITLE: &str = "Untitled";

/// Store type behind a request scope.
pub type ScopeStore = Store<ScopeKey, ScopeValue>;

/// Handle to the store of one request. Clones share the store.
#[derive(Debug, Clone)]
pub struct RequestContext {
    store: Arc<ScopeStore>,
}

impl RequestContext {
    /// Create a context for a request head, with the request-scoped policy.
    pub fn new(request: Parts, response: ResponseSink) -> ScopeResult<Self> {
        Self::with_policy(request, response, RetryPolicy::request_scoped())
    }

    /// Create a context with an explicit retry policy.
    pub fn with_policy(
        request: Parts,
        response: ResponseSink,
        policy: RetryPolicy,
    ) -> ScopeResult<Self> {
        let original = clone_head(&request);
        Self::seeded(original, request, response, policy)
    }

    /// Create a context whose handlers see `request` while
    /// [`original_request`](Self::original_request) keeps the head as it arrived.
    pub fn with_original(
        original: Parts,
        request: Parts,
        response: ResponseSink,
    ) -> ScopeResult<Self> {
        Self::seeded(original, request, response, RetryPolicy::request_scoped())
    }

    fn seeded(
        original: Parts,
        request: Parts,
        response: ResponseSink,
        policy: RetryPolicy,
    ) -> ScopeResult<Self> {
        let store = Store::with_entries(
            policy,
            [
                (ScopeKey::Request, ScopeValue::Request(Arc::new(request))),
                (
                    ScopeKey::OriginalRequest,
                    ScopeValue::Request(Arc::new(original)),
                ),
                (ScopeKey::Response, ScopeValue::Response(response)),
                (ScopeKey::Title, ScopeValue::Title(TitleCell::new(DEFAULT_TITLE))),
            ],
        )?;
        tracing::debug!(scope_id = %store.scope_id(), "request scope opened");
        Ok(Self {
            store: Arc::new(store),
        })
    }

    /// Wrap an existing store without seeding it.
    ///
    /// Reserved accessors on such a context report the missing seed.
    pub fn from_store(store: Arc<ScopeStore>) -> Self {
        Self { store }
    }

    /// Open a scope for `req` and park a handle in its extensions.
    ///
    /// The stored request head is taken before the handle is inserted, so
    /// the scope never references itself.
    pub fn attach<B>(mut req: Request<B>, response: ResponseSink) -> ScopeResult<(Request<B>, Self)> {
        let head = head_of(&req);
        let ctx = Self::new(head, response)?;
        req.extensions_mut().insert(ctx.clone());
        Ok((req, ctx))
    }

    /// Retrieve the handle parked by [`attach`](Self::attach).
    pub fn from_request<B>(req: &Request<B>) -> ScopeResult<Self> {
        req.extensions()
            .get::<RequestContext>()
            .cloned()
            .ok_or(ScopeError::MissingContext)
    }

    /// Underlying store, for settings and direct access.
    pub fn store(&self) -> &ScopeStore {
        &self.store
    }

    /// End the scope. Every clone of this context becomes unusable.
    pub fn finish(self) -> ScopeResult<()> {
        tracing::debug!(scope_id = %self.store.scope_id(), "request scope finished");
        self.store.clear()?;
        Ok(())
    }

    // === Reserved values ===

    /// Request head handed to handlers.
    pub fn request(&self) -> ScopeResult<Arc<Parts>> {
        self.request_under(ScopeKey::Request)
    }

    /// Request head as it arrived.
    pub fn original_request(&self) -> ScopeResult<Arc<Parts>> {
        self.request_under(ScopeKey::OriginalRequest)
    }

    fn request_under(&self, key: ScopeKey) -> ScopeResult<Arc<Parts>> {
        match self.store.require(&key)? {
            ScopeValue::Request(parts) => Ok(parts),
            _ => Err(ScopeError::type_mismatch(&key)),
        }
    }

    pub fn response(&self) -> ScopeResult<ResponseSink> {
        match self.store.require(&ScopeKey::Response)? {
            ScopeValue::Response(sink) => Ok(sink),
            _ => Err(ScopeError::type_mismatch(&ScopeKey::Response)),
        }
    }

    fn title_cell(&self) -> Option<TitleCell> {
        match self.store.get(&ScopeKey::Title) {
            Ok(Some(ScopeValue::Title(cell))) => Some(cell),
            _ => None,
        }
    }

    /// Current title, or an empty string when the scope carries none.
    pub fn title(&self) -> String {
        self.title_cell().map(|cell| cell.get()).unwrap_or_default()
    }

    /// Update the title. Does nothing when the scope carries none.
    pub fn set_title(&self, title: impl Into<String>) {
        if let Some(cell) = self.title_cell() {
            cell.set(title);
        }
    }

    /// Query string of the request, parsed once per scope.
    ///
    /// A malformed query fails the scope's persist for this key: with the
    /// request-scoped policy the first failure is final.
    pub fn url_query(&self) -> ScopeResult<Arc<UrlQuery>> {
        let request = self.request()?;
        let value = self.store.persist(ScopeKey::UrlQuery, || {
            UrlQuery::parse(request.uri.query().unwrap_or(""))
                .map(|query| ScopeValue::UrlQuery(Arc::new(query)))
        })?;
        match value {
            ScopeValue::UrlQuery(query) => Ok(query),
            _ => Err(ScopeError::type_mismatch(&ScopeKey::UrlQuery)),
        }
    }

    /// Run a handler against the request head and response sink.
    pub fn run_handler<F, R>(&self, handler: F) -> ScopeResult<R>
    where
        F: FnOnce(&Parts, &ResponseSink) -> R,
    {
        let request = self.request()?;
        let response = self.response()?;
        Ok(handler(&request, &response))
    }

    // === Application data ===

    /// Store a value under `name`. Names are write-once.
    pub fn set_data<T: Serialize>(
        &self,
        name: impl Into<Cow<'static, str>>,
        value: &T,
    ) -> ScopeResult<()> {
        let key = ScopeKey::named(name);
        let json = serde_json::to_value(value).map_err(|e| ScopeError::Encode {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.store.set(key, ScopeValue::Json(json))?;
        Ok(())
    }

    /// Read the value stored under `name`.
    pub fn data<T: DeserializeOwned>(
        &self,
        name: impl Into<Cow<'static, str>>,
    ) -> ScopeResult<Option<T>> {
        let key = ScopeKey::named(name);
        match self.store.get(&key)? {
            Some(value) => decode(&key, value).map(Some),
            None => Ok(None),
        }
    }

    /// Return the value under `name`, computing it on a miss.
    ///
    /// A value that fails to encode counts as a failed attempt.
    pub fn persist_data<T, F, E>(
        &self,
        name: impl Into<Cow<'static, str>>,
        mut compute: F,
    ) -> ScopeResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Result<T, E>,
        E: fmt::Display,
    {
        let key = ScopeKey::named(name);
        let value = self.store.persist(key.clone(), || {
            let computed = compute().map_err(|e| e.to_string())?;
            serde_json::to_value(&computed)
                .map(ScopeValue::Json)
                .map_err(|e| format!("encode failed: {}", e))
        })?;
        decode(&key, value)
    }
}

fn decode<T: DeserializeOwned>(key: &ScopeKey, value: ScopeValue) -> ScopeResult<T> {
    match value {
        ScopeValue::Json(json) => serde_json::from_value(json).map_err(|e| ScopeError::Decode {
            key: key.to_string(),
            reason: e.to_string(),
        }),
        _ => Err(ScopeError::type_mismatch(key)),
    }
}

/// Copy of a request's head. The body stays with the request.
fn head_of<B>(req: &Request<B>) -> Parts {
    let (mut parts, ()) = Request::new(()).into_parts();
    parts.method = req.method().clone();
    parts.uri = req.uri().clone();
    parts.version = req.version();
    parts.headers = req.headers().clone();
    parts.extensions = req.extensions().clone();
    parts
}

fn clone_head(parts: &Parts) -> Parts {
    let (mut copy, ()) = Request::new(()).into_parts();
    copy.method = parts.method.clone();
    copy.uri = parts.uri.clone();
    copy.version = parts.version;
    copy.headers = parts.headers.clone();
    copy.extensions = parts.extensions.clone();
    copy
}
