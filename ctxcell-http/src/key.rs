//! Keys and values of a request scope.
//!
//! A request scope stores heterogeneous values in one store, so both keys
//! and values are closed enumerations. Reserved keys are seeded by the
//! adapter; application data lives under [`ScopeKey::Named`] as JSON.

use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use http::request::Parts;

use crate::query::UrlQuery;
use crate::response::ResponseSink;

/// Key of a request scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopeKey {
    /// Request head handed to handlers.
    Request,
    /// Request head as it arrived, before any rewrite.
    OriginalRequest,
    /// Response sink for status and headers.
    Response,
    /// Mutable page title.
    Title,
    /// Parsed query string, computed on first use.
    UrlQuery,
    /// Application data.
    Named(Cow<'static, str>),
}

impl ScopeKey {
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        ScopeKey::Named(name.into())
    }

    /// Whether the key belongs to the adapter rather than the application.
    pub fn is_reserved(&self) -> bool {
        !matches!(self, ScopeKey::Named(_))
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKey::Request => write!(f, "request"),
            ScopeKey::OriginalRequest => write!(f, "original_request"),
            ScopeKey::Response => write!(f, "response"),
            ScopeKey::Title => write!(f, "title"),
            ScopeKey::UrlQuery => write!(f, "url_query"),
            ScopeKey::Named(name) => write!(f, "data:{}", name),
        }
    }
}

/// Value of a request scope.
#[derive(Debug, Clone)]
pub enum ScopeValue {
    Request(Arc<Parts>),
    Response(ResponseSink),
    Title(TitleCell),
    UrlQuery(Arc<UrlQuery>),
    Json(serde_json::Value),
}

/// Shared, mutable title.
///
/// The title is the one reserved value that changes after seeding: the
/// store holds the cell, and the cell's contents are updated in place.
#[derive(Debug, Clone, Default)]
pub struct TitleCell(Arc<RwLock<String>>);

impl TitleCell {
    pub fn new(title: impl Into<String>) -> Self {
        Self(Arc::new(RwLock::new(title.into())))
    }

    pub fn get(&self) -> String {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, title: impl Into<String>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = title.into();
    }
}
