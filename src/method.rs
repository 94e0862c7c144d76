//! Route methods as a typed enum.
//!
//! The adapter contract registers routes for the seven common HTTP methods plus
//! `All`, which matches any method. Anything else (WebDAV verbs, `TRACE`,
//! `CONNECT`) has no registration entry point and falls through to the
//! not-found handler.

use std::fmt;
use std::str::FromStr;

/// A method a route can be registered for.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RouteMethod {
    Delete,
    Get,
    Head,
    Options,
    Patch,
    Post,
    Put,
    /// Matches every request method.
    All,
}

impl RouteMethod {
    /// Every registrable method, `All` last.
    pub const ALL: [RouteMethod; 8] = [
        Self::Delete,
        Self::Get,
        Self::Head,
        Self::Options,
        Self::Patch,
        Self::Post,
        Self::Put,
        Self::All,
    ];

    /// Returns the uppercase wire representation (e.g. `"GET"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delete  => "DELETE",
            Self::Get     => "GET",
            Self::Head    => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch   => "PATCH",
            Self::Post    => "POST",
            Self::Put     => "PUT",
            Self::All     => "ALL",
        }
    }

    /// The concrete HTTP method, or `None` for [`RouteMethod::All`].
    pub fn to_http(self) -> Option<http::Method> {
        match self {
            Self::Delete  => Some(http::Method::DELETE),
            Self::Get     => Some(http::Method::GET),
            Self::Head    => Some(http::Method::HEAD),
            Self::Options => Some(http::Method::OPTIONS),
            Self::Patch   => Some(http::Method::PATCH),
            Self::Post    => Some(http::Method::POST),
            Self::Put     => Some(http::Method::PUT),
            Self::All     => None,
        }
    }
}

/// Parses a method name, ignoring ASCII case (`"get"`, `"Get"`, `"GET"`).
impl FromStr for RouteMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

impl fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
