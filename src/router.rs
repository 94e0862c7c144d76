//! Radix-tree request router.
//!
//! One tree per HTTP method plus one for routes registered with
//! [`RouteMethod::All`]. O(path-length) lookup via [`matchit`].

use std::collections::HashMap;
use std::sync::Arc;

use matchit::Router as MatchitRouter;

use crate::error::Error;
use crate::handler::BoxedHandler;
use crate::method::RouteMethod;

/// Catch-all segment used to mount a handler at the root.
const MOUNT_TAIL: &str = "/{*rest}";

pub(crate) struct Router {
    routes: HashMap<http::Method, MatchitRouter<BoxedHandler>>,
    any: MatchitRouter<BoxedHandler>,
}

impl Router {
    pub(crate) fn new() -> Self {
        Self { routes: HashMap::new(), any: MatchitRouter::new() }
    }

    /// Registers `handler` for `method` at `path`.
    ///
    /// An empty path mounts the handler at the root: it matches `/` and
    /// every path below it. A path without a leading `/` gets one.
    pub(crate) fn add(
        &mut self,
        method: RouteMethod,
        path: &str,
        handler: BoxedHandler,
    ) -> Result<(), Error> {
        let tree = match method.to_http() {
            Some(m) => self.routes.entry(m).or_default(),
            None => &mut self.any,
        };

        if path.is_empty() {
            insert(tree, "/", Arc::clone(&handler))?;
            return insert(tree, MOUNT_TAIL, handler);
        }

        if path.starts_with('/') {
            insert(tree, path, handler)
        } else {
            insert(tree, &format!("/{path}"), handler)
        }
    }

    pub(crate) fn lookup(
        &self,
        method: &http::Method,
        path: &str,
    ) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let matched = self
            .routes
            .get(method)
            .and_then(|tree| tree.at(path).ok())
            .or_else(|| self.any.at(path).ok())?;

        let handler = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }
}

fn insert(tree: &mut MatchitRouter<BoxedHandler>, path: &str, handler: BoxedHandler) -> Result<(), Error> {
    tree.insert(path, handler).map_err(|source| Error::Route { path: path.to_owned(), source })
}
