//! Named middleware, middleware groups and the priority list.
//!
//! The registry is built once at startup and only read afterwards: the
//! kernel resolves identifiers against it for every request, in both the
//! handle and the terminate phase.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Error;
use crate::middleware::Middleware;

/// A middleware identifier resolved against the registry.
#[derive(Clone)]
pub struct Resolved {
    pub name: String,
    pub middleware: Arc<dyn Middleware>,
    pub params: Vec<String>,
}

/// Maps middleware names to implementations.
///
/// ```rust
/// use slice::middleware::{MiddlewareRegistry, Trace, Authenticate};
///
/// let registry = MiddlewareRegistry::new()
///     .register("trace", Trace)
///     .register("auth", Authenticate::new(|req, _guard| req.header("authorization").is_some()))
///     .group("api", ["trace", "auth:api"])
///     .priority(["trace", "auth"]);
/// ```
#[derive(Default)]
pub struct MiddlewareRegistry {
    middleware: HashMap<String, Arc<dyn Middleware>>,
    groups: HashMap<String, Vec<String>>,
    priority: Vec<String>,
}

impl MiddlewareRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `middleware` under `name`, replacing any previous entry.
    pub fn register(mut self, name: impl Into<String>, middleware: impl Middleware) -> Self {
        self.middleware.insert(name.into(), Arc::new(middleware));
        self
    }

    /// Defines a group: referencing `name` expands to `ids`, in order.
    pub fn group<I, S>(mut self, name: impl Into<String>, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.insert(name.into(), ids.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the relative order middleware names must keep on a route.
    pub fn priority<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.priority = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.middleware.contains_key(name) || self.groups.contains_key(name)
    }

    /// Resolves one identifier (`name` or `name:p1,p2`).
    pub fn resolve(&self, id: &str) -> Result<Resolved, Error> {
        let (name, params) = parse(id);
        let middleware = self
            .middleware
            .get(name)
            .ok_or_else(|| Error::resolution(name))?;
        Ok(Resolved { name: name.to_owned(), middleware: Arc::clone(middleware), params })
    }

    /// Replaces group names with their members, recursively.
    pub fn expand<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<String>, Error> {
        let mut out = Vec::with_capacity(ids.len());
        let mut trail = Vec::new();
        for id in ids {
            self.expand_into(id.as_ref(), &mut trail, &mut out)?;
        }
        Ok(out)
    }

    fn expand_into<'a>(
        &'a self,
        id: &'a str,
        trail: &mut Vec<&'a str>,
        out: &mut Vec<String>,
    ) -> Result<(), Error> {
        let Some(members) = self.groups.get(id) else {
            out.push(id.to_owned());
            return Ok(());
        };
        if trail.contains(&id) {
            return Err(Error::msg(format!("middleware group `{id}` contains itself")));
        }
        trail.push(id);
        for member in members {
            self.expand_into(member, trail, out)?;
        }
        trail.pop();
        Ok(())
    }

    /// Reorders `ids` so the names on the priority list appear in priority
    /// order. Unlisted identifiers keep their positions; listed ones are
    /// redistributed over the slots listed ones occupied.
    pub fn sort_by_priority(&self, mut ids: Vec<String>) -> Vec<String> {
        let rank = |id: &str| self.priority.iter().position(|p| p == parse(id).0);

        let slots: Vec<usize> = ids
            .iter()
            .enumerate()
            .filter(|(_, id)| rank(id).is_some())
            .map(|(i, _)| i)
            .collect();
        let mut listed: Vec<String> = slots.iter().map(|&i| ids[i].clone()).collect();
        listed.sort_by_key(|id| rank(id));

        for (slot, id) in slots.into_iter().zip(listed) {
            ids[slot] = id;
        }
        ids
    }
}

/// Splits a middleware identifier into its name and parameters.
///
/// Everything after the first `:` is a comma separated parameter list:
/// `"auth:api,admin"` → `("auth", ["api", "admin"])`, `"auth"` → `("auth", [])`.
pub fn parse(id: &str) -> (&str, Vec<String>) {
    match id.split_once(':') {
        Some((name, params)) => (name, params.split(',').map(str::to_owned).collect()),
        None => (id, Vec::new()),
    }
}
