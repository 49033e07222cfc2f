//! Template lookup and rendering.
//!
//! The exception handler renders error pages through the [`Views`] trait.
//! [`TemplateViews`] is the stock implementation: [`tera`] templates read
//! from a list of directories, with slice's built-in error views as the
//! last fallback.

use std::collections::HashSet;
use std::path::PathBuf;

use serde_json::Value;
use tracing::warn;

use crate::error::Error;
use crate::exception::ERROR_VIEWS;

/// A source of named templates.
pub trait Views: Send + Sync {
    /// Whether a template called `name` (e.g. `errors/404.html`) exists.
    fn exists(&self, name: &str) -> bool;

    /// Renders `name` with `context`, which must be a JSON object.
    fn render(&self, name: &str, context: &Value) -> Result<String, Error>;
}

/// [`tera`] templates from disk, then the built-in error views.
///
/// Template names are paths relative to a view directory, with `/`
/// separators: `resources/views/errors/503.html` is `errors/503.html`.
/// When two directories define the same name, the earlier one wins; a
/// built-in view is used only when no directory defines its name.
///
/// A render reads the requested template and the templates it extends,
/// includes or imports, nothing else. Templates are read at render time,
/// so edits show up without a restart.
#[derive(Clone, Debug, Default)]
pub struct TemplateViews {
    paths: Vec<PathBuf>,
}

impl TemplateViews {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self { paths: paths.into_iter().map(Into::into).collect() }
    }

    /// Only the built-in error views.
    pub fn builtin() -> Self {
        Self::default()
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// The source of `name`: the first readable file in the view paths,
    /// then the built-in view of that name.
    fn source(&self, name: &str) -> Option<String> {
        for root in &self.paths {
            let file = root.join(name);
            if !file.is_file() {
                continue;
            }
            match std::fs::read_to_string(&file) {
                Ok(source) => return Some(source),
                Err(e) => warn!(path = %file.display(), error = %e, "skipping unreadable view"),
            }
        }
        ERROR_VIEWS
            .iter()
            .find(|(builtin, _)| *builtin == name)
            .map(|(_, source)| (*source).to_owned())
    }

    /// `name` and every template it depends on, as `(name, source)` pairs.
    fn load(&self, name: &str) -> Result<Vec<(String, String)>, Error> {
        let mut templates = Vec::new();
        let mut seen = HashSet::new();
        let mut pending = vec![name.to_owned()];
        while let Some(next) = pending.pop() {
            if !seen.insert(next.clone()) {
                continue;
            }
            match self.source(&next) {
                Some(source) => {
                    pending.extend(dependencies(&source));
                    templates.push((next, source));
                }
                None if next == name => return Err(Error::msg(format!("view `{name}` not found"))),
                // Tera reports missing parents and includes itself.
                None => {}
            }
        }
        Ok(templates)
    }
}

impl Views for TemplateViews {
    fn exists(&self, name: &str) -> bool {
        self.source(name).is_some()
    }

    fn render(&self, name: &str, context: &Value) -> Result<String, Error> {
        let mut tera = tera::Tera::default();
        tera.add_raw_templates(self.load(name)?)?;
        let context = tera::Context::from_value(context.clone())?;
        Ok(tera.render(name, &context)?)
    }
}

/// Template names referenced by `extends`, `include` and `import` tags.
fn dependencies(source: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = source;
    while let Some(open) = rest.find("{%") {
        let after = &rest[open + 2..];
        let Some(close) = after.find("%}") else { break };
        let tag = after[..close].trim_start_matches('-').trim();
        let keyword = tag.split_whitespace().next().unwrap_or_default();
        if matches!(keyword, "extends" | "include" | "import") {
            names.extend(quoted(tag));
        }
        rest = &after[close + 2..];
    }
    names
}

/// Every `"..."` or `'...'` literal in `tag`.
fn quoted(tag: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut chars = tag.char_indices();
    while let Some((start, c)) = chars.next() {
        if c != '"' && c != '\'' {
            continue;
        }
        match chars.by_ref().find(|&(_, q)| q == c) {
            Some((end, _)) => out.push(tag[start + 1..end].to_owned()),
            None => break,
        }
    }
    out
}
