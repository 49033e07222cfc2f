//! HTML pages for errors no template handles.

use std::fmt::Write as _;

use http::StatusCode;
use tera::escape_html;

use crate::error::Error;

/// Renders the diagnostic page shown for unexpected errors in debug mode.
pub trait DebugRenderer: Send + Sync {
    fn render(&self, error: &Error) -> Result<String, Error>;
}

/// Message, error type, raise site with surrounding source lines, the
/// `source()` chain and the backtrace.
#[derive(Clone, Debug)]
pub struct DiagnosticPage {
    context_lines: usize,
}

impl DiagnosticPage {
    pub fn new() -> Self {
        Self { context_lines: 6 }
    }

    /// Source lines shown on each side of the raise site.
    pub fn context_lines(mut self, lines: usize) -> Self {
        self.context_lines = lines;
        self
    }

    fn source_excerpt(&self, error: &Error) -> Option<String> {
        let location = error.location();
        let source = std::fs::read_to_string(location.file()).ok()?;
        let line = location.line() as usize;
        let first = line.saturating_sub(self.context_lines).max(1);

        let mut out = String::new();
        for (number, text) in source.lines().enumerate().map(|(i, l)| (i + 1, l)) {
            if number < first || number > line + self.context_lines {
                continue;
            }
            let class = if number == line { " class=\"hit\"" } else { "" };
            let _ = writeln!(out, "<span{class}>{number:>5} | {}</span>", escape_html(text));
        }
        Some(out)
    }
}

impl Default for DiagnosticPage {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugRenderer for DiagnosticPage {
    fn render(&self, error: &Error) -> Result<String, Error> {
        let location = error.location();
        let mut body = String::new();

        write!(
            body,
            "<h1>{}</h1><p class=\"kind\">{}</p><p class=\"at\">{}:{}:{}</p>",
            escape_html(&error.to_string()),
            escape_html(error.type_name()),
            escape_html(location.file()),
            location.line(),
            location.column(),
        )
        .map_err(Error::other)?;

        if let Some(excerpt) = self.source_excerpt(error) {
            write!(body, "<pre class=\"source\">{excerpt}</pre>").map_err(Error::other)?;
        }

        let mut cause = std::error::Error::source(error);
        if cause.is_some() {
            body.push_str("<h2>Caused by</h2><ol class=\"chain\">");
            while let Some(err) = cause {
                write!(body, "<li>{}</li>", escape_html(&err.to_string())).map_err(Error::other)?;
                cause = err.source();
            }
            body.push_str("</ol>");
        }

        let frames = error.trace();
        if frames.is_empty() {
            body.push_str("<p class=\"hint\">Backtrace disabled. Set RUST_BACKTRACE=1 to capture one.</p>");
        } else {
            body.push_str("<h2>Backtrace</h2><ol class=\"trace\" start=\"0\">");
            for frame in &frames {
                write!(body, "<li><code>{}</code>", escape_html(&frame.function)).map_err(Error::other)?;
                if let Some(at) = &frame.location {
                    write!(body, "<br><small>{}</small>", escape_html(at)).map_err(Error::other)?;
                }
                body.push_str("</li>");
            }
            body.push_str("</ol>");
        }

        Ok(document(&error.to_string(), DIAGNOSTIC_STYLE, &body))
    }
}

/// The last-resort error page: no templates, no I/O.
///
/// Outside debug mode it shows a generic sentence for `status`; in debug
/// mode it shows `error`'s message and raise site.
pub fn minimal_page(error: &Error, status: StatusCode, debug: bool) -> String {
    let mut body = String::new();
    if debug {
        let location = error.location();
        let _ = write!(
            body,
            "<h1>{}</h1><p class=\"at\">{} at {}:{}</p>",
            escape_html(&error.to_string()),
            escape_html(error.type_name()),
            escape_html(location.file()),
            location.line(),
        );
    } else if status == StatusCode::NOT_FOUND {
        body.push_str("<h1>Sorry, the page you are looking for could not be found.</h1>");
    } else {
        body.push_str("<h1>Whoops, looks like something went wrong.</h1>");
    }
    let title = status.canonical_reason().unwrap_or("Error");
    document(title, MINIMAL_STYLE, &body)
}

fn document(title: &str, style: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<meta name=\"robots\" content=\"noindex,nofollow\">\n<title>{}</title>\n<style>{style}</style>\n</head>\n<body>\n<div class=\"page\">{body}</div>\n</body>\n</html>\n",
        escape_html(title),
    )
}

const MINIMAL_STYLE: &str = "body{margin:0;font:16px/1.5 system-ui,sans-serif;color:#333;background:#eee}\
.page{max-width:960px;margin:10vh auto;padding:0 1.5rem}\
h1{font-weight:300;font-size:1.75rem}.at{color:#666;font-family:monospace}";

const DIAGNOSTIC_STYLE: &str = "body{margin:0;font:14px/1.5 system-ui,sans-serif;color:#222;background:#f5f5f5}\
.page{max-width:1100px;margin:2rem auto;padding:0 1.5rem}\
h1{font-weight:400;font-size:1.6rem;margin-bottom:.25rem}h2{font-size:1.1rem;margin-top:2rem}\
.kind,.at{margin:0;color:#666;font-family:monospace}\
pre.source{background:#272822;color:#f8f8f2;padding:1rem;overflow:auto}pre.source span{display:block}\
pre.source .hit{background:#75715e}.trace li{margin-bottom:.4rem}.trace small{color:#777}";

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("disk on fire")]
    struct Disk;

    #[derive(Debug, thiserror::Error)]
    #[error("could not save <invoice>")]
    struct Save(#[source] Disk);

    #[test]
    fn minimal_page_hides_details_outside_debug() {
        let err = Error::msg("db password is hunter2");
        let html = minimal_page(&err, StatusCode::INTERNAL_SERVER_ERROR, false);
        assert!(html.contains("Whoops, looks like something went wrong."));
        assert!(!html.contains("hunter2"));

        let html = minimal_page(&Error::not_found(), StatusCode::NOT_FOUND, false);
        assert!(html.contains("could not be found"));
    }

    #[test]
    fn minimal_page_shows_the_message_in_debug() {
        let html = minimal_page(&Error::msg("boom"), StatusCode::INTERNAL_SERVER_ERROR, true);
        assert!(html.contains("<h1>boom</h1>"));
        assert!(html.contains("debug.rs"));
    }

    #[test]
    fn diagnostic_page_lists_the_source_chain_escaped() {
        let html = DiagnosticPage::new().render(&Error::other(Save(Disk))).unwrap();
        assert!(html.contains("could not save &lt;invoice&gt;"));
        assert!(html.contains("<li>disk on fire</li>"));
        assert!(html.contains("Save"));
    }
}
