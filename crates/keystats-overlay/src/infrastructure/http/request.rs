//! Request-line parsing and routing.

/// The parts of `METHOD PATH VERSION` the server cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLine<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub version: Option<&'a str>,
}

/// Which handler serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Page,
    Query,
    Events,
    NotFound,
}

/// Parses the first line of `raw`.
///
/// Returns `None` when the line has fewer than two tokens; the caller closes
/// the connection without writing anything.
pub fn parse_request_line(raw: &str) -> Option<RequestLine<'_>> {
    let first = raw.lines().next()?;
    let mut tokens = first.split_whitespace();
    let method = tokens.next()?;
    let path = tokens.next()?;
    Some(RequestLine {
        method,
        path,
        version: tokens.next(),
    })
}

/// Maps a request path to its handler.  First match wins.
pub fn route(path: &str) -> Route {
    if path == "/" || path.starts_with("/index") {
        Route::Page
    } else if path == "/query" || path == "/api/stats" {
        Route::Query
    } else if path == "/events" || path == "/sse" {
        Route::Events
    } else {
        Route::NotFound
    }
}
