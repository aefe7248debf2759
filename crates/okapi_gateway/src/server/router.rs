/// Action selected for an inbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    StopServer,
    Status,
    Token,
    Authenticate,
    Proxy,
    NotFound,
}

pub const API_PREFIX: &str = "/api";

/// Prefix table, evaluated in order. Matching is on raw string prefixes, so
/// `/tokens` resolves to [`Route::Token`] and `/apiary` to [`Route::Proxy`].
const ROUTES: &[(&str, Route)] = &[
    ("/stop-server", Route::StopServer),
    ("/status", Route::Status),
    ("/token", Route::Token),
    ("/authenticate", Route::Authenticate),
    (API_PREFIX, Route::Proxy),
];

/// Classify a request by the prefix of its path
pub fn classify(path: &str) -> Route {
    ROUTES
        .iter()
        .find(|(prefix, _)| path.starts_with(*prefix))
        .map(|(_, route)| *route)
        .unwrap_or(Route::NotFound)
}

/// Remove the `/api` prefix exactly once, keeping the query string
pub fn strip_api_prefix(path_and_query: &str) -> &str {
    path_and_query
        .strip_prefix(API_PREFIX)
        .unwrap_or(path_and_query)
}
