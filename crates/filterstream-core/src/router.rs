//! Exact-path route table
//!
//! Filled once at startup and only read afterwards. Method checks belong to
//! the handlers so a wrong method on a known path answers 405, not 404.

use std::collections::HashMap;

/// Path of the mocked streaming endpoint
pub const FILTER_PATH: &str = "/1.1/statuses/filter.json";

/// Handlers a path can resolve to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Filter,
}

/// Path to endpoint lookup
#[derive(Debug, Clone)]
pub struct Routes {
    table: HashMap<&'static str, Endpoint>,
}

impl Routes {
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Add a route
    pub fn route(mut self, path: &'static str, endpoint: Endpoint) -> Self {
        self.table.insert(path, endpoint);
        self
    }

    /// Match a request path
    pub fn find(&self, path: &str) -> Option<Endpoint> {
        self.table.get(path).copied()
    }
}

impl Default for Routes {
    /// The single streaming route
    fn default() -> Self {
        Self::new().route(FILTER_PATH, Endpoint::Filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_routes() {
        let routes = Routes::default();
        assert_eq!(routes.find(FILTER_PATH), Some(Endpoint::Filter));
    }

    #[test]
    fn test_exact_match_only() {
        let routes = Routes::default();
        assert_eq!(routes.find("/"), None);
        assert_eq!(routes.find("/1.1/statuses/filter.json/"), None);
        assert_eq!(routes.find("/1.1/statuses/FILTER.json"), None);
        assert_eq!(routes.find("/1.1/statuses/sample.json"), None);
    }
}
