use std::collections::HashMap;

use crate::state::State;

/// An unconditional edge: whenever `source` finishes, go to `target`.
#[derive(Debug, Clone)]
pub struct Edge {
    pub source: String,
    pub target: String,
}

/// A branch out of `source` chosen by calling `router` on the post-node
/// state. `path_map` is metadata only (used for `incoming_edge_count`); the
/// router closure's return value is authoritative for actual routing.
pub struct ConditionalEdge<S: State> {
    pub source: String,
    pub router: Box<dyn Fn(&S) -> String + Send + Sync>,
    pub path_map: Option<HashMap<String, String>>,
}

impl<S: State> ConditionalEdge<S> {
    pub fn new(source: impl Into<String>, router: impl Fn(&S) -> String + Send + Sync + 'static) -> Self {
        Self {
            source: source.into(),
            router: Box::new(router),
            path_map: None,
        }
    }

    pub fn with_path_map(mut self, path_map: HashMap<String, String>) -> Self {
        self.path_map = Some(path_map);
        self
    }
}
