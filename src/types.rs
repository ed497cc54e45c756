use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::fetcher::FetcherMap;

/// An authenticated user as seen by routes and controllers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub roles: Vec<String>,
}

impl User {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Page metadata a controller may set alongside its fetchers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageMeta {
    pub title: Option<String>,
    pub description: Option<String>,
    pub body_id: Option<String>,
    pub body_class: BTreeSet<String>,
}

/// What a page controller hands back: the data to fetch plus page metadata.
#[derive(Debug, Clone, Default)]
pub struct PageSetup {
    pub fetchers: FetcherMap,
    pub meta: PageMeta,
}

impl PageSetup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.meta.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.meta.description = Some(description.into());
        self
    }

    pub fn body_id(mut self, id: impl Into<String>) -> Self {
        self.meta.body_id = Some(id.into());
        self
    }

    pub fn body_class(mut self, class: impl Into<String>) -> Self {
        self.meta.body_class.insert(class.into());
        self
    }

    pub fn data(mut self, key: impl Into<String>, source: impl Into<crate::fetcher::DataSource>) -> Self {
        self.fetchers.insert(key, source.into());
        self
    }
}

impl From<FetcherMap> for PageSetup {
    fn from(fetchers: FetcherMap) -> Self {
        Self { fetchers, meta: PageMeta::default() }
    }
}

/// The per-navigation bag of page state.
///
/// Built by the resolver, serialized into the hydration payload, and mutated
/// afterwards only through [`crate::navigation::PageSession`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageResponse {
    /// Id of the route that produced this page (`error/<status>` for error pages).
    pub route: String,
    pub path: String,
    pub params: BTreeMap<String, String>,
    pub status: u16,
    pub data: Map<String, Value>,
    /// Kept for `reload`; never serialized.
    #[serde(skip)]
    pub fetchers: FetcherMap,
    /// Keys whose lazy fetchers have not run yet.
    pub lazy: Vec<String>,
    /// Keys whose (non-required) fetchers failed.
    pub failed: Vec<String>,
    pub loading: bool,
    pub title: Option<String>,
    pub description: Option<String>,
    pub body_id: Option<String>,
    pub body_class: BTreeSet<String>,
    pub layout: Option<String>,
}

impl PageResponse {
    pub fn apply_meta(&mut self, meta: PageMeta) {
        self.title = meta.title;
        self.description = meta.description;
        self.body_id = meta.body_id;
        self.body_class = meta.body_class;
    }

    /// Shallow key-level merge; incoming keys replace existing ones.
    pub fn set(&mut self, partial: Map<String, Value>) {
        for (k, v) in partial {
            self.data.insert(k, v);
        }
    }
}
