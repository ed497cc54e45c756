use std::collections::HashMap;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::fetcher::FetcherMap;
use crate::types::PageResponse;

/// Id of the root layout every route falls back to.
pub const ROOT_LAYOUT: &str = "";
/// Id reported for the built-in layout used when nothing else is registered.
pub const FALLBACK_LAYOUT: &str = "@fallback";

pub struct LayoutContext<'a> {
    pub page: &'a PageResponse,
    /// Output of the route renderer.
    pub body: &'a str,
}

pub type LayoutComponent = Arc<dyn Fn(&LayoutContext<'_>) -> String + Send + Sync>;
pub type DataProvider = Arc<dyn Fn(&RequestContext) -> FetcherMap + Send + Sync>;

/// A page shell shared by every route whose id lives under `path`.
#[derive(Clone)]
pub struct Layout {
    pub path: String,
    pub component: LayoutComponent,
    pub data_provider: Option<DataProvider>,
}

impl Layout {
    pub fn new(path: impl Into<String>, component: impl Fn(&LayoutContext<'_>) -> String + Send + Sync + 'static) -> Self {
        Self { path: path.into(), component: Arc::new(component), data_provider: None }
    }

    pub fn with_data(mut self, provider: impl Fn(&RequestContext) -> FetcherMap + Send + Sync + 'static) -> Self {
        self.data_provider = Some(Arc::new(provider));
        self
    }

    pub fn render(&self, page: &PageResponse, body: &str) -> String {
        (self.component)(&LayoutContext { page, body })
    }
}

/// How a route picks its layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LayoutChoice {
    /// Nearest ancestor by route id, then root, then the built-in fallback.
    #[default]
    Auto,
    Named(String),
    /// Render the route output without any shell.
    None,
}

pub struct LayoutRegistry {
    layouts: HashMap<String, Arc<Layout>>,
    fallback: Arc<Layout>,
}

impl Default for LayoutRegistry {
    fn default() -> Self {
        Self { layouts: HashMap::new(), fallback: Arc::new(fallback_layout()) }
    }
}

impl LayoutRegistry {
    pub fn insert(&mut self, layout: Layout) {
        self.layouts.insert(layout.path.clone(), Arc::new(layout));
    }

    pub fn get(&self, id: &str) -> Option<Arc<Layout>> {
        self.layouts.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    /// Picks the layout for `route_id`. Only `LayoutChoice::None` yields `None`.
    pub fn resolve(&self, route_id: &str, choice: &LayoutChoice) -> Option<Arc<Layout>> {
        match choice {
            LayoutChoice::None => return None,
            LayoutChoice::Named(name) => match self.layouts.get(name) {
                Some(layout) => return Some(layout.clone()),
                None => tracing::warn!(layout = %name, route = %route_id, "Unknown layout, using nearest ancestor"),
            },
            LayoutChoice::Auto => {}
        }

        let nearest = self
            .layouts
            .values()
            .filter(|l| !l.path.is_empty() && is_ancestor(&l.path, route_id))
            .max_by_key(|l| l.path.len());
        if let Some(layout) = nearest {
            return Some(layout.clone());
        }

        Some(self.layouts.get(ROOT_LAYOUT).cloned().unwrap_or_else(|| self.fallback.clone()))
    }
}

/// `admin` is an ancestor of `admin` and `admin/users`, not of `administration`.
fn is_ancestor(layout_path: &str, route_id: &str) -> bool {
    let layout_path = layout_path.trim_matches('/');
    let route_id = route_id.trim_matches('/');
    route_id == layout_path
        || (route_id.starts_with(layout_path) && route_id[layout_path.len()..].starts_with('/'))
}

fn fallback_layout() -> Layout {
    Layout::new(FALLBACK_LAYOUT, |ctx| {
        let page = ctx.page;
        let title = crate::content::html::escape(page.title.as_deref().unwrap_or(""));
        let mut head = format!("<meta charset=\"utf-8\"><title>{}</title>", title);
        if let Some(desc) = &page.description {
            head.push_str(&format!(
                "<meta name=\"description\" content=\"{}\">",
                crate::content::html::escape(desc)
            ));
        }
        let classes: Vec<&str> = page.body_class.iter().map(String::as_str).collect();
        format!(
            "<!DOCTYPE html><html><head>{}</head><body id=\"{}\" class=\"{}\">{}</body></html>",
            head,
            crate::content::html::escape(page.body_id.as_deref().unwrap_or("")),
            crate::content::html::escape(&classes.join(" ")),
            ctx.body
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(ids: &[&str]) -> LayoutRegistry {
        let mut reg = LayoutRegistry::default();
        for id in ids {
            let id = id.to_string();
            let tag = id.clone();
            reg.insert(Layout::new(id, move |ctx| format!("[{}]{}", tag, ctx.body)));
        }
        reg
    }

    fn resolved(reg: &LayoutRegistry, route: &str, choice: LayoutChoice) -> Option<String> {
        reg.resolve(route, &choice).map(|l| l.path.clone())
    }

    #[test]
    fn explicit_name_wins() {
        let reg = registry(&["", "admin", "print"]);
        assert_eq!(resolved(&reg, "admin/users", LayoutChoice::Named("print".into())), Some("print".into()));
    }

    #[test]
    fn nearest_ancestor_by_segment() {
        let reg = registry(&["", "admin", "admin/users"]);
        assert_eq!(resolved(&reg, "admin/users/edit", LayoutChoice::Auto), Some("admin/users".into()));
        assert_eq!(resolved(&reg, "admin/settings", LayoutChoice::Auto), Some("admin".into()));
        assert_eq!(resolved(&reg, "administration", LayoutChoice::Auto), Some("".into()));
    }

    #[test]
    fn unknown_name_falls_through() {
        let reg = registry(&["", "admin"]);
        assert_eq!(resolved(&reg, "admin/x", LayoutChoice::Named("missing".into())), Some("admin".into()));
    }

    #[test]
    fn fallback_when_nothing_registered() {
        let reg = registry(&[]);
        assert_eq!(resolved(&reg, "anything", LayoutChoice::Auto), Some(FALLBACK_LAYOUT.into()));
        assert_eq!(resolved(&reg, "anything", LayoutChoice::None), None);
    }
}
