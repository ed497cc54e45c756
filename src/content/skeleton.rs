use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;

/// One heading in the document outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkeletonEntry {
    pub title: String,
    pub anchor: String,
    pub level: u8,
    pub children: Vec<SkeletonEntry>,
}

/// Anchors already taken outside the document being rendered, e.g. by other
/// sections of the same page.
#[async_trait]
pub trait SlugSource: Send + Sync {
    async fn is_taken(&self, slug: &str) -> AppResult<bool>;
}

/// Lowercase ASCII slug; umlauts are transliterated, other symbols become `-`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut dash = false;
    for c in title.chars().flat_map(char::to_lowercase) {
        let mapped: &str = match c {
            'ä' => "ae",
            'ö' => "oe",
            'ü' => "ue",
            'ß' => "ss",
            'à' | 'á' | 'â' | 'ã' | 'å' => "a",
            'è' | 'é' | 'ê' | 'ë' => "e",
            'ì' | 'í' | 'î' | 'ï' => "i",
            'ò' | 'ó' | 'ô' | 'õ' => "o",
            'ù' | 'ú' | 'û' => "u",
            'ç' => "c",
            'ñ' => "n",
            _ => "",
        };
        if !mapped.is_empty() {
            slug.push_str(mapped);
            dash = false;
        } else if c.is_ascii_alphanumeric() {
            slug.push(c);
            dash = false;
        } else if !dash && !slug.is_empty() {
            slug.push('-');
            dash = true;
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "section".to_string()
    } else {
        slug.to_string()
    }
}

/// Builds the heading outline during the walk.
///
/// A heading of level N nests under the most recently seen level N-1
/// heading, wherever it is; without one it goes to the top level.
pub(crate) struct SkeletonBuilder {
    roots: Vec<SkeletonEntry>,
    /// Index path to the latest entry per level (index 0 unused).
    last_at_level: [Option<Vec<usize>>; 7],
    used: HashSet<String>,
    source: Option<Arc<dyn SlugSource>>,
}

impl SkeletonBuilder {
    pub(crate) fn new(source: Option<Arc<dyn SlugSource>>) -> Self {
        Self { roots: Vec::new(), last_at_level: Default::default(), used: HashSet::new(), source }
    }

    /// Records a heading and returns its unique anchor.
    pub(crate) async fn push(&mut self, title: String, level: u8) -> AppResult<String> {
        let anchor = self.unique_anchor(&title).await?;
        let level = level.clamp(1, 6);
        let entry = SkeletonEntry { title, anchor: anchor.clone(), level, children: Vec::new() };

        let parent = if level > 1 { self.last_at_level[level as usize - 1].clone() } else { None };
        let path = match parent {
            Some(mut path) => {
                let siblings = &mut self.entry_mut(&path).children;
                siblings.push(entry);
                path.push(siblings.len() - 1);
                path
            }
            None => {
                self.roots.push(entry);
                vec![self.roots.len() - 1]
            }
        };

        self.last_at_level[level as usize] = Some(path);
        Ok(anchor)
    }

    pub(crate) fn finish(self) -> Vec<SkeletonEntry> {
        self.roots
    }

    fn entry_mut(&mut self, path: &[usize]) -> &mut SkeletonEntry {
        let mut entry = &mut self.roots[path[0]];
        for &i in &path[1..] {
            entry = &mut entry.children[i];
        }
        entry
    }

    async fn unique_anchor(&mut self, title: &str) -> AppResult<String> {
        let base = slugify(title);
        let mut candidate = base.clone();
        let mut n = 1;
        loop {
            let taken = self.used.contains(&candidate)
                || match &self.source {
                    Some(source) => source.is_taken(&candidate).await?,
                    None => false,
                };
            if !taken {
                break;
            }
            n += 1;
            candidate = format!("{}-{}", base, n);
        }
        self.used.insert(candidate.clone());
        Ok(candidate)
    }
}
