//! Rich text pipeline for Lexical documents.
//!
//! One [`ContentRenderer::render`] call parses the document, walks it once in
//! pre-order (uploading embedded attachments, anchoring headings and building
//! the skeleton), removes attachments the previous version no longer shares,
//! and renders HTML or plain text.

pub mod attachments;
pub mod html;
pub mod skeleton;
pub mod text;

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::metrics::Metrics;
use crate::services::disk::Disk;

pub use skeleton::{SkeletonEntry, SlugSource};

pub const INVALID_FORMAT_MESSAGE: &str = "Invalid rich text content format";

/// One node of the document tree. Unknown fields are kept in `extra` so that
/// node types this crate does not know survive a render unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "type")]
    pub kind: String,
    /// `None` when the source had no `children` key. Element nodes keep an
    /// empty array on write so the editor can load them again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<Node>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Node types that never carry `children`.
fn is_leaf_kind(kind: &str) -> bool {
    matches!(kind, "text" | "linebreak" | "tab" | "code-highlight" | "horizontalrule" | "image" | "file")
}

impl Node {
    pub fn new(kind: impl Into<String>) -> Self {
        let kind = kind.into();
        let children = if is_leaf_kind(&kind) { None } else { Some(Vec::new()) };
        Self {
            kind,
            children,
            src: None,
            text: None,
            tag: None,
            anchor: None,
            extra: Map::new(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        let mut node = Self::new("text");
        node.text = Some(text.into());
        node
    }

    pub fn heading(tag: &str, title: &str) -> Self {
        let mut node = Self::new("heading");
        node.tag = Some(tag.to_string());
        node.children_mut().push(Node::text(title));
        node
    }

    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = Some(children);
        self
    }

    pub fn children(&self) -> &[Node] {
        self.children.as_deref().unwrap_or_default()
    }

    pub fn children_mut(&mut self) -> &mut Vec<Node> {
        self.children.get_or_insert_with(Vec::new)
    }

    pub fn with_src(mut self, src: impl Into<String>) -> Self {
        self.src = Some(src.into());
        self
    }

    /// `h1`..`h6` as a number; other tags count as level 1.
    pub fn heading_level(&self) -> u8 {
        self.tag
            .as_deref()
            .and_then(|t| t.strip_prefix('h'))
            .and_then(|n| n.parse::<u8>().ok())
            .filter(|n| (1..=6).contains(n))
            .unwrap_or(1)
    }

    fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

/// A parsed document: `{ "root": Node }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub root: Node,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn invalid_format(detail: impl std::fmt::Display) -> AppError {
    AppError::Anomaly { message: INVALID_FORMAT_MESSAGE.to_string(), detail: Some(detail.to_string()) }
}

impl Document {
    pub fn new(children: Vec<Node>) -> Self {
        Self { root: Node::new("root").with_children(children), extra: Map::new() }
    }

    pub fn parse(raw: &str) -> AppResult<Self> {
        let doc: Document = serde_json::from_str(raw).map_err(invalid_format)?;
        doc.checked()
    }

    pub fn from_value(value: Value) -> AppResult<Self> {
        let doc: Document = serde_json::from_value(value).map_err(invalid_format)?;
        doc.checked()
    }

    fn checked(self) -> AppResult<Self> {
        if self.root.kind != "root" {
            return Err(invalid_format(format!("root node has type {:?}", self.root.kind)));
        }
        Ok(self)
    }

    pub fn to_json_string(&self) -> AppResult<String> {
        serde_json::to_string(self).map_err(|e| AppError::anomaly(format!("serializing document: {}", e)))
    }
}

/// Content as stored (a JSON string) or already parsed.
#[derive(Debug, Clone)]
pub enum ContentInput {
    Json(String),
    Tree(Document),
}

impl ContentInput {
    /// A JSON string is stored content, any other value a parsed tree.
    pub fn from_value(value: Value) -> AppResult<Self> {
        match value {
            Value::String(raw) => Ok(ContentInput::Json(raw)),
            other => Ok(ContentInput::Tree(Document::from_value(other)?)),
        }
    }

    pub fn into_document(self) -> AppResult<Document> {
        match self {
            ContentInput::Json(raw) => Document::parse(&raw),
            ContentInput::Tree(doc) => doc.checked(),
        }
    }
}

impl From<&str> for ContentInput {
    fn from(raw: &str) -> Self {
        ContentInput::Json(raw.to_string())
    }
}

impl From<String> for ContentInput {
    fn from(raw: String) -> Self {
        ContentInput::Json(raw)
    }
}

impl From<Document> for ContentInput {
    fn from(doc: Document) -> Self {
        ContentInput::Tree(doc)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Html,
    Text,
}

#[derive(Clone, Default)]
pub struct RenderOptions {
    pub format: OutputFormat,
    /// Directory inside the bucket for new uploads; the renderer default when unset.
    pub upload_dir: Option<String>,
    /// The version being replaced. Its attachments not reused are deleted.
    pub previous: Option<ContentInput>,
    pub slugs: Option<Arc<dyn SlugSource>>,
}

impl RenderOptions {
    pub fn text() -> Self {
        Self { format: OutputFormat::Text, ..Self::default() }
    }

    pub fn upload_dir(mut self, dir: impl Into<String>) -> Self {
        self.upload_dir = Some(dir.into());
        self
    }

    pub fn previous(mut self, previous: impl Into<ContentInput>) -> Self {
        self.previous = Some(previous.into());
        self
    }

    pub fn slugs(mut self, source: Arc<dyn SlugSource>) -> Self {
        self.slugs = Some(source);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedContent {
    /// HTML or plain text, per [`RenderOptions::format`].
    pub output: String,
    /// The transformed document, ready to persist.
    pub json: String,
    #[serde(rename = "attachements")]
    pub attachments: Vec<String>,
    pub skeleton: Vec<SkeletonEntry>,
}

pub struct ContentRenderer {
    disk: Arc<dyn Disk>,
    bucket: String,
    upload_dir: String,
    max_attachment_bytes: usize,
    metrics: Metrics,
}

impl ContentRenderer {
    pub fn new(
        disk: Arc<dyn Disk>,
        bucket: impl Into<String>,
        upload_dir: impl Into<String>,
        max_attachment_bytes: usize,
        metrics: Metrics,
    ) -> Self {
        Self {
            disk,
            bucket: bucket.into(),
            upload_dir: upload_dir.into(),
            max_attachment_bytes,
            metrics,
        }
    }

    pub async fn render(&self, input: impl Into<ContentInput>, opts: RenderOptions) -> AppResult<RenderedContent> {
        let mut doc = input.into().into_document()?;
        attachments::check_payloads(&doc.root, self.max_attachment_bytes)?;

        let mut walker = Walker {
            renderer: self,
            upload_dir: opts.upload_dir.as_deref().unwrap_or(&self.upload_dir),
            attachments: Vec::new(),
            written: Vec::new(),
            skeleton: skeleton::SkeletonBuilder::new(opts.slugs.clone()),
        };
        let walked = walker.walk(&mut doc.root).await;
        let Walker { attachments, written, skeleton, .. } = walker;
        if let Err(e) = walked {
            self.discard(&written).await;
            return Err(e);
        }

        if let Some(previous) = opts.previous {
            let previous = previous.into_document()?;
            self.remove_unused(&previous, &attachments).await;
        }

        let output = match opts.format {
            OutputFormat::Html => html::render(&doc),
            OutputFormat::Text => text::extract_text(&doc.root),
        };

        Ok(RenderedContent { output, json: doc.to_json_string()?, attachments, skeleton: skeleton.finish() })
    }

    /// Removes files this pass wrote before it failed. Files that already
    /// existed belong to other documents and stay.
    async fn discard(&self, written: &[String]) {
        for url in written {
            let Some((bucket, path)) = self.disk.locate(url) else { continue };
            match self.disk.delete(&bucket, &path).await {
                Ok(_) => tracing::debug!(bucket = %bucket, path = %path, "Discarded attachment of failed render"),
                Err(e) => tracing::warn!(bucket = %bucket, path = %path, "Failed to discard attachment: {}", e),
            }
        }
    }

    /// Deletes files referenced by `previous` but not by `in_use`.
    /// Failures are logged; the new version is already valid at this point.
    async fn remove_unused(&self, previous: &Document, in_use: &[String]) {
        let in_use: HashSet<&str> = in_use.iter().map(String::as_str).collect();
        let mut seen = HashSet::new();
        let mut sources = Vec::new();
        attachments::collect_sources(&previous.root, &mut sources);

        for src in sources {
            if in_use.contains(src.as_str()) || !seen.insert(src.clone()) {
                continue;
            }
            let Some((bucket, path)) = self.disk.locate(&src) else {
                tracing::debug!(src = %src, "Skipping attachment not served by this disk");
                continue;
            };
            match self.disk.delete(&bucket, &path).await {
                Ok(true) => {
                    self.metrics.inc_attachments_deleted();
                    tracing::info!(bucket = %bucket, path = %path, "Removed unused attachment");
                }
                Ok(false) => tracing::debug!(bucket = %bucket, path = %path, "Unused attachment already gone"),
                Err(e) => tracing::warn!(bucket = %bucket, path = %path, "Failed to remove unused attachment: {}", e),
            }
        }
    }
}

struct Walker<'a> {
    renderer: &'a ContentRenderer,
    upload_dir: &'a str,
    attachments: Vec<String>,
    /// URLs of files created by this pass.
    written: Vec<String>,
    skeleton: skeleton::SkeletonBuilder,
}

impl<'a> Walker<'a> {
    fn walk<'b>(&'b mut self, node: &'b mut Node) -> BoxFuture<'b, AppResult<()>> {
        async move {
            self.visit(node).await?;
            if let Some(children) = node.children.as_mut() {
                for child in children.iter_mut() {
                    self.walk(child).await?;
                }
            }
            Ok(())
        }
        .boxed()
    }

    async fn visit(&mut self, node: &mut Node) -> AppResult<()> {
        if let Some(src) = node.src.clone() {
            if attachments::is_attachment_node(&node.kind) {
                let url = if src.starts_with("data:") {
                    let r = self.renderer;
                    let stored = attachments::upload(
                        r.disk.as_ref(),
                        &r.bucket,
                        self.upload_dir,
                        &src,
                        r.max_attachment_bytes,
                    )
                    .await?;
                    r.metrics.inc_attachments_uploaded();
                    if stored.written {
                        self.written.push(stored.path.clone());
                    }
                    node.src = Some(stored.path.clone());
                    stored.path
                } else {
                    src
                };
                if !self.attachments.contains(&url) {
                    self.attachments.push(url);
                }
            } else if src.starts_with("data:") {
                tracing::warn!(node = %node.kind, "Dropping embedded payload on non-attachment node");
                node.src = None;
            }
        }

        if node.kind == "heading" {
            let title = text::extract_text(node);
            let anchor = self.skeleton.push(title, node.heading_level()).await?;
            node.anchor = Some(anchor);
        }
        Ok(())
    }
}
