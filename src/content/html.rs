use serde_json::Value;

use super::{Document, Node};

// Lexical text format bits
const FORMAT_BOLD: u64 = 1;
const FORMAT_ITALIC: u64 = 1 << 1;
const FORMAT_STRIKETHROUGH: u64 = 1 << 2;
const FORMAT_UNDERLINE: u64 = 1 << 3;
const FORMAT_CODE: u64 = 1 << 4;
const FORMAT_SUBSCRIPT: u64 = 1 << 5;
const FORMAT_SUPERSCRIPT: u64 = 1 << 6;

const FORMAT_TAGS: &[(u64, &str)] = &[
    (FORMAT_CODE, "code"),
    (FORMAT_BOLD, "strong"),
    (FORMAT_ITALIC, "em"),
    (FORMAT_UNDERLINE, "u"),
    (FORMAT_STRIKETHROUGH, "s"),
    (FORMAT_SUBSCRIPT, "sub"),
    (FORMAT_SUPERSCRIPT, "sup"),
];

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Blocks script-capable URL schemes in `href`/`src`. Browsers drop ASCII
/// whitespace and control characters inside a URL, so they are removed
/// before the scheme is compared.
fn safe_url(url: &str) -> String {
    let scheme: String = url
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && !c.is_ascii_control())
        .take_while(|c| *c != ':')
        .map(|c| c.to_ascii_lowercase())
        .collect();
    let has_scheme = url.contains(':') && !scheme.contains(['/', '?', '#']);
    if has_scheme && matches!(scheme.as_str(), "javascript" | "vbscript" | "data") {
        "#".to_string()
    } else {
        escape(url)
    }
}

pub fn render(doc: &Document) -> String {
    let mut out = String::new();
    for child in doc.root.children() {
        render_node(child, &mut out);
    }
    out
}

fn render_children(node: &Node, out: &mut String) {
    for child in node.children() {
        render_node(child, out);
    }
}

fn wrap(tag: &str, node: &Node, out: &mut String) {
    out.push_str(&format!("<{}>", tag));
    render_children(node, out);
    out.push_str(&format!("</{}>", tag));
}

fn render_node(node: &Node, out: &mut String) {
    match node.kind.as_str() {
        "text" | "code-highlight" => render_text(node, out),
        "tab" => out.push('\t'),
        "linebreak" => out.push_str("<br>"),
        "paragraph" => wrap("p", node, out),
        "quote" => wrap("blockquote", node, out),
        "code" | "codeblock" => {
            out.push_str("<pre><code>");
            render_children(node, out);
            out.push_str("</code></pre>");
        }
        "heading" => {
            let tag = match node.tag.as_deref() {
                Some(t @ ("h1" | "h2" | "h3" | "h4" | "h5" | "h6")) => t,
                _ => "h2",
            };
            match &node.anchor {
                Some(anchor) => out.push_str(&format!("<{} id=\"{}\">", tag, escape(anchor))),
                None => out.push_str(&format!("<{}>", tag)),
            }
            render_children(node, out);
            out.push_str(&format!("</{}>", tag));
        }
        "list" => {
            let ordered = node.extra_str("listType") == Some("number") || node.tag.as_deref() == Some("ol");
            wrap(if ordered { "ol" } else { "ul" }, node, out);
        }
        "listitem" => wrap("li", node, out),
        "link" | "autolink" => {
            let href = node.extra_str("url").map(safe_url).unwrap_or_else(|| "#".to_string());
            out.push_str(&format!("<a href=\"{}\" rel=\"noopener noreferrer\">", href));
            render_children(node, out);
            out.push_str("</a>");
        }
        "table" => wrap("table", node, out),
        "tablerow" => wrap("tr", node, out),
        "tablecell" => {
            let header = node.extra.get("headerState").and_then(Value::as_u64).unwrap_or(0) != 0;
            wrap(if header { "th" } else { "td" }, node, out);
        }
        "horizontalrule" => out.push_str("<hr>"),
        "image" => {
            if let Some(src) = &node.src {
                let alt = node.extra_str("altText").unwrap_or("");
                out.push_str(&format!("<img src=\"{}\" alt=\"{}\">", safe_url(src), escape(alt)));
            }
        }
        "file" => {
            if let Some(src) = &node.src {
                let name = node.extra_str("name").unwrap_or("Download");
                out.push_str(&format!("<a href=\"{}\" download>{}</a>", safe_url(src), escape(name)));
            }
        }
        _ => render_children(node, out),
    }
}

fn render_text(node: &Node, out: &mut String) {
    let Some(text) = &node.text else { return };
    let format = node.extra.get("format").and_then(Value::as_u64).unwrap_or(0);
    let tags: Vec<&str> = FORMAT_TAGS.iter().filter(|(bit, _)| format & bit != 0).map(|(_, tag)| *tag).collect();
    for tag in &tags {
        out.push_str(&format!("<{}>", tag));
    }
    out.push_str(&escape(text));
    for tag in tags.iter().rev() {
        out.push_str(&format!("</{}>", tag));
    }
}
