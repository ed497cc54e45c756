use super::Node;

/// Node types that end with a newline once their children are emitted.
const BLOCK_TYPES: &[&str] = &[
    "root",
    "paragraph",
    "heading",
    "listitem",
    "list",
    "quote",
    "code",
    "codeblock",
    "table",
];

pub fn is_block(kind: &str) -> bool {
    BLOCK_TYPES.contains(&kind)
}

/// Plain text of a subtree, right-trimmed. Unknown node types are transparent.
pub fn extract_text(node: &Node) -> String {
    let mut out = String::new();
    emit(node, &mut out);
    out.truncate(out.trim_end().len());
    out
}

fn emit(node: &Node, out: &mut String) {
    match node.kind.as_str() {
        "text" | "tab" | "code-highlight" => {
            if let Some(text) = &node.text {
                out.push_str(text);
            }
        }
        "linebreak" => out.push('\n'),
        _ => {}
    }
    for child in node.children() {
        emit(child, out);
    }
    if is_block(&node.kind) {
        out.push('\n');
    }
}
