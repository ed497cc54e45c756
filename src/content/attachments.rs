use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};

use super::Node;
use crate::error::{AppError, AppResult};
use crate::services::disk::{Disk, OutputOptions, StoredFile};

/// Node types whose `src` is a managed attachment.
pub fn is_attachment_node(kind: &str) -> bool {
    matches!(kind, "image" | "file")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileType {
    pub ext: &'static str,
    pub mime: &'static str,
}

const fn ft(ext: &'static str, mime: &'static str) -> FileType {
    FileType { ext, mime }
}

/// Detects the file type from its leading bytes. The mime type declared in
/// the data URI is never trusted.
pub fn sniff(bytes: &[u8]) -> Option<FileType> {
    let at = |offset: usize, magic: &[u8]| bytes.len() >= offset + magic.len() && &bytes[offset..offset + magic.len()] == magic;

    if at(0, b"\x89PNG\r\n\x1a\n") {
        Some(ft("png", "image/png"))
    } else if at(0, b"\xFF\xD8\xFF") {
        Some(ft("jpg", "image/jpeg"))
    } else if at(0, b"GIF87a") || at(0, b"GIF89a") {
        Some(ft("gif", "image/gif"))
    } else if at(0, b"RIFF") && at(8, b"WEBP") {
        Some(ft("webp", "image/webp"))
    } else if at(0, b"RIFF") && at(8, b"WAVE") {
        Some(ft("wav", "audio/wav"))
    } else if at(0, b"%PDF-") {
        Some(ft("pdf", "application/pdf"))
    } else if at(0, b"PK\x03\x04") {
        Some(ft("zip", "application/zip"))
    } else if at(0, b"OggS") {
        Some(ft("ogg", "audio/ogg"))
    } else if at(0, b"\x1A\x45\xDF\xA3") {
        Some(ft("webm", "video/webm"))
    } else if at(4, b"ftyp") {
        Some(ft("mp4", "video/mp4"))
    } else if at(0, b"ID3") || at(0, b"\xFF\xFB") || at(0, b"\xFF\xF3") || at(0, b"\xFF\xF2") {
        Some(ft("mp3", "audio/mpeg"))
    } else if at(0, b"\x00\x00\x01\x00") {
        Some(ft("ico", "image/x-icon"))
    } else if at(0, b"BM") && bytes.len() >= 14 {
        Some(ft("bmp", "image/bmp"))
    } else {
        None
    }
}

/// Decodes a `data:` URI payload (base64 or percent-encoded).
pub fn decode_data_uri(uri: &str) -> AppResult<Vec<u8>> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| AppError::InputError("Attachment source is not a data URI".into()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| AppError::InputError("Malformed data URI".into()))?;

    if meta.split(';').any(|p| p.eq_ignore_ascii_case("base64")) {
        let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| AppError::InputError(format!("Invalid base64 payload: {}", e)))
    } else {
        Ok(urlencoding::decode_binary(payload.as_bytes()).into_owned())
    }
}

/// Content-addressed file name: identical payloads share one file.
pub fn file_name(bytes: &[u8], file_type: FileType) -> String {
    format!("{}.{}", hex::encode(Sha256::digest(bytes)), file_type.ext)
}

/// A decoded payload that passed the size and type checks.
pub struct Payload {
    pub bytes: Vec<u8>,
    pub file_type: FileType,
}

/// Decodes one embedded payload and checks its size and type.
pub fn prepare(uri: &str, max_bytes: usize) -> AppResult<Payload> {
    let bytes = decode_data_uri(uri)?;
    if bytes.len() > max_bytes {
        return Err(AppError::InputError(format!("Attachment exceeds the limit of {} bytes", max_bytes)));
    }
    let file_type = sniff(&bytes)
        .ok_or_else(|| AppError::InputError("Unsupported attachment type".into()))?;
    Ok(Payload { bytes, file_type })
}

/// Checks every embedded attachment payload in the subtree without writing.
pub fn check_payloads(node: &Node, max_bytes: usize) -> AppResult<()> {
    if is_attachment_node(&node.kind) {
        if let Some(src) = node.src.as_deref().filter(|s| s.starts_with("data:")) {
            prepare(src, max_bytes)?;
        }
    }
    node.children().iter().try_for_each(|child| check_payloads(child, max_bytes))
}

/// Decodes, checks and stores one embedded payload.
///
/// Nothing is written when the payload is too large or of unknown type.
pub async fn upload(disk: &dyn Disk, bucket: &str, dir: &str, uri: &str, max_bytes: usize) -> AppResult<StoredFile> {
    let Payload { bytes, file_type } = prepare(uri, max_bytes)?;

    let name = file_name(&bytes, file_type);
    let dir = dir.trim_matches('/');
    let path = if dir.is_empty() { name } else { format!("{}/{}", dir, name) };

    let stored = disk.output_file(bucket, &path, &bytes, OutputOptions { overwrite: false }).await?;
    tracing::debug!(path = %stored.path, mime = file_type.mime, bytes = bytes.len(), written = stored.written, "attachment stored");
    Ok(stored)
}

/// Every attachment `src` in the subtree, in document order.
pub fn collect_sources(node: &Node, out: &mut Vec<String>) {
    if is_attachment_node(&node.kind) {
        if let Some(src) = &node.src {
            if !src.starts_with("data:") {
                out.push(src.clone());
            }
        }
    }
    for child in node.children() {
        collect_sources(child, out);
    }
}
