use crate::config::INDEX_DOCUMENT;
use crate::error::ServerError;
use crate::server::response::{ErrorResponse, ResponseBuilder};
use bytes::Bytes;
use http_body_util::Full;
use hyper::{HeaderMap, Method, Response, StatusCode};
use mime_guess::MimeGuess;
use std::fmt::Write;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// What a request path points at below the served root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    File(PathBuf),
    Directory(PathBuf),
    Missing,
    /// The path escapes the root, lexically or through a symlink.
    Outside,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Collapses `.`, `..` and empty segments. Returns `None` when `..` climbs
/// above the root. The result always starts with `/` and never ends with one
/// unless it is the root itself.
pub fn normalize_path(path: &str) -> Option<String> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    Some(format!("/{}", segments.join("/")))
}

/// Percent-decodes a raw request path once, then normalizes it. Returns
/// `None` for invalid UTF-8, embedded NUL bytes, or a path that climbs above
/// the root.
pub fn decode_path(raw: &str) -> Option<String> {
    let decoded = urlencoding::decode(raw).ok()?;
    if decoded.contains('\0') {
        return None;
    }
    normalize_path(&decoded)
}

/// Percent-encodes every segment of a decoded path, keeping the separators.
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(urlencoding::encode)
        .collect::<Vec<_>>()
        .join("/")
}

/// Serves files from a single directory tree. Nothing outside the canonical
/// root is ever resolved.
pub struct StaticFileProvider {
    root: PathBuf,
}

impl StaticFileProvider {
    pub fn new(root: &Path) -> Self {
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `request_path` must already be percent-decoded (see [`decode_path`]).
    pub async fn resolve(&self, request_path: &str) -> Resolution {
        if request_path.contains('\0') {
            return Resolution::Outside;
        }

        let Some(normalized) = normalize_path(request_path) else {
            warn!("Attempted path traversal: {}", request_path);
            return Resolution::Outside;
        };

        let full_path = self.root.join(normalized.trim_start_matches('/'));

        let canonical = match fs::canonicalize(&full_path).await {
            Ok(path) => path,
            Err(_) => return Resolution::Missing,
        };

        if !canonical.starts_with(&self.root) {
            warn!("Path resolves outside of root: {}", request_path);
            return Resolution::Outside;
        }

        match fs::metadata(&canonical).await {
            Ok(meta) if meta.is_dir() => Resolution::Directory(canonical),
            Ok(_) => Resolution::File(canonical),
            Err(_) => Resolution::Missing,
        }
    }

    /// The index document of `dir`, if it is a regular file.
    pub async fn index_of(&self, dir: &Path) -> Option<PathBuf> {
        let index_path = dir.join(INDEX_DOCUMENT);
        match fs::metadata(&index_path).await {
            Ok(metadata) if metadata.is_file() => Some(index_path),
            _ => None,
        }
    }

    /// Entries of `dir`, directories first, each group sorted by name.
    pub async fn list_directory(&self, dir: &Path) -> io::Result<Vec<DirEntryInfo>> {
        let mut reader = fs::read_dir(dir).await?;
        let mut entries = Vec::new();

        while let Some(entry) = reader.next_entry().await? {
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(e) => {
                    debug!("Skipping unreadable entry {:?}: {}", entry.path(), e);
                    continue;
                }
            };
            entries.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: metadata.is_dir(),
                size: metadata.len(),
            });
        }

        entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    pub async fn serve_file(
        &self,
        method: &Method,
        headers: &HeaderMap,
        file_path: &Path,
        content_type: Option<&str>,
    ) -> Result<Response<Full<Bytes>>, ServerError> {
        if method != Method::GET && method != Method::HEAD {
            return Ok(ErrorResponse::method_not_allowed().build());
        }

        let metadata = match fs::metadata(file_path).await {
            Ok(meta) if meta.is_file() => meta,
            _ => return Err(ServerError::NotFound),
        };

        debug!("Serving static file: {}", file_path.display());

        let etag = generate_etag(&metadata);

        if let Some(if_none_match) = headers.get("if-none-match") {
            if if_none_match.to_str().unwrap_or("") == etag {
                return Ok(ResponseBuilder::new(StatusCode::NOT_MODIFIED)
                    .header_string("etag", etag)
                    .build());
            }
        } else if let Some(if_modified_since) = headers.get("if-modified-since") {
            if let Ok(since_time) =
                httpdate::parse_http_date(if_modified_since.to_str().unwrap_or(""))
            {
                if let Ok(modified_time) = metadata.modified() {
                    if modified_time <= since_time {
                        return Ok(ResponseBuilder::new(StatusCode::NOT_MODIFIED).build());
                    }
                }
            }
        }

        let content_type = match content_type {
            Some(content_type) => content_type.to_string(),
            None => MimeGuess::from_path(file_path)
                .first()
                .unwrap_or(mime::APPLICATION_OCTET_STREAM)
                .to_string(),
        };

        let content = if method == Method::HEAD {
            Bytes::new()
        } else {
            match fs::read(file_path).await {
                Ok(content) => Bytes::from(content),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(ServerError::NotFound)
                }
                Err(e) => return Err(ServerError::Io(e)),
            }
        };

        Ok(ResponseBuilder::new(StatusCode::OK)
            .header_string("content-type", content_type)
            .header_string("content-length", metadata.len().to_string())
            .header_string("etag", etag)
            .header_string("last-modified", format_last_modified(&metadata))
            .header("accept-ranges", "bytes")
            .body(content)
            .build())
    }

    pub async fn render_listing(
        &self,
        method: &Method,
        request_path: &str,
        dir: &Path,
    ) -> Result<Response<Full<Bytes>>, ServerError> {
        if method != Method::GET && method != Method::HEAD {
            return Ok(ErrorResponse::method_not_allowed().build());
        }

        let entries = self.list_directory(dir).await?;
        let html = listing_html(request_path, &entries);
        let length = html.len();
        let body = if method == Method::HEAD {
            Bytes::new()
        } else {
            Bytes::from(html)
        };

        Ok(ResponseBuilder::new(StatusCode::OK)
            .header("content-type", "text/html; charset=utf-8")
            .header_string("content-length", length.to_string())
            .body(body)
            .build())
    }
}

/// `request_path` is the decoded, normalized path of the listed directory.
/// Every href is absolute and percent-encoded, so it neither depends on a
/// trailing slash nor can break out of its attribute.
fn listing_html(request_path: &str, entries: &[DirEntryInfo]) -> String {
    let base = request_path.trim_end_matches('/');
    let title = escape_html(if base.is_empty() { "/" } else { request_path });

    let mut html = String::new();
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html>\n<head><title>{title}</title></head>\n<body>\n<h1>{title}</h1>\n<ul>\n"
    );
    if let Some((parent, _)) = base.rsplit_once('/') {
        let _ = writeln!(
            html,
            "<li><a href=\"{}/\">..</a></li>",
            escape_html(&encode_path(parent))
        );
    }
    let encoded_base = escape_html(&encode_path(base));
    for entry in entries {
        let suffix = if entry.is_dir { "/" } else { "" };
        let _ = writeln!(
            html,
            "<li><a href=\"{}/{}{}\">{}{}</a></li>",
            encoded_base,
            urlencoding::encode(&entry.name),
            suffix,
            escape_html(&entry.name),
            suffix
        );
    }
    html.push_str("</ul>\n</body>\n</html>\n");
    html
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn generate_etag(metadata: &std::fs::Metadata) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    metadata.len().hash(&mut hasher);
    if let Ok(modified) = metadata.modified() {
        if let Ok(duration) = modified.duration_since(std::time::UNIX_EPOCH) {
            duration.as_nanos().hash(&mut hasher);
        }
    }
    format!("\"{:x}\"", hasher.finish())
}

fn format_last_modified(metadata: &std::fs::Metadata) -> String {
    match metadata.modified() {
        Ok(time) => httpdate::fmt_http_date(time),
        Err(_) => httpdate::fmt_http_date(std::time::SystemTime::now()),
    }
}
