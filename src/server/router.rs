//! Maps a request path to exactly one [`RouteDecision`].
//!
//! Evaluation order, first match wins:
//!
//! ```text
//! decode + normalize (escape above root -> NotFound)
//!   -> /api prefix with proxy on    -> ProxyForward
//!   -> resolve below root (escape   -> NotFound)
//!   -> index mode                   -> StaticAsset | DirectoryListing | NotFound
//!   -> spa mode                     -> StaticAsset | NotFound | FallbackDocument
//!   -> plain                        -> StaticAsset | NotFound
//! ```

use crate::config::{ServerConfig, API_PREFIX};
use crate::server::static_files::{decode_path, Resolution, StaticFileProvider};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    StaticAsset(PathBuf),
    DirectoryListing(PathBuf),
    /// Decoded, normalized path below `/api`, always starting with `/`.
    ProxyForward(String),
    /// The root `index.html`, served as HTML.
    FallbackDocument,
    NotFound,
}

pub struct Router {
    allow_index: bool,
    spa_fallback: bool,
    api_proxy: bool,
    files: Arc<StaticFileProvider>,
}

impl Router {
    pub fn new(config: &ServerConfig, files: Arc<StaticFileProvider>) -> Self {
        Self {
            allow_index: config.allow_index,
            spa_fallback: config.spa_enabled(),
            api_proxy: config.api_proxy,
            files,
        }
    }

    pub async fn route(&self, request_path: &str) -> RouteDecision {
        // Every check below sees the decoded path, so `%2E` counts as a dot
        // and `/%61pi` as `/api`.
        let Some(path) = decode_path(request_path) else {
            return RouteDecision::NotFound;
        };

        if self.api_proxy {
            if let Some(rest) = api_remainder(&path) {
                return RouteDecision::ProxyForward(rest.to_string());
            }
        }

        let resolution = self.files.resolve(&path).await;
        if resolution == Resolution::Outside {
            return RouteDecision::NotFound;
        }

        if self.allow_index {
            return match resolution {
                Resolution::File(file) => RouteDecision::StaticAsset(file),
                Resolution::Directory(dir) => RouteDecision::DirectoryListing(dir),
                Resolution::Missing | Resolution::Outside => RouteDecision::NotFound,
            };
        }

        if let Some(asset) = self.static_asset(resolution).await {
            return RouteDecision::StaticAsset(asset);
        }

        if self.spa_fallback && !looks_like_asset(&path) {
            return match self.files.index_of(self.files.root()).await {
                Some(_) => RouteDecision::FallbackDocument,
                None => RouteDecision::NotFound,
            };
        }

        RouteDecision::NotFound
    }

    /// A file, or the index document of a directory.
    async fn static_asset(&self, resolution: Resolution) -> Option<PathBuf> {
        match resolution {
            Resolution::File(file) => Some(file),
            Resolution::Directory(dir) => self.files.index_of(&dir).await,
            Resolution::Missing | Resolution::Outside => None,
        }
    }
}

/// `Some("/rest")` when `path` is `/api` or lies below it.
fn api_remainder(path: &str) -> Option<&str> {
    match path.strip_prefix(API_PREFIX)? {
        "" => Some("/"),
        rest if rest.starts_with('/') => Some(rest),
        _ => None,
    }
}

/// A dot in the final segment marks a file request. `/user/john.doe` is
/// misread as an asset by this rule.
pub fn looks_like_asset(path: &str) -> bool {
    path.rsplit('/').next().is_some_and(|segment| segment.contains('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    struct Site {
        _dir: tempfile::TempDir,
        root: PathBuf,
    }

    fn site() -> Site {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::write(root.join("index.html"), "<h1>app</h1>").unwrap();
        std::fs::write(root.join("LICENSE"), "MIT").unwrap();
        std::fs::create_dir_all(root.join("assets")).unwrap();
        std::fs::write(root.join("assets/app.js"), "console.log(1)").unwrap();
        std::fs::create_dir_all(root.join("docs")).unwrap();
        std::fs::write(root.join("docs/index.html"), "<h1>docs</h1>").unwrap();
        Site { _dir: dir, root }
    }

    fn router(root: &Path, allow_index: bool, spa_fallback: bool, api_proxy: bool) -> Router {
        let config = ServerConfig {
            root: root.to_path_buf(),
            allow_index,
            spa_fallback,
            api_proxy,
            ..ServerConfig::default()
        };
        Router::new(&config, Arc::new(StaticFileProvider::new(root)))
    }

    fn all_modes(root: &Path) -> Vec<Router> {
        let mut routers = Vec::new();
        for bits in 0..8u8 {
            routers.push(router(root, bits & 1 != 0, bits & 2 != 0, bits & 4 != 0));
        }
        routers
    }

    #[test]
    fn test_looks_like_asset() {
        assert!(looks_like_asset("/app/logo.png"));
        assert!(looks_like_asset("/.well-known"));
        assert!(!looks_like_asset("/app/settings"));
        assert!(!looks_like_asset("/v1.2/page"));
        assert!(!looks_like_asset("/"));
    }

    #[test]
    fn test_api_remainder() {
        assert_eq!(api_remainder("/api"), Some("/"));
        assert_eq!(api_remainder("/api/users/1"), Some("/users/1"));
        assert_eq!(api_remainder("/apix"), None);
        assert_eq!(api_remainder("/static/api"), None);
    }

    #[tokio::test]
    async fn test_plain_mode() {
        let s = site();
        let r = router(&s.root, false, false, false);

        assert_eq!(
            r.route("/assets/app.js").await,
            RouteDecision::StaticAsset(s.root.join("assets/app.js"))
        );
        assert_eq!(
            r.route("/").await,
            RouteDecision::StaticAsset(s.root.join("index.html"))
        );
        assert_eq!(
            r.route("").await,
            RouteDecision::StaticAsset(s.root.join("index.html"))
        );
        assert_eq!(
            r.route("/docs").await,
            RouteDecision::StaticAsset(s.root.join("docs/index.html"))
        );
        assert_eq!(r.route("/assets").await, RouteDecision::NotFound);
        assert_eq!(r.route("/app/settings").await, RouteDecision::NotFound);
        assert_eq!(r.route("/api/users").await, RouteDecision::NotFound);
    }

    #[tokio::test]
    async fn test_index_mode_lists_directories() {
        let s = site();
        for spa in [false, true] {
            let r = router(&s.root, true, spa, false);
            assert_eq!(
                r.route("/").await,
                RouteDecision::DirectoryListing(s.root.clone())
            );
            assert_eq!(
                r.route("/docs/").await,
                RouteDecision::DirectoryListing(s.root.join("docs"))
            );
            assert_eq!(
                r.route("/assets/app.js").await,
                RouteDecision::StaticAsset(s.root.join("assets/app.js"))
            );
            assert_eq!(r.route("/app/settings").await, RouteDecision::NotFound);
        }
    }

    #[tokio::test]
    async fn test_spa_mode() {
        let s = site();
        let r = router(&s.root, false, true, false);

        assert_eq!(r.route("/app/settings").await, RouteDecision::FallbackDocument);
        assert_eq!(r.route("/v1.2/page").await, RouteDecision::FallbackDocument);
        assert_eq!(r.route("/app/logo.png").await, RouteDecision::NotFound);
        assert_eq!(
            r.route("/assets/app.js").await,
            RouteDecision::StaticAsset(s.root.join("assets/app.js"))
        );
        // Existing files win over the fallback even without a dot.
        assert_eq!(
            r.route("/LICENSE").await,
            RouteDecision::StaticAsset(s.root.join("LICENSE"))
        );
        assert_eq!(
            r.route("/").await,
            RouteDecision::StaticAsset(s.root.join("index.html"))
        );
        // Directory without an index is an application route.
        assert_eq!(r.route("/assets").await, RouteDecision::FallbackDocument);
    }

    #[tokio::test]
    async fn test_spa_without_root_document() {
        let s = site();
        std::fs::remove_file(s.root.join("index.html")).unwrap();
        let r = router(&s.root, false, true, false);

        assert_eq!(r.route("/app/settings").await, RouteDecision::NotFound);
        assert_eq!(r.route("/").await, RouteDecision::NotFound);
    }

    #[tokio::test]
    async fn test_api_prefix_wins_in_every_mode() {
        let s = site();
        std::fs::create_dir_all(s.root.join("api")).unwrap();
        std::fs::write(s.root.join("api/data.json"), "{}").unwrap();

        for (allow_index, spa) in [(false, false), (true, false), (false, true), (true, true)] {
            let r = router(&s.root, allow_index, spa, true);
            assert_eq!(
                r.route("/api/data.json").await,
                RouteDecision::ProxyForward("/data.json".to_string())
            );
            assert_eq!(
                r.route("/api").await,
                RouteDecision::ProxyForward("/".to_string())
            );
            assert_eq!(
                r.route("/api/users/42").await,
                RouteDecision::ProxyForward("/users/42".to_string())
            );
            assert_ne!(
                r.route("/apix").await,
                RouteDecision::ProxyForward("x".to_string())
            );
        }
    }

    #[tokio::test]
    async fn test_encoded_paths_are_decoded_before_routing() {
        let s = site();

        let spa = router(&s.root, false, true, false);
        assert_eq!(spa.route("/app/logo%2Epng").await, RouteDecision::NotFound);
        assert_eq!(spa.route("/app/logo%2epng").await, RouteDecision::NotFound);
        assert_eq!(
            spa.route("/assets/app%2Ejs").await,
            RouteDecision::StaticAsset(s.root.join("assets/app.js"))
        );

        let proxy = router(&s.root, false, true, true);
        assert_eq!(
            proxy.route("/%61pi/x").await,
            RouteDecision::ProxyForward("/x".to_string())
        );
        assert_eq!(
            proxy.route("/x/../api/admin").await,
            RouteDecision::ProxyForward("/admin".to_string())
        );
    }

    #[tokio::test]
    async fn test_traversal_is_not_found_in_every_mode() {
        let s = site();
        for r in all_modes(&s.root) {
            for path in [
                "/../etc/passwd",
                "/../../../../etc",
                "/assets/../../secret",
                "/%2e%2e/%2e%2e/etc/passwd",
                "/api/../../etc",
                "/%2e%2e/app",
            ] {
                assert_eq!(r.route(path).await, RouteDecision::NotFound, "path {path}");
            }
        }
    }

    #[tokio::test]
    async fn test_route_is_deterministic() {
        let s = site();
        for r in all_modes(&s.root) {
            for path in ["/", "/app/settings", "/app/logo.png", "/docs", "/api/x", "/LICENSE"] {
                assert_eq!(r.route(path).await, r.route(path).await);
            }
        }
    }
}
