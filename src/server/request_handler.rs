use crate::config::{ServerConfig, INDEX_DOCUMENT};
use crate::error::ServerError;
use crate::logging::{AccessLogFormat, AccessLogger, LogEntry};
use crate::proxy::ProxyBalancer;
use crate::server::response::ErrorResponse;
use crate::server::router::{RouteDecision, Router};
use crate::server::static_files::{decode_path, StaticFileProvider};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Body;
use hyper::{Method, Request, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

pub struct RequestHandler {
    router: Router,
    files: Arc<StaticFileProvider>,
    balancer: Option<ProxyBalancer>,
    access_logger: Option<AccessLogger>,
}

impl RequestHandler {
    pub fn new(config: Arc<ServerConfig>) -> Result<Self, ServerError> {
        let files = Arc::new(StaticFileProvider::new(&config.root));

        let balancer = if config.api_proxy {
            Some(ProxyBalancer::new(&config.proxy, config.scheme())?)
        } else {
            None
        };

        let access_logger = match config.logging.access_log {
            Some(ref target) => Some(AccessLogger::new(
                target,
                AccessLogFormat::parse(&config.logging.access_log_format),
            )?),
            None => None,
        };

        Ok(Self {
            router: Router::new(&config, files.clone()),
            files,
            balancer,
            access_logger,
        })
    }

    pub async fn handle_request<B>(
        &self,
        req: Request<B>,
        client_addr: SocketAddr,
    ) -> Result<Response<Full<Bytes>>, hyper::Error>
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        let request_id = Uuid::new_v4();
        let start_time = std::time::Instant::now();

        let method = req.method().clone();
        let uri = req.uri().clone();

        let user_agent = req
            .headers()
            .get("user-agent")
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string());

        let referer = req
            .headers()
            .get("referer")
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string());

        let decision = self.router.route(uri.path()).await;
        let route = route_label(&decision);

        let response = match self.dispatch(req, decision, client_addr).await {
            Ok(response) => response,
            Err(e) => {
                let status = e.status_code();
                if status.is_server_error() {
                    tracing::error!(
                        request_id = %request_id,
                        error = %e,
                        "Request processing failed"
                    );
                } else {
                    tracing::debug!(request_id = %request_id, error = %e, "Request rejected");
                }
                ErrorResponse::for_status(status).build()
            }
        };

        let duration = start_time.elapsed();

        tracing::info!(
            request_id = %request_id,
            method = %method,
            path = uri.path(),
            route,
            status = %response.status(),
            duration_ms = duration.as_millis(),
            "Request completed"
        );

        if let Some(ref access_logger) = self.access_logger {
            let content_length = response
                .headers()
                .get("content-length")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);

            let log_entry = LogEntry {
                request_id,
                remote_addr: client_addr.ip().to_string(),
                method: method.to_string(),
                uri: uri.to_string(),
                status: response.status().as_u16(),
                response_size: content_length,
                duration_ms: duration.as_secs_f64() * 1000.0,
                route,
                user_agent,
                referer,
                timestamp: chrono::Utc::now(),
            };

            access_logger.log(log_entry).await;
        }

        Ok(response)
    }

    async fn dispatch<B>(
        &self,
        req: Request<B>,
        decision: RouteDecision,
        client_addr: SocketAddr,
    ) -> Result<Response<Full<Bytes>>, ServerError>
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        if let RouteDecision::ProxyForward(sub_path) = decision {
            return match self.balancer {
                Some(ref balancer) => balancer.forward(req, &sub_path, client_addr).await,
                None => Err(ServerError::NotFound),
            };
        }

        if req.method() != Method::GET && req.method() != Method::HEAD {
            return Ok(ErrorResponse::method_not_allowed().build());
        }

        match decision {
            RouteDecision::StaticAsset(path) => {
                self.files
                    .serve_file(req.method(), req.headers(), &path, None)
                    .await
            }
            RouteDecision::DirectoryListing(dir) => {
                // Same decoding the router applied, so links match what was listed.
                let path = decode_path(req.uri().path()).ok_or(ServerError::NotFound)?;
                self.files.render_listing(req.method(), &path, &dir).await
            }
            RouteDecision::FallbackDocument => {
                let document = self.files.root().join(INDEX_DOCUMENT);
                self.files
                    .serve_file(req.method(), req.headers(), &document, Some("text/html"))
                    .await
            }
            RouteDecision::NotFound | RouteDecision::ProxyForward(_) => Err(ServerError::NotFound),
        }
    }
}

fn route_label(decision: &RouteDecision) -> &'static str {
    match decision {
        RouteDecision::StaticAsset(_) => "static",
        RouteDecision::DirectoryListing(_) => "listing",
        RouteDecision::ProxyForward(_) => "proxy",
        RouteDecision::FallbackDocument => "fallback",
        RouteDecision::NotFound => "not_found",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use hyper::StatusCode;

    fn handler(configure: impl FnOnce(&mut ServerConfig)) -> (tempfile::TempDir, RequestHandler) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>app</h1>").unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/guide.txt"), "read me").unwrap();

        let mut config = ServerConfig {
            root: dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        configure(&mut config);
        let handler = RequestHandler::new(Arc::new(config)).unwrap();
        (dir, handler)
    }

    async fn get(handler: &RequestHandler, method: Method, path: &str) -> (StatusCode, String, String) {
        let req = Request::builder()
            .method(method)
            .uri(path)
            .body(Full::new(Bytes::new()))
            .unwrap();
        let response = handler
            .handle_request(req, "127.0.0.1:5000".parse().unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, content_type, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn test_fallback_document_is_html() {
        let (_dir, handler) = handler(|c| c.spa_fallback = true);

        let (status, content_type, body) = get(&handler, Method::GET, "/app/settings").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type, "text/html");
        assert_eq!(body, "<h1>app</h1>");

        let (status, _, _) = get(&handler, Method::GET, "/app/logo.png").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_listing_response() {
        let (_dir, handler) = handler(|c| c.allow_index = true);

        let (status, content_type, body) = get(&handler, Method::GET, "/docs/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(content_type.starts_with("text/html"));
        assert!(body.contains("guide.txt"));
    }

    #[tokio::test]
    async fn test_listing_links_use_normalized_path() {
        let (_dir, handler) = handler(|c| c.allow_index = true);

        let (status, _, body) =
            get(&handler, Method::GET, "/docs/\"onmouseover=alert(1)\"x/..").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("href=\"/docs/guide.txt\""));
        assert!(!body.contains("onmouseover"));
    }

    #[tokio::test]
    async fn test_static_asset_and_missing() {
        let (_dir, handler) = handler(|_| {});

        let (status, content_type, body) = get(&handler, Method::GET, "/docs/guide.txt").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type, "text/plain");
        assert_eq!(body, "read me");

        let (status, _, _) = get(&handler, Method::GET, "/docs/missing.txt").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = get(&handler, Method::GET, "/../../etc/passwd").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_static_rejects_unsafe_methods() {
        let (_dir, handler) = handler(|c| c.spa_fallback = true);
        let (status, _, _) = get(&handler, Method::POST, "/app/settings").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_api_without_proxy_is_static() {
        let (_dir, handler) = handler(|_| {});
        let (status, _, _) = get(&handler, Method::GET, "/api/users").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_route_labels() {
        assert_eq!(route_label(&RouteDecision::FallbackDocument), "fallback");
        assert_eq!(route_label(&RouteDecision::ProxyForward("/".into())), "proxy");
        assert_eq!(route_label(&RouteDecision::NotFound), "not_found");
    }
}
