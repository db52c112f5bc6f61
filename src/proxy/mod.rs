use crate::config::{ProxyConfig, API_PREFIX};
use crate::error::ServerError;
use crate::server::static_files::encode_path;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::{Request, Response, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// A failed connect is retried once against the next backend, never more
/// often than there are backends.
const MAX_ATTEMPTS: usize = 2;

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Round-robin dispatcher over the `/api` backend pool.
pub struct ProxyBalancer {
    backends: Vec<Uri>,
    counter: AtomicUsize,
    client: Client<HttpConnector, Full<Bytes>>,
    read_timeout: Duration,
    strip_prefix: bool,
    scheme: &'static str,
}

impl ProxyBalancer {
    /// `scheme` is the one clients use to reach this server.
    pub fn new(config: &ProxyConfig, scheme: &'static str) -> Result<Self, ServerError> {
        let backends = config
            .backends
            .iter()
            .map(|backend| {
                backend.parse::<Uri>().map_err(|e| {
                    ServerError::Gateway(format!("invalid backend address {}: {}", backend, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if backends.is_empty() {
            return Err(ServerError::Gateway("no backends configured".to_string()));
        }

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_millis(config.connect_timeout_ms)));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);

        Ok(Self {
            backends,
            counter: AtomicUsize::new(0),
            client,
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            strip_prefix: config.strip_prefix,
            scheme,
        })
    }

    pub fn backends(&self) -> &[Uri] {
        &self.backends
    }

    fn next_index(&self) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed) % self.backends.len()
    }

    /// Forwards `req` to one backend and relays its response.
    ///
    /// `sub_path` is the decoded, normalized part of the path below `/api`.
    /// The upstream sees `/api` plus `sub_path`, or only `sub_path` with
    /// `strip_prefix`; never the raw request path.
    pub async fn forward<B>(
        &self,
        req: Request<B>,
        sub_path: &str,
        client_addr: SocketAddr,
    ) -> Result<Response<Full<Bytes>>, ServerError>
    where
        B: Body,
        B::Error: std::fmt::Display,
    {
        let (parts, body) = req.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| ServerError::BadRequest(format!("failed to read request body: {}", e)))?
            .to_bytes();

        let path = upstream_path(sub_path, self.strip_prefix);
        let path_and_query = match parts.uri.query() {
            Some(query) => format!("{}?{}", path, query),
            None => path.to_string(),
        };

        let headers = forwarded_headers(&parts.headers, client_addr, self.scheme);
        let attempts = self.backends.len().min(MAX_ATTEMPTS);
        let start = self.next_index();
        let mut last_error = String::new();

        for attempt in 0..attempts {
            let backend = &self.backends[(start + attempt) % self.backends.len()];
            let uri = upstream_uri(backend, &path_and_query)?;

            let mut upstream = Request::new(Full::new(body.clone()));
            *upstream.method_mut() = parts.method.clone();
            *upstream.uri_mut() = uri.clone();
            *upstream.headers_mut() = headers.clone();

            debug!(backend = %backend, uri = %uri, "Forwarding request");

            let response = match timeout(self.read_timeout, self.client.request(upstream)).await {
                Err(_) => {
                    return Err(ServerError::Gateway(format!(
                        "backend {} did not answer within {:?}",
                        backend, self.read_timeout
                    )))
                }
                Ok(Err(e)) if e.is_connect() => {
                    warn!(backend = %backend, error = %e, "Backend unreachable");
                    last_error = format!("backend {} unreachable: {}", backend, e);
                    continue;
                }
                Ok(Err(e)) => {
                    return Err(ServerError::Gateway(format!(
                        "backend {} failed: {}",
                        backend, e
                    )))
                }
                Ok(Ok(response)) => response,
            };

            let (mut response_parts, body) = response.into_parts();
            let body = timeout(self.read_timeout, body.collect())
                .await
                .map_err(|_| {
                    ServerError::Gateway(format!("backend {} stalled mid-response", backend))
                })?
                .map_err(|e| {
                    ServerError::Gateway(format!("failed to read response from {}: {}", backend, e))
                })?
                .to_bytes();

            strip_hop_by_hop(&mut response_parts.headers);
            return Ok(Response::from_parts(response_parts, Full::new(body)));
        }

        Err(ServerError::Gateway(last_error))
    }
}

fn upstream_path(sub_path: &str, strip_prefix: bool) -> String {
    let path = match (strip_prefix, sub_path) {
        (true, _) => sub_path.to_string(),
        (false, "/") => API_PREFIX.to_string(),
        (false, rest) => format!("{}{}", API_PREFIX, rest),
    };
    encode_path(&path)
}

fn upstream_uri(backend: &Uri, path_and_query: &str) -> Result<Uri, ServerError> {
    let authority = backend
        .authority()
        .ok_or_else(|| ServerError::Gateway(format!("backend {} has no host", backend)))?;
    let base = backend.path().trim_end_matches('/');

    format!(
        "{}://{}{}{}",
        backend.scheme_str().unwrap_or("http"),
        authority,
        base,
        path_and_query
    )
    .parse::<Uri>()
    .map_err(|e| ServerError::Gateway(format!("failed to build upstream URI: {}", e)))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named by `Connection` are connection-scoped too.
    let named: Vec<HeaderName> = headers
        .get_all("connection")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| name.trim().parse().ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

fn forwarded_headers(
    original: &HeaderMap,
    client_addr: SocketAddr,
    scheme: &'static str,
) -> HeaderMap {
    let mut headers = original.clone();
    strip_hop_by_hop(&mut headers);
    let host = headers.remove("host");

    let client_ip = client_addr.ip().to_string();
    let forwarded_for = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{}, {}", existing, client_ip),
        None => client_ip,
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert("x-forwarded-for", value);
    }
    if let Some(host) = host {
        headers.insert("x-forwarded-host", host);
    }
    headers.insert("x-forwarded-proto", HeaderValue::from_static(scheme));
    headers
}
