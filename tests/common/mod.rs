#![allow(dead_code)]

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{HeaderMap, Method, Request, Response, StatusCode};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use static_server::config::ServerConfig;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

/// A small site: an SPA shell, one asset, and a docs directory without index.
pub fn site() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<h1>shell</h1>").unwrap();
    std::fs::create_dir_all(dir.path().join("assets")).unwrap();
    std::fs::write(dir.path().join("assets/app.js"), "console.log('app')").unwrap();
    std::fs::create_dir_all(dir.path().join("docs")).unwrap();
    std::fs::write(dir.path().join("docs/readme.txt"), "docs").unwrap();
    dir
}

pub fn config(root: &tempfile::TempDir) -> ServerConfig {
    ServerConfig {
        root: root.path().to_path_buf(),
        listen: "127.0.0.1:0".to_string(),
        ..ServerConfig::default()
    }
}

/// Backend answering `<name> <METHOD> <uri> <body>` after `delay`, and
/// echoing the forwarding headers back.
pub async fn backend(name: &'static str, delay: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| async move {
                    tokio::time::sleep(delay).await;
                    let method = req.method().to_string();
                    let uri = req.uri().to_string();
                    let forwarded_for = req.headers().get("x-forwarded-for").cloned();
                    let body = req.into_body().collect().await?.to_bytes();

                    let mut response = Response::new(Full::new(Bytes::from(format!(
                        "{} {} {} {}",
                        name,
                        method,
                        uri,
                        String::from_utf8_lossy(&body)
                    ))));
                    response
                        .headers_mut()
                        .insert("x-backend", name.parse().unwrap());
                    if let Some(value) = forwarded_for {
                        response.headers_mut().insert("x-seen-forwarded-for", value);
                    }
                    Ok::<_, hyper::Error>(response)
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    addr
}

/// An address with nothing listening on it.
pub fn dead_address() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

pub async fn request(
    addr: SocketAddr,
    method: Method,
    path: &str,
    body: &str,
) -> anyhow::Result<Reply> {
    let client = Client::builder(TokioExecutor::new()).build_http::<Full<Bytes>>();
    let req = Request::builder()
        .method(method)
        .uri(format!("http://{}{}", addr, path))
        .body(Full::new(Bytes::from(body.to_string())))?;

    let response = client.request(req).await?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await?.to_bytes();

    Ok(Reply {
        status,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}

pub async fn get(addr: SocketAddr, path: &str) -> Reply {
    request(addr, Method::GET, path, "").await.unwrap()
}

/// Sends `path` verbatim as the request target, bypassing client-side URI
/// handling, and returns the raw response head and body.
pub async fn raw_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        path
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).into_owned()
}
