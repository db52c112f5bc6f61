use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};

pub struct ResponseBuilder {
    status: StatusCode,
    headers: Vec<(&'static str, String)>,
    body: Bytes,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, name: &'static str, value: &str) -> Self {
        self.headers.push((name, value.to_string()));
        self
    }

    pub fn header_string(mut self, name: &'static str, value: String) -> Self {
        self.headers.push((name, value));
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    pub fn build(self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(self.body));
        *response.status_mut() = self.status;

        let headers = response.headers_mut();
        for (name, value) in self.headers {
            match value.parse() {
                Ok(value) => {
                    headers.insert(name, value);
                }
                Err(_) => tracing::warn!(header = name, "Dropping invalid header value"),
            }
        }

        response
    }
}

pub struct ErrorResponse;

impl ErrorResponse {
    pub fn for_status(status: StatusCode) -> ResponseBuilder {
        match status {
            StatusCode::BAD_REQUEST => Self::bad_request(),
            StatusCode::NOT_FOUND => Self::not_found(),
            StatusCode::METHOD_NOT_ALLOWED => Self::method_not_allowed(),
            StatusCode::BAD_GATEWAY => Self::bad_gateway(),
            _ => Self::internal_server_error(),
        }
    }

    pub fn bad_request() -> ResponseBuilder {
        ResponseBuilder::new(StatusCode::BAD_REQUEST)
            .header("content-type", "text/html")
            .body(Bytes::from_static(include_bytes!("../../static/400.html")))
    }

    pub fn not_found() -> ResponseBuilder {
        ResponseBuilder::new(StatusCode::NOT_FOUND)
            .header("content-type", "text/html")
            .body(Bytes::from_static(include_bytes!("../../static/404.html")))
    }

    pub fn method_not_allowed() -> ResponseBuilder {
        ResponseBuilder::new(StatusCode::METHOD_NOT_ALLOWED)
            .header("content-type", "text/html")
            .header("allow", "GET, HEAD")
            .body(Bytes::from_static(include_bytes!("../../static/405.html")))
    }

    pub fn internal_server_error() -> ResponseBuilder {
        ResponseBuilder::new(StatusCode::INTERNAL_SERVER_ERROR)
            .header("content-type", "text/html")
            .body(Bytes::from_static(include_bytes!("../../static/500.html")))
    }

    pub fn bad_gateway() -> ResponseBuilder {
        ResponseBuilder::new(StatusCode::BAD_GATEWAY)
            .header("content-type", "text/html")
            .body(Bytes::from_static(include_bytes!("../../static/502.html")))
    }
}
