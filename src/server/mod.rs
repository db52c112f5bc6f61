pub mod http_server;
pub mod request_handler;
pub mod response;
pub mod router;
pub mod static_files;
pub mod tls;

pub use http_server::HttpServer;
pub use request_handler::RequestHandler;
pub use response::{ErrorResponse, ResponseBuilder};
pub use router::{RouteDecision, Router};
pub use static_files::{Resolution, StaticFileProvider};
pub use tls::TlsManager;
