pub mod acme;
pub mod builder;
pub mod cache;
pub mod commands;
pub mod config;
pub mod exception;
pub mod param;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod sitemap;
pub mod util;

pub use builder::DocBuilder;
pub use cache::FileCache;
pub use config::Config;
pub use exception::Exception;
pub use param::{HttpEncoding, HttpRequestMethod, HttpVersion};
pub use request::Request;
pub use response::Response;
pub use server::Server;
pub use sitemap::Sitemap;
