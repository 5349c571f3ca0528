pub mod config;
pub mod ingest;
pub mod publisher;
pub mod routing;
pub mod source;
pub mod sse;
