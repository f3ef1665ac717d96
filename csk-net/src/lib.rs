// csk-net/src/lib.rs
pub mod http;
pub mod validation;

pub use http::{Fetcher, HttpFetcher};
pub use validation::{digest_bytes, validate_url, verify, verify_file};
