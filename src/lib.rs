//! SUNAT taxpayer lookup API library
//!
//! Resolves Peruvian RUC and DNI numbers to taxpayer registration data by
//! driving a browser through the SUNAT consultation portal, caching
//! successful results and rate limiting clients.
//!
//! # Modules
//!
//! - `browser`: Browser session seam and the Chromium backend.
//! - `cache`: Result cache with TTL.
//! - `cache_validator`: Checksummed cache entries.
//! - `clock`: Injectable time source.
//! - `config`: Configuration management.
//! - `errors`: Error handling types.
//! - `extractor`: Portal form flow and results-panel parsing.
//! - `handlers`: HTTP request handlers.
//! - `models`: Records, keys and request/response bodies.
//! - `rate_limiter`: Per-client fixed-window quota.
//! - `server`: Router assembly and shutdown.

pub mod browser;
pub mod cache;
pub mod cache_validator;
pub mod clock;
pub mod config;
pub mod errors;
pub mod extractor;
pub mod handlers;
pub mod models;
pub mod rate_limiter;
pub mod server;
