//! Website fetching and same-site subpage discovery.
//!
//! This crate provides:
//! - [`PageFetcher`]: one-at-a-time HTML fetcher with SSRF protection
//! - [`PageSource`]: the fetch seam the pipeline stages are written against
//! - [`same_site_links`]: resolves a page's links and keeps those under the
//!   organization's website

pub mod fetch;
pub mod links;

pub use fetch::{FetchedPage, PageFetcher, PageSource};
pub use links::same_site_links;
