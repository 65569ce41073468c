//! Total playback time across every open YouTube tab.
//!
//! Each tab's video length is found through a cascade of strategies (cache,
//! content script, page fetch, temporary tab) and remembered per video id, so
//! the running total stays cheap to recompute as tabs come and go.

pub mod aggregate;
pub mod browser;
pub mod cache;
pub mod cascade;
pub mod config;
pub mod constants;
pub mod coordinator;
pub mod debounce;
pub mod duration;
pub mod fetch;
pub mod logging;
pub mod session;
pub mod store;
pub mod video_url;

#[cfg(test)]
mod testing;
