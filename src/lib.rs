//! Chat core for the portfolio site.
//!
//! Two cooperating halves connected by one HTTP endpoint:
//! - [`store`]: the client-side conversation state machine (message history,
//!   retry, rate-limit countdown, 24h persistence) behind pluggable storage
//!   and transport ports.
//! - [`proxy`]: the stateless server that sanitizes inbound requests, walks
//!   an ordered Gemini model fallback chain, and answers with a uniform
//!   JSON envelope plus conditional CORS headers.
//!
//! Everything else on the site (layout, styling, navigation) is a rendering
//! shell that only consumes the store's public interface.

pub mod config;
pub mod proxy;
pub mod sanitize;
pub mod store;
pub mod types;
