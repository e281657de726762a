//! Background tasks for the media controller.
//!
//! # Tasks
//!
//! - `session_sweeper` - Closes sessions idle for longer than the TTL
//! - `request_cache_eviction` - Drops cached responses past retention

pub mod request_cache_eviction;
pub mod session_sweeper;

pub use request_cache_eviction::start_request_cache_eviction;
pub use session_sweeper::start_session_sweeper;
