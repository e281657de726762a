//! # Media Test Utilities
//!
//! Shared test utilities for the media controller.
//!
//! ## Modules
//!
//! - `mock_engine` - Counting element factory with scriptable operations
//! - `recording_handler` - Event handler factory that records deliveries
//! - `fixtures` - Pre-built cores and request helpers
//!
//! ## Usage
//!
//! ```rust,ignore
//! use media_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let (core, engine) = test_core();
//!     let session = SessionId::new();
//!
//!     let pipeline = create_pipeline(&core, &session).await;
//!     let element = create_element(&core, &session, &pipeline).await;
//!
//!     core.close_session(&session, false).await.unwrap();
//!     assert_eq!(engine.releases(), 2);
//! }
//! ```

pub mod fixtures;
pub mod mock_engine;
pub mod recording_handler;

pub use fixtures::*;
pub use mock_engine::{MockElement, MockEngine, MOCK_ENGINE_ERROR_CODE};
pub use recording_handler::{Delivery, RecordingHandlerFactory};
