//! HTTP server layer for the SpeedSqueak web backend.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │   GET /api/generate-sas-url   GET /api/events   GET /* (static) │
//! │                                                                 │
//! │  ┌─────────────────────────┐  ┌──────────────────────────────┐  │
//! │  │        handlers         │  │           routes             │  │
//! │  │ (SAS issue, events)     │  │ (router, static, CORS)       │  │
//! │  └─────────────────────────┘  └──────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    events_handler, sas_url_handler, ApiError, AppState, SasUrlParams, SasUrlResponse,
};
pub use routes::{create_router, RouterConfig};
