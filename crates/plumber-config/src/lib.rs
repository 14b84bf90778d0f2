//! Plumber Config
//!
//! This crate contains the serializable settings for Plumber approval
//! workflows. Settings are read once by the host (the CLI reads
//! `plumber.json` from its data directory) and handed to the workflow
//! core; every field has a default, so an empty object is a valid file.
//!
//! ```json
//! {
//!   "database": { "url": "sqlite://plumber.db", "max_connections": 5 },
//!   "page_size": 10,
//!   "flow_type": "other",
//!   "exclude_nodes": [1042]
//! }
//! ```

mod flow;
mod settings;

pub use flow::FlowType;
pub use settings::{DatabaseSettings, Settings};
