//! Test document schema and engine environment settings.
//!
//! [`schema`] defines the declarative test document (actions, asserts,
//! pacing, distribution strategies) as consumed by the engine after external
//! parsing and templating. [`settings`] holds the engine's own environment
//! contract (Docker network, healthcheck backoff, Kubernetes target).

pub mod schema;
pub mod settings;

pub use schema::{Action, Assert, TestConfig, Volume};
pub use settings::Settings;
