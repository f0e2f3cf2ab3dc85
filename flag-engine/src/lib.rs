pub mod api;
pub mod bucketing;
pub mod campaigns;
pub mod config;
pub mod context;
pub mod events;
pub mod flags;
pub mod groups;
pub mod metrics;
pub mod segmentation;
pub mod settings;
pub mod storage;

// Builders shared by unit and integration tests. Integration tests link the
// library, so this stays public rather than behind cfg(test).
pub mod utils;

pub use api::{evaluate_flag, evaluate_segmentation};
pub use api::errors::FlagError;
pub use api::types::{FlagDecisionReason, FlagResult};
pub use flags::flag_evaluation::FlagEvaluator;
