pub mod user_context;
pub mod user_id;

pub use user_context::{Enrichment, Location, ParsedUserAgent, UserContext};
