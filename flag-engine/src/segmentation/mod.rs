pub mod list_membership;
pub mod operand_matching;
pub mod segment_matching;
pub mod segment_models;
