pub mod evaluation_state;
pub mod flag_evaluation;
pub mod rule_evaluation;
