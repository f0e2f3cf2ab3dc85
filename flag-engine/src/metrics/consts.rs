// Flag evaluation counters
pub const FLAG_EVALUATION_COUNTER: &str = "flags_flag_evaluation_total";
pub const FLAG_EVALUATION_ERROR_COUNTER: &str = "flags_flag_evaluation_error_total";
pub const SEGMENTATION_ERROR_COUNTER: &str = "flags_segmentation_error_total";
pub const RULE_EVALUATION_COUNTER: &str = "flags_rule_evaluation_total";

// Sticky storage
pub const STICKY_STORAGE_HIT_COUNTER: &str = "flags_sticky_storage_hit_total";
pub const STICKY_STORAGE_ERRORS_COUNTER: &str = "flags_sticky_storage_errors_total";
pub const STICKY_STORAGE_WRITES_COUNTER: &str = "flags_sticky_storage_writes_total";

// Mutually exclusive groups
pub const MEG_RESOLUTION_COUNTER: &str = "flags_meg_resolution_total";

// Settings
pub const SETTINGS_RULES_DROPPED_COUNTER: &str = "flags_settings_rules_dropped_total";

// Flag evaluation timing
pub const FLAG_EVALUATION_TIME: &str = "flags_evaluation_time";
