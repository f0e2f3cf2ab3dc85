pub mod settings_models;
pub mod settings_operations;
