pub mod meg_resolver;
