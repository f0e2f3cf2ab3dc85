pub mod allocation;
pub mod hashing;
