pub mod optimization;
pub mod profile;
