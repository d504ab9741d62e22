// Shared helpers
pub mod db;

pub use db::is_unique_violation;
