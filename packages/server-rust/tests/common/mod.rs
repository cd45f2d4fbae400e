#[path = "../../src/test_support.rs"]
mod test_support;

pub use test_support::capture_logs;
