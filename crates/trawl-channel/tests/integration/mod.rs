pub mod common;
mod log_tests;
mod redis_tests;
