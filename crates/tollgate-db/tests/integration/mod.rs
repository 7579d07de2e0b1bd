pub mod common;
mod dedup_tests;
