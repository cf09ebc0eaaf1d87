//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and drive the scheduler and
//! the exchange pipeline end-to-end against a scratch database and archive directory.

mod common;
mod crawl_tests;
mod dedupe_tests;
