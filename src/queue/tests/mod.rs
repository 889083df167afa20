//! Unit tests for queue domain behaviour.

pub mod support;

mod domain_tests;
