//! Tests for the scheduler
//!
//! Organized by feature area

mod enter_tests;
mod helpers;
mod loop_tests;
