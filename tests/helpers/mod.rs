//! Shared helpers for the fitter integration tests
//!
//! Track generation on exact helices and tolerance assertions, so scenarios
//! can be written against a known truth.

#![allow(dead_code)]

pub mod assertions;
pub mod tracks;
