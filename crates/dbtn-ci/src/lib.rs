//! # dbtn-ci - CI Server Client
//!
//! The [`CiApi`] seam used by deploy orchestration, and its TeamCity
//! implementation over `reqwest`.

pub mod client;
pub mod teamcity;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

pub use client::{CiApi, CiClientFactory, LocalCiApi};
pub use teamcity::{TeamCityClient, TeamCityClientFactory, REQUEST_TIMEOUT};
