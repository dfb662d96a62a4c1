//! CI client trait seam

use dbtn_core::prelude::*;
use dbtn_core::CiConfig;

/// Operations the deploy orchestrator needs from a CI server.
///
/// One instance is bound to one [`CiConfig`]; a configuration change builds a
/// new instance through a [`CiClientFactory`] rather than mutating this one.
#[trait_variant::make(CiApi: Send)]
pub trait LocalCiApi {
    /// Whether a build of the configured build type is queued or running.
    ///
    /// A check that fails for any reason counts as "not active".
    async fn is_queued_or_running(&self) -> bool;

    /// Enqueue a build and return its id
    async fn trigger_build(&self) -> Result<String>;

    /// Status string of a build (`SUCCESS`, `FAILURE`, ...), or `None` on
    /// any transport or parse failure
    async fn get_build_status(&self, build_id: &str) -> Option<String>;
}

/// Builds a [`CiApi`] client for a configuration snapshot
pub trait CiClientFactory: Send + Sync + 'static {
    type Client: CiApi + Sync + 'static;

    fn create(&self, config: &CiConfig) -> Result<Self::Client>;
}
