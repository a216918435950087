pub mod recommendation;

pub use recommendation::{keys, RecommendationPipeline, SCENARIO_ID, USER_QUERY};

use crate::engine::Engine;
use crate::error::Result;

/// Register every built-in scenario with the engine.
pub fn register_builtin(engine: &Engine, pipeline: &RecommendationPipeline) -> Result<()> {
    engine.register_scenario(pipeline.scenario())?;
    Ok(())
}
