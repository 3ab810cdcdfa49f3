use crate::script::{Bindings, ScriptError, ScriptLimits};

/// Executes filter and transformer scripts.
///
/// Implementations are synchronous and CPU-bound; callers that live on an
/// async runtime are expected to move `run` onto a blocking thread.
pub trait ScriptEngine: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Validates a script without running it.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::Syntax`] for malformed source, or another
    /// variant when the script references something the engine cannot provide.
    fn check(&self, script: &str) -> Result<(), ScriptError>;

    /// Runs `script` with `bindings` as its global variables and returns the
    /// variables as they stand when the script finishes.
    ///
    /// # Errors
    ///
    /// Returns the script's failure: a syntax or runtime error, or a limit
    /// from `limits` being exceeded.
    fn run(
        &self,
        script: &str,
        bindings: Bindings,
        limits: &ScriptLimits,
    ) -> Result<Bindings, ScriptError>;
}
