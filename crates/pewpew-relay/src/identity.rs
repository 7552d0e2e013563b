//! Player identifier generation.
//!
//! The relay asks an [`IdentityGenerator`] for a fresh id on every sign-up.
//! Generators are synchronous and may block (an external program, for
//! example), so the relay runs them on the blocking pool and never while
//! holding its state lock.

use std::process::Command;

/// A generator failed to produce an identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("identity generation failed: {0}")]
pub struct IdentityGenerationFailed(pub String);

/// Source of globally unique player identifiers.
pub trait IdentityGenerator: Send + Sync {
    /// Produce a new identifier.
    fn new_id(&self) -> Result<String, IdentityGenerationFailed>;
}

/// Blanket implementation for closures.
impl<F> IdentityGenerator for F
where
    F: Fn() -> Result<String, IdentityGenerationFailed> + Send + Sync,
{
    fn new_id(&self) -> Result<String, IdentityGenerationFailed> {
        self()
    }
}

/// Random (v4) UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdentityGenerator for UuidGenerator {
    fn new_id(&self) -> Result<String, IdentityGenerationFailed> {
        Ok(uuid::Uuid::new_v4().to_string())
    }
}

/// Runs an external program (e.g. `uuidgen`) and uses its trimmed stdout.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: String,
    args: Vec<String>,
}

impl CommandGenerator {
    /// Generator that runs `program` with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append a command-line argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl IdentityGenerator for CommandGenerator {
    fn new_id(&self) -> Result<String, IdentityGenerationFailed> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .map_err(|e| IdentityGenerationFailed(format!("{}: {e}", self.program)))?;

        if !output.status.success() {
            return Err(IdentityGenerationFailed(format!(
                "{} exited with {}",
                self.program, output.status
            )));
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(IdentityGenerationFailed(format!(
                "{} produced no output",
                self.program
            )));
        }
        Ok(id)
    }
}
