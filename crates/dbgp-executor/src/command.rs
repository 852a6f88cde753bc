//! Command line building for target runtimes.

use std::path::PathBuf;

use thiserror::Error;

use crate::resolve::resolve_executable_path;

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Base command cannot be parsed: {0}")]
    InvalidBase(String),
    #[error("Base command is empty after parsing")]
    EmptyCommand,
    #[error("Executable not found: {0}")]
    ExecutableNotFound(String),
}

/// Parsed command parts (program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParts {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandParts {
    /// Create new command parts.
    #[must_use]
    pub const fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }

    /// Resolve the program to an absolute path.
    ///
    /// # Errors
    /// Returns error if executable not found.
    pub async fn into_resolved(self) -> Result<(PathBuf, Vec<String>), CommandBuildError> {
        let Self { program, args } = self;
        let executable = resolve_executable_path(&program)
            .await
            .ok_or(CommandBuildError::ExecutableNotFound(program))?;
        Ok((executable, args))
    }
}

/// Builder for a runtime invocation: a base command line plus parameters.
///
/// The base may carry its own arguments (`"php -n"`); it is split with
/// shell quoting rules.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    /// Base executable command.
    pub base: String,
    /// Parameters appended after the base.
    pub params: Vec<String>,
}

impl CommandBuilder {
    /// Create a new command builder.
    #[must_use]
    pub fn new<S: Into<String>>(base: S) -> Self {
        Self {
            base: base.into(),
            params: Vec::new(),
        }
    }

    /// Append one parameter.
    #[must_use]
    pub fn param<S: Into<String>>(mut self, param: S) -> Self {
        self.params.push(param.into());
        self
    }

    /// Extend parameters.
    #[must_use]
    pub fn extend_params<I>(mut self, more: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.params.extend(more.into_iter().map(Into::into));
        self
    }

    /// Split the base and append parameters.
    ///
    /// The program always comes from the base, never from a parameter.
    ///
    /// # Errors
    /// Returns error if the base is unparseable or empty.
    pub fn build(&self) -> Result<CommandParts, CommandBuildError> {
        let mut parts = shlex::split(&self.base)
            .ok_or_else(|| CommandBuildError::InvalidBase(self.base.clone()))?
            .into_iter();
        let program = parts.next().ok_or(CommandBuildError::EmptyCommand)?;

        let args = parts.chain(self.params.iter().cloned()).collect();
        Ok(CommandParts::new(program, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_with_arguments_is_split() {
        let parts = CommandBuilder::new("php -n")
            .param("-d")
            .param("xdebug.mode=debug")
            .build()
            .unwrap();
        assert_eq!(parts.program, "php");
        assert_eq!(parts.args, vec!["-n", "-d", "xdebug.mode=debug"]);
    }

    #[test]
    fn test_quoted_base() {
        let parts = CommandBuilder::new(r#""/opt/my php/bin/php""#)
            .extend_params(["a.php"])
            .build()
            .unwrap();
        assert_eq!(parts.program, "/opt/my php/bin/php");
        assert_eq!(parts.args, vec!["a.php"]);
    }

    #[test]
    fn test_empty_and_invalid_base() {
        assert!(matches!(
            CommandBuilder::new("   ").build(),
            Err(CommandBuildError::EmptyCommand)
        ));
        assert!(matches!(
            CommandBuilder::new("php \"unterminated").build(),
            Err(CommandBuildError::InvalidBase(_))
        ));
    }

    #[test]
    fn test_blank_base_with_params_is_still_empty() {
        for base in ["", "  "] {
            let builder = CommandBuilder::new(base).param("-d").param("xdebug.mode=debug");
            assert!(matches!(builder.build(), Err(CommandBuildError::EmptyCommand)));
        }
    }

    #[tokio::test]
    async fn test_unknown_program_does_not_resolve() {
        let parts = CommandParts::new("definitely-not-a-real-binary-4242".into(), vec![]);
        assert!(matches!(
            parts.into_resolved().await,
            Err(CommandBuildError::ExecutableNotFound(_))
        ));
    }
}
