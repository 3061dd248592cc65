use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

#[derive(Clone, Debug, Args)]
pub struct InputArgs {
  /// The path to the Corvid script to run.
  #[arg(value_name = "FILE")]
  file: PathBuf,
}

impl InputArgs {
  /// Reads the source code of the input script.
  pub fn source(&self) -> anyhow::Result<String> {
    std::fs::read_to_string(&self.file)
      .with_context(|| format!("failed to read file at {}", self.file.display()))
  }

  /// The name of the input script, used in diagnostics.
  pub fn name(&self) -> std::borrow::Cow<'_, str> {
    self.file.display().to_string().into()
  }
}
