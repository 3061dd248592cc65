use clap::{Args, Subcommand};

use crate::common::InputArgs;

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
  /// Run a Corvid script [default]
  Run(RunArgs),
  /// Compile a Corvid script and print its disassembled bytecode.
  #[clap(visible_alias = "dis")]
  Disassemble(InputArgs),
  /// Start an interactive REPL.
  Repl,
}

impl Command {
  pub fn run(input: InputArgs) -> Self {
    Self::Run(RunArgs { input })
  }

  /// Runs the command and returns the process exit code: `0` on success,
  /// `65` on a compile error, `70` on a runtime error.
  pub fn execute(self) -> i32 {
    match self {
      Self::Run(args) => handle_run(args),
      Self::Disassemble(args) => handle_disassemble(args),
      Self::Repl => handle_repl(),
    }
  }
}

#[derive(Clone, Debug, Args)]
pub struct RunArgs {
  #[clap(flatten)]
  input: InputArgs,
}

fn handle_repl() -> i32 {
  crate::driver::repl();
  0
}

fn handle_run(args: RunArgs) -> i32 {
  let source = match args.input.source() {
    Ok(source) => source,
    Err(e) => {
      eprintln!("{e:#}");
      return 74; // EX_IOERR
    }
  };

  crate::driver::run(&source)
}

fn handle_disassemble(input: InputArgs) -> i32 {
  let source = match input.source() {
    Ok(source) => source,
    Err(e) => {
      eprintln!("{e:#}");
      return 74;
    }
  };

  match corvid::compile(&source, input.name().as_ref()) {
    Ok(chunk) => {
      println!("{}", chunk.disassemble());
      0
    }
    Err(report) => {
      eprint!("{report}");
      65
    }
  }
}
