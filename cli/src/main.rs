use clap::Parser;
use corvid_cli::commands::Command;
use corvid_cli::common::InputArgs;

#[derive(Debug, Parser)]
#[clap(name = "corvid", version)]
pub struct App {
  #[clap(subcommand)]
  command: Option<Command>,

  // Args for the default run command.
  #[clap(flatten)]
  input: InputArgs,
}

fn main() {
  let app = App::parse();

  let command = app
    .command
    .unwrap_or_else(|| Command::run(app.input.clone()));

  std::process::exit(command.execute());
}
