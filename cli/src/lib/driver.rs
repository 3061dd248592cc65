use std::io::Write;

use corvid::{CorvidError, Vm};

/// Runs a complete script through a fresh [`Vm`] and returns the process
/// exit code: `0` on success, `65` on a compile error, `70` on a runtime
/// error.
pub fn run(source: &str) -> i32 {
  let mut vm = Vm::new();
  match vm.interpret(source) {
    Ok(()) => 0,
    Err(CorvidError::Compile(messages)) => {
      for message in messages {
        eprintln!("{message}");
      }
      65
    }
    Err(CorvidError::Runtime(trace)) => {
      eprintln!("{trace}");
      70
    }
  }
}

/// Reads lines from stdin until EOF, feeding each one to a single
/// long-lived [`Vm`] so that `var` declarations and function/class
/// definitions persist across lines.
pub fn repl() {
  let mut vm = Vm::new();
  let mut line = String::new();

  loop {
    print!("> ");
    if std::io::stdout().flush().is_err() {
      return;
    }

    line.clear();
    let bytes_read = match std::io::stdin().read_line(&mut line) {
      Ok(n) => n,
      Err(_) => return,
    };
    if bytes_read == 0 {
      println!();
      return;
    }

    match vm.interpret(&line) {
      Ok(()) => {}
      Err(CorvidError::Compile(messages)) => {
        for message in messages {
          eprintln!("{message}");
        }
      }
      Err(CorvidError::Runtime(trace)) => {
        eprintln!("{trace}");
      }
    }
  }
}
