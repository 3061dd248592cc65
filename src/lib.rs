//! Corvid: a bytecode compiler and virtual machine for a small
//! dynamically-typed, class-based scripting language.
//!
//! [`Vm::interpret`] is the primary entry point for running a script.
//! [`compile`] compiles without running, for tooling that wants to inspect
//! the resulting bytecode (the CLI's `disassemble` subcommand).

mod chunk;
mod compiler;
mod error;
mod gc;
mod native;
mod object;
mod table;
mod value;
mod vm;

use std::ptr::NonNull;

use object::{ObjFunction, ObjTag};

pub use chunk::{Chunk, OpCode};
pub use error::CorvidError;
pub use vm::Vm;

/// A compiled, not-yet-run script together with the [`Vm`] heap its
/// constants live on. Dropping it frees that heap.
pub struct Program {
  // Never read directly; keeps the heap `function` points into alive for
  // the lifetime of the `Program`.
  #[allow(dead_code)]
  vm: Vm,
  function: NonNull<ObjFunction>,
  name: String,
}

impl Program {
  /// Disassembles the top-level script and every function nested in its
  /// constant pool, recursively.
  pub fn disassemble(&self) -> String {
    let mut out = String::new();
    self.disassemble_into(&mut out, self.function, &self.name);
    out
  }

  fn disassemble_into(&self, out: &mut String, function: NonNull<ObjFunction>, name: &str) {
    use std::fmt::Write;
    let f = unsafe { function.as_ref() };
    let _ = write!(out, "{}", f.chunk.disassemble_named(name));
    for value in &f.chunk.constants {
      if value.obj_tag() == Some(ObjTag::Function) {
        let nested = object::as_function(value.as_obj());
        let nested_name = unsafe { nested.as_ref() }.name_str().to_string();
        self.disassemble_into(out, nested, &nested_name);
      }
    }
  }
}

/// Compiles `source` without running it. `name` is used as the top-level
/// chunk's label in the disassembly output.
pub fn compile(source: &str, name: &str) -> Result<Program, String> {
  let mut vm = Vm::new();
  match compiler::compile(&mut vm, source) {
    Ok(function) => Ok(Program {
      vm,
      function,
      name: name.to_string(),
    }),
    Err(errors) => Err(errors.join("\n")),
  }
}
