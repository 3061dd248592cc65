//! Native (host-implemented) functions exposed to scripts as globals.

use std::sync::OnceLock;
use std::time::Instant;

use crate::object::NativeFn;
use crate::value::Value;
use crate::vm::Vm;

/// Installs every native into `vm.globals`, called once from [`Vm::new`].
pub fn define_natives(vm: &mut Vm) {
  define_native(vm, "clock", clock);
}

fn define_native(vm: &mut Vm, name: &'static str, function: NativeFn) {
  let native = vm.alloc_native(name, function);
  let interned = vm.intern_str(name);
  // Root the native on the stack for the duration of the globals insert.
  vm.push(Value::object(native));
  vm.globals.set(interned, Value::object(native));
  vm.pop();
}

fn process_start() -> &'static Instant {
  static START: OnceLock<Instant> = OnceLock::new();
  START.get_or_init(Instant::now)
}

/// Seconds elapsed since the process started, as a float.
fn clock(_args: &[Value]) -> Value {
  Value::number(process_start().elapsed().as_secs_f64())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn clock_returns_a_non_negative_number() {
    let v = clock(&[]);
    assert!(v.is_number());
    assert!(v.as_number() >= 0.0);
  }
}
