use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use corvid::{CorvidError, Vm};

#[derive(Clone, Default)]
struct Capture(Rc<RefCell<Vec<u8>>>);

impl Write for Capture {
  fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
    self.0.borrow_mut().write(buf)
  }

  fn flush(&mut self) -> std::io::Result<()> {
    Ok(())
  }
}

fn run(source: &str) -> String {
  let capture = Capture::default();
  let mut vm = Vm::with_output(Box::new(capture.clone()));
  vm.interpret(source).expect("script should run without error");
  let bytes = capture.0.borrow().clone();
  String::from_utf8(bytes).expect("program output should be utf-8")
}

#[test]
fn arithmetic_precedence() {
  assert_eq!(run("print 1 + 2 * 3;"), "7\n");
}

#[test]
fn for_loop_accumulates() {
  assert_eq!(
    run("var x = 0; for (var i = 0; i < 5; i = i + 1) x = x + i; print x;"),
    "10\n"
  );
}

#[test]
fn closures_share_captured_state_across_calls() {
  let source = "
    fun mk() {
      var a = 1;
      fun inc() {
        a = a + 1;
        return a;
      }
      return inc;
    }
    var f = mk();
    print f();
    print f();
    print f();
  ";
  assert_eq!(run(source), "2\n3\n4\n");
}

#[test]
fn inherited_method_calls_overridden_super_method() {
  let source = "
    class A {
      hi() { print \"a\"; }
    }
    class B < A {
      hi() {
        super.hi();
        print \"b\";
      }
    }
    B().hi();
  ";
  assert_eq!(run(source), "a\nb\n");
}

#[test]
fn initializer_sets_instance_field() {
  let source = "
    class P {
      init(n) { this.n = n; }
    }
    print P(7).n;
  ";
  assert_eq!(run(source), "7\n");
}

#[test]
fn string_concatenation() {
  assert_eq!(run("print \"foo\" + \"bar\";"), "foobar\n");
}

#[test]
fn reading_local_in_its_own_initializer_is_a_compile_error() {
  let mut vm = Vm::new();
  match vm.interpret("var x = 0; { var x = x; }") {
    Err(CorvidError::Compile(messages)) => {
      assert!(messages.iter().any(|m| m.contains("own initializer")));
    }
    other => panic!("expected a compile error, got {other:?}"),
  }
}

#[test]
fn undefined_global_is_a_runtime_error() {
  let mut vm = Vm::new();
  match vm.interpret("print nope;") {
    Err(CorvidError::Runtime(trace)) => {
      assert!(trace.contains("Undefined variable 'nope'"));
    }
    other => panic!("expected a runtime error, got {other:?}"),
  }
}

#[test]
fn deep_recursion_overflows_the_call_stack() {
  let mut vm = Vm::new();
  let source = "fun recurse(n) { return recurse(n + 1); } recurse(0);";
  match vm.interpret(source) {
    Err(CorvidError::Runtime(trace)) => {
      assert!(trace.contains("Stack overflow"));
    }
    other => panic!("expected a stack overflow, got {other:?}"),
  }
}

#[test]
fn repl_style_statements_share_state_across_interpret_calls() {
  let capture = Capture::default();
  let mut vm = Vm::with_output(Box::new(capture.clone()));
  vm.interpret("var count = 0;").unwrap();
  vm.interpret("count = count + 1;").unwrap();
  vm.interpret("print count;").unwrap();
  assert_eq!(String::from_utf8(capture.0.borrow().clone()).unwrap(), "1\n");
}
