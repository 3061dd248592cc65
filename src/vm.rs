//! Stack machine: call frames, the value stack, globals, and the opcode
//! dispatch loop.

use std::io::{self, Write};
use std::ptr::NonNull;

use crate::chunk::OpCode;
use crate::compiler;
use crate::error::CorvidError;
use crate::object::{
  self, ObjClass, ObjClosure, ObjFunction, ObjHeader, ObjString, ObjTag, ObjUpvalue, UpvalueLoc,
};
use crate::table::Table;
use crate::value::Value;

pub const FRAMES_MAX: usize = 64;
pub const STACK_MAX: usize = FRAMES_MAX * 256;

pub struct CallFrame {
  pub closure: NonNull<ObjClosure>,
  pub ip: usize,
  /// Index into `Vm::stack` of this frame's slot 0.
  pub slots: usize,
}

pub struct Vm {
  pub(crate) stack: Vec<Value>,
  pub(crate) frames: Vec<CallFrame>,
  pub(crate) open_upvalues: Vec<NonNull<ObjUpvalue>>,
  pub(crate) globals: Table,
  pub(crate) strings: Table,
  pub(crate) objects: Option<NonNull<ObjHeader>>,
  pub(crate) bytes_allocated: usize,
  pub(crate) next_gc: usize,
  pub(crate) gray_stack: Vec<NonNull<ObjHeader>>,
  pub(crate) compiler_roots: Vec<NonNull<ObjFunction>>,
  pub(crate) init_string: NonNull<ObjString>,
  output: Box<dyn Write>,
}

const INITIAL_NEXT_GC: usize = 1024 * 1024;

impl Vm {
  pub fn new() -> Self {
    Self::with_output(Box::new(io::stdout()))
  }

  /// Builds a `Vm` that writes `print` output to `output` instead of
  /// stdout. Exists mainly so tests can capture program output without
  /// redirecting the process's real stdout.
  pub fn with_output(output: Box<dyn Write>) -> Self {
    let mut vm = Vm {
      stack: Vec::with_capacity(STACK_MAX),
      frames: Vec::with_capacity(FRAMES_MAX),
      open_upvalues: Vec::new(),
      globals: Table::new(),
      strings: Table::new(),
      objects: None,
      bytes_allocated: 0,
      next_gc: INITIAL_NEXT_GC,
      gray_stack: Vec::new(),
      compiler_roots: Vec::new(),
      // Placeholder; replaced immediately below once allocation is possible.
      init_string: NonNull::dangling(),
      output,
    };
    vm.init_string = vm.intern_str("init");
    crate::native::define_natives(&mut vm);
    vm
  }

  /// Compiles and runs `source` to completion. Globals persist in `self`
  /// across calls, which is what lets the REPL build up state line by line.
  pub fn interpret(&mut self, source: &str) -> Result<(), CorvidError> {
    let function = compiler::compile(self, source).map_err(CorvidError::Compile)?;

    self.push(Value::object(function.cast()));
    let closure = self.alloc_closure(function);
    self.stack.pop();
    self.push(Value::object(closure.cast()));

    self.frames.push(CallFrame {
      closure,
      ip: 0,
      slots: 0,
    });

    match self.run() {
      Ok(()) => Ok(()),
      Err(trace) => {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
        Err(CorvidError::Runtime(trace))
      }
    }
  }

  pub(crate) fn push(&mut self, value: Value) {
    self.stack.push(value);
  }

  pub(crate) fn pop(&mut self) -> Value {
    self.stack.pop().expect("stack underflow")
  }

  pub(crate) fn peek(&self, distance: usize) -> Value {
    self.stack[self.stack.len() - 1 - distance]
  }

  fn run(&mut self) -> Result<(), String> {
    loop {
      let instruction = self.read_byte();
      match OpCode::from(instruction) {
        OpCode::Constant => {
          let v = self.read_constant();
          self.push(v);
        }
        OpCode::ConstantLong => {
          let v = self.read_constant_long();
          self.push(v);
        }
        OpCode::Nil => self.push(Value::nil()),
        OpCode::True => self.push(Value::bool_(true)),
        OpCode::False => self.push(Value::bool_(false)),
        OpCode::Pop => {
          self.pop();
        }
        OpCode::GetLocal => {
          let slot = self.read_byte() as usize;
          let base = self.frame().slots;
          self.push(self.stack[base + slot]);
        }
        OpCode::SetLocal => {
          let slot = self.read_byte() as usize;
          let base = self.frame().slots;
          self.stack[base + slot] = self.peek(0);
        }
        OpCode::GetGlobal => {
          let name = self.read_string();
          match self.globals.get(name) {
            Some(v) => self.push(v),
            None => {
              return Err(self.runtime_error(&format!(
                "Undefined variable '{}'.",
                unsafe { name.as_ref() }.as_str()
              )))
            }
          }
        }
        OpCode::DefineGlobal => {
          let name = self.read_string();
          let value = self.peek(0);
          self.globals.set(name, value);
          self.pop();
        }
        OpCode::SetGlobal => {
          let name = self.read_string();
          let is_new = self.globals.set(name, self.peek(0));
          if is_new {
            self.globals.delete(name);
            return Err(self.runtime_error(&format!(
              "Undefined variable '{}'.",
              unsafe { name.as_ref() }.as_str()
            )));
          }
        }
        OpCode::GetUpvalue => {
          let slot = self.read_byte() as usize;
          let upvalue = unsafe { self.frame().closure.as_ref().upvalues[slot] };
          self.push(self.read_upvalue(upvalue));
        }
        OpCode::SetUpvalue => {
          let slot = self.read_byte() as usize;
          let upvalue = unsafe { self.frame().closure.as_ref().upvalues[slot] };
          let value = self.peek(0);
          self.write_upvalue(upvalue, value);
        }
        OpCode::GetProperty => {
          let name = self.read_string();
          if self.peek(0).obj_tag() != Some(ObjTag::Instance) {
            return Err(self.runtime_error("Only instances have properties."));
          }
          let instance = object::as_instance(self.peek(0).as_obj());
          if let Some(value) = unsafe { instance.as_ref().fields.get(name) } {
            self.pop();
            self.push(value);
          } else {
            let class = unsafe { instance.as_ref().class };
            self.bind_method(class, name)?;
          }
        }
        OpCode::SetProperty => {
          let name = self.read_string();
          if self.peek(1).obj_tag() != Some(ObjTag::Instance) {
            return Err(self.runtime_error("Only instances have fields."));
          }
          let mut instance = object::as_instance(self.peek(1).as_obj());
          let value = self.peek(0);
          unsafe { instance.as_mut().fields.set(name, value) };
          let value = self.pop();
          self.pop();
          self.push(value);
        }
        OpCode::GetSuper => {
          let name = self.read_string();
          let superclass = object::as_class(self.pop().as_obj());
          self.bind_method(superclass, name)?;
        }
        OpCode::Equal => {
          let b = self.pop();
          let a = self.pop();
          self.push(Value::bool_(a == b));
        }
        OpCode::Greater => self.binary_number_op(|a, b| Value::bool_(a > b))?,
        OpCode::Less => self.binary_number_op(|a, b| Value::bool_(a < b))?,
        OpCode::Add => self.add()?,
        OpCode::Subtract => self.binary_number_op(|a, b| Value::number(a - b))?,
        OpCode::Multiply => self.binary_number_op(|a, b| Value::number(a * b))?,
        OpCode::Divide => self.binary_number_op(|a, b| Value::number(a / b))?,
        OpCode::Not => {
          let v = self.pop();
          self.push(Value::bool_(v.is_falsey()));
        }
        OpCode::Negate => {
          if !self.peek(0).is_number() {
            return Err(self.runtime_error("Operand must be a number."));
          }
          let v = Value::number(-self.pop().as_number());
          self.push(v);
        }
        OpCode::Print => {
          let v = self.pop();
          let _ = writeln!(self.output, "{v}");
        }
        OpCode::Jump => {
          let offset = self.read_short();
          self.frame_mut().ip += offset as usize;
        }
        OpCode::JumpIfFalse => {
          let offset = self.read_short();
          if self.peek(0).is_falsey() {
            self.frame_mut().ip += offset as usize;
          }
        }
        OpCode::Loop => {
          let offset = self.read_short();
          self.frame_mut().ip -= offset as usize;
        }
        OpCode::Call => {
          let arg_count = self.read_byte() as usize;
          self.call_value(self.peek(arg_count), arg_count)?;
        }
        OpCode::Invoke => {
          let name = self.read_string();
          let arg_count = self.read_byte() as usize;
          self.invoke(name, arg_count)?;
        }
        OpCode::SuperInvoke => {
          let name = self.read_string();
          let arg_count = self.read_byte() as usize;
          let superclass = object::as_class(self.pop().as_obj());
          self.invoke_from_class(superclass, name, arg_count)?;
        }
        OpCode::Closure => {
          let function = object::as_function(self.read_constant().as_obj());
          let closure = self.alloc_closure(function);
          self.push(Value::object(closure.cast()));
          let upvalue_count = unsafe { function.as_ref().upvalue_count };
          for _ in 0..upvalue_count {
            let is_local = self.read_byte() != 0;
            let index = self.read_byte() as usize;
            let upvalue = if is_local {
              let base = self.frame().slots;
              self.capture_upvalue(base + index)
            } else {
              unsafe { self.frame().closure.as_ref().upvalues[index] }
            };
            unsafe { object::cast::<ObjClosure>(closure.cast()).as_mut() }
              .upvalues
              .push(upvalue);
          }
        }
        OpCode::CloseUpvalue => {
          let top = self.stack.len() - 1;
          self.close_upvalues(top);
          self.pop();
        }
        OpCode::Return => {
          let result = self.pop();
          let frame = self.frames.pop().expect("return with no active frame");
          self.close_upvalues(frame.slots);
          if self.frames.is_empty() {
            self.pop();
            return Ok(());
          }
          self.stack.truncate(frame.slots);
          self.push(result);
        }
        OpCode::Class => {
          let name = self.read_string();
          let class = self.alloc_class(name);
          self.push(Value::object(class.cast()));
        }
        OpCode::Inherit => {
          if self.peek(1).obj_tag() != Some(ObjTag::Class) {
            return Err(self.runtime_error("Superclass must be a class."));
          }
          let superclass = object::as_class(self.peek(1).as_obj());
          let mut subclass = object::as_class(self.peek(0).as_obj());
          let methods = unsafe { &superclass.as_ref().methods };
          unsafe { subclass.as_mut() }.methods.add_all(methods);
          self.pop();
        }
        OpCode::Method => {
          let name = self.read_string();
          self.define_method(name);
        }
      }
      self.maybe_collect();
    }
  }

  fn frame(&self) -> &CallFrame {
    self.frames.last().expect("no active call frame")
  }

  fn frame_mut(&mut self) -> &mut CallFrame {
    self.frames.last_mut().expect("no active call frame")
  }

  fn read_byte(&mut self) -> u8 {
    let frame = self.frame_mut();
    let byte = unsafe { frame.closure.as_ref().function.as_ref() }.chunk.code[frame.ip];
    frame.ip += 1;
    byte
  }

  fn read_short(&mut self) -> u16 {
    let hi = self.read_byte();
    let lo = self.read_byte();
    u16::from_be_bytes([hi, lo])
  }

  fn read_constant(&mut self) -> Value {
    let index = self.read_byte() as usize;
    unsafe { self.frame().closure.as_ref().function.as_ref() }.chunk.constants[index]
  }

  fn read_constant_long(&mut self) -> Value {
    let b0 = self.read_byte();
    let b1 = self.read_byte();
    let b2 = self.read_byte();
    let index = u32::from_le_bytes([b0, b1, b2, 0]) as usize;
    unsafe { self.frame().closure.as_ref().function.as_ref() }.chunk.constants[index]
  }

  fn read_string(&mut self) -> NonNull<ObjString> {
    unsafe { object::cast(self.read_constant().as_obj()) }
  }

  fn add(&mut self) -> Result<(), String> {
    if self.peek(0).is_string() && self.peek(1).is_string() {
      let b = self.pop();
      let a = self.pop();
      let mut s = String::with_capacity(a.as_str().len() + b.as_str().len());
      s.push_str(a.as_str());
      s.push_str(b.as_str());
      let interned = self.intern_str(&s);
      self.push(Value::object(interned.cast()));
      Ok(())
    } else if self.peek(0).is_number() && self.peek(1).is_number() {
      let b = self.pop().as_number();
      let a = self.pop().as_number();
      self.push(Value::number(a + b));
      Ok(())
    } else {
      Err(self.runtime_error("Operands must be two numbers or two strings."))
    }
  }

  fn binary_number_op(&mut self, op: impl Fn(f64, f64) -> Value) -> Result<(), String> {
    if !self.peek(0).is_number() || !self.peek(1).is_number() {
      return Err(self.runtime_error("Operands must be numbers."));
    }
    let b = self.pop().as_number();
    let a = self.pop().as_number();
    self.push(op(a, b));
    Ok(())
  }

  fn call_value(&mut self, callee: Value, arg_count: usize) -> Result<(), String> {
    if let Some(tag) = callee.obj_tag() {
      match tag {
        ObjTag::Closure => return self.call(object::as_closure(callee.as_obj()), arg_count),
        ObjTag::Native => {
          let native = object::as_native(callee.as_obj());
          let base = self.stack.len() - arg_count;
          let result = unsafe { (native.as_ref().function)(&self.stack[base..]) };
          self.stack.truncate(base - 1);
          self.push(result);
          return Ok(());
        }
        ObjTag::Class => {
          let class = object::as_class(callee.as_obj());
          let instance = self.alloc_instance(class);
          let slot = self.stack.len() - arg_count - 1;
          self.stack[slot] = Value::object(instance.cast());
          if let Some(init) = unsafe { class.as_ref().methods.get(self.init_string) } {
            return self.call(object::as_closure(init.as_obj()), arg_count);
          } else if arg_count != 0 {
            return Err(self.runtime_error(&format!("Expected 0 arguments but got {arg_count}.")));
          }
          return Ok(());
        }
        ObjTag::BoundMethod => {
          let bound = object::as_bound_method(callee.as_obj());
          let slot = self.stack.len() - arg_count - 1;
          self.stack[slot] = unsafe { bound.as_ref().receiver };
          let method = unsafe { bound.as_ref().method };
          return self.call(method, arg_count);
        }
        _ => {}
      }
    }
    Err(self.runtime_error("Can only call functions and classes."))
  }

  fn call(&mut self, closure: NonNull<ObjClosure>, arg_count: usize) -> Result<(), String> {
    let function = unsafe { closure.as_ref().function.as_ref() };
    if arg_count != function.arity as usize {
      return Err(self.runtime_error(&format!(
        "Expected {} arguments but got {arg_count}.",
        function.arity
      )));
    }
    if self.frames.len() >= FRAMES_MAX {
      return Err(self.runtime_error("Stack overflow."));
    }
    self.frames.push(CallFrame {
      closure,
      ip: 0,
      slots: self.stack.len() - arg_count - 1,
    });
    Ok(())
  }

  fn invoke(&mut self, name: NonNull<ObjString>, arg_count: usize) -> Result<(), String> {
    let receiver = self.peek(arg_count);
    if receiver.obj_tag() != Some(ObjTag::Instance) {
      return Err(self.runtime_error("Only instances have methods."));
    }
    let instance = object::as_instance(receiver.as_obj());
    if let Some(value) = unsafe { instance.as_ref().fields.get(name) } {
      let slot = self.stack.len() - arg_count - 1;
      self.stack[slot] = value;
      return self.call_value(value, arg_count);
    }
    let class = unsafe { instance.as_ref().class };
    self.invoke_from_class(class, name, arg_count)
  }

  fn invoke_from_class(
    &mut self,
    class: NonNull<ObjClass>,
    name: NonNull<ObjString>,
    arg_count: usize,
  ) -> Result<(), String> {
    match unsafe { class.as_ref().methods.get(name) } {
      Some(method) => self.call(object::as_closure(method.as_obj()), arg_count),
      None => Err(self.runtime_error(&format!(
        "Undefined property '{}'.",
        unsafe { name.as_ref() }.as_str()
      ))),
    }
  }

  fn bind_method(&mut self, class: NonNull<ObjClass>, name: NonNull<ObjString>) -> Result<(), String> {
    let method = match unsafe { class.as_ref().methods.get(name) } {
      Some(m) => m,
      None => {
        return Err(self.runtime_error(&format!(
          "Undefined property '{}'.",
          unsafe { name.as_ref() }.as_str()
        )))
      }
    };
    let receiver = self.pop();
    let bound = self.alloc_bound_method(receiver, object::as_closure(method.as_obj()));
    self.push(Value::object(bound.cast()));
    Ok(())
  }

  fn define_method(&mut self, name: NonNull<ObjString>) {
    let method = self.pop();
    let mut class = object::as_class(self.peek(0).as_obj());
    unsafe { class.as_mut() }.methods.set(name, method);
  }

  fn capture_upvalue(&mut self, stack_index: usize) -> NonNull<ObjUpvalue> {
    if let Some(existing) = self
      .open_upvalues
      .iter()
      .find(|u| matches!(unsafe { u.as_ref() }.location, UpvalueLoc::Open(i) if i == stack_index))
    {
      return *existing;
    }
    let upvalue = self.alloc_upvalue(stack_index);
    let pos = self
      .open_upvalues
      .iter()
      .position(|u| match unsafe { u.as_ref() }.location {
        UpvalueLoc::Open(i) => i < stack_index,
        UpvalueLoc::Closed(_) => true,
      })
      .unwrap_or(self.open_upvalues.len());
    self.open_upvalues.insert(pos, upvalue);
    upvalue
  }

  fn close_upvalues(&mut self, from: usize) {
    let mut i = 0;
    while i < self.open_upvalues.len() {
      let mut upvalue = self.open_upvalues[i];
      let index = match unsafe { upvalue.as_ref() }.location {
        UpvalueLoc::Open(idx) => idx,
        UpvalueLoc::Closed(_) => {
          i += 1;
          continue;
        }
      };
      if index >= from {
        let value = self.stack[index];
        unsafe { upvalue.as_mut() }.location = UpvalueLoc::Closed(value);
        self.open_upvalues.remove(i);
      } else {
        i += 1;
      }
    }
  }

  fn read_upvalue(&self, upvalue: NonNull<ObjUpvalue>) -> Value {
    match unsafe { upvalue.as_ref() }.location {
      UpvalueLoc::Open(index) => self.stack[index],
      UpvalueLoc::Closed(value) => value,
    }
  }

  fn write_upvalue(&mut self, mut upvalue: NonNull<ObjUpvalue>, value: Value) {
    match unsafe { upvalue.as_ref() }.location {
      UpvalueLoc::Open(index) => self.stack[index] = value,
      UpvalueLoc::Closed(_) => unsafe { upvalue.as_mut() }.location = UpvalueLoc::Closed(value),
    }
  }

  /// Formats a runtime error as message + youngest-first stack trace, the
  /// wire format the driver prints verbatim to stderr.
  fn runtime_error(&self, message: &str) -> String {
    let frames: Vec<diag::StackFrame<'_>> = self
      .frames
      .iter()
      .rev()
      .map(|frame| {
        let function = unsafe { frame.closure.as_ref().function.as_ref() };
        let line = function.chunk.get_line(frame.ip.saturating_sub(1));
        let name = if function.name.is_some() {
          function.name_str()
        } else {
          ""
        };
        diag::StackFrame { line, name }
      })
      .collect();
    diag::stack_trace(message, &frames)
  }

  fn maybe_collect(&mut self) {
    #[cfg(feature = "gc-stress")]
    self.collect_garbage();
    #[cfg(not(feature = "gc-stress"))]
    if self.bytes_allocated > self.next_gc {
      self.collect_garbage();
    }
  }
}

impl Default for Vm {
  fn default() -> Self {
    Vm::new()
  }
}

impl Drop for Vm {
  fn drop(&mut self) {
    let mut current = self.objects;
    while let Some(ptr) = current {
      current = unsafe { ptr.as_ref() }.next;
      unsafe { crate::gc::free_object(ptr) };
    }
  }
}
