//! Mark-and-sweep collector. Every heap allocation funnels through
//! [`Vm::alloc`], which is also the sole safe point: the only place a
//! collection cycle may run.

use std::cell::RefCell;
use std::mem::size_of;
use std::ptr::NonNull;

use crate::object::{
  self, ObjBoundMethod, ObjClass, ObjClosure, ObjFunction, ObjHeader, ObjInstance, ObjNative,
  ObjString, ObjTag, ObjUpvalue, UpvalueLoc,
};
use crate::table::Table;
use crate::value::Value;
use crate::vm::Vm;

/// `next_gc = bytes_allocated * GROW_FACTOR` after each cycle.
const GROW_FACTOR: usize = 2;

impl Vm {
  fn alloc<T>(&mut self, obj: T, tag: ObjTag) -> NonNull<ObjHeader>
  where
    T: IntoHeader,
  {
    self.bytes_allocated += size_of::<T>();
    #[cfg(feature = "gc-stress")]
    self.collect_garbage();
    #[cfg(not(feature = "gc-stress"))]
    if self.bytes_allocated > self.next_gc {
      self.collect_garbage();
    }

    let boxed = Box::new(obj.with_header(ObjHeader {
      tag,
      marked: false,
      next: self.objects,
    }));
    let ptr: NonNull<ObjHeader> = NonNull::from(Box::leak(boxed)).cast();
    self.objects = Some(ptr);

    #[cfg(feature = "gc-trace")]
    eprintln!("alloc {ptr:?} ({tag:?})");

    ptr
  }

  pub(crate) fn intern_str(&mut self, s: &str) -> NonNull<ObjString> {
    let hash = object::hash_str(s);
    if let Some(existing) = self.strings.find_string(s, hash) {
      return existing;
    }
    let ptr = self.alloc(
      ObjStringBody {
        hash,
        chars: s.into(),
      },
      ObjTag::String,
    );
    let string_ptr: NonNull<ObjString> = ptr.cast();
    // Root the new string on the stack for the duration of the table
    // insert: `set` may trigger a resize, which allocates.
    self.push(Value::object(ptr));
    self.strings.set(string_ptr, Value::nil());
    self.pop();
    string_ptr
  }

  pub(crate) fn alloc_closure(&mut self, function: NonNull<ObjFunction>) -> NonNull<ObjClosure> {
    let ptr = self.alloc(
      ObjClosureBody {
        function,
        upvalues: Vec::new(),
      },
      ObjTag::Closure,
    );
    ptr.cast()
  }

  pub(crate) fn alloc_function(&mut self) -> NonNull<ObjFunction> {
    let ptr = self.alloc(
      ObjFunctionBody {
        arity: 0,
        upvalue_count: 0,
        chunk: crate::chunk::Chunk::new(),
        name: None,
      },
      ObjTag::Function,
    );
    ptr.cast()
  }

  pub(crate) fn alloc_native(&mut self, name: &'static str, function: object::NativeFn) -> NonNull<ObjHeader> {
    self.alloc(ObjNativeBody { function, name }, ObjTag::Native)
  }

  pub(crate) fn alloc_upvalue(&mut self, stack_index: usize) -> NonNull<ObjUpvalue> {
    let ptr = self.alloc(
      ObjUpvalueBody {
        location: UpvalueLoc::Open(stack_index),
      },
      ObjTag::Upvalue,
    );
    ptr.cast()
  }

  pub(crate) fn alloc_class(&mut self, name: NonNull<ObjString>) -> NonNull<ObjClass> {
    let ptr = self.alloc(
      ObjClassBody {
        name,
        methods: Table::new(),
      },
      ObjTag::Class,
    );
    ptr.cast()
  }

  pub(crate) fn alloc_instance(&mut self, class: NonNull<ObjClass>) -> NonNull<ObjInstance> {
    let ptr = self.alloc(
      ObjInstanceBody {
        class,
        fields: Table::new(),
      },
      ObjTag::Instance,
    );
    ptr.cast()
  }

  pub(crate) fn alloc_bound_method(
    &mut self,
    receiver: Value,
    method: NonNull<ObjClosure>,
  ) -> NonNull<ObjBoundMethod> {
    let ptr = self.alloc(ObjBoundMethodBody { receiver, method }, ObjTag::BoundMethod);
    ptr.cast()
  }

  pub(crate) fn mark_value(&mut self, value: Value) {
    if let Some(ptr) = value.is_obj().then(|| value.as_obj()) {
      self.mark_object(ptr);
    }
  }

  pub(crate) fn mark_object(&mut self, mut ptr: NonNull<ObjHeader>) {
    let header = unsafe { ptr.as_mut() };
    if header.marked {
      return;
    }
    header.marked = true;
    self.gray_stack.push(ptr);
  }

  fn mark_roots(&mut self) {
    for i in 0..self.stack.len() {
      let v = self.stack[i];
      self.mark_value(v);
    }
    for i in 0..self.frames.len() {
      let closure = self.frames[i].closure;
      self.mark_object(closure.cast());
    }
    for i in 0..self.open_upvalues.len() {
      let up = self.open_upvalues[i];
      self.mark_object(up.cast());
    }
    for i in 0..self.compiler_roots.len() {
      let f = self.compiler_roots[i];
      self.mark_object(f.cast());
    }
    self.mark_object(self.init_string.cast());

    let pending = RefCell::new(Vec::new());
    self.globals.mark(
      &mut |v| pending.borrow_mut().push(MarkTask::Value(v)),
      &mut |k| pending.borrow_mut().push(MarkTask::Key(k)),
    );
    for task in pending.into_inner() {
      match task {
        MarkTask::Value(v) => self.mark_value(v),
        MarkTask::Key(k) => self.mark_object(k.cast()),
      }
    }
  }

  fn trace_references(&mut self) {
    while let Some(ptr) = self.gray_stack.pop() {
      self.blacken_object(ptr);
    }
  }

  fn blacken_object(&mut self, ptr: NonNull<ObjHeader>) {
    let tag = unsafe { ptr.as_ref() }.tag;
    #[cfg(feature = "gc-trace")]
    eprintln!("blacken {ptr:?} ({tag:?})");
    match tag {
      ObjTag::String | ObjTag::Native => {}
      ObjTag::Upvalue => {
        let upvalue = object::as_upvalue(ptr);
        if let UpvalueLoc::Closed(v) = unsafe { upvalue.as_ref() }.location {
          self.mark_value(v);
        }
      }
      ObjTag::Function => {
        let function = object::as_function(ptr);
        let function = unsafe { function.as_ref() };
        if let Some(name) = function.name {
          self.mark_object(name.cast());
        }
        for i in 0..function.chunk.constants.len() {
          let v = function.chunk.constants[i];
          self.mark_value(v);
        }
      }
      ObjTag::Closure => {
        let closure = object::as_closure(ptr);
        let closure = unsafe { closure.as_ref() };
        self.mark_object(closure.function.cast());
        for i in 0..closure.upvalues.len() {
          let up = closure.upvalues[i];
          self.mark_object(up.cast());
        }
      }
      ObjTag::Class => {
        let class = object::as_class(ptr);
        let class = unsafe { class.as_ref() };
        self.mark_object(class.name.cast());
        let pending = RefCell::new(Vec::new());
        class.methods.mark(
          &mut |v| pending.borrow_mut().push(MarkTask::Value(v)),
          &mut |k| pending.borrow_mut().push(MarkTask::Key(k)),
        );
        for task in pending.into_inner() {
          match task {
            MarkTask::Value(v) => self.mark_value(v),
            MarkTask::Key(k) => self.mark_object(k.cast()),
          }
        }
      }
      ObjTag::Instance => {
        let instance = object::as_instance(ptr);
        let instance = unsafe { instance.as_ref() };
        self.mark_object(instance.class.cast());
        let pending = RefCell::new(Vec::new());
        instance.fields.mark(
          &mut |v| pending.borrow_mut().push(MarkTask::Value(v)),
          &mut |k| pending.borrow_mut().push(MarkTask::Key(k)),
        );
        for task in pending.into_inner() {
          match task {
            MarkTask::Value(v) => self.mark_value(v),
            MarkTask::Key(k) => self.mark_object(k.cast()),
          }
        }
      }
      ObjTag::BoundMethod => {
        let bound = object::as_bound_method(ptr);
        let bound = unsafe { bound.as_ref() };
        self.mark_value(bound.receiver);
        self.mark_object(bound.method.cast());
      }
    }
  }

  fn sweep(&mut self) {
    let mut previous: Option<NonNull<ObjHeader>> = None;
    let mut current = self.objects;
    while let Some(mut ptr) = current {
      let header = unsafe { ptr.as_mut() };
      if header.marked {
        header.marked = false;
        previous = Some(ptr);
        current = header.next;
      } else {
        let unreached = ptr;
        current = header.next;
        match previous {
          Some(mut prev) => unsafe { prev.as_mut() }.next = current,
          None => self.objects = current,
        }
        unsafe { free_object(unreached) };
      }
    }
  }

  pub(crate) fn collect_garbage(&mut self) {
    #[cfg(feature = "gc-trace")]
    let before = self.bytes_allocated;

    self.mark_roots();
    self.trace_references();
    self.strings.remove_white();
    self.sweep();

    self.next_gc = self.bytes_allocated * GROW_FACTOR;

    #[cfg(feature = "gc-trace")]
    eprintln!(
      "gc collected {} bytes (from {before} to {}), next at {}",
      before.saturating_sub(self.bytes_allocated),
      self.bytes_allocated,
      self.next_gc
    );
  }
}

enum MarkTask {
  Value(Value),
  Key(NonNull<ObjString>),
}

/// Downcasts and drops a heap object, running its destructor (freeing a
/// Function's chunk, a Closure's upvalue array, a Class/Instance's table, or
/// a String's byte buffer along with it).
///
/// # Safety
/// `ptr` must be the sole remaining reference to a live heap object.
pub unsafe fn free_object(ptr: NonNull<ObjHeader>) {
  let tag = ptr.as_ref().tag;
  #[cfg(feature = "gc-trace")]
  eprintln!("free {ptr:?} ({tag:?})");
  match tag {
    ObjTag::String => drop(Box::from_raw(object::cast::<ObjString>(ptr).as_ptr())),
    ObjTag::Function => drop(Box::from_raw(object::cast::<ObjFunction>(ptr).as_ptr())),
    ObjTag::Native => drop(Box::from_raw(object::cast::<ObjNative>(ptr).as_ptr())),
    ObjTag::Closure => drop(Box::from_raw(object::cast::<ObjClosure>(ptr).as_ptr())),
    ObjTag::Upvalue => drop(Box::from_raw(object::cast::<ObjUpvalue>(ptr).as_ptr())),
    ObjTag::Class => drop(Box::from_raw(object::cast::<ObjClass>(ptr).as_ptr())),
    ObjTag::Instance => drop(Box::from_raw(object::cast::<ObjInstance>(ptr).as_ptr())),
    ObjTag::BoundMethod => drop(Box::from_raw(object::cast::<ObjBoundMethod>(ptr).as_ptr())),
  }
}

// --- Bodies paired with `ObjHeader` to build each concrete, repr(C) object. ---
// `with_header` glues a header onto the body so `Vm::alloc` stays generic.

trait IntoHeader {
  type Target;
  fn with_header(self, header: ObjHeader) -> Self::Target;
}

struct ObjStringBody {
  hash: u32,
  chars: Box<str>,
}
impl IntoHeader for ObjStringBody {
  type Target = ObjString;
  fn with_header(self, header: ObjHeader) -> ObjString {
    ObjString {
      header,
      hash: self.hash,
      chars: self.chars,
    }
  }
}

struct ObjFunctionBody {
  arity: u8,
  upvalue_count: usize,
  chunk: crate::chunk::Chunk,
  name: Option<NonNull<ObjString>>,
}
impl IntoHeader for ObjFunctionBody {
  type Target = ObjFunction;
  fn with_header(self, header: ObjHeader) -> ObjFunction {
    ObjFunction {
      header,
      arity: self.arity,
      upvalue_count: self.upvalue_count,
      chunk: self.chunk,
      name: self.name,
    }
  }
}

struct ObjNativeBody {
  function: object::NativeFn,
  name: &'static str,
}
impl IntoHeader for ObjNativeBody {
  type Target = ObjNative;
  fn with_header(self, header: ObjHeader) -> ObjNative {
    ObjNative {
      header,
      function: self.function,
      name: self.name,
    }
  }
}

struct ObjClosureBody {
  function: NonNull<ObjFunction>,
  upvalues: Vec<NonNull<ObjUpvalue>>,
}
impl IntoHeader for ObjClosureBody {
  type Target = ObjClosure;
  fn with_header(self, header: ObjHeader) -> ObjClosure {
    ObjClosure {
      header,
      function: self.function,
      upvalues: self.upvalues,
    }
  }
}

struct ObjUpvalueBody {
  location: UpvalueLoc,
}
impl IntoHeader for ObjUpvalueBody {
  type Target = ObjUpvalue;
  fn with_header(self, header: ObjHeader) -> ObjUpvalue {
    ObjUpvalue {
      header,
      location: self.location,
    }
  }
}

struct ObjClassBody {
  name: NonNull<ObjString>,
  methods: Table,
}
impl IntoHeader for ObjClassBody {
  type Target = ObjClass;
  fn with_header(self, header: ObjHeader) -> ObjClass {
    ObjClass {
      header,
      name: self.name,
      methods: self.methods,
    }
  }
}

struct ObjInstanceBody {
  class: NonNull<ObjClass>,
  fields: Table,
}
impl IntoHeader for ObjInstanceBody {
  type Target = ObjInstance;
  fn with_header(self, header: ObjHeader) -> ObjInstance {
    ObjInstance {
      header,
      class: self.class,
      fields: self.fields,
    }
  }
}

struct ObjBoundMethodBody {
  receiver: Value,
  method: NonNull<ObjClosure>,
}
impl IntoHeader for ObjBoundMethodBody {
  type Target = ObjBoundMethod;
  fn with_header(self, header: ObjHeader) -> ObjBoundMethod {
    ObjBoundMethod {
      header,
      receiver: self.receiver,
      method: self.method,
    }
  }
}
