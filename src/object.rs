//! Heap object model.
//!
//! Every heap value starts with an [`ObjHeader`] (repr(C), guaranteed to sit
//! at offset 0 of every concrete object struct) so a `NonNull<ObjHeader>`
//! can be downcast to its concrete type once the tag has been checked. This
//! is the same trick `struct Obj obj;`-as-first-field plays in C; in Rust it
//! relies on `#[repr(C)]` to keep the field layout predictable.

use std::fmt;
use std::ptr::NonNull;

use crate::chunk::Chunk;
use crate::table::Table;
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjTag {
  String,
  Function,
  Native,
  Closure,
  Upvalue,
  Class,
  Instance,
  BoundMethod,
}

#[repr(C)]
pub struct ObjHeader {
  pub tag: ObjTag,
  pub marked: bool,
  pub next: Option<NonNull<ObjHeader>>,
}

#[repr(C)]
pub struct ObjString {
  pub header: ObjHeader,
  pub hash: u32,
  pub chars: Box<str>,
}

impl ObjString {
  pub fn as_str(&self) -> &str {
    &self.chars
  }
}

/// FNV-1a, matching the hash the hash table and the interner agree on.
pub fn hash_str(s: &str) -> u32 {
  let mut hash: u32 = 2166136261;
  for byte in s.as_bytes() {
    hash ^= *byte as u32;
    hash = hash.wrapping_mul(16777619);
  }
  hash
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionKind {
  Script,
  Function,
  Method,
  Initializer,
}

#[repr(C)]
pub struct ObjFunction {
  pub header: ObjHeader,
  pub arity: u8,
  pub upvalue_count: usize,
  pub chunk: Chunk,
  pub name: Option<NonNull<ObjString>>,
}

impl ObjFunction {
  pub fn name_str(&self) -> &str {
    self
      .name
      .map(|n| unsafe { n.as_ref().as_str() })
      .unwrap_or("script")
  }
}

pub type NativeFn = fn(&[Value]) -> Value;

#[repr(C)]
pub struct ObjNative {
  pub header: ObjHeader,
  pub function: NativeFn,
  pub name: &'static str,
}

#[derive(Clone, Copy)]
pub enum UpvalueLoc {
  /// Index into the VM stack; still owned by a live call frame.
  Open(usize),
  /// The value has been promoted out of the stack onto the heap.
  Closed(Value),
}

#[repr(C)]
pub struct ObjUpvalue {
  pub header: ObjHeader,
  pub location: UpvalueLoc,
}

#[repr(C)]
pub struct ObjClosure {
  pub header: ObjHeader,
  pub function: NonNull<ObjFunction>,
  pub upvalues: Vec<NonNull<ObjUpvalue>>,
}

#[repr(C)]
pub struct ObjClass {
  pub header: ObjHeader,
  pub name: NonNull<ObjString>,
  pub methods: Table,
}

#[repr(C)]
pub struct ObjInstance {
  pub header: ObjHeader,
  pub class: NonNull<ObjClass>,
  pub fields: Table,
}

#[repr(C)]
pub struct ObjBoundMethod {
  pub header: ObjHeader,
  pub receiver: Value,
  pub method: NonNull<ObjClosure>,
}

/// Downcasts a type-erased object pointer, given that its tag has already
/// been checked (or is known from context, e.g. `Value::as_str`).
///
/// # Safety
/// `ptr` must point at a live object whose tag matches `T`.
pub unsafe fn cast<T>(ptr: NonNull<ObjHeader>) -> NonNull<T> {
  ptr.cast()
}

pub fn as_string(ptr: NonNull<ObjHeader>) -> &'static ObjString {
  debug_assert_eq!(unsafe { ptr.as_ref() }.tag, ObjTag::String);
  unsafe { cast::<ObjString>(ptr).as_ref() }
}

pub fn as_function(ptr: NonNull<ObjHeader>) -> NonNull<ObjFunction> {
  debug_assert_eq!(unsafe { ptr.as_ref() }.tag, ObjTag::Function);
  unsafe { cast(ptr) }
}

pub fn as_native(ptr: NonNull<ObjHeader>) -> NonNull<ObjNative> {
  debug_assert_eq!(unsafe { ptr.as_ref() }.tag, ObjTag::Native);
  unsafe { cast(ptr) }
}

pub fn as_closure(ptr: NonNull<ObjHeader>) -> NonNull<ObjClosure> {
  debug_assert_eq!(unsafe { ptr.as_ref() }.tag, ObjTag::Closure);
  unsafe { cast(ptr) }
}

pub fn as_upvalue(ptr: NonNull<ObjHeader>) -> NonNull<ObjUpvalue> {
  debug_assert_eq!(unsafe { ptr.as_ref() }.tag, ObjTag::Upvalue);
  unsafe { cast(ptr) }
}

pub fn as_class(ptr: NonNull<ObjHeader>) -> NonNull<ObjClass> {
  debug_assert_eq!(unsafe { ptr.as_ref() }.tag, ObjTag::Class);
  unsafe { cast(ptr) }
}

pub fn as_instance(ptr: NonNull<ObjHeader>) -> NonNull<ObjInstance> {
  debug_assert_eq!(unsafe { ptr.as_ref() }.tag, ObjTag::Instance);
  unsafe { cast(ptr) }
}

pub fn as_bound_method(ptr: NonNull<ObjHeader>) -> NonNull<ObjBoundMethod> {
  debug_assert_eq!(unsafe { ptr.as_ref() }.tag, ObjTag::BoundMethod);
  unsafe { cast(ptr) }
}

pub fn fmt_obj(ptr: NonNull<ObjHeader>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
  let tag = unsafe { ptr.as_ref() }.tag;
  match tag {
    ObjTag::String => write!(f, "{}", as_string(ptr).as_str()),
    ObjTag::Function => write!(f, "<fn {}>", unsafe { as_function(ptr).as_ref() }.name_str()),
    ObjTag::Native => write!(f, "<native fn {}>", unsafe { as_native(ptr).as_ref() }.name),
    ObjTag::Closure => write!(
      f,
      "<fn {}>",
      unsafe { as_closure(ptr).as_ref().function.as_ref() }.name_str()
    ),
    ObjTag::Upvalue => write!(f, "upvalue"),
    ObjTag::Class => write!(f, "{}", unsafe { as_class(ptr).as_ref().name.as_ref() }.as_str()),
    ObjTag::Instance => write!(
      f,
      "{} instance",
      unsafe { as_instance(ptr).as_ref().class.as_ref().name.as_ref() }.as_str()
    ),
    ObjTag::BoundMethod => write!(
      f,
      "<fn {}>",
      unsafe {
        as_bound_method(ptr)
          .as_ref()
          .method
          .as_ref()
          .function
          .as_ref()
      }
      .name_str()
    ),
  }
}
