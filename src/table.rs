//! Open-addressed hash table with linear probing, used for globals,
//! string interning, instance fields, and class method tables.

use std::ptr::NonNull;

use crate::object::{self, ObjHeader, ObjString};
use crate::value::Value;

const MAX_LOAD: f64 = 0.75;

#[derive(Clone, Copy)]
struct Entry {
  key: Option<NonNull<ObjString>>,
  value: Value,
}

pub struct Table {
  entries: Vec<Entry>,
  count: usize,
}

impl Default for Table {
  fn default() -> Self {
    Table::new()
  }
}

impl Table {
  pub fn new() -> Self {
    Table {
      entries: Vec::new(),
      count: 0,
    }
  }

  pub fn len(&self) -> usize {
    self.count
  }

  pub fn is_empty(&self) -> bool {
    self.count == 0
  }

  fn capacity(&self) -> usize {
    self.entries.len()
  }

  /// Linear probe starting at `hash & (capacity - 1)`. Returns the matching
  /// occupied slot if present, otherwise the first tombstone seen, falling
  /// back to the first empty slot if no tombstone was seen.
  fn find_entry(entries: &[Entry], capacity: usize, key: NonNull<ObjString>) -> usize {
    let hash = unsafe { key.as_ref() }.hash;
    let mut index = hash as usize & (capacity - 1);
    let mut tombstone: Option<usize> = None;
    loop {
      let entry = &entries[index];
      match entry.key {
        None if entry.value.is_nil() => {
          return tombstone.unwrap_or(index);
        }
        None => {
          // Tombstone: key=None, value=true.
          if tombstone.is_none() {
            tombstone = Some(index);
          }
        }
        Some(k) if k == key => return index,
        Some(_) => {}
      }
      index = (index + 1) & (capacity - 1);
    }
  }

  fn adjust_capacity(&mut self, capacity: usize) {
    let mut entries = vec![
      Entry {
        key: None,
        value: Value::nil(),
      };
      capacity
    ];
    let mut count = 0;
    for entry in &self.entries {
      if let Some(key) = entry.key {
        let index = Self::find_entry(&entries, capacity, key);
        entries[index] = Entry {
          key: Some(key),
          value: entry.value,
        };
        count += 1;
      }
    }
    self.entries = entries;
    self.count = count;
  }

  fn ensure_capacity(&mut self) {
    if (self.count + 1) as f64 > self.capacity() as f64 * MAX_LOAD {
      let new_capacity = if self.capacity() < 8 {
        8
      } else {
        self.capacity() * 2
      };
      self.adjust_capacity(new_capacity);
    }
  }

  pub fn get(&self, key: NonNull<ObjString>) -> Option<Value> {
    if self.count == 0 {
      return None;
    }
    let index = Self::find_entry(&self.entries, self.capacity(), key);
    self.entries[index].key.map(|_| self.entries[index].value)
  }

  /// Returns `true` iff this inserted a brand new key.
  pub fn set(&mut self, key: NonNull<ObjString>, value: Value) -> bool {
    self.ensure_capacity();
    let index = Self::find_entry(&self.entries, self.capacity(), key);
    let is_new = self.entries[index].key.is_none();
    if is_new && self.entries[index].value.is_nil() {
      self.count += 1;
    }
    self.entries[index] = Entry {
      key: Some(key),
      value,
    };
    is_new
  }

  pub fn delete(&mut self, key: NonNull<ObjString>) -> bool {
    if self.count == 0 {
      return false;
    }
    let index = Self::find_entry(&self.entries, self.capacity(), key);
    if self.entries[index].key.is_none() {
      return false;
    }
    self.entries[index] = Entry {
      key: None,
      value: Value::bool_(true),
    };
    true
  }

  pub fn add_all(&mut self, from: &Table) {
    for entry in &from.entries {
      if let Some(key) = entry.key {
        self.set(key, entry.value);
      }
    }
  }

  /// Used by the interner: compares candidate bytes directly, avoiding an
  /// allocation for strings that already exist.
  pub fn find_string(&self, chars: &str, hash: u32) -> Option<NonNull<ObjString>> {
    if self.count == 0 {
      return None;
    }
    let capacity = self.capacity();
    let mut index = hash as usize & (capacity - 1);
    loop {
      let entry = &self.entries[index];
      match entry.key {
        None if entry.value.is_nil() => return None,
        Some(key) => {
          let s = unsafe { key.as_ref() };
          if s.hash == hash && s.as_str() == chars {
            return Some(key);
          }
        }
        None => {}
      }
      index = (index + 1) & (capacity - 1);
    }
  }

  /// Deletes every entry whose key is unmarked. Called on the intern table
  /// right after tracing, so unreachable strings are gone before sweep.
  pub fn remove_white(&mut self) {
    for entry in &mut self.entries {
      if let Some(key) = entry.key {
        let marked = unsafe { key.cast::<ObjHeader>().as_ref() }.marked;
        if !marked {
          *entry = Entry {
            key: None,
            value: Value::bool_(true),
          };
        }
      }
    }
  }

  pub fn mark(&self, mark_value: &mut impl FnMut(Value), mark_key: &mut impl FnMut(NonNull<ObjString>)) {
    for entry in &self.entries {
      if let Some(key) = entry.key {
        mark_key(key);
        mark_value(entry.value);
      }
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = (NonNull<ObjString>, Value)> + '_ {
    self
      .entries
      .iter()
      .filter_map(|e| e.key.map(|k| (k, e.value)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn make_string(s: &str) -> NonNull<ObjString> {
    let hash = object::hash_str(s);
    let boxed = Box::new(ObjString {
      header: ObjHeader {
        tag: object::ObjTag::String,
        marked: false,
        next: None,
      },
      hash,
      chars: s.into(),
    });
    NonNull::from(Box::leak(boxed))
  }

  #[test]
  fn set_then_get_returns_stored_value() {
    let mut table = Table::new();
    let key = make_string("a");
    assert!(table.set(key, Value::number(1.0)));
    assert_eq!(table.get(key).unwrap().as_number(), 1.0);
  }

  #[test]
  fn delete_then_get_returns_none() {
    let mut table = Table::new();
    let key = make_string("a");
    table.set(key, Value::number(1.0));
    assert!(table.delete(key));
    assert!(table.get(key).is_none());
  }

  #[test]
  fn load_factor_never_exceeds_three_quarters() {
    let mut table = Table::new();
    for i in 0..100 {
      let key = make_string(&format!("key{i}"));
      table.set(key, Value::number(i as f64));
    }
    assert!((table.len() as f64) <= (table.capacity() as f64) * MAX_LOAD);
  }

  #[test]
  fn find_string_matches_by_hash_len_then_bytes() {
    let mut table = Table::new();
    let key = make_string("hello");
    table.set(key, Value::nil());
    let hash = object::hash_str("hello");
    assert_eq!(table.find_string("hello", hash), Some(key));
    assert_eq!(table.find_string("world", object::hash_str("world")), None);
  }
}
