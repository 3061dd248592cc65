//! Lexical analysis for Corvid: the `Scanner` pulls one [`Token`] at a time
//! out of a source string, on demand, so a recursive-descent compiler can
//! drive it with a single token of lookahead.

mod scanner;
mod token;

pub use scanner::Scanner;
pub use span::Span;
pub use token::{Token, TokenKind};

/// Checked by the compiler before recursing into another expression/statement
/// production. On average a single `parse_*` call consumes somewhere between
/// 10 and 700 bytes of stack; assuming ~50 recursive calls per dive at 700
/// bytes each, 64 KiB covers a comfortable margin before a genuine overflow.
const MINIMUM_STACK_REQUIRED: usize = 64_000;

#[cfg(all(feature = "check-recursion-limit", not(target_family = "wasm")))]
pub fn check_recursion_limit() -> bool {
  stacker::remaining_stack()
    .map(|available| available > MINIMUM_STACK_REQUIRED)
    .unwrap_or(true)
}

// On WASM, `remaining_stack` always returns `None`; a real overflow there
// becomes a host-level panic/exception instead, so there's nothing to check.
#[cfg(any(not(feature = "check-recursion-limit"), target_family = "wasm"))]
pub fn check_recursion_limit() -> bool {
  true
}
