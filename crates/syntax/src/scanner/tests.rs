use super::Scanner;
use crate::token::TokenKind;

fn kinds(src: &str) -> Vec<TokenKind> {
  let mut scanner = Scanner::new(src);
  let mut out = vec![];
  loop {
    let tok = scanner.scan_token();
    let done = tok.kind == TokenKind::Eof;
    out.push(tok.kind);
    if done {
      break;
    }
  }
  out
}

#[test]
fn scans_punctuation() {
  use TokenKind::*;
  assert_eq!(
    kinds("(){},.-+;:/* "),
    vec![
      LeftParen, RightParen, LeftBrace, RightBrace, Comma, Dot, Minus, Plus, Semicolon, Colon,
      Slash, Star, Eof
    ]
  );
}

#[test]
fn scans_two_char_operators() {
  use TokenKind::*;
  assert_eq!(
    kinds("! != = == < <= > >="),
    vec![
      Bang, BangEqual, Equal, EqualEqual, Less, LessEqual, Greater, GreaterEqual, Eof
    ]
  );
}

#[test]
fn scans_keywords_and_identifiers() {
  use TokenKind::*;
  assert_eq!(
    kinds("and class else false for fun if nil or print return super this true var while foo"),
    vec![
      And, Class, Else, False, For, Fun, If, Nil, Or, Print, Return, Super, This, True, Var,
      While, Identifier, Eof
    ]
  );
}

#[test]
fn scans_numbers_and_strings() {
  use TokenKind::*;
  let mut scanner = Scanner::new(r#"123 45.6 "hello""#);
  let a = scanner.scan_token();
  assert_eq!(a.kind, Number);
  assert_eq!(a.lexeme, "123");
  let b = scanner.scan_token();
  assert_eq!(b.kind, Number);
  assert_eq!(b.lexeme, "45.6");
  let c = scanner.scan_token();
  assert_eq!(c.kind, String);
  assert_eq!(c.lexeme, "\"hello\"");
}

#[test]
fn unterminated_string_errors() {
  let mut scanner = Scanner::new("\"abc");
  let tok = scanner.scan_token();
  assert_eq!(tok.kind, TokenKind::Error);
  assert_eq!(tok.lexeme, "Unterminated string.");
}

#[test]
fn unexpected_character_errors() {
  let mut scanner = Scanner::new("@");
  let tok = scanner.scan_token();
  assert_eq!(tok.kind, TokenKind::Error);
  assert_eq!(tok.lexeme, "Unexpected character.");
}

#[test]
fn skips_comments_and_tracks_lines() {
  let mut scanner = Scanner::new("// comment\nvar x");
  let tok = scanner.scan_token();
  assert_eq!(tok.kind, TokenKind::Var);
  assert_eq!(tok.line, 2);
}

#[test]
fn line_counter_advances_through_multiline_strings() {
  let mut scanner = Scanner::new("\"a\nb\"\nvar");
  let s = scanner.scan_token();
  assert_eq!(s.kind, TokenKind::String);
  let var = scanner.scan_token();
  assert_eq!(var.line, 3);
}
