use super::{Report, Snippet};
use crate::report::{compile_error_line, stack_trace, Level, Source, StackFrame};

#[test]
fn snippet_single_line() {
  let src = "lorem ipsum dolor sit amet consectetur adipiscing elit";

  assert_eq!(
    Snippet::new(src, 6..17),
    Snippet {
      s: "lorem ipsum dolor sit amet consectetur adipiscing elit".into(),
      line: 1,
      count: 1,
      span: (6..17).into(),
    }
  );
}

#[test]
fn snippet_multi_line() {
  struct Case {
    src: &'static str,
    src_span: std::ops::Range<usize>,
    snippet: Snippet<'static>,
  }

  let tests = vec![
    Case {
      src: "lorem ipsum\ndolor sit amet\nconsectetur adipiscing elit",
      src_span: 6..17,
      snippet: Snippet {
        s: "lorem ipsum\ndolor sit amet".into(),
        line: 1,
        count: 2,
        span: (6..17).into(),
      },
    },
    Case {
      src: "lorem ipsum\ndolor sit amet\nconsectetur adipiscing elit",
      src_span: 17..31,
      snippet: Snippet {
        s: "dolor sit amet\nconsectetur adipiscing elit".into(),
        line: 2,
        count: 2,
        span: (5..19).into(),
      },
    },
    Case {
      src: "\n\\n",
      src_span: 1..3,
      snippet: Snippet {
        s: "\\n".into(),
        line: 2,
        count: 1,
        span: (0..2).into(),
      },
    },
    Case {
      src: "d(                 ",
      src_span: 19..19,
      snippet: Snippet {
        s: "d(".into(),
        line: 1,
        count: 1,
        span: (2..2).into(),
      },
    },
    Case {
      src: "\u{9389a}\"\n",
      src_span: 4..6,
      snippet: Snippet {
        s: "\u{9389a}\"".into(),
        line: 1,
        count: 1,
        span: (4..5).into(),
      },
    },
    Case {
      src: "x ",
      src_span: 0..2,
      snippet: Snippet {
        s: "x".into(),
        line: 1,
        count: 1,
        span: (0..1).into(),
      },
    },
    Case {
      src: "З  ",
      src_span: 0..2,
      snippet: Snippet {
        s: "З".into(),
        line: 1,
        count: 1,
        span: (0..2).into(),
      },
    },
    Case {
      src: "\"\n\\",
      src_span: 0..2,
      snippet: Snippet {
        s: "\"\n\\".into(),
        line: 1,
        count: 2,
        span: (0..1).into(),
      },
    },
  ];

  for (i, case) in tests.iter().enumerate() {
    let snippet = Snippet::new(case.src, case.src_span.clone());
    assert_eq!(snippet, case.snippet, "[Test #{i}] Snippets mismatch");
    assert_eq!(
      case.src[case.src_span.start..case.src_span.end]
        .trim_end_matches('\n')
        .trim_end_matches(' '),
      snippet.highlight(),
      "[Test #{i}] Highlighted slices mismatch"
    );
  }
}

#[test]
fn emit_report_single_line() {
  let report = Report {
    level: Level::Error,
    source: Source::file("test.cv", "let x = 10\nlet y = 20;"),
    message: "expected semicolon".into(),
    span: (10..11).into(),
    label: None,
    color: false,
  };
  let out = report.emit_to_string().unwrap();
  assert!(out.starts_with("error: expected semicolon\n"));
  assert!(out.contains("> test.cv:1"));
  assert!(out.contains('\n'));
}

#[test]
fn emit_report_multi_line_includes_label() {
  let report = Report {
    level: Level::Error,
    source: Source::file("test.cv", "let x: Foo = Bar {\n  a: 0,\n  b: 0,\n};"),
    message: "mismatched type".into(),
    span: (13..36).into(),
    label: Some("expected `Foo`, found `Bar`".into()),
    color: false,
  };
  let out = report.emit_to_string().unwrap();
  assert!(out.contains("mismatched type"));
  assert!(out.contains("+ expected `Foo`, found `Bar`"));
}

#[test]
fn emit_report_multi_line_large_truncates() {
  let report = Report {
    level: Level::Error,
    source: Source::file(
      "test.cv",
      "let x: Foo = Bar {\n  a: 0,\n  b: 0,\n  c: 0,\n  d: 0,\n  e: 0,\n  f: 0,\n  g: 0,\n};",
    ),
    message: "mismatched type".into(),
    span: (13..76).into(),
    label: Some("expected `Foo`, found `Bar`".into()),
    color: false,
  };
  let out = report.emit_to_string().unwrap();
  assert!(out.contains("..."));
}

#[test]
fn emit_report_out_of_bounds_span_errors() {
  let report = Report {
    level: Level::Error,
    source: Source::file("test.cv", "x"),
    message: "oops".into(),
    span: (0..100).into(),
    label: None,
    color: false,
  };
  assert!(report.emit_to_string().is_err());
}

#[test]
fn compile_error_line_with_token() {
  assert_eq!(
    compile_error_line(3, Some("}"), "Expect expression."),
    "[line 3] Error at '}': Expect expression."
  );
}

#[test]
fn compile_error_line_at_end() {
  assert_eq!(
    compile_error_line(9, None, "Expect ')' after arguments."),
    "[line 9] Error at end: Expect ')' after arguments."
  );
}

#[test]
fn stack_trace_youngest_frame_first() {
  let frames = [
    StackFrame { line: 4, name: "inner" },
    StackFrame { line: 7, name: "outer" },
    StackFrame { line: 11, name: "" },
  ];
  let trace = stack_trace("Undefined variable 'a'.", &frames);
  assert_eq!(
    trace,
    "Undefined variable 'a'.\n[line 4] in inner\n[line 7] in outer\n[line 11] in script"
  );
}
