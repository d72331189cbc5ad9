//! A small CSON writer, enough for grammar files.
//!
//! Only emits the subset Atom-style grammars use: single-quoted strings and keys,
//! brace-less top-level and nested objects, two-space indentation.

use std::fmt::Write;

use serde_json::{Map, Value};

const INDENT: &str = "  ";

/// Serializes a JSON value, which must be an object at the top level, as CSON
pub fn to_cson(value: &Value) -> String {
    let mut out = String::new();
    match value {
        Value::Object(map) => write_object_body(&mut out, map, 0),
        other => {
            write_scalar_or_nested(&mut out, other, 0);
            out.push('\n');
        }
    }
    out
}

fn push_indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('\'');
}

/// Keys of an object, no braces: the indentation is the structure
fn write_object_body(out: &mut String, map: &Map<String, Value>, depth: usize) {
    for (key, value) in map {
        push_indent(out, depth);
        write_string(out, key);
        out.push(':');
        match value {
            Value::Object(inner) if inner.is_empty() => out.push_str(" {}\n"),
            Value::Object(inner) => {
                out.push('\n');
                write_object_body(out, inner, depth + 1);
            }
            Value::Array(items) if items.is_empty() => out.push_str(" []\n"),
            Value::Array(items) => {
                out.push_str(" [\n");
                write_array_items(out, items, depth + 1);
                push_indent(out, depth);
                out.push_str("]\n");
            }
            scalar => {
                out.push(' ');
                write_scalar_or_nested(out, scalar, depth);
                out.push('\n');
            }
        }
    }
}

fn write_array_items(out: &mut String, items: &[Value], depth: usize) {
    for item in items {
        push_indent(out, depth);
        write_scalar_or_nested(out, item, depth);
        out.push('\n');
    }
}

/// Objects and arrays nested in arrays need their delimiters
fn write_scalar_or_nested(out: &mut String, value: &Value, depth: usize) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(out, s),
        Value::Array(items) if items.is_empty() => out.push_str("[]"),
        Value::Array(items) => {
            out.push_str("[\n");
            write_array_items(out, items, depth + 1);
            push_indent(out, depth);
            out.push(']');
        }
        Value::Object(map) if map.is_empty() => out.push_str("{}"),
        Value::Object(map) => {
            out.push_str("{\n");
            write_object_body(out, map, depth + 1);
            push_indent(out, depth);
            out.push('}');
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn escapes_strings() {
        let mut out = String::new();
        write_string(&mut out, r"it's \d+");
        insta::assert_snapshot!(out, @r"'it\'s \\d+'");
    }

    #[test]
    fn writes_nested_grammar_structure() {
        let value = json!({
            "scopeName": "source.test",
            "patterns": [{"include": "#comment"}],
            "repository": {
                "comment": {
                    "match": "//.*$",
                    "captures": {"0": {"name": "comment.line"}}
                },
                "empty": {}
            },
            "fileTypes": []
        });
        let expected = "\
'scopeName': 'source.test'
'patterns': [
  {
    'include': '#comment'
  }
]
'repository':
  'comment':
    'match': '//.*$'
    'captures':
      '0':
        'name': 'comment.line'
  'empty': {}
'fileTypes': []
";
        assert_eq!(to_cson(&value), expected);
    }
}
