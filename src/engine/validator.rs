//! Code Validator (C1, §4.1): static checks on a generated `python_script`
//! step body before it is persisted. Validation is a pure function over
//! the source text — it never executes the script.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub message: String,
}

/// A script is valid if no fatal issue is found; `warnings` collects the
/// non-blocking findings regardless of outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub ok: bool,
    pub warnings: Vec<ValidationWarning>,
}

static NESTED_QUOTE_INTERP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"f"[^"\n]*\{[^}]*\[["'][^"'\]]*["']\][^"\n]*""#).unwrap());
static VARIABLES_FLAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"--variables(-file)?\b").unwrap());
static JSON_DUMPS: Lazy<Regex> = Lazy::new(|| Regex::new(r"json\.dumps\s*\(").unwrap());
static PRINT_STDOUT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bprint\s*\(").unwrap());
static TRY_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*try\s*:").unwrap());

/// Runs the five checks from §4.1 against `source`. Checks 1-2 are fatal
/// (block persistence, returned as `Err`); checks 3-5 are warnings
/// (returned as part of `Ok`).
pub fn validate_script(source: &str) -> Result<ValidationReport> {
    if let Some(issue) = check_balanced_syntax(source) {
        return Err(EngineError::Validation(issue));
    }
    if let Some(m) = NESTED_QUOTE_INTERP.find(source) {
        let line = source[..m.start()].matches('\n').count() + 1;
        return Err(EngineError::Validation(format!(
            "line {line}: f-string interpolation reuses the enclosing quote kind inside a subscript \
             (e.g. f\"{{obj[\\\"k\\\"]}}\"), which only fails at runtime"
        )));
    }

    let mut warnings = Vec::new();
    if !VARIABLES_FLAG.is_match(source) {
        warnings.push(ValidationWarning {
            message: "script does not appear to parse --variables or --variables-file".into(),
        });
    }
    if !JSON_DUMPS.is_match(source) && !PRINT_STDOUT.is_match(source) {
        warnings.push(ValidationWarning {
            message: "script does not appear to emit structured JSON on stdout".into(),
        });
    }
    if !TRY_BLOCK.is_match(source) {
        warnings.push(ValidationWarning {
            message: "no error-handling construct (try/except) guards the main body".into(),
        });
    }

    Ok(ValidationReport { ok: true, warnings })
}

/// Approximates "parse as a program" (§4.1 check 1) without embedding a
/// full Python parser: balanced brackets/quotes is the failure mode the
/// authoring agent actually produces, and is checkable without executing
/// anything.
fn check_balanced_syntax(source: &str) -> Option<String> {
    let mut stack = Vec::new();
    let mut in_string: Option<char> = None;
    let mut escape = false;
    for (i, ch) in source.char_indices() {
        if let Some(quote) = in_string {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == quote {
                in_string = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => in_string = Some(ch),
            '(' | '[' | '{' => stack.push((ch, i)),
            ')' | ']' | '}' => {
                let expected = match ch {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    _ => {
                        let line = source[..i].matches('\n').count() + 1;
                        return Some(format!("line {line}: unbalanced `{ch}`"));
                    }
                }
            }
            _ => {}
        }
    }
    if in_string.is_some() {
        return Some("unterminated string literal".into());
    }
    if let Some((open, pos)) = stack.pop() {
        let line = source[..pos].matches('\n').count() + 1;
        return Some(format!("line {line}: unclosed `{open}`"));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unbalanced_brackets() {
        let src = "def f(:\n    pass";
        assert!(validate_script(src).is_err());
    }

    #[test]
    fn rejects_nested_quote_interpolation_hazard() {
        let src = r#"x = f"value is {obj["k"]}""#;
        assert!(validate_script(src).is_err());
    }

    #[test]
    fn warns_on_missing_variables_flag_and_try_block() {
        let src = "import json\nprint(json.dumps({'a': 1}))";
        let report = validate_script(src).unwrap();
        assert!(report.ok);
        assert!(report.warnings.iter().any(|w| w.message.contains("--variables")));
        assert!(report.warnings.iter().any(|w| w.message.contains("try")));
    }

    #[test]
    fn well_formed_script_has_no_warnings() {
        let src = r#"
import argparse, json

def main():
    parser = argparse.ArgumentParser()
    parser.add_argument("--variables-file")
    args = parser.parse_args()
    try:
        print(json.dumps({"ok": True}))
    except Exception as e:
        print(json.dumps({"ok": False, "error": str(e)}))

main()
"#;
        let report = validate_script(src).unwrap();
        assert!(report.ok);
        assert!(report.warnings.is_empty());
    }
}
