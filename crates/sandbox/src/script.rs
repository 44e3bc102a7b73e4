//! Wrapping model-authored code into a runnable Node.js command.
//!
//! The code may be an async arrow function, a bare expression, or a `{ ... }` block. The wrapper
//! evaluates it, calls it if it is a function, awaits the result, and writes the result as pretty
//! JSON to stdout (nothing when it is `undefined`). A thrown error goes to stderr and the process
//! exits with status 1.
//!
//! The wrapped script travels base64-encoded inside a `node -e` argument, so user code never needs
//! shell quoting.

use base64::Engine as _;

/// Strip surrounding whitespace and trailing semicolons.
#[must_use]
pub fn normalize_code(code: &str) -> &str {
    code.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}

/// Turn the caller's code into a JavaScript expression.
///
/// A leading `{` is read as a function body, so `{ return 1 }` works. An object literal has to be
/// parenthesized, as in any arrow function.
#[must_use]
pub fn as_expression(code: &str) -> String {
    let code = normalize_code(code);
    if code.starts_with('{') {
        format!("async () => {code}")
    } else {
        // Newlines keep a trailing line comment from swallowing the closing paren.
        format!("(\n{code}\n)")
    }
}

/// Full Node.js program for `code`.
#[must_use]
pub fn wrap_script(code: &str) -> String {
    [
        format!("const __codeMode = {};", as_expression(code)),
        "(async () => {".to_string(),
        "  try {".to_string(),
        "    const result = await (typeof __codeMode === 'function' ? __codeMode() : __codeMode);"
            .to_string(),
        "    if (result !== undefined) process.stdout.write(JSON.stringify(result, null, 2));"
            .to_string(),
        "  } catch (e) {".to_string(),
        "    process.stderr.write((e && e.stack) || String(e));".to_string(),
        "    process.exit(1);".to_string(),
        "  }".to_string(),
        "})();".to_string(),
    ]
    .join("\n")
}

/// Shell command that runs `script` with `node_bin`.
#[must_use]
pub fn node_command(node_bin: &str, script: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(script);
    format!(
        "{} -e \"eval(Buffer.from('{encoded}','base64').toString())\"",
        shell_word(node_bin)
    )
}

/// Quote `word` for `sh` unless it is plainly safe.
fn shell_word(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_./:@+=".contains(&b));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
