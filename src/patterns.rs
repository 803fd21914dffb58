//! Target pattern parsing and matching.
//!
//! A targets file selects the callables to slow down, one pattern per line,
//! `#` comments allowed. Pattern format: `module_glob:qualified_name_glob`.
//!
//! ```text
//! # Match all methods of an attention class
//! transformers.modeling_llama:LlamaAttention.*
//!
//! # Match one specific method
//! vllm.worker.model_runner:ModelRunner.execute_model
//!
//! # Match everything in a module
//! mypackage.slow_module:*
//! ```
//!
//! Globs are case-sensitive and support `*` (any run of characters), `?`
//! (any single character), and `[...]` character classes. Each glob is
//! compiled once into an anchored regex; matching a call event is then two
//! regex probes with no allocation.

use regex::Regex;
use thiserror::Error;

/// Error in pattern syntax or targets-file format.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("line {line}: invalid pattern '{pattern}' - missing ':' separator (expected module_glob:name_glob)")]
    MissingSeparator { line: usize, pattern: String },

    #[error("line {line}: empty module pattern in '{pattern}'")]
    EmptyModule { line: usize, pattern: String },

    #[error("line {line}: empty name pattern in '{pattern}'")]
    EmptyName { line: usize, pattern: String },

    #[error("line {line}: glob '{glob}' failed to compile: {source}")]
    BadGlob {
        line: usize,
        glob: String,
        source: regex::Error,
    },

    #[error("failed to read targets file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// A compiled target pattern: a module-path glob and a qualified-name glob.
///
/// Both globs must match for the pattern to match. The original pattern
/// text is retained for reporting.
#[derive(Debug, Clone)]
pub struct TargetPattern {
    module: Regex,
    name: Regex,
    original: String,
}

impl TargetPattern {
    /// Check whether this pattern matches a callable's module path and
    /// qualified name. Case-sensitive on both sides.
    pub fn matches(&self, module_path: &str, qualified_name: &str) -> bool {
        self.module.is_match(module_path) && self.name.is_match(qualified_name)
    }

    /// The pattern line this was compiled from.
    pub fn original(&self) -> &str {
        &self.original
    }
}

/// Translate a glob into an anchored regex.
///
/// `*` → `.*`, `?` → `.`, `[...]` passes through as a character class
/// (leading `!` negates, as in fnmatch); everything else is escaped. An
/// unterminated `[` is treated as a literal bracket.
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push('^');

    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                // Scan for the closing bracket; ']' directly after '[' or
                // '[!' is a literal member of the class.
                let mut j = i + 1;
                if j < chars.len() && chars[j] == '!' {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ']' {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    out.push_str("\\[");
                } else {
                    out.push('[');
                    let mut k = i + 1;
                    if chars[k] == '!' {
                        out.push('^');
                        k += 1;
                    }
                    while k < j {
                        let c = chars[k];
                        // '\\', '^' and ']' would change the class's meaning.
                        if c == '\\' || c == '^' || c == ']' {
                            out.push('\\');
                        }
                        out.push(c);
                        k += 1;
                    }
                    out.push(']');
                    i = j;
                }
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }

    out.push('$');
    out
}

fn compile_glob(glob: &str, line: usize) -> Result<Regex, PatternError> {
    Regex::new(&glob_to_regex(glob)).map_err(|source| PatternError::BadGlob {
        line,
        glob: glob.to_string(),
        source,
    })
}

/// Parse a single pattern line (already stripped of surrounding whitespace).
pub fn parse_pattern(line: &str, line_number: usize) -> Result<TargetPattern, PatternError> {
    let Some((module_glob, name_glob)) = line.split_once(':') else {
        return Err(PatternError::MissingSeparator {
            line: line_number,
            pattern: line.to_string(),
        });
    };

    let module_glob = module_glob.trim();
    let name_glob = name_glob.trim();

    if module_glob.is_empty() {
        return Err(PatternError::EmptyModule {
            line: line_number,
            pattern: line.to_string(),
        });
    }
    if name_glob.is_empty() {
        return Err(PatternError::EmptyName {
            line: line_number,
            pattern: line.to_string(),
        });
    }

    Ok(TargetPattern {
        module: compile_glob(module_glob, line_number)?,
        name: compile_glob(name_glob, line_number)?,
        original: line.to_string(),
    })
}

/// Parse target patterns from file contents (one per line, `#` comments).
pub fn parse_targets(contents: &str) -> Result<Vec<TargetPattern>, PatternError> {
    let mut patterns = Vec::new();
    for (idx, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        patterns.push(parse_pattern(line, idx + 1)?);
    }
    Ok(patterns)
}

/// Load target patterns from a file.
pub fn load_targets(path: &std::path::Path) -> Result<Vec<TargetPattern>, PatternError> {
    let contents = std::fs::read_to_string(path).map_err(|source| PatternError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_targets(&contents)
}

/// Check whether any pattern matches the given callable. Order of the
/// pattern list does not affect the result; any match is sufficient.
pub fn matches_any(
    patterns: &[TargetPattern],
    module_path: &str,
    qualified_name: &str,
) -> bool {
    patterns
        .iter()
        .any(|p| p.matches(module_path, qualified_name))
}
