use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{WardenError, WardenResult};

/// Default number of compiled patterns kept by a [`PatternCompiler`].
const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// A phrase compiled down to an anchored regular expression.
///
/// Produced by [`PatternCompiler::compile`]; the source pattern text is kept
/// alongside the compiled regex so callers can inspect what was built.
#[derive(Debug)]
pub struct CompiledPattern {
    pattern: String,
    regex: Regex,
}

impl CompiledPattern {
    /// The anchored regex source this phrase compiled to.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

type CacheKey = (String, char, char);

struct PatternCache {
    entries: HashMap<CacheKey, (Arc<CompiledPattern>, u64)>,
    tick: u64,
}

/// Compiles delimiter-annotated phrases into cached regular expressions.
///
/// A phrase like `foo:bar:<.*>` is split into literal text (regex-escaped)
/// and delimited regions (inserted verbatim as capture groups), then
/// anchored. The same phrases are compiled over and over across inquiries,
/// so results are memoized in a bounded least-recently-used cache keyed by
/// `(phrase, start_delimiter, end_delimiter)`. The cache tolerates a racing
/// double compile; it never returns a pattern for a different key.
pub struct PatternCompiler {
    capacity: usize,
    cache: Mutex<PatternCache>,
}

impl PatternCompiler {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            cache: Mutex::new(PatternCache {
                entries: HashMap::new(),
                tick: 0,
            }),
        }
    }

    /// Compile `phrase` with the given delimiters, serving from cache when
    /// the same triple was compiled before.
    ///
    /// Unbalanced delimiters fail with [`WardenError::UnbalancedBraces`]
    /// naming the phrase; a delimited region that is not valid regex syntax
    /// fails with [`WardenError::InvalidRegex`].
    pub fn compile(
        &self,
        phrase: &str,
        start: char,
        end: char,
    ) -> WardenResult<Arc<CompiledPattern>> {
        let key = (phrase.to_string(), start, end);

        if let Ok(mut cache) = self.cache.lock() {
            cache.tick += 1;
            let tick = cache.tick;
            if let Some((compiled, stamp)) = cache.entries.get_mut(&key) {
                *stamp = tick;
                return Ok(Arc::clone(compiled));
            }
        }

        // Compile outside the lock; a concurrent duplicate compile is fine.
        let source = build_pattern(phrase, start, end)?;
        let regex =
            Regex::new(&source).map_err(|e| WardenError::InvalidRegex(e.to_string()))?;
        let compiled = Arc::new(CompiledPattern {
            pattern: source,
            regex,
        });

        if let Ok(mut cache) = self.cache.lock() {
            cache.tick += 1;
            let tick = cache.tick;
            if cache.entries.len() >= self.capacity && !cache.entries.contains_key(&key) {
                let oldest = cache
                    .entries
                    .iter()
                    .min_by_key(|(_, (_, stamp))| *stamp)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    cache.entries.remove(&oldest);
                }
            }
            cache.entries.insert(key, (Arc::clone(&compiled), tick));
        }

        Ok(compiled)
    }

    /// Number of cached patterns (for testing/inspection).
    pub fn cached(&self) -> usize {
        self.cache.lock().map(|c| c.entries.len()).unwrap_or(0)
    }
}

impl Default for PatternCompiler {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

/// Scan `phrase` and assemble the anchored regex source.
///
/// A single nesting counter is shared by both delimiters, even when they
/// are the same character (in which case occurrences alternate open/close).
/// A 0→1 transition records a region start, 1→0 records one past the
/// closing delimiter. Only top-level regions are captured; anything between
/// an outer pair, inner delimiters included, is kept verbatim.
fn build_pattern(phrase: &str, start: char, end: char) -> WardenResult<String> {
    let mut regions: Vec<(usize, usize)> = Vec::new();
    let mut depth: usize = 0;
    let mut region_start = 0usize;

    for (i, ch) in phrase.char_indices() {
        if ch == start && (start != end || depth == 0) {
            if depth == 0 {
                region_start = i;
            }
            depth += 1;
        } else if ch == end {
            if depth == 0 {
                return Err(WardenError::UnbalancedBraces(phrase.to_string()));
            }
            depth -= 1;
            if depth == 0 {
                regions.push((region_start, i + ch.len_utf8()));
            }
        }
    }
    if depth != 0 {
        return Err(WardenError::UnbalancedBraces(phrase.to_string()));
    }

    let mut out = String::with_capacity(phrase.len() + 8);
    out.push('^');
    let mut last = 0usize;
    for (region_begin, region_end) in regions {
        escape_literal_into(&phrase[last..region_begin], &mut out);
        out.push('(');
        out.push_str(&phrase[region_begin + start.len_utf8()..region_end - end.len_utf8()]);
        out.push(')');
        last = region_end;
    }
    escape_literal_into(&phrase[last..], &mut out);
    out.push('$');
    Ok(out)
}

/// Escape literal phrase text so it matches itself.
///
/// Every ASCII punctuation character is backslash-escaped, not just regex
/// metacharacters; the pattern text stays byte-for-byte stable across regex
/// syntax revisions that way.
fn escape_literal_into(text: &str, out: &mut String) {
    for ch in text.chars() {
        if ch.is_ascii_punctuation() {
            out.push('\\');
        }
        out.push(ch);
    }
}
