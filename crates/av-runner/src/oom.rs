//! Out-of-memory detection from a child's stderr.
//!
//! Matching is broad on purpose. A false positive only mislabels a trial that
//! already failed; a missed OOM still fails the trial through its exit code.

use once_cell::sync::Lazy;
use regex::Regex;

/// Vendor phrasings plus a generic fallback.
pub const OOM_PATTERNS: &[&str] = &[
    r"CUDA out of memory",
    r"CUBLAS_STATUS_ALLOC_FAILED",
    r"cuBLAS.*alloc",
    r"out of memory",
    r"hipErrorOutOfMemory",
    r"MPS.*out of memory",
];

static OOM_RE: Lazy<Regex> = Lazy::new(|| {
    let alternation = OOM_PATTERNS
        .iter()
        .map(|p| format!("(?:{p})"))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?i){alternation}")).expect("OOM patterns are valid regexes")
});

pub fn looks_like_oom(stderr: &str) -> bool {
    OOM_RE.is_match(stderr)
}
