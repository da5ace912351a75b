// Line tokenizer
//
// Tokens are whitespace-delimited and case-sensitive. No normalization is
// applied: "Madrid", "madrid" and "#Madrid" are three different tokens.

/// Split a line into tokens on runs of whitespace.
///
/// Lazy and allocation-free; empty or blank lines yield nothing.
pub fn tokenize(line: &str) -> impl Iterator<Item = &str> {
    line.split_whitespace()
}
