//! Line trimming, comment stripping, and word splitting shared by the
//! assembler's two passes.

/// Trims leading/trailing whitespace, truncates at the first `;`, and
/// replaces every `,` with a space so operand lists and `offset(reg)` forms
/// tokenize the same whether or not the source used commas.
pub fn format_line(line: &str) -> String {
    let without_comment = match line.find(';') {
        Some(idx) => &line[..idx],
        None => line,
    };
    without_comment.trim().replace(',', " ")
}

/// Splits on runs of whitespace, dropping empty tokens.
pub fn split_words(s: &str) -> Vec<String> {
    s.split_whitespace().map(|w| w.to_string()).collect()
}
