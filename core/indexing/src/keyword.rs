/// Build an FTS5 MATCH expression from free text.
///
/// Every run of word characters becomes a double-quoted string and the terms
/// are OR-ed, so user punctuation can never produce an FTS5 syntax error and
/// bm25 ranks documents matching more terms higher. Returns `None` when the
/// text holds no word characters; callers treat that as "no keyword hits".
///
/// OR-ing widens the candidate set compared with passing raw text to
/// `MATCH`, which requires every term.
pub fn match_expression(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|term| !term.is_empty())
        .map(|term| format!("\"{}\"", term))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}
