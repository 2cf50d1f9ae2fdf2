/// Sanitizes a user-provided search string into an FTS5 MATCH expression that is
/// always a single literal token with a trailing prefix wildcard (spec.md §9):
/// embedded quotes are doubled and the whole value is wrapped in quotes.
pub fn sanitize_fts_query(raw: &str) -> String {
    let escaped = raw.replace('"', "\"\"");
    format!("\"{escaped}\"*")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_plain_query_with_trailing_wildcard() {
        assert_eq!(sanitize_fts_query("report"), "\"report\"*");
    }

    #[test]
    fn doubles_embedded_quotes() {
        assert_eq!(sanitize_fts_query("a\"b"), "\"a\"\"b\"*");
    }

    #[test]
    fn empty_query_still_single_literal_token() {
        assert_eq!(sanitize_fts_query(""), "\"\"*");
    }
}
