//! Utility functions for common operations.

/// Parses CSV text into records of fields.
///
/// Handles the quoting rules the dump export actually uses: fields wrapped
/// in double quotes may contain commas, newlines, and doubled quotes
/// (`""` for a literal `"`). The JSON-array columns depend on all three.
///
/// # Arguments
/// * `text` - The raw CSV text
///
/// # Returns
/// A vector of records, each a vector of field strings. Empty trailing
/// lines are skipped.
pub fn parse_csv(text: &str) -> Vec<Vec<String>> {
    let mut records: Vec<Vec<String>> = Vec::new();
    let mut record: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;

    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        // Doubled quote inside a quoted field
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => field.push(c),
            }
        } else {
            match c {
                '"' => in_quotes = true,
                ',' => {
                    record.push(std::mem::take(&mut field));
                }
                '\r' => {
                    // CRLF line endings; the LF branch closes the record
                }
                '\n' => {
                    record.push(std::mem::take(&mut field));
                    records.push(std::mem::take(&mut record));
                }
                _ => field.push(c),
            }
        }
    }

    // Final record without a trailing newline
    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }

    // Drop records that are entirely empty (blank lines)
    records.retain(|r| !(r.len() == 1 && r[0].is_empty()));

    records
}

/// Compares two optional titles, treating `None` and `""` as equal.
///
/// This equivalence applies only to titles; other string fields
/// distinguish a missing value from an empty one.
pub fn titles_equal(a: Option<&str>, b: Option<&str>) -> bool {
    a.unwrap_or("") == b.unwrap_or("")
}

/// Normalizes an optional title so that an empty string becomes `None`.
///
/// Staged title changes are always stored in this form.
pub fn normalize_title(title: Option<String>) -> Option<String> {
    title.filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_text() {
        assert!(parse_csv("").is_empty());
    }

    #[test]
    fn test_parse_simple_records() {
        let records = parse_csv("a,b,c\nd,e,f\n");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], vec!["a", "b", "c"]);
        assert_eq!(records[1], vec!["d", "e", "f"]);
    }

    #[test]
    fn test_parse_quoted_commas() {
        let records = parse_csv(r#"1,"[""Foo Scans"",""Bar""]",en"#);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0][1], r#"["Foo Scans","Bar"]"#);
        assert_eq!(records[0][2], "en");
    }

    #[test]
    fn test_parse_doubled_quotes() {
        let records = parse_csv(r#""say ""hi""",x"#);
        assert_eq!(records[0][0], r#"say "hi""#);
    }

    #[test]
    fn test_parse_newline_inside_quotes() {
        let records = parse_csv("\"line one\nline two\",x\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0][0], "line one\nline two");
    }

    #[test]
    fn test_parse_crlf_endings() {
        let records = parse_csv("a,b\r\nc,d\r\n");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], vec!["a", "b"]);
        assert_eq!(records[1], vec!["c", "d"]);
    }

    #[test]
    fn test_parse_empty_fields() {
        let records = parse_csv("a,,c\n");
        assert_eq!(records[0], vec!["a", "", "c"]);
    }

    #[test]
    fn test_parse_no_trailing_newline() {
        let records = parse_csv("a,b");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0], vec!["a", "b"]);
    }

    #[test]
    fn test_titles_equal_null_empty() {
        assert!(titles_equal(None, Some("")));
        assert!(titles_equal(Some(""), None));
        assert!(titles_equal(None, None));
        assert!(titles_equal(Some("x"), Some("x")));
        assert!(!titles_equal(Some("x"), None));
        assert!(!titles_equal(Some("x"), Some("y")));
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title(Some(String::new())), None);
        assert_eq!(normalize_title(None), None);
        assert_eq!(
            normalize_title(Some("Hello".to_string())),
            Some("Hello".to_string())
        );
    }
}
