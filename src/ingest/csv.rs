//! Delimited text reader.
//!
//! Line oriented: quoted fields may contain the delimiter and `""` escapes,
//! but not line breaks.

/// Split one line into fields, honouring double quotes.
pub fn split_line(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                if in_quotes {
                    // Escaped quote ("")
                    if chars.peek() == Some(&'"') {
                        current.push('"');
                        chars.next();
                    } else {
                        in_quotes = false;
                    }
                } else {
                    in_quotes = true;
                }
            }
            c if c == delimiter && !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

/// A parsed delimited document.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub header: Vec<String>,
    /// Data rows with their 1-based line numbers
    pub rows: Vec<(usize, Vec<String>)>,
}

/// Parse a whole document. Blank lines are skipped.
///
/// Returns `None` when there is no header line.
pub fn parse_document(text: &str, delimiter: char) -> Option<Document> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim_end_matches('\r')))
        .filter(|(_, l)| !l.trim().is_empty());

    let (_, header_line) = lines.next()?;
    let header = split_line(header_line.trim_start_matches('\u{feff}'), delimiter);
    let rows = lines.map(|(n, l)| (n, split_line(l, delimiter))).collect();
    Some(Document { header, rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_fields() {
        assert_eq!(split_line("a, b ,c", ','), vec!["a", "b", "c"]);
    }

    #[test]
    fn quoted_delimiter_and_escape() {
        assert_eq!(
            split_line(r#"1,"x,y","say ""hi""""#, ','),
            vec!["1", "x,y", r#"say "hi""#]
        );
    }

    #[test]
    fn trailing_empty_field() {
        assert_eq!(split_line("1,2,", ','), vec!["1", "2", ""]);
    }

    #[test]
    fn semicolon_delimiter() {
        assert_eq!(split_line("1.5;2", ';'), vec!["1.5", "2"]);
    }

    #[test]
    fn document_skips_blank_lines_and_bom() {
        let doc = parse_document("\u{feff}a,b\r\n\r\n1,2\n3,4\n", ',').unwrap();
        assert_eq!(doc.header, vec!["a", "b"]);
        assert_eq!(doc.rows.len(), 2);
        assert_eq!(doc.rows[0].0, 3);
        assert_eq!(doc.rows[1].1, vec!["3", "4"]);
    }

    #[test]
    fn empty_document_has_no_header() {
        assert!(parse_document("\n\n", ',').is_none());
    }
}
