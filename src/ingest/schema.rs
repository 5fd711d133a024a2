//! Column type inference and failure flag parsing.

use crate::types::ColumnType;

fn is_bool_literal(s: &str) -> bool {
    matches!(s, "true" | "false" | "True" | "False" | "TRUE" | "FALSE")
}

/// Classify one cell. `None` for blank (null) cells.
fn cell_type(s: &str) -> Option<ColumnType> {
    if s.is_empty() {
        return None;
    }
    if s.parse::<i64>().is_ok() {
        return Some(ColumnType::Integer);
    }
    if s.parse::<f64>().is_ok() {
        return Some(ColumnType::Float);
    }
    if is_bool_literal(s) {
        return Some(ColumnType::Boolean);
    }
    Some(ColumnType::Text)
}

/// Infer a column's type from all its values.
///
/// Integer cells widen to Float when mixed. Any other mix is Text. A column
/// with only blank cells has no type and returns `None`.
pub fn infer_column_type<'a>(values: impl IntoIterator<Item = &'a str>) -> Option<ColumnType> {
    let mut has_int = false;
    let mut has_float = false;
    let mut has_bool = false;
    let mut has_text = false;

    for v in values {
        match cell_type(v) {
            Some(ColumnType::Integer) => has_int = true,
            Some(ColumnType::Float) => has_float = true,
            Some(ColumnType::Boolean) => has_bool = true,
            Some(ColumnType::Text) => has_text = true,
            None => {}
        }
    }

    let numeric = has_int || has_float;
    if has_text || (has_bool && numeric) {
        return Some(ColumnType::Text);
    }
    if has_float {
        return Some(ColumnType::Float);
    }
    if has_int {
        return Some(ColumnType::Integer);
    }
    if has_bool {
        return Some(ColumnType::Boolean);
    }
    None
}

/// Parse a failure indicator into 0/1.
pub fn parse_failure_flag(s: &str) -> Option<u8> {
    match s {
        "true" | "True" | "TRUE" | "1" => Some(1),
        "false" | "False" | "FALSE" | "0" => Some(0),
        _ => None,
    }
}

/// Parse a numeric sensor cell; blank is NaN.
pub fn parse_sensor(s: &str) -> Option<f64> {
    if s.is_empty() {
        Some(f64::NAN)
    } else {
        s.parse::<f64>().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_column() {
        assert_eq!(infer_column_type(["1", "2", ""]), Some(ColumnType::Integer));
    }

    #[test]
    fn fractional_value_makes_float() {
        assert_eq!(infer_column_type(["1", "2.5"]), Some(ColumnType::Float));
        assert_eq!(infer_column_type(["3e2"]), Some(ColumnType::Float));
    }

    #[test]
    fn boolean_and_text() {
        assert_eq!(infer_column_type(["True", "False"]), Some(ColumnType::Boolean));
        assert_eq!(infer_column_type(["True", "1"]), Some(ColumnType::Text));
        assert_eq!(infer_column_type(["A", "1.0"]), Some(ColumnType::Text));
    }

    #[test]
    fn blank_column_has_no_type() {
        assert_eq!(infer_column_type(["", ""]), None);
    }

    #[test]
    fn failure_flags() {
        assert_eq!(parse_failure_flag("True"), Some(1));
        assert_eq!(parse_failure_flag("0"), Some(0));
        assert_eq!(parse_failure_flag("yes"), None);
        assert_eq!(parse_failure_flag(""), None);
    }

    #[test]
    fn sensor_blank_is_nan() {
        assert!(parse_sensor("").is_some_and(f64::is_nan));
        assert_eq!(parse_sensor("4.25"), Some(4.25));
        assert_eq!(parse_sensor("abc"), None);
    }
}
