use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// How two stored values of a field are compared when deciding whether an
/// edit mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldKind {
    /// Plain JSON equality.
    #[default]
    Scalar,
    /// Strings; `null` and the empty string are the same value.
    Text,
    /// Numbers, compared numerically (`1` equals `1.0`).
    Number,
    /// Calendar date; any time component is ignored.
    Date,
    /// Instant, compared to the second.
    DateTime,
    /// Array whose order carries no meaning.
    UnorderedList,
}

impl FieldKind {
    /// `None` stands for a field missing from the stored document and is
    /// treated as `null`.
    pub fn same(&self, current: Option<&Value>, proposed: Option<&Value>) -> bool {
        let current = current.unwrap_or(&Value::Null);
        let proposed = proposed.unwrap_or(&Value::Null);
        match self {
            FieldKind::Scalar => current == proposed,
            FieldKind::Text => {
                (is_empty_text(current) && is_empty_text(proposed)) || current == proposed
            }
            FieldKind::Number => match (current, proposed) {
                (Value::Number(a), Value::Number(b)) => same_number(a, b),
                _ => current == proposed,
            },
            FieldKind::Date => match (parse_date(current), parse_date(proposed)) {
                (Some(a), Some(b)) => a == b,
                _ => current == proposed,
            },
            FieldKind::DateTime => match (parse_instant(current), parse_instant(proposed)) {
                (Some(a), Some(b)) => a.timestamp() == b.timestamp(),
                _ => current == proposed,
            },
            FieldKind::UnorderedList => match (current, proposed) {
                (Value::Array(a), Value::Array(b)) => sorted_items(a) == sorted_items(b),
                _ => (is_empty_list(current) && is_empty_list(proposed)) || current == proposed,
            },
        }
    }
}

/// True when a value counts as "not provided" for required-field checks.
pub fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

/// Integers compare exactly; anything with a fractional part within a
/// relative tolerance.
fn same_number(a: &serde_json::Number, b: &serde_json::Number) -> bool {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
        return a == b;
    }
    if !a.is_f64() && !b.is_f64() {
        // A negative integer against one beyond `i64::MAX`.
        return false;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => (a - b).abs() <= f64::EPSILON * a.abs().max(b.abs()).max(1.0),
        _ => false,
    }
}

fn is_empty_text(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn parse_instant(value: &Value) -> Option<DateTime<Utc>> {
    let raw = value.as_str()?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_date(value: &Value) -> Option<NaiveDate> {
    let raw = value.as_str()?;
    if let Some(instant) = parse_instant(value) {
        return Some(instant.date_naive());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

fn sorted_items(items: &[Value]) -> Vec<String> {
    let mut keys: Vec<String> = items.iter().map(Value::to_string).collect();
    keys.sort();
    keys
}

fn is_empty_list(value: &Value) -> bool {
    matches!(value, Value::Null) || matches!(value, Value::Array(items) if items.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_treats_null_and_empty_as_equal() {
        let kind = FieldKind::Text;
        assert!(kind.same(Some(&json!("")), Some(&Value::Null)));
        assert!(kind.same(None, Some(&json!(""))));
        assert!(kind.same(Some(&json!("Acme")), Some(&json!("Acme"))));
        assert!(!kind.same(Some(&json!("Acme")), Some(&json!("Acme2"))));
        assert!(!kind.same(Some(&json!("Acme")), Some(&Value::Null)));
    }

    #[test]
    fn numbers_compare_numerically() {
        let kind = FieldKind::Number;
        assert!(kind.same(Some(&json!(1)), Some(&json!(1.0))));
        assert!(!kind.same(Some(&json!(1.5)), Some(&json!(1.25))));
        assert!(!kind.same(Some(&json!(1)), None));
    }

    #[test]
    fn large_integers_compare_exactly() {
        let kind = FieldKind::Number;
        assert!(!kind.same(
            Some(&json!(9_007_199_254_740_993_i64)),
            Some(&json!(9_007_199_254_740_992_i64))
        ));
        assert!(!kind.same(Some(&json!(u64::MAX)), Some(&json!(u64::MAX - 1))));
        assert!(!kind.same(Some(&json!(-1)), Some(&json!(u64::MAX))));
        assert!(kind.same(Some(&json!(u64::MAX)), Some(&json!(u64::MAX))));
    }

    #[test]
    fn fractions_compare_with_relative_tolerance() {
        let kind = FieldKind::Number;
        assert!(kind.same(Some(&json!(0.1 + 0.2)), Some(&json!(0.3))));
        assert!(kind.same(Some(&json!(1.0e20)), Some(&json!(1.0e20 + 1.0))));
        assert!(!kind.same(Some(&json!(1.0e-3)), Some(&json!(1.1e-3))));
        assert!(!kind.same(Some(&json!(12.5)), Some(&json!(12.500_1))));
    }

    #[test]
    fn dates_ignore_time_of_day() {
        let kind = FieldKind::Date;
        assert!(kind.same(
            Some(&json!("2024-03-01T08:30:00Z")),
            Some(&json!("2024-03-01"))
        ));
        assert!(!kind.same(Some(&json!("2024-03-01")), Some(&json!("2024-03-02"))));
    }

    #[test]
    fn datetimes_ignore_sub_second_precision() {
        let kind = FieldKind::DateTime;
        assert!(kind.same(
            Some(&json!("2024-03-01T08:30:00.123Z")),
            Some(&json!("2024-03-01T09:30:00+01:00"))
        ));
        assert!(!kind.same(
            Some(&json!("2024-03-01T08:30:00Z")),
            Some(&json!("2024-03-01T08:30:01Z"))
        ));
    }

    #[test]
    fn unordered_lists_ignore_order() {
        let kind = FieldKind::UnorderedList;
        assert!(kind.same(Some(&json!(["b", "a"])), Some(&json!(["a", "b"]))));
        assert!(kind.same(None, Some(&json!([]))));
        assert!(!kind.same(Some(&json!(["a", "a"])), Some(&json!(["a"]))));
        assert!(!FieldKind::Scalar.same(Some(&json!(["b", "a"])), Some(&json!(["a", "b"]))));
    }

    #[test]
    fn blank_detection() {
        assert!(is_blank(None));
        assert!(is_blank(Some(&json!("  "))));
        assert!(is_blank(Some(&json!([]))));
        assert!(!is_blank(Some(&json!(0))));
        assert!(!is_blank(Some(&json!(false))));
    }
}
