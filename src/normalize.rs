//! Response normalization: model reply text → typed field map.
//!
//! Two tiers share one entry point ([`normalize_response`]): a strict JSON
//! parse, then a line-oriented `Key: Value` fallback. The result is passed
//! through a recursive numeric coercion driven by a [`NumericFields`]
//! allow-list. Pure functions, no async.

use std::collections::HashSet;

use serde_json::{Number, Value};
use tracing::{debug, warn};

use crate::error::{ExtractError, Result};

/// Ordered field name → value mapping (insertion order is preserved).
pub type FieldMap = serde_json::Map<String, Value>;

const SEPARATOR: char = ':';

/// Set of field names whose values should be coerced to numbers.
///
/// Lookups ignore case, surrounding whitespace and a trailing colon, so
/// `"Net Pay:"` matches an entry `"NET PAY"`.
#[derive(Debug, Clone, Default)]
pub struct NumericFields {
    names: HashSet<String>,
}

impl NumericFields {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| normalize_field_name(n.as_ref()))
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, field: &str) -> bool {
        self.names.contains(&normalize_field_name(field))
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn normalize_field_name(name: &str) -> String {
    name.trim().trim_end_matches(SEPARATOR).trim().to_uppercase()
}

/// Parse a model reply and coerce allow-listed fields to numbers.
pub fn normalize_response(text: &str, numeric: &NumericFields) -> Result<FieldMap> {
    let fields = parse_response(text)?;
    Ok(coerce_fields(fields, numeric))
}

/// Parse a reply as a JSON object, falling back to `Key: Value` lines.
///
/// Markdown code fences around the payload are removed for the JSON
/// attempts. If the fenced body is not JSON, its outermost `{ ... }` span is
/// tried before giving up on the structured tier. The line parser always
/// sees the whole reply, so pairs outside a fence are kept.
pub fn parse_response(text: &str) -> Result<FieldMap> {
    let body = strip_code_fence(text);

    if let Some(fields) = parse_json_object(body) {
        debug!("Parsed response as JSON object ({} fields)", fields.len());
        return Ok(fields);
    }

    if let Some(fields) = outer_braces(body).and_then(parse_json_object) {
        debug!(
            "Parsed embedded JSON object from response ({} fields)",
            fields.len()
        );
        return Ok(fields);
    }

    warn!("Response is not valid JSON, falling back to line parser");
    parse_key_values(text)
}

fn parse_json_object(text: &str) -> Option<FieldMap> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        Ok(other) => {
            debug!("JSON response is not an object: {}", json_kind(&other));
            None
        }
        Err(_) => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn strip_code_fence(response: &str) -> &str {
    if response.contains("```json") {
        response
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .unwrap_or(response)
            .trim()
    } else if response.contains("```") {
        response.split("```").nth(1).unwrap_or(response).trim()
    } else {
        response.trim()
    }
}

fn outer_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Line-oriented fallback parser.
///
/// A line with a `:` starts a new pair (split at the first `:`). A line
/// without one continues the previous key's value, joined by a space.
/// A line whose key is empty (`: more`) continues with its right-hand side.
/// Blank lines, code-fence markers and text before the first key are
/// ignored. Assumes a single column of pairs; side-by-side layouts are not
/// untangled.
pub fn parse_key_values(text: &str) -> Result<FieldMap> {
    let mut fields = FieldMap::new();
    let mut current: Option<String> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("```") {
            continue;
        }

        let continuation = match line.split_once(SEPARATOR) {
            Some((raw_key, raw_value)) => {
                let key = clean_key(raw_key);
                if !key.is_empty() {
                    fields.insert(key.clone(), Value::String(clean_value(raw_value)));
                    current = Some(key);
                    continue;
                }
                raw_value
            }
            None => line,
        };

        match current.as_deref() {
            Some(key) => append_continuation(&mut fields, key, &clean_value(continuation)),
            None => debug!("Skipping line before first key: {:?}", line),
        }
    }

    if fields.is_empty() {
        return Err(ExtractError::Unparseable);
    }
    Ok(fields)
}

fn append_continuation(fields: &mut FieldMap, key: &str, content: &str) {
    if content.is_empty() {
        return;
    }
    if let Some(Value::String(existing)) = fields.get_mut(key) {
        if !existing.is_empty() {
            existing.push(' ');
        }
        existing.push_str(content);
    }
}

fn clean_key(raw: &str) -> String {
    let key = raw.trim();
    let key = key
        .strip_prefix("- ")
        .or_else(|| key.strip_prefix("* "))
        .unwrap_or(key);
    key.trim()
        .trim_start_matches('{')
        .trim()
        .trim_matches('*')
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string()
}

fn clean_value(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('*')
        .trim()
        .trim_end_matches('}')
        .trim()
        .trim_end_matches(',')
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string()
}

/// Best-effort string → number conversion.
///
/// Everything except ASCII digits and `.` is discarded before parsing, so
/// `"1,234.50 Day(s)"` becomes `1234.5` and `"1,200"` becomes `1200`.
/// Whole values narrow to integers. Signs are discarded along with other
/// symbols.
pub fn coerce_number(raw: &str) -> Option<Number> {
    let digits: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    let parsed: f64 = digits.parse().ok()?;
    if !parsed.is_finite() {
        return None;
    }

    if parsed.fract() == 0.0 && parsed.abs() < i64::MAX as f64 {
        Some(Number::from(parsed as i64))
    } else {
        Number::from_f64(parsed)
    }
}

/// Coerce a single value. Strings of numeric fields become numbers when
/// parseable; nested containers are walked with the allow-list.
pub fn coerce_value(value: Value, numeric: bool, fields: &NumericFields) -> Value {
    match value {
        Value::String(s) if numeric => match coerce_number(&s) {
            Some(n) => Value::Number(n),
            None => Value::String(s),
        },
        Value::Object(map) => Value::Object(coerce_fields(map, fields)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| coerce_value(item, numeric, fields))
                .collect(),
        ),
        other => other,
    }
}

/// Recursively coerce every allow-listed field in a map.
pub fn coerce_fields(map: FieldMap, fields: &NumericFields) -> FieldMap {
    map.into_iter()
        .map(|(key, value)| {
            let numeric = fields.contains(&key);
            (key, coerce_value(value, numeric, fields))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn payslip_fields() -> NumericFields {
        NumericFields::new(["BASIC PAY", "NET PAY", "PAID DAYS", "LOP DAYS"])
    }

    #[test]
    fn test_coerce_number_with_extraneous_characters() {
        assert_eq!(coerce_number("1,234.50 Day(s)"), Number::from_f64(1234.5));
        assert_eq!(coerce_number("INR 1,200"), Some(Number::from(1200)));
    }

    #[test]
    fn test_coerce_number_narrows_whole_values() {
        let n = coerce_number("1,200").unwrap();
        assert!(n.is_i64());
        assert_eq!(n.as_i64(), Some(1200));

        let n = coerce_number("30.00").unwrap();
        assert_eq!(n.as_i64(), Some(30));
    }

    #[test]
    fn test_coerce_number_failures() {
        assert_eq!(coerce_number("N/A"), None);
        assert_eq!(coerce_number(""), None);
        assert_eq!(coerce_number("1.2.3"), None);
    }

    #[test]
    fn test_every_allow_listed_field_is_coerced() {
        let fields = payslip_fields();
        for name in ["BASIC PAY", "NET PAY", "PAID DAYS", "LOP DAYS"] {
            assert_eq!(
                coerce_value(json!("1,234.50 Day(s)"), fields.contains(name), &fields),
                json!(1234.5)
            );
            assert_eq!(
                coerce_value(json!("1,200"), fields.contains(name), &fields),
                json!(1200)
            );
        }
    }

    #[test]
    fn test_non_numeric_fields_untouched() {
        let map = parse_key_values("NAME: John Doe\nEMPLOYEE ID: 00123\nNET PAY: 45,000").unwrap();
        let coerced = coerce_fields(map, &payslip_fields());

        assert_eq!(
            Value::Object(coerced),
            json!({"NAME": "John Doe", "EMPLOYEE ID": "00123", "NET PAY": 45000})
        );
    }

    #[test]
    fn test_unparseable_numeric_value_left_as_string() {
        let map = parse_key_values("NET PAY: withheld").unwrap();
        let coerced = coerce_fields(map, &payslip_fields());
        assert_eq!(coerced.get("NET PAY"), Some(&json!("withheld")));
    }

    #[test]
    fn test_allow_list_lookup_is_case_insensitive() {
        let fields = payslip_fields();
        assert!(fields.contains("Net Pay"));
        assert!(fields.contains("  net pay: "));
        assert!(!fields.contains("NAME"));
    }

    #[test]
    fn test_coercion_recurses_into_nested_structures() {
        let map = parse_response(
            r#"{"employee": {"NAME": "A", "PAID DAYS": "30"}, "NET PAY": ["1,000", "2,500.75"]}"#,
        )
        .unwrap();
        let coerced = coerce_fields(map, &payslip_fields());

        assert_eq!(
            Value::Object(coerced),
            json!({
                "employee": {"NAME": "A", "PAID DAYS": 30},
                "NET PAY": [1000, 2500.75]
            })
        );
    }

    #[test]
    fn test_single_line_pair() {
        let map = parse_key_values("NAME: John Doe").unwrap();
        assert_eq!(Value::Object(map), json!({"NAME": "John Doe"}));
    }

    #[test]
    fn test_continuation_lines_are_space_joined() {
        let text = "ADDRESS: 12 Main Street\nSpringfield\nNAME: Jane";
        let map = parse_key_values(text).unwrap();
        assert_eq!(
            Value::Object(map),
            json!({"ADDRESS": "12 Main Street Springfield", "NAME": "Jane"})
        );
    }

    #[test]
    fn test_quotes_and_trailing_commas_stripped() {
        let map = parse_key_values("\"BANK\": \"First National\",\n'IFSC': 'FNB0001'").unwrap();
        assert_eq!(
            Value::Object(map),
            json!({"BANK": "First National", "IFSC": "FNB0001"})
        );
    }

    #[test]
    fn test_markdown_decorations_stripped() {
        let map = parse_key_values("- **ACCOUNT NO.:** 1234567890\n* **NAME:** Jane").unwrap();
        assert_eq!(
            Value::Object(map),
            json!({"ACCOUNT NO.": "1234567890", "NAME": "Jane"})
        );
    }

    #[test]
    fn test_value_keeps_later_colons() {
        let map = parse_key_values("TIME: 10:30").unwrap();
        assert_eq!(map.get("TIME"), Some(&json!("10:30")));
    }

    #[test]
    fn test_no_pairs_is_an_error() {
        let err = parse_key_values("just some prose\nwith no fields").unwrap_err();
        assert_eq!(err.to_string(), "Unable to parse key-value pairs from response.");

        assert!(matches!(parse_response("   "), Err(ExtractError::Unparseable)));
    }

    #[test]
    fn test_json_in_code_fence() {
        let reply = "Here you go:\n```json\n{\"NAME\": \"John\", \"NET PAY\": \"900\"}\n```";
        let map = normalize_response(reply, &payslip_fields()).unwrap();
        assert_eq!(Value::Object(map), json!({"NAME": "John", "NET PAY": 900}));
    }

    #[test]
    fn test_json_embedded_in_prose() {
        let reply = "The extracted details are {\"NAME\": \"John\"} as requested.";
        let map = parse_response(reply).unwrap();
        assert_eq!(Value::Object(map), json!({"NAME": "John"}));
    }

    #[test]
    fn test_non_object_json_falls_back_to_lines() {
        let map = parse_response("\"NAME: John\"").unwrap();
        assert_eq!(Value::Object(map), json!({"NAME": "John"}));
    }

    #[test]
    fn test_truncated_json_falls_back_to_lines() {
        let reply = "{\n  \"NAME\": \"John Doe\",\n  \"NET PAY\": \"1,200\",\n  \"BANK\": \"First";
        let map = normalize_response(reply, &payslip_fields()).unwrap();
        assert_eq!(
            Value::Object(map),
            json!({"NAME": "John Doe", "NET PAY": 1200, "BANK": "First"})
        );

        let map = parse_key_values("{\"NAME\": \"Jane\"}").unwrap();
        assert_eq!(Value::Object(map), json!({"NAME": "Jane"}));
    }

    #[test]
    fn test_pairs_outside_code_fence_are_kept() {
        let reply = "NAME: John Doe\nACCOUNT NO.: 12345\nNote: the stamp reads ```PAID``` at the bottom";
        let map = parse_response(reply).unwrap();
        assert_eq!(
            Value::Object(map),
            json!({
                "NAME": "John Doe",
                "ACCOUNT NO.": "12345",
                "Note": "the stamp reads ```PAID``` at the bottom"
            })
        );

        let reply = "NAME: John Doe\nNET PAY: 1,200\n```\nsome raw ocr noise\n```";
        let map = normalize_response(reply, &payslip_fields()).unwrap();
        assert_eq!(map.get("NAME"), Some(&json!("John Doe")));
        assert_eq!(map.get("NET PAY"), Some(&json!(1200)));
    }

    #[test]
    fn test_fenced_pairs_skip_fence_markers() {
        let map = parse_response("```\nNAME: Jane\nBANK: First National\n```").unwrap();
        assert_eq!(
            Value::Object(map),
            json!({"NAME": "Jane", "BANK": "First National"})
        );
    }

    #[test]
    fn test_empty_key_line_continues_with_value() {
        let map = parse_key_values("NAME: John\n: Doe").unwrap();
        assert_eq!(Value::Object(map), json!({"NAME": "John Doe"}));
    }

    #[test]
    fn test_key_order_follows_source() {
        let map = parse_key_values("Z: 1\nA: 2\nM: 3").unwrap();
        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["Z", "A", "M"]);
    }
}
