use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::design::shopping::to_shopping_link;
use crate::error::DecorError;

/// One piece of furniture spotted in a generated room.
///
/// `search_query` is stored raw; it is only URL-encoded when a link is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FurnitureItem {
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(alias = "query", alias = "search_query")]
    pub search_query: String,
}

impl FurnitureItem {
    pub fn new(
        name: impl Into<String>,
        color: impl Into<String>,
        search_query: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            color: color.into(),
            search_query: search_query.into(),
        }
    }

    /// Items need a name and a query before they can be shown with a link.
    pub fn is_displayable(&self) -> bool {
        !self.name.trim().is_empty() && !self.search_query.trim().is_empty()
    }

    pub fn shopping_link(&self) -> String {
        to_shopping_link(self)
    }
}

/// Parsed extraction response: the usable items plus how many rows were
/// discarded for missing fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FurnitureReport {
    pub items: Vec<FurnitureItem>,
    pub dropped: usize,
}

const NAME_KEYS: &[&str] = &["name", "item", "title"];
const COLOR_KEYS: &[&str] = &["color", "colour", "material"];
const QUERY_KEYS: &[&str] = &["searchQuery", "search_query", "query", "shoppingQuery"];
const WRAPPER_KEYS: &[&str] = &["items", "furniture"];

/// Removes a surrounding markdown code fence (with or without a `json` tag).
/// Fence markers may share a line with the JSON. Text without a fence is
/// returned trimmed.
pub fn strip_code_fence(text: &str) -> String {
    let raw = text.trim();
    if !raw.starts_with("```") {
        return raw.to_string();
    }
    let body = raw.trim_start_matches('`');
    let body = match body.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => &body[4..],
        _ => body,
    };
    body.trim_end_matches('`').trim().to_string()
}

pub fn parse_furniture_response(text: &str) -> Result<Vec<FurnitureItem>, DecorError> {
    parse_furniture_report(text).map(|report| report.items)
}

/// Decodes a model reply into furniture items.
///
/// Only a reply that cannot be coerced into a JSON array fails. Rows that
/// are not objects, or lack a name or search query, are dropped and counted.
pub fn parse_furniture_report(text: &str) -> Result<FurnitureReport, DecorError> {
    let original = text.trim();
    if original.is_empty() {
        return Err(DecorError::Extraction(
            "model response was empty".to_string(),
        ));
    }

    let stripped = strip_code_fence(original);
    let rows = find_rows(&[stripped.as_str(), original]).ok_or_else(|| {
        DecorError::Extraction(format!(
            "response is not a JSON array: {}",
            preview(original, 120)
        ))
    })?;

    let mut report = FurnitureReport::default();
    for row in &rows {
        match item_from_row(row) {
            Some(item) => report.items.push(item),
            None => report.dropped += 1,
        }
    }
    Ok(report)
}

// Whole texts first, then an array starting at each `[` in order. An array
// holding objects wins over an earlier one that holds none, so `[2 found]`
// style prose ahead of the payload is skipped.
fn find_rows(texts: &[&str]) -> Option<Vec<Value>> {
    let whole = texts
        .iter()
        .filter_map(|text| serde_json::from_str::<Value>(text).ok());
    let embedded = texts.iter().flat_map(|text| {
        text.match_indices('[').filter_map(move |(start, _)| {
            serde_json::Deserializer::from_str(&text[start..])
                .into_iter::<Value>()
                .next()
                .and_then(Result::ok)
        })
    });

    let mut fallback = None;
    for rows in whole.chain(embedded).filter_map(coerce_rows) {
        if rows.is_empty() || rows.iter().any(Value::is_object) {
            return Some(rows);
        }
        fallback.get_or_insert(rows);
    }
    fallback
}

fn coerce_rows(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(rows) => Some(rows),
        Value::Object(mut object) => WRAPPER_KEYS
            .iter()
            .find_map(|key| match object.remove(*key) {
                Some(Value::Array(rows)) => Some(rows),
                _ => None,
            }),
        _ => None,
    }
}

fn item_from_row(row: &Value) -> Option<FurnitureItem> {
    let object = row.as_object()?;
    let name = first_text(object, NAME_KEYS)?;
    let search_query = first_text(object, QUERY_KEYS)?;
    let color = first_text(object, COLOR_KEYS).unwrap_or_default();
    Some(FurnitureItem {
        name,
        color,
        search_query,
    })
}

fn first_text(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        parse_furniture_report, parse_furniture_response, strip_code_fence, FurnitureItem,
    };
    use crate::error::DecorError;

    #[test]
    fn fenced_json_response_yields_the_single_item() {
        let text = "```json\n[{\"name\":\"Sofa\",\"color\":\"Teal\",\"searchQuery\":\"teal mid-century sofa\"}]\n```";
        let items = parse_furniture_response(text).unwrap();
        assert_eq!(
            items,
            vec![FurnitureItem::new("Sofa", "Teal", "teal mid-century sofa")]
        );
    }

    #[test]
    fn empty_array_is_a_valid_empty_result() {
        assert_eq!(parse_furniture_response("[]").unwrap(), Vec::new());
        assert_eq!(parse_furniture_response("```\n[]\n```").unwrap(), Vec::new());
    }

    #[test]
    fn prose_is_an_extraction_error() {
        let err = parse_furniture_response("not json at all").unwrap_err();
        assert!(matches!(err, DecorError::Extraction(_)));
        assert!(err.to_string().contains("not a JSON array"));

        let err = parse_furniture_response("   ").unwrap_err();
        assert!(matches!(err, DecorError::Extraction(_)));
    }

    #[test]
    fn non_array_json_is_an_extraction_error() {
        assert!(parse_furniture_response("{\"name\":\"Sofa\"}").is_err());
        assert!(parse_furniture_response("42").is_err());
        assert!(parse_furniture_response("{\"items\": \"none\"}").is_err());
    }

    #[test]
    fn rows_missing_required_fields_are_dropped_not_fatal() {
        let text = json!([
            {"name": "Velvet Sofa", "color": "Emerald", "searchQuery": "emerald velvet sofa"},
            {"name": "Floor Lamp", "color": "Brass"},
            {"name": "  ", "searchQuery": "blank name"},
            "just a string",
            {"name": "Jute Rug", "searchQuery": "large jute rug"}
        ])
        .to_string();
        let report = parse_furniture_report(&text).unwrap();
        assert_eq!(report.dropped, 3);
        assert_eq!(
            report.items,
            vec![
                FurnitureItem::new("Velvet Sofa", "Emerald", "emerald velvet sofa"),
                FurnitureItem::new("Jute Rug", "", "large jute rug"),
            ]
        );
        assert!(report.items.iter().all(FurnitureItem::is_displayable));
    }

    #[test]
    fn accepts_query_aliases_and_wrapped_arrays() {
        let text = json!({
            "items": [
                {"name": " Rattan Chair ", "color": "Natural", "query": " rattan accent chair "},
                {"name": "Pendant", "search_query": "paper pendant lamp"}
            ]
        })
        .to_string();
        let items = parse_furniture_response(&text).unwrap();
        assert_eq!(
            items,
            vec![
                FurnitureItem::new("Rattan Chair", "Natural", "rattan accent chair"),
                FurnitureItem::new("Pendant", "", "paper pendant lamp"),
            ]
        );
    }

    #[test]
    fn array_embedded_in_prose_is_recovered() {
        let text = "Here are the items:\n```json\n[{\"name\":\"Desk\",\"searchQuery\":\"walnut desk\"}]\n```\nEnjoy!";
        let items = parse_furniture_response(text).unwrap();
        assert_eq!(items, vec![FurnitureItem::new("Desk", "", "walnut desk")]);
    }

    #[test]
    fn strip_code_fence_handles_tags_and_plain_text() {
        assert_eq!(strip_code_fence("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("```JSON\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("```[1]```"), "[1]");
        assert_eq!(strip_code_fence("  [1]  "), "[1]");
        assert_eq!(strip_code_fence("```json[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("```json\n[1]```"), "[1]");
        assert_eq!(strip_code_fence("```"), "");
    }

    #[test]
    fn closing_fence_on_the_content_line_is_accepted() {
        let text = "```json\n[{\"name\":\"Sofa\",\"color\":\"Teal\",\"searchQuery\":\"teal sofa\"}]```";
        assert_eq!(
            parse_furniture_response(text).unwrap(),
            vec![FurnitureItem::new("Sofa", "Teal", "teal sofa")]
        );
    }

    #[test]
    fn opening_fence_on_the_content_line_keeps_every_row() {
        let text = "```json[{\"name\":\"Sofa\",\"searchQuery\":\"teal sofa\"},\n{\"name\":\"Rug\",\"searchQuery\":\"jute rug\"}]\n```";
        assert_eq!(
            parse_furniture_response(text).unwrap(),
            vec![
                FurnitureItem::new("Sofa", "", "teal sofa"),
                FurnitureItem::new("Rug", "", "jute rug"),
            ]
        );
    }

    #[test]
    fn bracketed_prose_before_the_array_is_skipped() {
        let text = "Items [2 found]:\n[{\"name\":\"Sofa\",\"searchQuery\":\"teal sofa\"}]";
        assert_eq!(
            parse_furniture_response(text).unwrap(),
            vec![FurnitureItem::new("Sofa", "", "teal sofa")]
        );

        let numbered = "See note [1]. [{\"name\":\"Lamp\",\"searchQuery\":\"brass lamp\"}] [3]";
        assert_eq!(
            parse_furniture_response(numbered).unwrap(),
            vec![FurnitureItem::new("Lamp", "", "brass lamp")]
        );
    }

    #[test]
    fn lone_fence_is_not_an_array() {
        let err = parse_furniture_response("```").unwrap_err();
        assert!(err.to_string().contains("not a JSON array"));
    }

    #[test]
    fn serializes_with_camel_case_query_key() {
        let item = FurnitureItem::new("Sofa", "Teal", "teal sofa");
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(
            value,
            json!({"name": "Sofa", "color": "Teal", "searchQuery": "teal sofa"})
        );
        let back: FurnitureItem =
            serde_json::from_value(json!({"name": "Sofa", "query": "teal sofa"})).unwrap();
        assert_eq!(back, FurnitureItem::new("Sofa", "", "teal sofa"));
    }
}
