//! HTML fragments and labels for the request views.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFormat {
    Json,
    Raw,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedBody {
    pub format: BodyFormat,
    /// Plain text as shown (pretty JSON or the untouched raw body).
    pub text: String,
    pub html: String,
}

/// Pretty-prints and highlights a JSON body, or falls back to the raw text.
pub fn render_body(body: &str) -> RenderedBody {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return render_raw(body);
    };
    match serde_json::to_string_pretty(&value) {
        Ok(text) => {
            let mut html = String::with_capacity(text.len() * 2);
            write_highlighted(&mut html, &value, 0);
            RenderedBody {
                format: BodyFormat::Json,
                text,
                html,
            }
        }
        Err(_) => render_raw(body),
    }
}

pub fn render_raw(body: &str) -> RenderedBody {
    RenderedBody {
        format: BodyFormat::Raw,
        text: body.to_string(),
        html: escape_html(body),
    }
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Key/value rows for the headers and query tabs.
pub fn render_table_rows(entries: &BTreeMap<String, String>, empty_message: &str) -> String {
    if entries.is_empty() {
        return format!(
            "<tr><td colspan=\"2\" class=\"empty-message\">{}</td></tr>",
            escape_html(empty_message)
        );
    }
    entries
        .iter()
        .map(|(key, value)| {
            format!(
                "<tr><td>{}</td><td>{}</td></tr>",
                escape_html(key),
                escape_html(value)
            )
        })
        .collect()
}

/// `May 1 10:20:30`, as shown on list entries.
pub fn format_entry_time<Tz>(timestamp: &DateTime<Utc>, zone: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    timestamp
        .with_timezone(zone)
        .format("%b %-d %H:%M:%S")
        .to_string()
}

/// `May 1, 2024 10:20:30`, as shown in the detail stats bar.
pub fn format_detail_time<Tz>(timestamp: &DateTime<Utc>, zone: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    timestamp
        .with_timezone(zone)
        .format("%b %-d, %Y %H:%M:%S")
        .to_string()
}

// Mirrors the layout of `serde_json::to_string_pretty` so the highlighted
// markup carries exactly the pretty text once the spans are stripped.
fn write_highlighted(out: &mut String, value: &Value, depth: usize) {
    match value {
        Value::Null => push_span(out, "json-null", "null"),
        Value::Bool(flag) => push_span(out, "json-boolean", if *flag { "true" } else { "false" }),
        Value::Number(number) => push_span(out, "json-number", &number.to_string()),
        Value::String(_) => push_span(out, "json-string", &escape_html(&value.to_string())),
        Value::Array(items) if items.is_empty() => out.push_str("[]"),
        Value::Array(items) => {
            out.push_str("[\n");
            for (index, item) in items.iter().enumerate() {
                indent(out, depth + 1);
                write_highlighted(out, item, depth + 1);
                if index + 1 < items.len() {
                    out.push(',');
                }
                out.push('\n');
            }
            indent(out, depth);
            out.push(']');
        }
        Value::Object(map) if map.is_empty() => out.push_str("{}"),
        Value::Object(map) => {
            out.push_str("{\n");
            for (index, (key, item)) in map.iter().enumerate() {
                indent(out, depth + 1);
                let quoted = Value::from(key.as_str()).to_string();
                push_span(out, "json-key", &escape_html(&quoted));
                out.push_str(": ");
                write_highlighted(out, item, depth + 1);
                if index + 1 < map.len() {
                    out.push(',');
                }
                out.push('\n');
            }
            indent(out, depth);
            out.push('}');
        }
    }
}

fn push_span(out: &mut String, class: &str, escaped: &str) {
    out.push_str("<span class=\"");
    out.push_str(class);
    out.push_str("\">");
    out.push_str(escaped);
    out.push_str("</span>");
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn strip_markup(html: &str) -> String {
        let mut text = String::new();
        let mut in_tag = false;
        for c in html.chars() {
            match c {
                '<' => in_tag = true,
                '>' if in_tag => in_tag = false,
                c if !in_tag => text.push(c),
                _ => {}
            }
        }
        text.replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&amp;", "&")
    }

    #[test]
    fn json_bodies_are_pretty_printed_and_reparse_equal() {
        let body = r#"{"event":"push","n":3,"ok":true,"tags":["a","<b>"],"meta":{"x":null,"empty":[]}}"#;
        let rendered = render_body(body);
        assert_eq!(rendered.format, BodyFormat::Json);
        assert!(rendered.text.contains("\n  \"event\": \"push\""));

        let original: Value = serde_json::from_str(body).unwrap();
        let reparsed: Value = serde_json::from_str(&rendered.text).unwrap();
        assert_eq!(original, reparsed);
    }

    #[test]
    fn highlighting_preserves_the_pretty_text() {
        let body = r#"{"k\"ey":"it's <tag> & more","list":[1,2.5,false,{}],"nested":{"z":null}}"#;
        let rendered = render_body(body);
        assert_eq!(strip_markup(&rendered.html), rendered.text);
        assert!(rendered.html.contains("<span class=\"json-key\">&quot;list&quot;</span>: ["));
        assert!(rendered.html.contains("<span class=\"json-number\">2.5</span>"));
        assert!(rendered.html.contains("<span class=\"json-boolean\">false</span>"));
        assert!(rendered.html.contains("<span class=\"json-null\">null</span>"));
        assert!(!rendered.html.contains("<tag>"));
    }

    #[test]
    fn invalid_json_keeps_the_raw_text() {
        for body in ["", "not json", "{\"open\": ", "a=1&b=<2>"] {
            let rendered = render_body(body);
            assert_eq!(rendered.format, BodyFormat::Raw);
            assert_eq!(rendered.text, body);
            assert_eq!(strip_markup(&rendered.html), body);
        }
    }

    #[test]
    fn table_rows_escape_and_show_empty_state() {
        let mut headers = BTreeMap::new();
        headers.insert("x-trace".to_string(), "<id>".to_string());
        headers.insert("content-type".to_string(), "application/json".to_string());
        let rows = render_table_rows(&headers, "No headers");
        assert_eq!(
            rows,
            "<tr><td>content-type</td><td>application/json</td></tr>\
             <tr><td>x-trace</td><td>&lt;id&gt;</td></tr>"
        );

        let empty = render_table_rows(&BTreeMap::new(), "No query parameters");
        assert!(empty.contains("class=\"empty-message\">No query parameters<"));
    }

    #[test]
    fn times_render_in_the_given_zone() {
        let ts = chrono::DateTime::parse_from_rfc3339("2024-05-01T23:20:30Z")
            .unwrap()
            .with_timezone(&Utc);
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        assert_eq!(format_entry_time(&ts, &Utc), "May 1 23:20:30");
        assert_eq!(format_entry_time(&ts, &plus_two), "May 2 01:20:30");
        assert_eq!(format_detail_time(&ts, &Utc), "May 1, 2024 23:20:30");
    }
}
