//! Line-based parsing and reconstruction of the `key: value` header block at
//! the top of a Markdown file.
//!
//! This is deliberately not a YAML parser. It understands exactly one level of
//! `key: value` lines, keeps anything it does not understand (indented lines,
//! list items, lines without a colon) attached to the preceding field, and
//! re-quotes values on output so YAML consumers still read them as strings.

/// Line that opens and closes the header block.
pub const DELIMITER: &str = "---";

const LEADING_SIGILS: [char; 14] = [
    '#', '&', '*', '!', '|', '>', '%', '@', '`', '\'', '"', '-', '?', ',',
];
const BARE_SCALARS: [&str; 11] = [
    "true", "false", "yes", "no", "on", "off", "null", "~", "y", "n", ".nan",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub key: String,
    pub value: String,
    /// Raw lines following the field that belong to it (list items, nested
    /// mappings, anything indented or without a colon).
    pub continuation: Vec<String>,
}

impl HeaderField {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            continuation: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    /// Unparseable lines seen before the first field.
    pub leading: Vec<String>,
    pub fields: Vec<HeaderField>,
}

impl Header {
    /// Parse the lines between the two delimiters.
    pub fn parse_block(block: &str) -> Self {
        let mut header = Header::default();

        for raw_line in block.lines() {
            let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
            match parse_field_line(line) {
                Some((key, value)) => header.fields.push(HeaderField::new(key, value)),
                None => match header.fields.last_mut() {
                    Some(field) => field.continuation.push(line.to_owned()),
                    None => header.leading.push(line.to_owned()),
                },
            }
        }

        header
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.key == key)
            .map(|f| f.value.as_str())
    }

    pub fn get_field(&self, key: &str) -> Option<&HeaderField> {
        self.fields.iter().find(|f| f.key == key)
    }

    /// Values of a list field, written either inline (`key: [a, b]`) or as
    /// block items on the following lines (`  - a`).
    pub fn get_list(&self, key: &str) -> Vec<String> {
        let Some(field) = self.get_field(key) else {
            return Vec::new();
        };
        if !field.value.is_empty() {
            return list_items(&field.value);
        }
        field
            .continuation
            .iter()
            .filter_map(|line| line.trim().strip_prefix('-'))
            .map(|item| unquote(item.trim()))
            .filter(|item| !item.is_empty())
            .collect()
    }

    /// Replace the value of `key`, or append the field when absent. Any
    /// continuation lines of the replaced field are dropped.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.fields.iter_mut().find(|f| f.key == key) {
            Some(field) => {
                field.value = value;
                field.continuation.clear();
            }
            None => self.fields.push(HeaderField::new(key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<HeaderField> {
        let idx = self.fields.iter().position(|f| f.key == key)?;
        Some(self.fields.remove(idx))
    }

    /// Keep only the fields named in `allowed`, dropping leading junk.
    pub fn retain_keys(&mut self, allowed: &[&str]) {
        self.leading.clear();
        self.fields.retain(|f| allowed.contains(&f.key.as_str()));
    }

    /// Render the block contents (without delimiters). Fields named in `order`
    /// come first in that order; any others follow in their original order.
    pub fn render(&self, order: &[&str]) -> String {
        let mut out = String::new();
        for line in &self.leading {
            out.push_str(line);
            out.push('\n');
        }

        let ordered = order
            .iter()
            .filter_map(|key| self.fields.iter().find(|f| f.key == *key));
        let rest = self
            .fields
            .iter()
            .filter(|f| !order.contains(&f.key.as_str()));

        for field in ordered.chain(rest) {
            out.push_str(&render_field(field));
            out.push('\n');
            for line in &field.continuation {
                out.push_str(line);
                out.push('\n');
            }
        }
        out
    }
}

/// A Markdown document split into its header and the text after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document<'a> {
    pub header: Header,
    pub body: &'a str,
    /// `"\r\n"` when the opening delimiter line ended that way, else `"\n"`.
    pub line_ending: &'static str,
}

impl<'a> Document<'a> {
    /// Split `text` into header and body. `None` when the text does not start
    /// with a delimiter line or the header is never closed.
    pub fn parse(text: &'a str) -> Option<Self> {
        let text_start = text.strip_prefix('\u{feff}').unwrap_or(text);
        let first_end = text_start.find('\n')?;
        if text_start[..first_end].trim_end_matches('\r') != DELIMITER {
            return None;
        }
        let line_ending = if text_start[..first_end].ends_with('\r') {
            "\r\n"
        } else {
            "\n"
        };

        let block_start = first_end + 1;
        let mut cursor = block_start;
        while cursor <= text_start.len() {
            let line_end = text_start[cursor..]
                .find('\n')
                .map(|i| cursor + i)
                .unwrap_or(text_start.len());
            let line = text_start[cursor..line_end].trim_end_matches('\r');
            if line == DELIMITER {
                let body_start = (line_end + 1).min(text_start.len());
                return Some(Document {
                    header: Header::parse_block(&text_start[block_start..cursor]),
                    body: &text_start[body_start..],
                    line_ending,
                });
            }
            if line_end == text_start.len() {
                break;
            }
            cursor = line_end + 1;
        }
        None
    }

    /// Render with the line ending the document was read with.
    pub fn render(&self, order: &[&str]) -> String {
        let eol = self.line_ending;
        let header = self.header.render(order);
        let header = if eol == "\n" {
            header
        } else {
            header.replace('\n', eol)
        };
        format!("{DELIMITER}{eol}{header}{DELIMITER}{eol}{}", self.body)
    }
}

fn parse_field_line(line: &str) -> Option<(String, String)> {
    if line.starts_with(char::is_whitespace) {
        return None;
    }
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_owned(), unquote(value.trim())))
}

fn render_field(field: &HeaderField) -> String {
    if field.value.is_empty() && !field.continuation.is_empty() {
        return format!("{}:", field.key);
    }
    if needs_quoting(&field.value) && !is_flow_sequence(&field.value) {
        format!("{}: {}", field.key, quote(&field.value))
    } else {
        format!("{}: {}", field.key, field.value)
    }
}

/// Whether a bare `value` would be misread by a YAML consumer: structural
/// characters, leading sigils, surrounding whitespace, or text that reads as a
/// boolean, number or null.
pub fn needs_quoting(value: &str) -> bool {
    if value.is_empty() || value.trim() != value {
        return true;
    }
    if value.contains([':', '[', ']', '{', '}']) || value.contains(" #") {
        return true;
    }
    if value.starts_with(LEADING_SIGILS) {
        return true;
    }
    let lower = value.to_ascii_lowercase();
    if BARE_SCALARS.contains(&lower.as_str()) {
        return true;
    }
    value.parse::<f64>().is_ok() || is_prefixed_integer(&lower)
}

/// An inline list such as `aliases: [Title, old-stem]`. Emitted as-is so it
/// stays a list. Wikilinks (`[[...]]`) are not lists.
fn is_flow_sequence(value: &str) -> bool {
    value.trim() == value
        && value.starts_with('[')
        && value.ends_with(']')
        && !value.starts_with("[[")
}

/// Items of an inline list (`[a, "b"]`), or the whole value as a single item
/// when it is not a list. Items are unquoted; empty items are dropped.
pub fn list_items(value: &str) -> Vec<String> {
    let trimmed = value.trim();
    let inner = if is_flow_sequence(trimmed) {
        &trimmed[1..trimmed.len() - 1]
    } else {
        return match trimmed {
            "" => Vec::new(),
            single => vec![unquote(single)],
        };
    };
    inner
        .split(',')
        .map(|item| unquote(item.trim()))
        .filter(|item| !item.is_empty())
        .collect()
}

fn is_prefixed_integer(lower: &str) -> bool {
    let digits = lower.trim_start_matches(['+', '-']);
    [("0x", 16), ("0o", 8), ("0b", 2)]
        .into_iter()
        .any(|(prefix, radix)| {
            digits
                .strip_prefix(prefix)
                .is_some_and(|rest| !rest.is_empty() && i64::from_str_radix(rest, radix).is_ok())
        })
}

/// Wrap a value in quotes, choosing the style that needs no escaping when
/// possible.
pub fn quote(value: &str) -> String {
    if !value.contains(['"', '\\']) {
        format!("\"{}\"", value)
    } else if !value.contains('\'') {
        format!("'{}'", value)
    } else {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{}\"", escaped)
    }
}

/// Strip one layer of matching surrounding quotes.
pub fn unquote(raw: &str) -> String {
    if raw.len() >= 2 {
        if raw.starts_with('"') && raw.ends_with('"') {
            return unescape_double(&raw[1..raw.len() - 1]);
        }
        if raw.starts_with('\'') && raw.ends_with('\'') {
            return raw[1..raw.len() - 1].replace("''", "'");
        }
    }
    raw.to_owned()
}

fn unescape_double(inner: &str) -> String {
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if next == '\\' || next == '"' {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const SAMPLE: &str = "---\n\
nexus_marker: legacy\n\
aliases:\n  - First title\n  - old-stem\n\
conversation_id: \"abc-123\"\n\
create_time: 28/06/2024 at 22:34:21\n\
this line has no colon\n\
---\n\
# Heading\n\nBody text: with colon\n";

    #[test]
    fn test_parse_sample() {
        let doc = Document::parse(SAMPLE).unwrap();
        assert_eq!(doc.header.get("conversation_id"), Some("abc-123"));
        assert_eq!(doc.header.get("create_time"), Some("28/06/2024 at 22:34:21"));
        let aliases = doc.header.get_field("aliases").unwrap();
        assert_eq!(aliases.value, "");
        assert_eq!(aliases.continuation, vec!["  - First title", "  - old-stem"]);
        // Lines without a colon ride along with the preceding field
        let create = doc.header.get_field("create_time").unwrap();
        assert_eq!(create.continuation, vec!["this line has no colon"]);
        assert_eq!(doc.body, "# Heading\n\nBody text: with colon\n");
    }

    #[test]
    fn test_render_in_schema_order_with_quoting() {
        let doc = Document::parse(SAMPLE).unwrap();
        let rendered = doc.render(&["conversation_id", "create_time", "aliases"]);
        let expected = "---\n\
conversation_id: abc-123\n\
create_time: \"28/06/2024 at 22:34:21\"\n\
this line has no colon\n\
aliases:\n  - First title\n  - old-stem\n\
nexus_marker: legacy\n\
---\n\
# Heading\n\nBody text: with colon\n";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn test_not_a_document() {
        assert!(Document::parse("no header here\n").is_none());
        assert!(Document::parse("---\nkey: value\nnever closed\n").is_none());
        assert!(Document::parse("").is_none());
    }

    #[test]
    fn test_header_without_trailing_body_and_crlf() {
        let doc = Document::parse("---\r\nkey: value\r\n---").unwrap();
        assert_eq!(doc.header.get("key"), Some("value"));
        assert_eq!(doc.body, "");
    }

    #[test]
    fn test_crlf_document_keeps_its_line_endings() {
        let text = "---\r\nb: 2\r\na: 1\r\ntags:\r\n  - x\r\n---\r\nline one\r\nline two\r\n";
        let doc = Document::parse(text).unwrap();
        assert_eq!(doc.line_ending, "\r\n");

        // Same field order renders back byte for byte
        assert_eq!(doc.render(&["b", "a"]), text);
        let reordered = doc.render(&["a", "b"]);
        assert_eq!(
            reordered,
            "---\r\na: 1\r\nb: 2\r\ntags:\r\n  - x\r\n---\r\nline one\r\nline two\r\n"
        );
        assert!(!reordered.replace("\r\n", "").contains('\n'));
    }

    #[test]
    fn test_needs_quoting() {
        for value in [
            "", " padded", "a: b", "[x]", "{y}", "#tag", "&anchor", "*ref", "!bang", "|pipe",
            ">fold", "%pct", "@at", "`tick", "true", "No", "null", "~", "42", "3.14", "-7",
            "1e5", "0x1F", "'q'", "\"dq\"", "text #comment",
        ] {
            assert!(needs_quoting(value), "expected {value:?} to need quoting");
        }
        for value in ["plain text", "abc-123", "1.1.0", "claude", "C# rocks", "a/b"] {
            assert!(!needs_quoting(value), "expected {value:?} to stay bare");
        }
    }

    #[test]
    fn test_quote_styles() {
        assert_eq!(quote("a: b"), "\"a: b\"");
        assert_eq!(quote("say \"hi\""), "'say \"hi\"'");
        assert_eq!(quote("it's \"x\""), "\"it's \\\"x\\\"\"");
        assert_eq!(unquote("\"it's \\\"x\\\"\""), "it's \"x\"");
        assert_eq!(unquote("'it''s'"), "it's");
        assert_eq!(unquote("\"unbalanced"), "\"unbalanced");
        assert_eq!(unquote("\"C:\\path\""), "C:\\path");
    }

    #[test]
    fn test_round_trip_special_values() {
        let mut header = Header::default();
        header.set("with_colon", "12:30 meeting");
        header.set("with_brackets", "[[Some Link]]");
        header.set("empty", "");
        header.set("plain", "hello world");
        let doc = Document {
            header: header.clone(),
            body: "body\n",
            line_ending: "\n",
        };
        let rendered = doc.render(&[]);
        let parsed = Document::parse(&rendered).unwrap();
        assert_eq!(parsed.header, header);
        assert_eq!(parsed.body, "body\n");
    }

    #[test]
    fn test_set_remove_retain() {
        let mut header = Document::parse(SAMPLE).unwrap().header;
        header.set("aliases", "Only title");
        assert!(header.get_field("aliases").unwrap().continuation.is_empty());
        assert!(header.remove("nexus_marker").is_some());
        assert!(header.remove("nexus_marker").is_none());
        header.retain_keys(&["aliases"]);
        assert_eq!(header.fields.len(), 1);
    }

    #[test]
    fn test_list_fields() {
        let doc = Document::parse(SAMPLE).unwrap();
        assert_eq!(doc.header.get_list("aliases"), vec!["First title", "old-stem"]);

        let doc = Document::parse("---\naliases: [Chart v2, \"chart_v2\"]\ntitle: Solo\n---\n").unwrap();
        assert_eq!(doc.header.get_list("aliases"), vec!["Chart v2", "chart_v2"]);
        assert_eq!(doc.header.get_list("title"), vec!["Solo"]);
        assert!(doc.header.get_list("missing").is_empty());
        // Inline lists stay lists on output
        assert!(doc.render(&[]).contains("aliases: [Chart v2, \"chart_v2\"]\n"));
    }

    fn fields_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
        prop::collection::btree_map("[a-z_]{1,10}", "[^\\r\\n]{0,24}", 0..8)
            .prop_map(|m| m.into_iter().collect())
    }

    proptest! {
        #[test]
        fn prop_parse_render_round_trip(fields in fields_strategy()) {
            let header = Header {
                leading: Vec::new(),
                fields: fields
                    .iter()
                    .map(|(k, v)| HeaderField::new(k.clone(), v.clone()))
                    .collect(),
            };
            let doc = Document { header: header.clone(), body: "text\n", line_ending: "\n" };
            let rendered = doc.render(&[]);
            let parsed = Document::parse(&rendered).unwrap();
            prop_assert_eq!(parsed.header, header);
        }
    }
}
