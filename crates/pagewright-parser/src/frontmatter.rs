//! Document header parsing.
//!
//! A content file may start with a YAML front matter block delimited by
//! `---` lines, followed by an optional level-1 heading and attribute entry
//! lines of the form `:name: value`:
//!
//! ```markdown
//! ---
//! page-layout: home
//! ---
//! # Getting Started
//! :page-component: guide
//! :experimental:
//!
//! Body text.
//! ```

use std::collections::BTreeMap;

use serde_yaml::Value;

use crate::ConvertError;

/// Split header information from a document body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    /// Document attributes declared in the header.
    pub attributes: BTreeMap<String, String>,
    /// Title from `title` in front matter, else the leading `# ` heading.
    pub title: Option<String>,
}

/// Split YAML front matter from the rest of the document.
///
/// Returns `None` when the document has no front matter.
pub fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let content = content.trim_start_matches('\u{feff}');
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let frontmatter = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((frontmatter, body));
        }
        offset += line.len();
    }

    None
}

/// Parse the document header, returning it together with the remaining body.
pub fn parse_header(content: &str) -> Result<(Header, &str), ConvertError> {
    let mut header = Header::default();

    let body = match split_frontmatter(content) {
        Some((frontmatter, body)) => {
            header.attributes = parse_frontmatter_attributes(frontmatter)?;
            header.title = header.attributes.remove("title");
            body
        }
        None => content,
    };

    // A front matter title leaves the body untouched.
    if header.title.is_some() {
        return Ok((header, body));
    }

    let body = body.trim_start_matches(['\n', '\r']);
    let Some((first, mut rest)) = split_line(body) else {
        return Ok((header, body));
    };

    let Some(heading) = first.strip_prefix("# ") else {
        return Ok((header, body));
    };

    let heading = heading.trim().trim_end_matches('#').trim_end();
    header.title = Some(heading.to_string());

    // Attribute entries directly below the title belong to the header.
    while let Some((line, next)) = split_line(rest) {
        let Some((name, value)) = parse_attribute_entry(line) else {
            break;
        };
        header.attributes.insert(name.to_string(), value.to_string());
        rest = next;
    }

    Ok((header, rest))
}

/// Split off the first line (without its terminator).
fn split_line(text: &str) -> Option<(&str, &str)> {
    if text.is_empty() {
        return None;
    }
    match text.find('\n') {
        Some(pos) => Some((text[..pos].trim_end_matches('\r'), &text[pos + 1..])),
        None => Some((text, "")),
    }
}

/// Parse `:name: value` (value may be empty).
fn parse_attribute_entry(line: &str) -> Option<(&str, &str)> {
    let inner = line.strip_prefix(':')?;
    let end = inner.find(':')?;
    let name = &inner[..end];
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    Some((name, inner[end + 1..].trim()))
}

fn parse_frontmatter_attributes(
    frontmatter: &str,
) -> Result<BTreeMap<String, String>, ConvertError> {
    if frontmatter.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let value: Value = serde_yaml::from_str(frontmatter)
        .map_err(|e| ConvertError::Frontmatter(e.to_string()))?;
    let Value::Mapping(mapping) = value else {
        return Err(ConvertError::Frontmatter(
            "front matter must be a mapping".to_string(),
        ));
    };

    let mut attributes = BTreeMap::new();
    for (key, value) in mapping {
        let Some(key) = key.as_str() else {
            return Err(ConvertError::Frontmatter(format!(
                "attribute name must be a string: {key:?}"
            )));
        };
        let value = match value {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(s) => s,
            _ => {
                return Err(ConvertError::Frontmatter(format!(
                    "attribute `{key}` must be a scalar value"
                )));
            }
        };
        attributes.insert(key.to_string(), value);
    }

    Ok(attributes)
}
