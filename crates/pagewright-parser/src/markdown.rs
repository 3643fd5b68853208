//! Markdown converter using pulldown-cmark.

use std::collections::BTreeMap;

use pulldown_cmark::{CodeBlockKind, CowStr, Event, Options, Parser, Tag, TagEnd, html};

use crate::{
    ATTR_EXPERIMENTAL, ATTR_FETCH_DIAGRAM, ATTR_SOURCE_HIGHLIGHTER, ATTR_STEM, ConvertOptions,
    Converter, Document, Result,
    frontmatter::parse_header,
    syntax::{Highlighter, html_escape},
};

/// Fenced block languages rendered as diagram blocks.
const DIAGRAM_LANGUAGES: &[&str] = &[
    "plantuml", "mermaid", "graphviz", "dot", "ditaa", "blockdiag", "seqdiag", "actdiag",
    "nwdiag", "svgbob", "pikchr", "wavedrom", "vega", "bpmn", "d2",
];

/// Converter for Markdown content files.
#[derive(Debug, Clone, Default)]
pub struct MarkdownConverter;

impl MarkdownConverter {
    /// Create a new converter.
    pub fn new() -> Self {
        Self
    }

    /// Load a concrete [`MarkdownDocument`].
    pub fn load_document(&self, source: &str, options: &ConvertOptions) -> Result<MarkdownDocument> {
        let (header, body) = parse_header(source)?;

        // Options override attributes declared by the document itself.
        let mut attributes = header.attributes;
        attributes.extend(
            options
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        if let Some(title) = &header.title {
            attributes.insert("doctitle".to_string(), title.clone());
        }

        Ok(MarkdownDocument {
            attributes,
            title: header.title,
            body: body.to_string(),
        })
    }
}

impl Converter for MarkdownConverter {
    fn load(&self, source: &str, options: &ConvertOptions) -> Result<Box<dyn Document>> {
        Ok(Box::new(self.load_document(source, options)?))
    }
}

/// A parsed Markdown document.
#[derive(Debug, Clone)]
pub struct MarkdownDocument {
    attributes: BTreeMap<String, String>,
    title: Option<String>,
    body: String,
}

impl MarkdownDocument {
    fn parser_options(&self) -> Options {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_FOOTNOTES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_HEADING_ATTRIBUTES);

        if self.attributes.contains_key(ATTR_STEM) {
            options.insert(Options::ENABLE_MATH);
        }
        if self.attributes.contains_key(ATTR_EXPERIMENTAL) {
            options.insert(Options::ENABLE_DEFINITION_LIST);
            options.insert(Options::ENABLE_SUPERSCRIPT);
            options.insert(Options::ENABLE_SUBSCRIPT);
        }
        options
    }

    fn render(&self) -> String {
        let highlighter = Highlighter::from_attribute(
            self.attributes.get(ATTR_SOURCE_HIGHLIGHTER).map(String::as_str),
        );
        let fetch_diagrams = self.attributes.contains_key(ATTR_FETCH_DIAGRAM);

        let mut events: Vec<Event<'_>> = Vec::new();
        let mut code_block: Option<(Option<String>, String)> = None;

        for event in Parser::new_ext(&self.body, self.parser_options()) {
            match event {
                Event::Start(Tag::CodeBlock(kind)) => {
                    let lang = match kind {
                        CodeBlockKind::Fenced(info) => info
                            .split_whitespace()
                            .next()
                            .map(str::to_string),
                        CodeBlockKind::Indented => None,
                    };
                    code_block = Some((lang, String::new()));
                }
                Event::Text(text) if code_block.is_some() => {
                    if let Some((_, buf)) = code_block.as_mut() {
                        buf.push_str(&text);
                    }
                }
                Event::End(TagEnd::CodeBlock) => {
                    if let Some((lang, code)) = code_block.take() {
                        let html = match lang.as_deref() {
                            Some(l) if DIAGRAM_LANGUAGES.contains(&l) => {
                                diagram_block(l, &code, fetch_diagrams)
                            }
                            l => highlighter.render(&code, l),
                        };
                        events.push(Event::Html(CowStr::from(html)));
                    }
                }
                Event::InlineMath(math) => {
                    events.push(Event::InlineHtml(CowStr::from(format!(
                        "<span class=\"math inline\">\\({}\\)</span>",
                        html_escape(&math)
                    ))));
                }
                Event::DisplayMath(math) => {
                    events.push(Event::Html(CowStr::from(format!(
                        "<div class=\"math display\">\\[{}\\]</div>\n",
                        html_escape(&math)
                    ))));
                }
                other => events.push(other),
            }
        }

        let mut out = String::with_capacity(self.body.len() * 3 / 2);
        html::push_html(&mut out, events.into_iter());
        out
    }
}

impl Document for MarkdownDocument {
    fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    fn document_title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    fn convert(&self) -> Result<String> {
        Ok(self.render())
    }
}

/// Diagram source block; the client renders it unless the image was fetched.
fn diagram_block(kind: &str, source: &str, fetch: bool) -> String {
    let fetch_attr = if fetch { " data-fetch=\"true\"" } else { "" };
    format!(
        "<div class=\"diagramblock\" data-diagram-type=\"{kind}\"{fetch_attr}><pre class=\"diagram-source\">{}</pre></div>\n",
        html_escape(source)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ConvertOptions {
        ConvertOptions::new("/tmp/img")
            .with_attribute(ATTR_STEM, "latexmath")
            .with_attribute(ATTR_SOURCE_HIGHLIGHTER, "highlight.js")
            .with_flag(ATTR_FETCH_DIAGRAM, true)
            .with_flag(ATTR_EXPERIMENTAL, true)
    }

    #[test]
    fn test_parse_simple_markdown() {
        let doc = MarkdownConverter::new()
            .load_document("# Hello World\n\nThis is a test.", &options())
            .expect("load");

        assert_eq!(doc.document_title(), Some("Hello World"));
        let html = doc.convert().expect("convert");
        assert!(html.contains("<p>This is a test.</p>"));
        assert!(!html.contains("<h1>"), "title heading is part of the header");
    }

    #[test]
    fn test_heading_kept_when_front_matter_sets_title() {
        let doc = MarkdownConverter::new()
            .load_document("---\ntitle: Overview\n---\n# Install\n\nSteps.", &options())
            .expect("load");

        assert_eq!(doc.document_title(), Some("Overview"));
        let html = doc.convert().expect("convert");
        assert!(html.contains("<h1>Install</h1>"), "{html}");
        assert!(html.contains("<p>Steps.</p>"));
    }

    #[test]
    fn test_options_merged_into_attributes() {
        let doc = MarkdownConverter::new()
            .load_document("---\npage-layout: home\nstem: asciimath\n---\nBody", &options())
            .expect("load");

        assert_eq!(doc.attribute("page-layout", "default"), "home");
        assert_eq!(doc.attribute(ATTR_STEM, ""), "latexmath");
        assert_eq!(doc.attribute(ATTR_FETCH_DIAGRAM, "unset"), "");
        assert_eq!(doc.attribute("missing", "fallback"), "fallback");
    }

    #[test]
    fn test_doctitle_attribute() {
        let doc = MarkdownConverter::new()
            .load_document("# Guide\n", &ConvertOptions::default())
            .expect("load");
        assert_eq!(doc.attribute("doctitle", ""), "Guide");
    }

    #[test]
    fn test_code_block_client_highlighting() {
        let doc = MarkdownConverter::new()
            .load_document("```rust\nfn main() {}\n```\n", &options())
            .expect("load");

        let html = doc.convert().expect("convert");
        assert!(html.contains("language-rust hljs"));
        assert!(html.contains("fn main() {}"));
    }

    #[test]
    fn test_code_block_without_highlighter() {
        let doc = MarkdownConverter::new()
            .load_document("```\n<tag>\n```\n", &ConvertOptions::default())
            .expect("load");

        let html = doc.convert().expect("convert");
        assert!(html.contains("<pre><code>&lt;tag&gt;"));
    }

    #[test]
    fn test_diagram_block() {
        let source = "```plantuml\nAlice -> Bob\n```\n";

        let with_fetch = MarkdownConverter::new()
            .load_document(source, &options())
            .expect("load")
            .convert()
            .expect("convert");
        assert!(with_fetch.contains("data-diagram-type=\"plantuml\""));
        assert!(with_fetch.contains("data-fetch=\"true\""));
        assert!(with_fetch.contains("Alice -&gt; Bob"));

        let without_fetch = MarkdownConverter::new()
            .load_document(source, &options().without(ATTR_FETCH_DIAGRAM))
            .expect("load")
            .convert()
            .expect("convert");
        assert!(!without_fetch.contains("data-fetch"));
    }

    #[test]
    fn test_math_enabled_by_stem() {
        let doc = MarkdownConverter::new()
            .load_document("Sum: $x + y$", &options())
            .expect("load");

        let html = doc.convert().expect("convert");
        assert!(html.contains("<span class=\"math inline\">"));

        let plain = MarkdownConverter::new()
            .load_document("Price: $5 and $6", &ConvertOptions::default())
            .expect("load")
            .convert()
            .expect("convert");
        assert!(!plain.contains("math"));
    }

    #[test]
    fn test_table_rendering() {
        let doc = MarkdownConverter::new()
            .load_document(
                "| Header 1 | Header 2 |\n|----------|----------|\n| Cell 1   | Cell 2   |",
                &ConvertOptions::default(),
            )
            .expect("load");

        let html = doc.convert().expect("convert");
        assert!(html.contains("<table>"));
        assert!(html.contains("<thead>"));
        assert!(html.contains("<td>"));
    }

    #[test]
    fn test_invalid_header_fails_load() {
        let result = MarkdownConverter::new().load_document("---\n- a\n- b\n---\nBody", &options());
        assert!(result.is_err());
    }

    #[test]
    fn test_convert_is_deterministic() {
        let doc = MarkdownConverter::new()
            .load_document("# T\n\nSome *text* with `code`.\n", &options())
            .expect("load");
        assert_eq!(doc.convert().expect("first"), doc.convert().expect("second"));
    }
}
