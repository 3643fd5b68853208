//! Source block highlighting.
//!
//! The `source-highlighter` attribute decides how code blocks are emitted:
//! `syntect` highlights on the server, any other value (for example
//! `highlight.js`) emits class-annotated markup for a client-side library,
//! and no value emits plain `<pre><code>` blocks.

use std::sync::OnceLock;

use syntect::{highlighting::ThemeSet, html::highlighted_html_for_string, parsing::SyntaxSet};

/// Highlighter identifier handled on the server.
pub const SERVER_HIGHLIGHTER: &str = "syntect";

/// Highlighting strategy selected by the `source-highlighter` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Highlighter {
    /// No highlighting.
    Plain,
    /// Markup for a client-side highlighter named by the attribute.
    Client(String),
    /// Server-side highlighting with syntect.
    Server,
}

impl Highlighter {
    /// Select a strategy from the attribute value.
    pub fn from_attribute(value: Option<&str>) -> Self {
        match value {
            None | Some("") => Self::Plain,
            Some(SERVER_HIGHLIGHTER) => Self::Server,
            Some(other) => Self::Client(other.to_string()),
        }
    }

    /// Render one code block.
    pub fn render(&self, code: &str, lang: Option<&str>) -> String {
        match self {
            Self::Plain => plain_block(code, lang),
            Self::Client(name) => {
                let escaped = html_escape(code);
                match lang {
                    Some(l) => format!(
                        "<pre class=\"highlight\"><code class=\"language-{l} {}\" data-lang=\"{l}\">{escaped}</code></pre>\n",
                        client_class(name)
                    ),
                    None => format!("<pre class=\"highlight\"><code>{escaped}</code></pre>\n"),
                }
            }
            Self::Server => SyntaxHighlighter::shared().highlight(code, lang),
        }
    }
}

/// CSS class a client-side library expects on highlighted blocks.
fn client_class(name: &str) -> &str {
    match name {
        "highlight.js" | "highlightjs" => "hljs",
        "prism" => "prism",
        other => other,
    }
}

fn plain_block(code: &str, lang: Option<&str>) -> String {
    let escaped = html_escape(code);
    let lang_class = lang
        .map(|l| format!(" class=\"language-{l}\""))
        .unwrap_or_default();
    format!("<pre><code{lang_class}>{escaped}</code></pre>\n")
}

/// Syntax highlighter using syntect.
#[derive(Debug)]
pub struct SyntaxHighlighter {
    syntax_set: SyntaxSet,
    theme_set: ThemeSet,
    theme: String,
}

impl Default for SyntaxHighlighter {
    fn default() -> Self {
        Self::new("InspiredGitHub")
    }
}

impl SyntaxHighlighter {
    /// Create a new syntax highlighter with the specified theme.
    pub fn new(theme: &str) -> Self {
        Self {
            syntax_set: SyntaxSet::load_defaults_newlines(),
            theme_set: ThemeSet::load_defaults(),
            theme: theme.to_string(),
        }
    }

    /// Process-wide instance; loading the syntax definitions is expensive.
    pub fn shared() -> &'static Self {
        static SHARED: OnceLock<SyntaxHighlighter> = OnceLock::new();
        SHARED.get_or_init(Self::default)
    }

    /// Highlight code with the given language.
    ///
    /// Unknown languages fall back to a plain `<pre><code>` block.
    pub fn highlight(&self, code: &str, lang: Option<&str>) -> String {
        let syntax = lang.and_then(|l| self.syntax_set.find_syntax_by_token(l));
        let theme = self
            .theme_set
            .themes
            .get(&self.theme)
            .or_else(|| self.theme_set.themes.values().next());

        match (syntax, theme) {
            (Some(syntax), Some(theme)) => {
                highlighted_html_for_string(code, &self.syntax_set, syntax, theme)
                    .unwrap_or_else(|_| plain_block(code, lang))
            }
            _ => plain_block(code, lang),
        }
    }
}

/// Escape HTML special characters.
pub(crate) fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
