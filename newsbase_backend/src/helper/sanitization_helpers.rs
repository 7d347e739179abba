use ammonia::Builder;
use pulldown_cmark::{html, Options, Parser};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

fn whitespace_regex() -> &'static Regex {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("static regex is valid"))
}

/// Converts entry Markdown (excerpt or content) to HTML and cleans it.
/// Scripting attributes and unknown tags never survive.
pub fn render_markdown(markdown_input: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(markdown_input, options);
    let mut unsafe_html = String::new();
    html::push_html(&mut unsafe_html, parser);

    let safe_tags: HashSet<&str> = [
        "h1", "h2", "h3", "h4", "h5", "h6", "b", "strong", "i", "em", "p", "br", "a", "ul", "ol", "li",
        "blockquote", "code", "pre", "hr", "img", "table", "thead", "tbody", "tr", "th", "td", "del", "sup",
    ]
    .into_iter()
    .collect();
    let generic_attributes: HashSet<&str> = ["src", "href", "alt", "title"].into_iter().collect();

    Builder::new()
        .tags(safe_tags)
        .generic_attributes(generic_attributes)
        .link_rel(Some("nofollow ugc"))
        .clean(&unsafe_html)
        .to_string()
}

/// Strips all HTML tags from input (titles, names, meta fields).
pub fn strip_all_html(input: &str) -> String {
    Builder::new().tags(HashSet::new()).clean(input).to_string()
}

/// Text with tags removed, entities decoded and whitespace collapsed.
pub fn plain_text(html_input: &str) -> String {
    let stripped = strip_all_html(html_input);
    let decoded = html_escape::decode_html_entities(&stripped);
    whitespace_regex().replace_all(decoded.trim(), " ").into_owned()
}

/// The first `max_words` words of `text`, with an ellipsis when cut.
pub fn truncate_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return words.join(" ");
    }
    format!("{} …", words[..max_words].join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_is_rendered_and_scripts_removed() {
        let html = render_markdown("**bold** <script>alert(1)</script> [x](http://a.example)");
        assert!(html.contains("<strong>bold</strong>"));
        assert!(!html.contains("<script"));
        assert!(html.contains("rel=\"nofollow ugc\""));
    }

    #[test]
    fn plain_text_collapses_markup() {
        assert_eq!(plain_text("<p>Fish &amp;\n\n chips</p>"), "Fish & chips");
    }

    #[test]
    fn strip_keeps_text_only() {
        assert_eq!(strip_all_html("<em>Hi</em> there"), "Hi there");
    }

    #[test]
    fn truncation() {
        assert_eq!(truncate_words("one two three", 5), "one two three");
        assert_eq!(truncate_words("one two  three four", 2), "one two …");
    }
}
