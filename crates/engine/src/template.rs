//! `{placeholder}` substitution for notification templates.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use salon_common::types::RenderedMessage;

/// Placeholder names are short identifiers; anything longer is left as text.
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z0-9_]{1,40})\}").expect("placeholder pattern is valid")
});

/// Replace every known `{name}` in `text`. Unknown placeholders stay as written.
pub fn render<V: AsRef<str>>(text: &str, vars: &HashMap<&str, V>) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures| match vars.get(&caps[1]) {
            Some(value) => value.as_ref().to_string(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

pub fn render_template<V: AsRef<str>>(
    title: &str,
    body: &str,
    vars: &HashMap<&str, V>,
) -> RenderedMessage {
    RenderedMessage {
        title: render(title, vars),
        body: render(body, vars),
    }
}
