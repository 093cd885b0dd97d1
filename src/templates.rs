//! Template rendering seam.
//!
//! Real HTML templating is an external collaborator: the framework only
//! needs "render this named template with this context". Plug a real engine
//! in by implementing [`TemplateEngine`]; [`DevTemplates`] is the built-in
//! stand-in that dumps the context so pages are inspectable without one.

use serde_json::{Map, Value};

use crate::error::Error;

/// Renders a named template with a JSON-object context into HTML.
pub trait TemplateEngine: Send + Sync {
    fn render(&self, name: &str, context: &Map<String, Value>) -> Result<String, Error>;
}

/// Development renderer: an HTML page carrying the template name and the
/// serialized context.
#[derive(Debug, Default)]
pub struct DevTemplates;

impl TemplateEngine for DevTemplates {
    fn render(&self, name: &str, context: &Map<String, Value>) -> Result<String, Error> {
        let json = serde_json::to_string_pretty(context).map_err(|e| Error::Template {
            name: name.to_owned(),
            message: e.to_string(),
        })?;
        Ok(format!(
            "<!DOCTYPE html><html><head><title>{name}</title></head>\
             <body><pre data-template=\"{name}\">{}</pre></body></html>",
            escape(&json)
        ))
    }
}

/// Minimal HTML escaping for text destined for an HTML body.
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Turns plain text into paragraph-per-line HTML with entities escaped.
/// Used for comment bodies (and, absent a markdown collaborator, blog
/// bodies too).
pub fn text_to_html(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| format!("<p>{}</p>", escape(line)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_to_html_escapes_and_paragraphs() {
        assert_eq!(
            text_to_html("a < b\n\n& more"),
            "<p>a &lt; b</p><p>&amp; more</p>"
        );
    }

    #[test]
    fn dev_templates_names_the_template() {
        let mut ctx = Map::new();
        ctx.insert("k".into(), Value::from(1));
        let html = DevTemplates.render("blogs.html", &ctx).unwrap();
        assert!(html.contains("data-template=\"blogs.html\""));
    }
}
