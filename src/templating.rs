use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tinytemplate::TinyTemplate;

/// Renders `template` against `ctx`. Values are inserted verbatim: the
/// output is a model prompt, not HTML.
pub fn render<C: Serialize>(name: &str, template: &str, ctx: &C) -> Result<String> {
    let mut tt = TinyTemplate::new();
    tt.set_default_formatter(&tinytemplate::format_unescaped);
    tt.add_template(name, template)
        .with_context(|| format!("compiling template '{name}'"))?;
    let rendered = tt
        .render(name, ctx)
        .with_context(|| format!("rendering template '{name}'"))?;
    Ok(rendered)
}

pub fn load_template(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading template {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Ctx {
        name: &'static str,
        items: Vec<&'static str>,
    }

    #[test]
    fn renders_without_html_escaping() {
        let ctx = Ctx {
            name: "<Mara & Jun>",
            items: vec!["a", "b"],
        };
        let out = render("t", "Hi {name}:{{ for i in items }} {i}{{ endfor }}", &ctx).unwrap();
        assert_eq!(out, "Hi <Mara & Jun>: a b");
    }

    #[test]
    fn unknown_field_is_an_error() {
        let ctx = Ctx {
            name: "x",
            items: vec![],
        };
        assert!(render("t", "{nope}", &ctx).is_err());
    }
}
