use chrono::{SecondsFormat, Utc};
use regex::{Captures, Regex};
use serde_json::{Map, Value, json};

/// Everything a template can reference: merged app configuration, the
/// connector-type-keyed data bag, and timestamps computed once per render.
pub struct TemplateContext {
    root: Value,
    current_date: String,
    current_datetime: String,
}

impl TemplateContext {
    pub fn new(config: Map<String, Value>, connectors: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self::with_timestamps(
            config,
            connectors,
            now.format("%Y-%m-%d").to_string(),
            now.to_rfc3339_opts(SecondsFormat::Millis, true),
        )
    }

    /// Fixed-timestamp constructor, used by tests for deterministic output.
    pub fn with_timestamps(
        config: Map<String, Value>,
        connectors: Map<String, Value>,
        current_date: String,
        current_datetime: String,
    ) -> Self {
        let root = json!({
            "config": config,
            "connectors": connectors,
            "currentDate": current_date,
            "currentDateTime": current_datetime,
        });
        Self {
            root,
            current_date,
            current_datetime,
        }
    }

    /// Walk a dotted path through the context. Missing or non-object
    /// intermediate levels resolve to None, never an error.
    pub fn resolve(&self, path: &str) -> Option<&Value> {
        let mut current = &self.root;
        for part in path.split('.') {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    fn config(&self) -> &Map<String, Value> {
        self.root["config"].as_object().expect("config is an object")
    }

    fn connectors(&self) -> &Map<String, Value> {
        self.root["connectors"]
            .as_object()
            .expect("connectors is an object")
    }
}

/// Render a prompt template. Placeholder passes are applied in a fixed
/// order: timestamps, `config.<key>`, `connectors.<type>.<key>`, then
/// `{{#if path}}` blocks, then `{{#each path}}` blocks. Placeholders for
/// absent config keys are deliberately left unexpanded.
pub fn render(template: &str, ctx: &TemplateContext) -> String {
    let mut prompt = template.to_string();

    prompt = prompt.replace("{{currentDate}}", &ctx.current_date);
    prompt = prompt.replace("{{currentDateTime}}", &ctx.current_datetime);

    for (key, value) in ctx.config() {
        let placeholder = format!("{{{{config.{}}}}}", key);
        prompt = prompt.replace(&placeholder, &format_value(value));
    }

    for (connector_type, data) in ctx.connectors() {
        let Some(fields) = data.as_object() else {
            continue;
        };
        for (key, value) in fields {
            let placeholder = format!("{{{{connectors.{}.{}}}}}", connector_type, key);
            prompt = prompt.replace(&placeholder, &format_value(value));
        }
    }

    prompt = expand_conditionals(&prompt, ctx);
    expand_each_blocks(&prompt, ctx)
}

/// String form of a context value: null renders empty, structured values
/// render as pretty JSON, scalars via their natural form.
fn format_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Object(_) | Value::Array(_) => {
            serde_json::to_string_pretty(value).unwrap_or_default()
        }
    }
}

/// Truthiness for `{{#if}}`: null, absent, empty string, numeric zero and
/// false are falsy; everything else (including empty arrays) is truthy.
fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

fn expand_conditionals(template: &str, ctx: &TemplateContext) -> String {
    let re = Regex::new(r"(?s)\{\{#if\s+([\w.]+)\}\}(.*?)\{\{/if\}\}").unwrap();
    re.replace_all(template, |caps: &Captures| {
        if is_truthy(ctx.resolve(&caps[1])) {
            caps[2].to_string()
        } else {
            String::new()
        }
    })
    .into_owned()
}

fn expand_each_blocks(template: &str, ctx: &TemplateContext) -> String {
    let re = Regex::new(r"(?s)\{\{#each\s+([\w.]+)\}\}(.*?)\{\{/each\}\}").unwrap();
    re.replace_all(template, |caps: &Captures| {
        let Some(Value::Array(items)) = ctx.resolve(&caps[1]) else {
            return String::new();
        };
        items
            .iter()
            .enumerate()
            .map(|(index, item)| expand_item(&caps[2], item, index))
            .collect::<Vec<_>>()
            .join("\n")
    })
    .into_owned()
}

fn expand_item(content: &str, item: &Value, index: usize) -> String {
    let mut expanded = content.replace("{{this}}", &format_value(item));
    expanded = expanded.replace("{{@index}}", &index.to_string());
    if let Some(fields) = item.as_object() {
        for (key, value) in fields {
            let placeholder = format!("{{{{this.{}}}}}", key);
            expanded = expanded.replace(&placeholder, &format_value(value));
        }
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(config: Value, connectors: Value) -> TemplateContext {
        TemplateContext::with_timestamps(
            config.as_object().cloned().unwrap_or_default(),
            connectors.as_object().cloned().unwrap_or_default(),
            "2026-08-31".to_string(),
            "2026-08-31T09:30:00.000Z".to_string(),
        )
    }

    #[test]
    fn template_without_placeholders_is_identity() {
        let c = ctx(json!({"topic": "news"}), json!({}));
        let template = "Summarize today's items.\nBe brief.";
        assert_eq!(render(template, &c), template);
    }

    #[test]
    fn substitutes_timestamps() {
        let c = ctx(json!({}), json!({}));
        assert_eq!(
            render("Date: {{currentDate}} at {{currentDateTime}}", &c),
            "Date: 2026-08-31 at 2026-08-31T09:30:00.000Z"
        );
    }

    #[test]
    fn substitutes_config_values_by_kind() {
        let c = ctx(
            json!({"topic": "rust", "limit": 5, "verbose": false, "filters": {"lang": "en"}, "note": null}),
            json!({}),
        );
        assert_eq!(render("{{config.topic}}", &c), "rust");
        assert_eq!(render("{{config.limit}}", &c), "5");
        assert_eq!(render("{{config.verbose}}", &c), "false");
        assert_eq!(render("{{config.note}}", &c), "");
        assert_eq!(
            render("{{config.filters}}", &c),
            "{\n  \"lang\": \"en\"\n}"
        );
    }

    #[test]
    fn absent_config_key_stays_unexpanded() {
        let c = ctx(json!({"present": "x"}), json!({}));
        assert_eq!(render("{{config.missing}}", &c), "{{config.missing}}");
    }

    #[test]
    fn substitutes_connector_fields() {
        let c = ctx(
            json!({}),
            json!({"gmail": {"messages": [{"id": "m1"}]}}),
        );
        let out = render("Inbox: {{connectors.gmail.messages}}", &c);
        assert!(out.starts_with("Inbox: ["));
        assert!(out.contains("\"m1\""));
    }

    #[test]
    fn conditional_keeps_content_for_truthy_values() {
        let c = ctx(json!({"flag": true, "name": "x", "count": 2}), json!({}));
        assert_eq!(render("{{#if config.flag}}yes{{/if}}", &c), "yes");
        assert_eq!(render("{{#if config.name}}yes{{/if}}", &c), "yes");
        assert_eq!(render("{{#if config.count}}yes{{/if}}", &c), "yes");
    }

    #[test]
    fn conditional_drops_content_for_falsy_values() {
        let c = ctx(
            json!({"off": false, "empty": "", "zero": 0, "nothing": null}),
            json!({}),
        );
        for path in ["off", "empty", "zero", "nothing", "missing"] {
            let template = format!("{{{{#if config.{}}}}}hidden{{{{/if}}}}", path);
            assert_eq!(render(&template, &c), "", "path config.{}", path);
        }
    }

    #[test]
    fn each_repeats_content_per_element() {
        let c = ctx(
            json!({}),
            json!({"gmail": {"messages": [{"subject": "a"}, {"subject": "b"}]}}),
        );
        let out = render(
            "{{#each connectors.gmail.messages}}{{@index}}: {{this.subject}}{{/each}}",
            &c,
        );
        assert_eq!(out, "0: a\n1: b");
    }

    #[test]
    fn each_substitutes_this_for_scalar_elements() {
        let c = ctx(json!({"tags": ["x", "y"]}), json!({}));
        let out = render("{{#each config.tags}}- {{this}}{{/each}}", &c);
        assert_eq!(out, "- x\n- y");
    }

    #[test]
    fn each_over_empty_or_non_sequence_renders_nothing() {
        let c = ctx(json!({"empty": [], "scalar": 3}), json!({}));
        assert_eq!(render("{{#each config.empty}}x{{/each}}", &c), "");
        assert_eq!(render("{{#each config.scalar}}x{{/each}}", &c), "");
        assert_eq!(render("{{#each config.missing}}x{{/each}}", &c), "");
    }

    #[test]
    fn dotted_path_through_non_object_resolves_to_none() {
        let c = ctx(json!({"scalar": 3}), json!({}));
        assert!(c.resolve("config.scalar.deeper").is_none());
        assert!(c.resolve("connectors.gmail.messages").is_none());
        assert_eq!(c.resolve("config.scalar"), Some(&json!(3)));
    }

    #[test]
    fn block_passes_run_after_substitution_passes() {
        let c = ctx(json!({"name": "Ada"}), json!({}));
        let out = render("{{#if config.name}}Hello {{config.name}}{{/if}}", &c);
        assert_eq!(out, "Hello Ada");
    }
}
