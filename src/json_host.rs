//! A `serde_json::Value`-backed reference [`Callbacks`] implementation.
//!
//! The compiler and evaluator deliberately carry no concrete value model
//! (the `udata` tokens threaded through the VM are opaque); this module is
//! the crate's own reference host on top of them. Embedders with their own
//! data model implement [`Callbacks`] directly instead.

use serde_json::Value;

use crate::error::EvalError;
use crate::evaluator::{self, Callbacks, RenderError, Section, UserData};
use crate::program::Program;
use crate::debug::EvalTracer;

struct Ctx {
    value: Value,
    parent: Option<usize>,
}

/// Resolves `{{name}}` lookups (including `a.b.c` dotted paths and
/// numeric array indices) against a stack of `serde_json::Value` contexts,
/// falling back to enclosing contexts the way Mustache's context stack
/// does for names a section's own value doesn't carry.
pub struct JsonHost {
    out: String,
    arena: Vec<Ctx>,
}

impl JsonHost {
    /// Create a host rooted at `root`, returning it along with the
    /// `UserData` token [`evaluator::evaluate`] should be called with.
    pub fn new(root: Value) -> (Self, UserData) {
        let host = JsonHost {
            out: String::new(),
            arena: vec![Ctx { value: root, parent: None }],
        };
        (host, (0, 0))
    }

    /// Consume the host, returning the rendered output collected so far.
    pub fn into_output(self) -> String {
        self.out
    }

    fn resolve(&self, udata: UserData, name: &str) -> Option<&Value> {
        let mut idx = Some(udata.0 as usize);
        while let Some(i) = idx {
            let ctx = &self.arena[i];
            if let Some(value) = lookup_path(&ctx.value, name) {
                return Some(value);
            }
            idx = ctx.parent;
        }
        None
    }

    fn push(&mut self, value: Value, parent: Option<usize>) -> usize {
        let idx = self.arena.len();
        self.arena.push(Ctx { value, parent });
        idx
    }
}

fn lookup_path<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    if path.is_empty() || path == "." {
        return Some(value);
    }
    let mut cur = value;
    for part in path.split('.') {
        cur = match cur {
            Value::Object(map) => map.get(part)?,
            Value::Array(arr) => arr.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(_) => true,
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn html_escape(input: &str, out: &mut String) {
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
}

impl Callbacks for JsonHost {
    type Error = std::convert::Infallible;

    fn on_text(&mut self, text: &str) -> Result<(), Self::Error> {
        self.out.push_str(text);
        Ok(())
    }

    fn on_arg(&mut self, section: &Section<'_>, name: &str, escape: bool) -> Result<(), Self::Error> {
        let rendered = self.resolve(section.udata(), name).map(stringify).unwrap_or_default();
        if escape {
            html_escape(&rendered, &mut self.out);
        } else {
            self.out.push_str(&rendered);
        }
        Ok(())
    }

    fn on_section_test(
        &mut self,
        section: &Section<'_>,
        name: &str,
        inverted: bool,
    ) -> Result<(usize, UserData), Self::Error> {
        let udata = section.udata();
        let parent_idx = udata.0 as usize;
        let resolved = self.resolve(udata, name).cloned();
        let (count, value) = match resolved {
            Some(Value::Array(arr)) => {
                let count = if inverted {
                    usize::from(arr.is_empty())
                } else {
                    arr.len()
                };
                (count, Value::Array(arr))
            }
            Some(other) => {
                let is_truthy = truthy(&other);
                let count = if inverted {
                    usize::from(!is_truthy)
                } else {
                    usize::from(is_truthy)
                };
                (count, other)
            }
            None => (usize::from(inverted), Value::Null),
        };
        let idx = self.push(value, Some(parent_idx));
        Ok((count, (idx as u64, 0)))
    }

    fn on_section_start(&mut self, section: &Section<'_>, index: usize) -> Result<UserData, Self::Error> {
        let udata = section.udata();
        let idx = udata.0 as usize;
        if let Value::Array(arr) = &self.arena[idx].value {
            if let Some(item) = arr.get(index).cloned() {
                let parent = self.arena[idx].parent;
                let new_idx = self.push(item, parent);
                return Ok((new_idx as u64, 0));
            }
        }
        Ok(udata)
    }

    fn on_formatting_error(&mut self, _error: &EvalError) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Render `program` against a JSON value in one call, using [`JsonHost`] as
/// the callback implementation.
pub fn render_to_string(
    program: &Program,
    root: Value,
    tracer: EvalTracer,
) -> Result<String, RenderError<std::convert::Infallible>> {
    let (mut host, root_udata) = JsonHost::new(root);
    evaluator::evaluate(program, &mut host, root_udata, tracer)?;
    Ok(host.into_output())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::debug::CompileTracer;
    use crate::resolver::InMemoryResolver;
    use serde_json::json;

    fn render(template: &str, data: Value) -> String {
        let resolver = InMemoryResolver::new();
        let program = Compiler::compile(
            "root",
            Some(template.as_bytes()),
            &resolver,
            CompileTracer::new(false),
        )
        .unwrap();
        render_to_string(&program, data, EvalTracer::new(false)).unwrap()
    }

    #[test]
    fn renders_plain_variable() {
        assert_eq!(render("Hi {{name}}!", json!({"name": "Ada"})), "Hi Ada!");
    }

    #[test]
    fn escapes_html_by_default() {
        assert_eq!(render("{{x}}", json!({"x": "<b>"})), "&lt;b&gt;");
    }

    #[test]
    fn triple_mustache_is_unescaped() {
        assert_eq!(render("{{{x}}}", json!({"x": "<b>"})), "<b>");
    }

    #[test]
    fn section_over_array_iterates() {
        let out = render("{{#items}}{{.}},{{/items}}", json!({"items": ["a", "b", "c"]}));
        assert_eq!(out, "a,b,c,");
    }

    #[test]
    fn inverted_section_renders_on_empty_array() {
        let out = render("{{^items}}none{{/items}}", json!({"items": []}));
        assert_eq!(out, "none");
    }

    #[test]
    fn nested_object_section_exposes_its_fields() {
        let out = render("{{#user}}{{name}}{{/user}}", json!({"user": {"name": "Grace"}}));
        assert_eq!(out, "Grace");
    }

    #[test]
    fn missing_name_renders_empty() {
        assert_eq!(render("[{{missing}}]", json!({})), "[]");
    }

    #[test]
    fn section_falls_back_to_enclosing_scope() {
        let out = render(
            "{{#items}}{{outer}}-{{.}} {{/items}}",
            json!({"outer": "O", "items": ["a", "b"]}),
        );
        assert_eq!(out, "O-a O-b ");
    }
}
