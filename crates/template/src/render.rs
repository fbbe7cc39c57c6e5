//! Template evaluation.
//!
//! A [`Renderer`] lives for one top-level render. It owns the `@root` value and the request's
//! data variables, and it borrows the adapter that resolves partials and the cache partials
//! are loaded from. Nested scopes created by blocks are plain stack values chained through
//! `parent`, which is what `../` walks.

use crate::adapter::TemplateAdapter;
use crate::ast::{Block, BlockKind, Call, Expr, Node, Partial, PathExpr};
use crate::helpers::null_flavor::all_values_null_flavor;
use crate::helpers::{HelperContext, HelperError};
use crate::parser::Template;
use crate::value::{Hl7Node, Object, Value};
use crate::{repair_output, DataType, TemplateError, TemplateResult, MAX_RENDER_DEPTH};
use converter_files::TemplateCache;

pub(crate) struct Renderer<'a> {
    adapter: &'a TemplateAdapter,
    cache: &'a mut TemplateCache,
    root: Value,
    data: Object,
    depth: usize,
}

/// One level of block nesting.
struct Scope<'s> {
    context: Value,
    parent: Option<&'s Scope<'s>>,
    /// Block-local data variables such as `@index`.
    data: Object,
}

impl<'s> Scope<'s> {
    fn root(context: Value) -> Self {
        Self {
            context,
            parent: None,
            data: Object::new(),
        }
    }

    fn child(&'s self, context: Value, data: Object) -> Self {
        Self {
            context,
            parent: Some(self),
            data,
        }
    }

    fn ancestor(&self, levels: usize) -> &Scope<'s> {
        let mut scope = self;
        for _ in 0..levels {
            match scope.parent {
                Some(parent) => scope = parent,
                None => break,
            }
        }
        scope
    }
}

impl<'a> Renderer<'a> {
    pub(crate) fn new(
        adapter: &'a TemplateAdapter,
        cache: &'a mut TemplateCache,
        root: Value,
        data: Object,
    ) -> Self {
        Self {
            adapter,
            cache,
            root,
            data,
            depth: 0,
        }
    }

    pub(crate) fn data_type(&self) -> DataType {
        self.adapter.data_type()
    }

    /// Renders `template` against `context`, returning the raw output text.
    pub(crate) fn render(&mut self, template: &Template, context: Value) -> TemplateResult<String> {
        let mut out = String::new();
        self.nodes(template.nodes(), &Scope::root(context), &mut out)?;
        Ok(out)
    }

    /// Renders the named partial with `context` as both its context and `@root`, and parses
    /// the repaired output.
    pub(crate) fn evaluate(
        &mut self,
        name: &str,
        context: Value,
    ) -> TemplateResult<serde_json::Value> {
        let template = self.adapter.partial(name, self.cache)?;
        let previous_root = std::mem::replace(&mut self.root, context.clone());
        let raw = self.nested(|renderer| renderer.render(&template, context));
        self.root = previous_root;
        Ok(repair_output(&raw?)?)
    }

    /// Runs `f` one level deeper, failing once nesting passes [`MAX_RENDER_DEPTH`].
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> TemplateResult<T>,
    ) -> TemplateResult<T> {
        if self.depth >= MAX_RENDER_DEPTH {
            return Err(TemplateError::DepthExceeded(MAX_RENDER_DEPTH));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn nodes(&mut self, nodes: &[Node], scope: &Scope<'_>, out: &mut String) -> TemplateResult<()> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Mustache(expr) => {
                    out.push_str(&escape_expression(&self.expr(expr, scope)?.to_text()))
                }
                Node::Raw(expr) => out.push_str(&self.expr(expr, scope)?.to_text()),
                Node::Block(block) => self.block(block, scope, out)?,
                Node::Partial(partial) => self.partial(partial, scope, out)?,
            }
        }
        Ok(())
    }

    fn block(&mut self, block: &Block, scope: &Scope<'_>, out: &mut String) -> TemplateResult<()> {
        let value = self.expr(&block.param, scope)?;
        match block.kind {
            BlockKind::If | BlockKind::Unless => {
                let include_zero = self.hash(&block.hash, scope)?
                    .get("includeZero")
                    .is_some_and(Value::is_truthy);
                let mut holds = condition_holds(&value, include_zero);
                if block.kind == BlockKind::Unless {
                    holds = !holds;
                }
                let branch = if holds { &block.body } else { &block.inverse };
                self.nodes(branch, scope, out)
            }
            BlockKind::With => {
                if value.is_empty() {
                    return self.nodes(&block.inverse, scope, out);
                }
                self.nodes(&block.body, &scope.child(value, Object::new()), out)
            }
            BlockKind::Each => self.each(block, value, scope, out),
        }
    }

    fn each(
        &mut self,
        block: &Block,
        value: Value,
        scope: &Scope<'_>,
        out: &mut String,
    ) -> TemplateResult<()> {
        let items: Vec<(Value, Value)> = match &value {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| (Value::from(i), item.clone()))
                .collect(),
            Value::Object(map) => map
                .iter()
                .map(|(key, item)| (Value::from(key.as_str()), item.clone()))
                .collect(),
            Value::Hl7(node) => node
                .repeats()
                .unwrap_or_default()
                .into_iter()
                .enumerate()
                .map(|(i, item)| (Value::from(i), item))
                .collect(),
            _ => Vec::new(),
        };
        if items.is_empty() {
            return self.nodes(&block.inverse, scope, out);
        }

        let last = items.len() - 1;
        for (index, (key, item)) in items.into_iter().enumerate() {
            let mut data = Object::new();
            data.insert("index".to_string(), Value::from(index));
            data.insert("key".to_string(), key);
            data.insert("first".to_string(), Value::Bool(index == 0));
            data.insert("last".to_string(), Value::Bool(index == last));
            self.nodes(&block.body, &scope.child(item, data), out)?;
        }
        Ok(())
    }

    fn partial(
        &mut self,
        partial: &Partial,
        scope: &Scope<'_>,
        out: &mut String,
    ) -> TemplateResult<()> {
        let base = match &partial.context {
            Some(expr) => self.expr(expr, scope)?,
            None => scope.context.clone(),
        };
        let hash = self.hash(&partial.hash, scope)?;
        let context = if hash.is_empty() {
            base
        } else {
            let mut merged = base.as_object().cloned().unwrap_or_default();
            merged.extend(hash);
            Value::object(merged)
        };

        let template = self.adapter.partial(&partial.name, self.cache)?;
        let rendered = self.nested(|renderer| renderer.render(&template, context))?;
        out.push_str(&rendered);
        Ok(())
    }

    fn hash(&mut self, pairs: &[(String, Expr)], scope: &Scope<'_>) -> TemplateResult<Object> {
        pairs
            .iter()
            .map(|(key, expr)| Ok((key.clone(), self.expr(expr, scope)?)))
            .collect()
    }

    fn expr(&mut self, expr: &Expr, scope: &Scope<'_>) -> TemplateResult<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Path(path) => Ok(self.lookup(path, scope)),
            Expr::Call(call) => self.call(call, scope),
        }
    }

    fn call(&mut self, call: &Call, scope: &Scope<'_>) -> TemplateResult<Value> {
        let args = call
            .params
            .iter()
            .map(|param| self.expr(param, scope))
            .collect::<TemplateResult<Vec<_>>>()?;
        let hash = self.hash(&call.hash, scope)?;

        (call.helper)(&args, &mut HelperContext::new(self, hash)).map_err(|err| match err {
            HelperError::Template(inner) => *inner,
            source => TemplateError::Helper {
                name: call.name.clone(),
                source,
            },
        })
    }

    fn lookup(&self, path: &PathExpr, scope: &Scope<'_>) -> Value {
        let scope = scope.ancestor(path.parents);
        let mut parts = path.parts.iter();

        let mut value = if path.data {
            match parts.next().map(String::as_str) {
                Some("root") => self.root.clone(),
                Some(name) => self.data_variable(name, scope),
                None => Value::Undefined,
            }
        } else {
            scope.context.clone()
        };

        for part in parts {
            value = value.get(part);
        }
        value
    }

    /// Block-local variables shadow outer ones; request data comes last.
    fn data_variable(&self, name: &str, scope: &Scope<'_>) -> Value {
        let mut current = Some(scope);
        while let Some(s) = current {
            if let Some(value) = s.data.get(name) {
                return value.clone();
            }
            current = s.parent;
        }
        self.data.get(name).cloned().unwrap_or_default()
    }
}

/// `{{#if}}` truthiness: Handlebars' rule, then null-flavor placeholders count as false.
fn condition_holds(value: &Value, include_zero: bool) -> bool {
    touch(value);
    if (!include_zero && !value.is_truthy()) || value.is_empty() {
        return false;
    }
    !all_values_null_flavor(value)
}

/// Records every segment reachable from `value` as read, so testing a segment for
/// presence counts as using it.
fn touch(value: &Value) {
    match value {
        Value::Hl7(Hl7Node::Segment(segment)) => segment.mark_all_accessed(),
        Value::Array(items) => items.iter().for_each(touch),
        Value::Object(map) => map.values().for_each(touch),
        _ => {}
    }
}

/// Handlebars' output escaping. A quote that arrives JSON-escaped, as HL7 v2 values carry it,
/// is replaced together with its backslash; other backslash pairs pass through untouched.
fn escape_expression(text: &str) -> String {
    if !text.contains(['&', '<', '>', '"', '\'', '`', '=']) {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len() + 16);
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('"') => out.push_str("&quot;"),
                Some(next) => {
                    out.push('\\');
                    push_escaped(&mut out, next);
                }
                None => out.push('\\'),
            },
            other => push_escaped(&mut out, other),
        }
    }
    out
}

fn push_escaped(out: &mut String, c: char) {
    match c {
        '&' => out.push_str("&amp;"),
        '<' => out.push_str("&lt;"),
        '>' => out.push_str("&gt;"),
        '"' => out.push_str("&quot;"),
        '\'' => out.push_str("&#x27;"),
        '`' => out.push_str("&#x60;"),
        '=' => out.push_str("&#x3D;"),
        other => out.push(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::cache;
    use hl7v2::Message;
    use serde_json::json;
    use std::collections::HashMap;
    use std::rc::Rc;

    fn render_with(
        data_type: DataType,
        source: &str,
        context: serde_json::Value,
        partials: &[(&str, &str)],
    ) -> TemplateResult<String> {
        let adapter = TemplateAdapter::new(data_type, HashMap::new());
        let template = adapter.compile("test", source)?;
        let mut cache = cache(partials);
        let context = Value::from_json(context);
        let mut renderer = Renderer::new(&adapter, &mut cache, context.clone(), Object::new());
        renderer.render(&template, context)
    }

    fn render(source: &str, context: serde_json::Value) -> String {
        render_with(DataType::Cda, source, context, &[]).expect("Failed to render")
    }

    #[test]
    fn if_treats_null_flavor_objects_as_false() {
        let source = "{{#if a}}yes{{else}}no{{/if}}";
        assert_eq!(render(source, json!({"a": {"nullFlavor": "UNK"}})), "no");
        assert_eq!(render(source, json!({"a": {"code": {"nullFlavor": "NI"}}})), "no");
        assert_eq!(render(source, json!({"a": {"code": "1"}})), "yes");
        assert_eq!(render(source, json!({"a": []})), "no");
        assert_eq!(render(source, json!({"a": 0})), "no");
        assert_eq!(render("{{#if a includeZero=true}}yes{{/if}}", json!({"a": 0})), "yes");
        assert_eq!(render("{{#unless a}}none{{/unless}}", json!({"a": {"nullFlavor": "UNK"}})), "none");
    }

    #[test]
    fn else_if_chains_pick_the_first_match() {
        let source = "{{#if a}}A{{else if b}}B{{else}}C{{/if}}";
        assert_eq!(render(source, json!({"b": true})), "B");
        assert_eq!(render(source, json!({})), "C");
    }

    #[test]
    fn each_exposes_position_variables() {
        let source = "{{#each items}}{{@index}}:{{this}}{{#if @last}}.{{else}},{{/if}}{{/each}}";
        assert_eq!(render(source, json!({"items": ["a", "b"]})), "0:a,1:b.");

        let keys = "{{#each obj}}{{@key}}={{this}};{{/each}}";
        assert_eq!(render(keys, json!({"obj": {"x": 1, "y": 2}})), "x=1;y=2;");

        let empty = "{{#each items}}x{{else}}empty{{/each}}";
        assert_eq!(render(empty, json!({"items": []})), "empty");
    }

    #[test]
    fn with_and_parent_paths() {
        let source = "{{#with person}}{{name}} of {{../org}}{{else}}nobody{{/with}}";
        assert_eq!(render(source, json!({"person": {"name": "Ann"}, "org": "Acme"})), "Ann of Acme");
        assert_eq!(render(source, json!({"org": "Acme"})), "nobody");
        assert_eq!(render("{{#each xs}}{{@root.t}}{{/each}}", json!({"xs": [1, 2], "t": "!"})), "!!");
    }

    #[test]
    fn partials_extend_the_context_with_their_hash() {
        let output = render_with(
            DataType::Cda,
            "[{{>Utils/Item.hbs label='x'}}]",
            json!({"value": 7}),
            &[("cda/Utils/Item.hbs", "{{label}}={{value}}")],
        )
        .expect("Failed to render");
        assert_eq!(output, "[x=7]");
    }

    #[test]
    fn missing_partial_names_the_partial() {
        let err = render_with(DataType::Cda, "{{>Missing.hbs}}", json!({}), &[])
            .expect_err("missing partial must fail");
        assert!(matches!(err, TemplateError::PartialNotFound(ref name) if name == "Missing.hbs"));
    }

    #[test]
    fn recursive_partials_hit_the_depth_limit() {
        let err = render_with(
            DataType::Cda,
            "{{>Loop.hbs}}",
            json!({}),
            &[("cda/Loop.hbs", "x{{>Loop.hbs}}")],
        )
        .expect_err("recursion must fail");
        assert!(matches!(err, TemplateError::DepthExceeded(MAX_RENDER_DEPTH)));
    }

    #[test]
    fn helper_errors_carry_the_helper_name() {
        let err = render_with(DataType::Cda, "{{toJsonString (assert false 'boom')}}", json!({}), &[])
            .expect_err("assert must fail");
        assert_eq!(err.to_string(), "helper \"assert\" : boom");
    }

    #[test]
    fn hl7_shorthand_reads_fields_and_records_coverage() {
        let message = Rc::new(
            Message::parse("MSH|^~\\&|LAB\rPID|1||123||Doe^Jane").expect("Failed to parse message"),
        );
        let adapter = TemplateAdapter::new(DataType::Hl7v2, HashMap::new());
        let template = adapter
            .compile(
                "test",
                "{{#with (getFirstSegments msg.v2 'PID')}}{{PID-5-2}} {{PID-5-1}}{{/with}}",
            )
            .expect("Failed to compile");

        let mut msg = Object::new();
        msg.insert("v2".to_string(), Value::Hl7(Hl7Node::Message(Rc::clone(&message))));
        let mut root = Object::new();
        root.insert("msg".to_string(), Value::object(msg));
        let root = Value::object(root);

        let mut cache = cache(&[]);
        let mut renderer = Renderer::new(&adapter, &mut cache, root.clone(), Object::new());
        assert_eq!(renderer.render(&template, root).expect("Failed to render"), "Jane Doe");

        let pid = &message.segments()[1];
        assert!(pid.coverage().is_accessed(5));
        assert!(!pid.coverage().is_accessed(3));
    }

    #[test]
    fn double_stash_escapes_and_triple_stash_does_not() {
        let context = json!({"x": "say \"hi\" & <go> a=b 'q'"});
        assert_eq!(
            render("{{x}}", context.clone()),
            "say &quot;hi&quot; &amp; &lt;go&gt; a&#x3D;b &#x27;q&#x27;"
        );
        assert_eq!(render("{{{x}}}", context), "say \"hi\" & <go> a=b 'q'");
    }

    #[test]
    fn quoted_cda_text_renders_to_valid_json() {
        let adapter = TemplateAdapter::new(DataType::Cda, HashMap::new());
        let template = adapter.compile("test", r#"{"a":"{{x}}"}"#).expect("Failed to compile");
        let context = Value::from_json(json!({"x": "say \"hi\""}));
        let mut cache = cache(&[]);
        let json = adapter
            .render_json(&template, context, Object::new(), &mut cache)
            .expect("Failed to render");
        assert_eq!(json, json!({"a": "say &quot;hi&quot;"}));
    }

    #[test]
    fn json_escaped_quotes_collapse_into_one_entity() {
        assert_eq!(escape_expression(r#"a\"b\\c\nd"#), r"a&quot;b\\c\nd");
    }

    #[test]
    fn request_data_is_visible_as_variables() {
        let adapter = TemplateAdapter::new(DataType::Cda, HashMap::new());
        let template = adapter.compile("test", "{{@patientId}}|{{@missing}}").expect("Failed to compile");
        let mut data = Object::new();
        data.insert("patientId".to_string(), Value::from("p-1"));
        let mut cache = cache(&[]);
        let mut renderer = Renderer::new(&adapter, &mut cache, Value::Undefined, data);
        assert_eq!(renderer.render(&template, Value::Undefined).expect("Failed to render"), "p-1|");
    }
}
