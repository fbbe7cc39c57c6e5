//! Per data type template adapters.

use crate::parser::Template;
use crate::preprocess::expand_hl7_shorthand;
use crate::render::Renderer;
use crate::value::{Object, Value};
use crate::{repair_output, DataType, TemplateError, TemplateResult};
use converter_files::TemplateCache;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Compiles templates for one data type and memoizes the partials they reference.
///
/// An adapter built with a non-empty override map resolves partials from that map only, so
/// a request can supply its own template set without touching the store.
#[derive(Debug)]
pub struct TemplateAdapter {
    data_type: DataType,
    overrides: HashMap<String, String>,
    partials: RefCell<HashMap<String, Rc<Template>>>,
}

impl TemplateAdapter {
    pub fn new(data_type: DataType, overrides: HashMap<String, String>) -> Self {
        Self {
            data_type,
            overrides,
            partials: RefCell::new(HashMap::new()),
        }
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// True when partials come from a request's override map.
    pub fn has_overrides(&self) -> bool {
        !self.overrides.is_empty()
    }

    /// Number of partials compiled so far.
    pub fn partial_count(&self) -> usize {
        self.partials.borrow().len()
    }

    /// Compiles `source`, applying the data type's preprocessing first.
    ///
    /// # Errors
    ///
    /// Returns the compilation error for malformed templates.
    pub fn compile(&self, name: &str, source: &str) -> TemplateResult<Template> {
        match self.data_type {
            DataType::Hl7v2 => Template::compile(name, &expand_hl7_shorthand(source), self.data_type),
            DataType::Cda => Template::compile(name, source, self.data_type),
        }
    }

    /// Resolves a partial by name, loading and compiling it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::PartialNotFound`] when neither the override map nor the store
    /// has the partial.
    pub(crate) fn partial(
        &self,
        name: &str,
        cache: &mut TemplateCache,
    ) -> TemplateResult<Rc<Template>> {
        if let Some(template) = self.partials.borrow().get(name) {
            return Ok(Rc::clone(template));
        }

        let source = if self.has_overrides() {
            self.overrides
                .get(name)
                .cloned()
                .ok_or_else(|| TemplateError::PartialNotFound(name.to_string()))?
        } else {
            let key = self.data_type.template_key(name);
            let bytes = cache
                .get(&key)?
                .ok_or_else(|| TemplateError::PartialNotFound(name.to_string()))?;
            String::from_utf8(bytes.to_vec()).map_err(|e| TemplateError::Syntax {
                template: name.to_string(),
                message: format!("template is not valid UTF-8: {e}"),
            })?
        };

        let template = Rc::new(self.compile(name, &source)?);
        tracing::debug!(data_type = %self.data_type, partial = name, "compiled partial");
        self.partials
            .borrow_mut()
            .insert(name.to_string(), Rc::clone(&template));
        Ok(template)
    }

    /// Renders `template` with `context` as both its context and `@root`.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a helper, partial lookup or nested evaluation.
    pub fn render(
        &self,
        template: &Template,
        context: Value,
        data: Object,
        cache: &mut TemplateCache,
    ) -> TemplateResult<String> {
        Renderer::new(self, cache, context.clone(), data).render(template, context)
    }

    /// Renders `template` and parses the repaired output.
    ///
    /// # Errors
    ///
    /// As [`TemplateAdapter::render`], plus [`TemplateError::InvalidJson`] when the output
    /// cannot be repaired into JSON.
    pub fn render_json(
        &self,
        template: &Template,
        context: Value,
        data: Object,
        cache: &mut TemplateCache,
    ) -> TemplateResult<serde_json::Value> {
        let raw = self.render(template, context, data, cache)?;
        Ok(repair_output(&raw)?)
    }
}

/// Hands out adapters, rebuilding them when their partial cache can no longer be trusted.
///
/// A request with overrides always gets a fresh adapter of its own and evicts the cached one
/// for its data type, so the next plain request starts fresh too.
#[derive(Debug, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<DataType, Rc<TemplateAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(
        &mut self,
        data_type: DataType,
        overrides: Option<&HashMap<String, String>>,
    ) -> Rc<TemplateAdapter> {
        if let Some(overrides) = overrides.filter(|o| !o.is_empty()) {
            self.adapters.remove(&data_type);
            tracing::debug!(%data_type, partials = overrides.len(), "using request templates");
            return Rc::new(TemplateAdapter::new(data_type, overrides.clone()));
        }

        Rc::clone(
            self.adapters
                .entry(data_type)
                .or_insert_with(|| Rc::new(TemplateAdapter::new(data_type, HashMap::new()))),
        )
    }

    /// Drops every cached adapter, for when the template store changed.
    pub fn invalidate(&mut self) {
        if !self.adapters.is_empty() {
            tracing::info!(adapters = self.adapters.len(), "invalidated template adapters");
        }
        self.adapters.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::cache;
    use serde_json::json;

    #[test]
    fn partials_are_loaded_once_per_adapter() {
        let mut cache = cache(&[("cda/Name.hbs", "\"{{name}}\"")]);
        let adapter = TemplateAdapter::new(DataType::Cda, HashMap::new());
        let template = adapter
            .compile("top", "{\"a\":{{>Name.hbs}},\"b\":{{>Name.hbs}}}")
            .expect("Failed to compile");
        let context = Value::from_json(json!({"name": "x"}));

        let json = adapter
            .render_json(&template, context, Object::new(), &mut cache)
            .expect("Failed to render");
        assert_eq!(json, json!({"a": "x", "b": "x"}));
        assert_eq!(adapter.partial_count(), 1);
    }

    #[test]
    fn overrides_replace_the_store() {
        let mut cache = cache(&[("cda/Name.hbs", "\"store\"")]);
        let overrides = HashMap::from([("Name.hbs".to_string(), "\"override\"".to_string())]);
        let adapter = TemplateAdapter::new(DataType::Cda, overrides);
        let template = adapter.compile("top", "{\"a\":{{>Name.hbs}}}").expect("Failed to compile");

        let json = adapter
            .render_json(&template, Value::Undefined, Object::new(), &mut cache)
            .expect("Failed to render");
        assert_eq!(json, json!({"a": "override"}));

        let missing = adapter.compile("top", "{{>Other.hbs}}").expect("Failed to compile");
        let err = adapter
            .render(&missing, Value::Undefined, Object::new(), &mut cache)
            .expect_err("override map has no Other.hbs");
        assert!(matches!(err, TemplateError::PartialNotFound(_)));
    }

    #[test]
    fn override_requests_force_fresh_adapters() {
        let mut registry = AdapterRegistry::new();
        let first = registry.get_or_create(DataType::Cda, None);
        let again = registry.get_or_create(DataType::Cda, Some(&HashMap::new()));
        assert!(Rc::ptr_eq(&first, &again));

        let overrides = HashMap::from([("a.hbs".to_string(), "{}".to_string())]);
        let scoped = registry.get_or_create(DataType::Cda, Some(&overrides));
        assert!(scoped.has_overrides());
        assert!(!Rc::ptr_eq(&first, &scoped));

        let after = registry.get_or_create(DataType::Cda, None);
        assert!(!Rc::ptr_eq(&first, &after));
        assert!(!after.has_overrides());

        let hl7 = registry.get_or_create(DataType::Hl7v2, None);
        registry.invalidate();
        assert!(!Rc::ptr_eq(&hl7, &registry.get_or_create(DataType::Hl7v2, None)));
    }
}
