//! A single conversion unit.
//!
//! Responsibilities:
//! - Parse the request's source with the parser for its data type
//! - Resolve and compile the top-level template, memoized by name until invalidated
//! - Render through the data type's adapter and post-process the resulting bundle
//! - Apply broadcast control signals to its caches
//!
//! Notes:
//! - A unit is single threaded and holds reference-counted template state, so it never leaves
//!   the thread that built it; see [`crate::pool::WorkerPool`]
//! - Its `TemplateCache` is a private projection of the shared template directory; a change on
//!   disk is only picked up after [`ControlSignal::TemplatesChanged`]

use crate::config::ConverterConfig;
use crate::constants::{
    ENCOMPASSING_ENCOUNTER_ID_VAR, ENCOUNTER_TIME_PERIOD_VAR, HL7V2_KEY, INLINE_TEMPLATE_NAME,
    MESSAGE_KEY, PATIENT_ID_VAR,
};
use crate::request::{ControlSignal, ConvertRequest, ConvertResponse, TemplateSource};
use crate::{ConvertError, ConvertResult};
use cda::{CdaDocument, EncounterMetadata, EncounterTimePeriod};
use converter_files::{FsTemplateStore, TemplateCache, TemplateStore};
use hl7v2::Message;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;
use template_engine::{
    AdapterRegistry, DataType, Hl7Node, Object, Template, TemplateAdapter, TemplateError, Value,
};
use tracing::debug;

pub struct ConversionUnit {
    config: ConverterConfig,
    cache: TemplateCache,
    adapters: AdapterRegistry,
    compiled: HashMap<(DataType, String), Rc<Template>>,
}

impl ConversionUnit {
    /// Create a unit reading templates from the configured directory.
    pub fn new(config: ConverterConfig) -> ConvertResult<Self> {
        let store = FsTemplateStore::new(config.template_dir())?;
        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Create a unit over an arbitrary template store.
    pub fn with_store(config: ConverterConfig, store: Arc<dyn TemplateStore>) -> Self {
        Self {
            config,
            cache: TemplateCache::new(store),
            adapters: AdapterRegistry::new(),
            compiled: HashMap::new(),
        }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Runs one request through parse, render, repair and post-processing.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::EmptySource`] for blank input, [`ConvertError::Format`] when the
    /// source does not parse, and [`ConvertError::Template`] for template lookup, compilation
    /// and evaluation failures.
    pub fn convert(&mut self, request: &ConvertRequest) -> ConvertResult<ConvertResponse> {
        if request.source.trim().is_empty() {
            return Err(ConvertError::EmptySource);
        }

        let adapter = self
            .adapters
            .get_or_create(request.data_type, request.partials.as_ref());
        let template = self.template(&adapter, &request.template)?;

        let started = Instant::now();
        let (context, data, message) = match request.data_type {
            DataType::Hl7v2 => {
                let message = Rc::new(Message::parse(&request.source)?);
                let mut msg = Object::new();
                msg.insert(
                    HL7V2_KEY.to_string(),
                    Value::Hl7(Hl7Node::Message(Rc::clone(&message))),
                );
                (wrap(Value::object(msg)), data_frame(request, None), Some(message))
            }
            DataType::Cda => {
                let document = CdaDocument::parse(&request.source)?;
                let data = data_frame(request, Some(document.encounter()));
                (wrap(Value::from_json(document.into_root())), data, None)
            }
        };
        debug!(data_type = %request.data_type, elapsed = ?started.elapsed(), "parsed source");

        let started = Instant::now();
        let rendered = adapter.render_json(&template, context, data, &mut self.cache)?;
        debug!(template = %template.name(), elapsed = ?started.elapsed(), "rendered template");

        let started = Instant::now();
        let fhir_resource = fhir::post_process(rendered, request.substitutions.as_ref());
        debug!(elapsed = ?started.elapsed(), "post-processed bundle");

        let unused_segments = message
            .as_ref()
            .filter(|_| request.report_unused_segments)
            .map(|m| m.unused_segments());
        let invalid_access = message
            .as_ref()
            .filter(|_| request.report_invalid_access)
            .map(|m| m.invalid_accesses());

        Ok(ConvertResponse {
            fhir_resource,
            unused_segments,
            invalid_access,
        })
    }

    /// Applies a broadcast signal.
    ///
    /// # Errors
    ///
    /// Returns [`ConvertError::Store`] when a new configuration points at an unusable template
    /// directory. The unit keeps its previous configuration in that case.
    pub fn apply(&mut self, signal: &ControlSignal) -> ConvertResult<()> {
        match signal {
            ControlSignal::TemplatesChanged => {}
            ControlSignal::ConstantsChanged(config) => {
                if config.template_dir() != self.config.template_dir() {
                    let store = FsTemplateStore::new(config.template_dir())?;
                    self.cache = TemplateCache::new(Arc::new(store));
                }
                self.config = config.clone();
            }
        }
        self.invalidate();
        Ok(())
    }

    fn invalidate(&mut self) {
        self.adapters.invalidate();
        self.compiled.clear();
        self.cache.clear();
    }

    fn template(
        &mut self,
        adapter: &TemplateAdapter,
        source: &TemplateSource,
    ) -> ConvertResult<Rc<Template>> {
        let name = match source {
            TemplateSource::Inline(body) => {
                return Ok(Rc::new(adapter.compile(INLINE_TEMPLATE_NAME, body)?));
            }
            TemplateSource::Stored(name) => name,
        };

        let key = (adapter.data_type(), name.clone());
        if let Some(template) = self.compiled.get(&key) {
            return Ok(Rc::clone(template));
        }

        let bytes = self
            .cache
            .get(&adapter.data_type().template_key(name))?
            .ok_or_else(|| TemplateError::TemplateNotFound(name.clone()))?
            .to_vec();
        let body = String::from_utf8(bytes).map_err(|e| TemplateError::Syntax {
            template: name.clone(),
            message: format!("template is not valid UTF-8: {e}"),
        })?;

        let template = Rc::new(adapter.compile(name, &body)?);
        debug!(data_type = %adapter.data_type(), template = %name, "compiled top-level template");
        self.compiled.insert(key, Rc::clone(&template));
        Ok(template)
    }
}

fn wrap(msg: Value) -> Value {
    let mut root = Object::new();
    root.insert(MESSAGE_KEY.to_string(), msg);
    Value::object(root)
}

/// Data variables for a render. Values on the request win over values read from the document.
fn data_frame(request: &ConvertRequest, document: Option<&EncounterMetadata>) -> Object {
    let mut data = Object::new();
    if let Some(patient_id) = &request.patient_id {
        data.insert(PATIENT_ID_VAR.to_string(), Value::from(patient_id.as_str()));
    }

    let period = request
        .encounter_time_period
        .as_ref()
        .or_else(|| document.and_then(|d| d.time_period.as_ref()));
    if let Some(period) = period {
        data.insert(ENCOUNTER_TIME_PERIOD_VAR.to_string(), time_period(period));
    }

    let encounter_id = request
        .encompassing_encounter_id
        .as_ref()
        .or_else(|| document.and_then(|d| d.encompassing_encounter_id.as_ref()));
    if let Some(id) = encounter_id {
        data.insert(ENCOMPASSING_ENCOUNTER_ID_VAR.to_string(), Value::from(id.as_str()));
    }
    data
}

fn time_period(period: &EncounterTimePeriod) -> Value {
    let mut map = Object::new();
    if let Some(start) = &period.start {
        map.insert("start".to_string(), Value::from(start.as_str()));
    }
    if let Some(end) = &period.end {
        map.insert("end".to_string(), Value::from(end.as_str()));
    }
    Value::object(map)
}
