//! Messages crossing the pool boundary.
//!
//! Everything here is plain owned data so it can be sent to a conversion unit thread.

use crate::config::ConverterConfig;
use cda::EncounterTimePeriod;
use hl7v2::{InvalidAccess, UnusedSegment};
use serde::Serialize;
use std::collections::HashMap;
use template_engine::DataType;

/// Which template a request renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    /// A template body supplied with the request. Never cached.
    Inline(String),
    /// A template name relative to the data type's directory in the store.
    Stored(String),
}

#[derive(Debug, Clone)]
pub struct ConvertRequest {
    pub data_type: DataType,
    pub source: String,
    pub template: TemplateSource,
    /// Partials to use instead of the store for this request only.
    pub partials: Option<HashMap<String, String>>,
    pub patient_id: Option<String>,
    pub encounter_time_period: Option<EncounterTimePeriod>,
    pub encompassing_encounter_id: Option<String>,
    /// `%%N%%` placeholder values applied to the output bundle.
    pub substitutions: Option<HashMap<String, String>>,
    pub report_unused_segments: bool,
    pub report_invalid_access: bool,
}

impl ConvertRequest {
    pub fn new(data_type: DataType, source: impl Into<String>, template: TemplateSource) -> Self {
        Self {
            data_type,
            source: source.into(),
            template,
            partials: None,
            patient_id: None,
            encounter_time_period: None,
            encompassing_encounter_id: None,
            substitutions: None,
            report_unused_segments: false,
            report_invalid_access: false,
        }
    }

    pub fn with_partials(mut self, partials: HashMap<String, String>) -> Self {
        self.partials = Some(partials);
        self
    }

    pub fn with_patient_id(mut self, patient_id: impl Into<String>) -> Self {
        self.patient_id = Some(patient_id.into());
        self
    }

    pub fn with_substitutions(mut self, substitutions: HashMap<String, String>) -> Self {
        self.substitutions = Some(substitutions);
        self
    }

    pub fn with_coverage(mut self, unused_segments: bool, invalid_access: bool) -> Self {
        self.report_unused_segments = unused_segments;
        self.report_invalid_access = invalid_access;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertResponse {
    pub fhir_resource: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unused_segments: Option<Vec<UnusedSegment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_access: Option<Vec<InvalidAccess>>,
}

/// Signals broadcast to every conversion unit.
#[derive(Debug, Clone)]
pub enum ControlSignal {
    /// Templates changed in the store; drop everything compiled from them.
    TemplatesChanged,
    /// Adopt a new configuration. Also drops compiled templates.
    ConstantsChanged(ConverterConfig),
}
