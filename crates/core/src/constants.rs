//! Constants used throughout the converter core crate.

/// Environment variable naming the template root directory.
pub const TEMPLATE_DIR_ENV: &str = "FHIR_CONVERTER_TEMPLATE_DIR";

/// Environment variable overriding the number of conversion units.
pub const POOL_SIZE_ENV: &str = "FHIR_CONVERTER_POOL_SIZE";

/// Template root used when no directory is configured.
pub const DEFAULT_TEMPLATE_DIR: &str = "./templates";

/// Name given to templates supplied inline with a request.
pub const INLINE_TEMPLATE_NAME: &str = "inline";

/// Top-level key the parsed source is bound to in the template context.
pub const MESSAGE_KEY: &str = "msg";

/// Key under [`MESSAGE_KEY`] holding a parsed HL7 v2 message.
pub const HL7V2_KEY: &str = "v2";

/// Data variable names, read by templates as `@patientId` and so on.
pub const PATIENT_ID_VAR: &str = "patientId";
pub const ENCOUNTER_TIME_PERIOD_VAR: &str = "encounterTimePeriod";
pub const ENCOMPASSING_ENCOUNTER_ID_VAR: &str = "encompassingEncounterId";

/// Thread name prefix for conversion units.
pub const UNIT_THREAD_PREFIX: &str = "conversion-unit";
