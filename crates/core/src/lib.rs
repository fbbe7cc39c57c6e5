//! # Converter Core
//!
//! Runs conversion requests end to end: parse the source message, render it through its
//! template, repair the output into JSON and post-process the FHIR bundle.
//!
//! - [`ConversionUnit`] runs the whole pipeline for one request at a time and owns every cache
//!   that pipeline touches
//! - [`WorkerPool`] runs a fixed number of units on their own threads and routes requests and
//!   broadcast [`ControlSignal`]s to them
//!
//! **No transport concerns**: request parsing from HTTP or queues belongs to the caller.

pub mod config;
pub mod constants;
mod error;
pub mod pool;
pub mod request;
pub mod unit;

pub use config::ConverterConfig;
pub use error::{ConvertError, ConvertResult, FormatError, PoolError};
pub use pool::WorkerPool;
pub use request::{ControlSignal, ConvertRequest, ConvertResponse, TemplateSource};
pub use unit::ConversionUnit;

pub use cda::EncounterTimePeriod;
pub use template_engine::DataType;
