//! Encoding, compression, hashing and escaping helpers.

use super::{arg, require_string, str_arg, HelperContext, HelperError, HelperFn};
use crate::value::Value;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha1::{Digest, Sha1};
use std::io::{Read, Write};

pub(super) const HELPERS: &[(&str, HelperFn)] = &[
    ("sha1Hash", sha1_hash),
    ("base64Encode", base64_encode),
    ("base64Decode", base64_decode),
    ("gzip", gzip),
    ("gunzip", gunzip),
    ("escapeSpecialChars", escape_special_chars),
    ("unescapeSpecialChars", unescape_special_chars),
];

type HelperResult = Result<Value, HelperError>;

/// Byte encodings accepted by the codec helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Utf8,
    Base64,
    Hex,
    Latin1,
}

impl Encoding {
    /// A missing name means UTF-8.
    fn from_arg(name: Option<&str>) -> Result<Self, HelperError> {
        let Some(name) = name else {
            return Ok(Encoding::Utf8);
        };
        match name.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            "base64" => Ok(Encoding::Base64),
            "hex" => Ok(Encoding::Hex),
            "latin1" | "binary" | "ascii" => Ok(Encoding::Latin1),
            other => Err(HelperError::InvalidArgument(format!(
                "Unknown encoding: {other}"
            ))),
        }
    }

    fn decode(self, text: &str) -> Result<Vec<u8>, HelperError> {
        match self {
            Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
            Encoding::Base64 => STANDARD
                .decode(text.trim())
                .map_err(|e| HelperError::Failed(e.to_string())),
            Encoding::Hex => hex::decode(text.trim()).map_err(|e| HelperError::Failed(e.to_string())),
            // code points above 0xff keep their low byte
            Encoding::Latin1 => Ok(text.chars().map(|c| c as u32 as u8).collect()),
        }
    }

    fn encode(self, bytes: &[u8]) -> String {
        match self {
            Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Encoding::Base64 => STANDARD.encode(bytes),
            Encoding::Hex => hex::encode(bytes),
            Encoding::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
        }
    }
}

fn sha1_hash(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let text = require_string(&arg(args, 0))?;
    let digest = Sha1::digest(text.as_bytes());
    Ok(Value::String(hex::encode(digest)))
}

fn base64_encode(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let text = require_string(&arg(args, 0))?;
    let bytes = Encoding::from_arg(str_arg(args, 1))?.decode(&text)?;
    Ok(Value::String(STANDARD.encode(bytes)))
}

fn base64_decode(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let text = require_string(&arg(args, 0))?;
    let bytes = Encoding::Base64.decode(&text)?;
    Ok(Value::String(Encoding::from_arg(str_arg(args, 1))?.encode(&bytes)))
}

fn gzip(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let text = require_string(&arg(args, 0))?;
    let input = Encoding::from_arg(str_arg(args, 1))?.decode(&text)?;
    let output = Encoding::from_arg(str_arg(args, 2))?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&input)
        .map_err(|e| HelperError::Failed(e.to_string()))?;
    let compressed = encoder
        .finish()
        .map_err(|e| HelperError::Failed(e.to_string()))?;
    Ok(Value::String(output.encode(&compressed)))
}

fn gunzip(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let text = require_string(&arg(args, 0))?;
    let input = Encoding::from_arg(str_arg(args, 1))?.decode(&text)?;
    let output = Encoding::from_arg(str_arg(args, 2))?;

    let mut decompressed = Vec::new();
    GzDecoder::new(input.as_slice())
        .read_to_end(&mut decompressed)
        .map_err(|e| HelperError::Failed(e.to_string()))?;
    Ok(Value::String(output.encode(&decompressed)))
}

fn escape_special_chars(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let value = arg(args, 0);
    if value.is_nullish() {
        return Ok(Value::Undefined);
    }
    Ok(Value::String(hl7v2::escape_special_chars(
        &value.to_js_string(),
    )))
}

fn unescape_special_chars(args: &[Value], _: &mut HelperContext<'_, '_>) -> HelperResult {
    let text = require_string(&arg(args, 0))?;
    Ok(Value::String(hl7v2::unescape_special_chars(&text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helpers::testing::{call, strs};
    use crate::DataType;

    fn run(name: &str, args: &[&str]) -> String {
        call(DataType::Cda, name, &strs(args))
            .expect("helper succeeds")
            .to_text()
    }

    #[test]
    fn sha1_is_hex_encoded() {
        assert_eq!(run("sha1Hash", &["abc"]), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn base64_round_trips_quotes() {
        assert_eq!(run("base64Encode", &["a\"b"]), "YSJi");
        assert_eq!(run("base64Decode", &["YSJi"]), "a\"b");
        assert!(call(DataType::Cda, "base64Encode", &[Value::Undefined]).is_err());
    }

    #[test]
    fn gunzip_reads_hex_input() {
        assert_eq!(
            run(
                "gunzip",
                &["1f8b080000000000000a4b4c4a0600c241243503000000", "hex", "utf8"]
            ),
            "abc"
        );
        let packed = run("gzip", &["abc", "utf8", "base64"]);
        assert_eq!(run("gunzip", &[&packed, "base64", "utf8"]), "abc");
        assert!(call(DataType::Cda, "gzip", &[Value::Undefined]).is_err());
    }

    #[test]
    fn escaping_passes_null_through() {
        assert!(matches!(
            call(DataType::Cda, "escapeSpecialChars", &[Value::Null]),
            Ok(Value::Undefined)
        ));
        assert_eq!(run("escapeSpecialChars", &["a\"b"]), "a\\\"b");
        assert_eq!(run("unescapeSpecialChars", &["a\\\"b"]), "a\"b");
    }
}
