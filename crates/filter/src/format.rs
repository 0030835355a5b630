//! `@name` output formats.

use crate::error::EvalError;
use crate::value::{describe, to_text, type_name};
use base64::engine::{general_purpose, DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use serde_json::Value;

type Result<T> = std::result::Result<T, EvalError>;

const FORMATS: &[&str] = &[
    "text", "json", "csv", "tsv", "html", "uri", "sh", "base64", "base64d", "base32", "base32d",
];

const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &base64::alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

pub(crate) fn is_known(name: &str) -> bool {
    FORMATS.contains(&name)
}

/// Render `value` with the named format.
pub(crate) fn apply(name: &str, value: &Value) -> Result<String> {
    match name {
        "text" => Ok(to_text(value)),
        "json" => Ok(value.to_string()),
        "csv" => delimited(value, "csv", ",", |text| format!("\"{}\"", text.replace('"', "\"\""))),
        "tsv" => delimited(value, "tsv", "\t", |text| {
            text.replace('\\', "\\\\")
                .replace('\t', "\\t")
                .replace('\n', "\\n")
                .replace('\r', "\\r")
        }),
        "html" => Ok(html_escape(&to_text(value))),
        "uri" => Ok(uri_escape(&to_text(value))),
        "sh" => shell_quote(value),
        "base64" => Ok(general_purpose::STANDARD.encode(to_text(value))),
        "base64d" => {
            let text = to_text(value);
            let bytes = LENIENT_BASE64
                .decode(text.trim_end_matches('=').as_bytes())
                .map_err(|_| {
                    EvalError::type_error(format!(
                        "{} is not valid base64 data",
                        describe(value)
                    ))
                })?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        "base32" => Ok(base32_encode(to_text(value).as_bytes())),
        "base32d" => {
            let bytes = base32_decode(&to_text(value)).ok_or_else(|| {
                EvalError::type_error(format!("{} is not valid base32 data", describe(value)))
            })?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        other => Err(EvalError::type_error(format!("{other} is not a valid format"))),
    }
}

/// `@csv` / `@tsv`: an array of scalars joined into one row.
fn delimited(value: &Value, name: &str, separator: &str, quote: fn(&str) -> String) -> Result<String> {
    let Value::Array(items) = value else {
        return Err(EvalError::type_error(format!(
            "{} cannot be {name}-formatted, only an array can be",
            describe(value)
        )));
    };
    let mut cells = Vec::with_capacity(items.len());
    for item in items {
        cells.push(match item {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::String(text) => quote(text),
            other => {
                return Err(EvalError::type_error(format!(
                    "{} is not valid in a {name} row",
                    describe(other)
                )))
            }
        });
    }
    Ok(cells.join(separator))
}

fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '\'' => escaped.push_str("&#39;"),
            '"' => escaped.push_str("&quot;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn uri_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for byte in text.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("%{byte:02X}"));
        }
    }
    escaped
}

fn shell_quote(value: &Value) -> Result<String> {
    let quote_one = |item: &Value| -> Result<String> {
        match item {
            Value::String(text) => Ok(format!("'{}'", text.replace('\'', "'\\''"))),
            Value::Array(_) | Value::Object(_) => Err(EvalError::type_error(format!(
                "{} can not be escaped for shell",
                type_name(item)
            ))),
            other => Ok(other.to_string()),
        }
    };
    match value {
        Value::Array(items) => Ok(items
            .iter()
            .map(quote_one)
            .collect::<Result<Vec<_>>>()?
            .join(" ")),
        other => quote_one(other),
    }
}

fn base32_encode(bytes: &[u8]) -> String {
    let mut encoded = String::with_capacity(bytes.len().div_ceil(5) * 8);
    for chunk in bytes.chunks(5) {
        let mut block = [0u8; 5];
        block[..chunk.len()].copy_from_slice(chunk);
        let bits = block.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        let symbols = (chunk.len() * 8).div_ceil(5);
        for i in 0..8 {
            if i < symbols {
                let index = (bits >> (35 - i * 5)) & 0x1f;
                encoded.push(BASE32_ALPHABET[index as usize] as char);
            } else {
                encoded.push('=');
            }
        }
    }
    encoded
}

fn base32_decode(text: &str) -> Option<Vec<u8>> {
    let mut bytes = Vec::with_capacity(text.len() * 5 / 8);
    let mut buffer = 0u64;
    let mut bits = 0u32;
    for c in text.trim_end_matches('=').bytes() {
        let value = BASE32_ALPHABET.iter().position(|&a| a == c.to_ascii_uppercase())?;
        buffer = (buffer << 5) | value as u64;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            bytes.push((buffer >> bits) as u8);
            buffer &= (1 << bits) - 1;
        }
    }
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn csv_and_tsv_rows() {
        assert_eq!(
            apply("csv", &json!([1, "a\"b", null, true])).unwrap(),
            r#"1,"a""b",,true"#
        );
        assert_eq!(apply("tsv", &json!(["a\tb", 2])).unwrap(), "a\\tb\t2");
        assert!(apply("csv", &json!({"a": 1})).is_err());
        assert!(apply("csv", &json!([[1]])).is_err());
    }

    #[test]
    fn escaping_formats() {
        assert_eq!(apply("html", &json!("<a href='x'>&</a>")).unwrap(), "&lt;a href=&#39;x&#39;&gt;&amp;&lt;/a&gt;");
        assert_eq!(apply("uri", &json!("a b/ü")).unwrap(), "a%20b%2F%C3%BC");
        assert_eq!(apply("sh", &json!(["it's", 1])).unwrap(), r#"'it'\''s' 1"#);
        assert_eq!(apply("json", &json!("x")).unwrap(), r#""x""#);
        assert_eq!(apply("text", &json!([1])).unwrap(), "[1]");
    }

    #[test]
    fn base_encodings() {
        assert_eq!(apply("base64", &json!("x")).unwrap(), "eA==");
        assert_eq!(apply("base64d", &json!("eA")).unwrap(), "x");
        assert_eq!(apply("base64d", &json!("eA==")).unwrap(), "x");
        assert_eq!(apply("base32", &json!("foobar")).unwrap(), "MZXW6YTBOI======");
        assert_eq!(apply("base32d", &json!("MZXW6YTBOI======")).unwrap(), "foobar");
        assert!(apply("base32d", &json!("1!")).is_err());
    }
}
