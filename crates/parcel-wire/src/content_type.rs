// Content type tags selecting how a message body is (de)serialized.
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContentType {
    Text,
    Bytes,
    Json,
    // Versioned structured binary format; the default when no tag is given.
    #[default]
    Structured,
}

impl ContentType {
    pub const ALL: [ContentType; 4] = [
        ContentType::Text,
        ContentType::Bytes,
        ContentType::Json,
        ContentType::Structured,
    ];

    // Tag as it appears in headers, batch bodies, and RPC records.
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Bytes => "bytes",
            ContentType::Json => "json",
            ContentType::Structured => "v8",
        }
    }

    /// Validate a user-supplied tag, ignoring ASCII case.
    ///
    /// ```
    /// use parcel_wire::ContentType;
    ///
    /// assert_eq!(ContentType::validate("JSON").expect("valid"), ContentType::Json);
    /// assert!(ContentType::validate("xml").is_err());
    /// ```
    pub fn validate(tag: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str().eq_ignore_ascii_case(tag))
            .ok_or_else(|| Error::InvalidContentType(tag.to_string()))
    }

    // Parse a tag received from the broker. Tags there are already normalized,
    // and an empty tag means the structured default.
    pub fn from_wire(tag: &str) -> Result<Self> {
        if tag.is_empty() {
            return Ok(ContentType::Structured);
        }
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == tag)
            .ok_or_else(|| Error::UnsupportedContentType(tag.to_string()))
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        Self::validate(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_is_case_insensitive() {
        assert_eq!(ContentType::validate("text").expect("text"), ContentType::Text);
        assert_eq!(ContentType::validate("Bytes").expect("bytes"), ContentType::Bytes);
        assert_eq!(ContentType::validate("V8").expect("v8"), ContentType::Structured);
        assert_eq!("JsOn".parse::<ContentType>().expect("json"), ContentType::Json);
    }

    #[test]
    fn validate_rejects_unknown_tags() {
        for tag in ["", "structured", "xml", "text/plain"] {
            let err = ContentType::validate(tag).expect_err("invalid");
            assert!(matches!(err, Error::InvalidContentType(ref s) if s == tag));
        }
    }

    #[test]
    fn wire_tags_default_to_structured() {
        assert_eq!(ContentType::from_wire("").expect("empty"), ContentType::Structured);
        assert_eq!(ContentType::from_wire("json").expect("json"), ContentType::Json);
        let err = ContentType::from_wire("JSON").expect_err("case");
        assert!(matches!(err, Error::UnsupportedContentType(_)));
    }
}
