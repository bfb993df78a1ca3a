/// Repair of text exported as UTF-8 bytes mis-decoded as Latin-1
///
/// Export files escape every UTF-8 byte as its own code point (`"\u00e2\u0080\u0099"`
/// for `’`). Re-encoding each char as one Latin-1 byte recovers the original bytes.
use serde::{Deserialize, Serialize};
use std::fmt;

pub fn repair(raw: &str) -> Result<String, String> {
    let bytes = raw
        .chars()
        .map(|c| u8::try_from(u32::from(c)).map_err(|_| format!("text not latin-1 encoded: {:?}", c)))
        .collect::<Result<Vec<u8>, String>>()?;

    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// String field repaired on deserialization
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MojibakeString(String);

impl MojibakeString {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl TryFrom<String> for MojibakeString {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        repair(&raw).map(MojibakeString)
    }
}

impl From<MojibakeString> for String {
    fn from(s: MojibakeString) -> Self {
        s.0
    }
}

impl fmt::Display for MojibakeString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repairs_escaped_utf8() {
        // "café ’" as exported
        let raw = "caf\u{00c3}\u{00a9} \u{00e2}\u{0080}\u{0099}";
        assert_eq!(repair(raw).unwrap(), "café ’");
    }

    #[test]
    fn test_ascii_is_unchanged() {
        assert_eq!(repair("hello world").unwrap(), "hello world");
    }

    #[test]
    fn test_rejects_non_latin1() {
        assert!(repair("already ✓ decoded").is_err());
    }

    #[test]
    fn test_deserializes_through_serde() {
        let s: MojibakeString = serde_json::from_str("\"\\u00e5\\u00a5\\u00bd\"").unwrap();
        assert_eq!(s.as_str(), "好");
        assert!(serde_json::from_str::<MojibakeString>("\"\\u2713\"").is_err());
    }
}
