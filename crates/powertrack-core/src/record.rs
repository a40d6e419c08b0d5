use serde::de::DeserializeOwned;

/// One activity from the stream: a single non-blank body line.
///
/// The line is passed through as received. PowerTrack sends JSON, so
/// [`parse`](Self::parse) is offered for callers that want a typed view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    line: String,
}

impl Record {
    pub fn new(line: impl Into<String>) -> Self {
        Self { line: line.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.line
    }

    pub fn into_string(self) -> String {
        self.line
    }

    /// Deserialize the line as JSON.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.line)
    }
}

impl AsRef<str> for Record {
    fn as_ref(&self) -> &str {
        &self.line
    }
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.line)
    }
}
