//! Validated media source handed to the prober and the encoder.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use url::Url;

/// Where the source lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceKind {
    Local,
    Remote,
}

/// A local absolute path or a remote http(s) URL. Immutable once validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSource {
    Local(PathBuf),
    Remote(Url),
}

impl StreamSource {
    pub fn kind(&self) -> SourceKind {
        match self {
            StreamSource::Local(_) => SourceKind::Local,
            StreamSource::Remote(_) => SourceKind::Remote,
        }
    }

    /// Address as passed to the external tools.
    pub fn address(&self) -> String {
        match self {
            StreamSource::Local(path) => path.display().to_string(),
            StreamSource::Remote(url) => url.as_str().to_string(),
        }
    }
}

impl fmt::Display for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamSource::Local(path) => write!(f, "Local file -> {}", path.display()),
            StreamSource::Remote(url) => write!(f, "Remote URL -> {url}"),
        }
    }
}

impl Serialize for StreamSource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("StreamSource", 2)?;
        state.serialize_field("kind", &self.kind())?;
        state.serialize_field("address", &self.address())?;
        state.end()
    }
}
