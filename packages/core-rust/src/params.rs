//! Call-time request parameter values.
//!
//! Parameters form an ordered tree: maps preserve insertion order so that the
//! flattened query string follows the caller's traversal order. File uploads
//! are leaves that switch the whole request to a multipart body.

use bytes::Bytes;
use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

/// Ordered map of parameter names to values.
pub type ParamMap = IndexMap<String, Param>;

/// Content type used for uploads when the caller does not supply one.
pub const DEFAULT_UPLOAD_CONTENT_TYPE: &str = "application/octet-stream";

/// A file-like value carried by a multipart request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    /// File name reported in the multipart part header.
    pub filename: String,
    /// MIME type of the part.
    pub content_type: String,
    /// Raw file contents.
    pub data: Bytes,
}

impl FileUpload {
    /// Creates an upload with the default `application/octet-stream` content type.
    pub fn new(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            content_type: DEFAULT_UPLOAD_CONTENT_TYPE.to_string(),
            data: data.into(),
        }
    }

    /// Overrides the content type.
    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Reads a file from disk, naming the upload after the last path segment.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be read.
    pub fn from_path(path: impl AsRef<std::path::Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(filename, data))
    }
}

/// A request parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    File(FileUpload),
    List(Vec<Param>),
    Map(ParamMap),
}

impl Param {
    /// Whether this value or anything nested inside it is a file upload.
    #[must_use]
    pub fn contains_files(&self) -> bool {
        match self {
            Self::File(_) => true,
            Self::List(items) => items.iter().any(Self::contains_files),
            Self::Map(map) => map.values().any(Self::contains_files),
            _ => false,
        }
    }

    /// Text form of a scalar leaf as it appears in a query string, before escaping.
    ///
    /// Containers have no scalar text and return `None`; files render as their
    /// file name.
    #[must_use]
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            Self::Null => Some(String::new()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Int(i) => Some(i.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::String(s) => Some(s.clone()),
            Self::File(file) => Some(file.filename.clone()),
            Self::List(_) | Self::Map(_) => None,
        }
    }
}

impl Serialize for Param {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::String(s) => serializer.serialize_str(s),
            Self::File(file) => serializer.serialize_str(&file.filename),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
        }
    }
}

impl From<bool> for Param {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Param {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Param {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for Param {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Param {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<FileUpload> for Param {
    fn from(value: FileUpload) -> Self {
        Self::File(value)
    }
}

impl From<ParamMap> for Param {
    fn from(value: ParamMap) -> Self {
        Self::Map(value)
    }
}

impl<T: Into<Param>> From<Vec<T>> for Param {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl From<serde_json::Value> for Param {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or_else(|| Self::String(n.to_string())),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

/// Builds a [`ParamMap`] from `key => value` pairs, preserving order.
///
/// ```
/// use schemarpc_core::params;
///
/// let p = params! { "q" => "spec", "page" => 2 };
/// assert_eq!(p.len(), 2);
/// ```
#[macro_export]
macro_rules! params {
    () => { $crate::params::ParamMap::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::params::ParamMap::new();
        $( map.insert(::std::string::String::from($key), $crate::params::Param::from($value)); )+
        map
    }};
}
