use thiserror::Error;

/// Reasons a request is rejected before any SQL is executed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidRequest {
    /// The `filter` expression could not be parsed.
    #[error("filter syntax error at position {position}: {message}")]
    FilterSyntax { position: usize, message: String },
    /// A property name does not exist in the collection.
    #[error("unknown property: {0}")]
    UnknownProperty(String),
    /// The `bbox` parameter is malformed or not finite.
    #[error("invalid bbox: {0}")]
    InvalidBbox(String),
    /// The requested CRS is not the native one and cannot be reached by a transform.
    #[error("unsupported CRS: {0}")]
    UnsupportedCrs(String),
    /// A filter literal cannot be coerced to the property's declared type.
    #[error("type mismatch for property '{property}': expected {expected}, got {literal}")]
    TypeMismatch {
        property: String,
        expected: &'static str,
        literal: String,
    },
    /// A schema, table or column name is outside the admitted character class.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),
    /// The collection has no primary key column, so single items cannot be addressed.
    #[error("collection has no primary key: {0}")]
    NoPrimaryKey(String),
    /// A numeric query parameter is malformed or outside its bounds.
    #[error("parameter '{parameter}' out of range: {value}")]
    OutOfRange { parameter: String, value: String },
}

impl InvalidRequest {
    /// Stable name of the sub-kind, used as the `code` of error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FilterSyntax { .. } => "FilterSyntax",
            Self::UnknownProperty(_) => "UnknownProperty",
            Self::InvalidBbox(_) => "InvalidBbox",
            Self::UnsupportedCrs(_) => "UnsupportedCRS",
            Self::TypeMismatch { .. } => "TypeMismatch",
            Self::InvalidIdentifier(_) => "InvalidIdentifier",
            Self::NoPrimaryKey(_) => "NoPrimaryKey",
            Self::OutOfRange { .. } => "OutOfRange",
        }
    }
}

/// Errors raised while decoding or encoding GeoPackage geometry blobs.
#[derive(Debug, Error)]
pub enum GeometryError {
    /// Wraps errors returned by the `wkb` crate.
    #[error(transparent)]
    Wkb(#[from] wkb::error::WkbError),
    /// Invalid GeoPackage geometry flags byte.
    #[error("invalid gpkg geometry flags: {0:#04x}")]
    InvalidGpkgGeometryFlags(u8),
    /// GeoPackage geometry blob does not start with the `GP` magic.
    #[error("invalid gpkg geometry magic: {0:#06x}")]
    InvalidGpkgGeometryMagic(u16),
    /// GeoPackage geometry blob is too short for the fixed header.
    #[error("invalid gpkg geometry length: got {len} bytes, expected at least {minimum}")]
    InvalidGpkgGeometryLength { len: usize, minimum: usize },
    /// GeoPackage geometry blob is too short for the declared envelope payload.
    #[error("invalid gpkg geometry envelope length: got {len} bytes, required {required}")]
    InvalidGpkgGeometryEnvelope { len: usize, required: usize },
    /// No transform is known between the two SRIDs.
    #[error("no transform from srid {from} to srid {to}")]
    UnsupportedTransform { from: i32, to: i32 },
}

/// Crate error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    InvalidRequest(#[from] InvalidRequest),
    /// A collection or item does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The database driver or a spatial SQL function failed.
    #[error("database error: {0}")]
    Upstream(#[from] rusqlite::Error),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    /// Configuration file or value could not be used.
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Broken invariant inside the server.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable name of the error kind, used as the `code` of error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(err) => err.kind(),
            Self::NotFound(_) => "NotFound",
            Self::Upstream(_) => "Upstream",
            Self::Geometry(_) => "Geometry",
            Self::Config(_) => "Config",
            Self::Io(_) => "Io",
            Self::Internal(_) => "Internal",
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("json encoding failed: {err}"))
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("blocking task failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::{Error, InvalidRequest};

    #[test]
    fn kinds_are_stable_names() {
        let err = Error::from(InvalidRequest::UnsupportedCrs("27700".to_string()));
        assert_eq!(err.kind(), "UnsupportedCRS");
        assert_eq!(Error::NotFound("x".to_string()).kind(), "NotFound");

        let err = Error::from(rusqlite::Error::InvalidQuery);
        assert_eq!(err.kind(), "Upstream");
    }

    #[test]
    fn type_mismatch_message_names_the_property() {
        let err = InvalidRequest::TypeMismatch {
            property: "id".to_string(),
            expected: "integer",
            literal: "'abc'".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "type mismatch for property 'id': expected integer, got 'abc'"
        );
    }
}
