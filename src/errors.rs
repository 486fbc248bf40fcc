use std::fmt;
use std::str::Utf8Error;

use derive_more::From;
use quick_xml::events::attributes::AttrError;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, From)]
pub enum Error {
    /// Errors from the QuickXML crate during XML parsing or writing
    #[from]
    XmlParsing(quick_xml::Error),
    /// Malformed attribute inside a start tag
    #[from]
    XmlAttribute(AttrError),
    /// Errors from the Serde YAML crate during options parsing
    #[from]
    Yaml(serde_yaml::Error),
    /// Standard I/O errors
    #[from]
    Io(std::io::Error),
    /// Errors during UTF-8 string conversion
    #[from]
    Utf8Error(Utf8Error),
    /// The document is not well-formed in a way QuickXML does not report itself,
    /// e.g. a missing root element or an unknown entity.
    ParseError(String),
    /// The value cannot be represented as XML. Holds a message with the element path.
    SerializationError(String),
    /// Invalid mapper options.
    InvalidOptions(String),
}

impl Error {
    /// Returns `true` for every failure of the XML to value direction.
    pub fn is_parse_error(&self) -> bool {
        matches!(
            self,
            Error::XmlParsing(_) | Error::XmlAttribute(_) | Error::Utf8Error(_) | Error::ParseError(_)
        )
    }

    pub fn is_serialization_error(&self) -> bool {
        matches!(self, Error::SerializationError(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::XmlParsing(e) => write!(f, "XML parse error: {e}"),
            Error::XmlAttribute(e) => write!(f, "XML attribute error: {e}"),
            Error::Yaml(e) => write!(f, "YAML error: {e}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Utf8Error(e) => write!(f, "invalid UTF-8: {e}"),
            Error::ParseError(msg) => write!(f, "XML parse error: {msg}"),
            Error::SerializationError(msg) => write!(f, "serialization error: {msg}"),
            Error::InvalidOptions(msg) => write!(f, "invalid mapper options: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::XmlParsing(e) => Some(e),
            Error::XmlAttribute(e) => Some(e),
            Error::Yaml(e) => Some(e),
            Error::Io(e) => Some(e),
            Error::Utf8Error(e) => Some(e),
            _ => None,
        }
    }
}
