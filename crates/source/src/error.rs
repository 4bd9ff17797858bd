use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON input: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML parse error: {0}")]
    Xml(String),

    #[error("Record path '{path}' {message}")]
    RecordPath { path: String, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<quick_xml::Error> for SourceError {
    fn from(e: quick_xml::Error) -> Self {
        SourceError::Xml(e.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for SourceError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        SourceError::Xml(e.to_string())
    }
}

impl From<std::str::Utf8Error> for SourceError {
    fn from(e: std::str::Utf8Error) -> Self {
        SourceError::Xml(format!("invalid UTF-8: {e}"))
    }
}
