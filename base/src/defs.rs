use std::error::Error as StdError;
use std::fmt;
use std::result::Result as StdResult;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Backend,
    Cancelled,
    Configuration,
    Geometry,
    IoError,
    MalformedData,
    UnsupportedFeature,
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub description: String,
    pub source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind, description: String) -> Self {
        Error {
            kind,
            description,
            source: None,
        }
    }

    pub fn with_source<E: StdError + Send + Sync + 'static>(
        kind: ErrorKind,
        description: String,
        source: E,
    ) -> Self {
        Error {
            kind,
            description,
            source: Some(Box::new(source)),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(source) = &self.source {
            write!(f, "{:?}: {}: {}", self.kind, self.description, source)
        } else {
            write!(f, "{:?}: {}", self.kind, self.description)
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::with_source(ErrorKind::IoError, "I/O failure".to_string(), err)
    }
}

pub type Result<T> = StdResult<T, Error>;

pub trait IntoResult<T> {
    fn res<F: FnOnce() -> String>(self, description: F) -> Result<T>;
}

impl<T, E: StdError + Send + Sync + 'static> IntoResult<T> for StdResult<T, E> {
    fn res<F: FnOnce() -> String>(self, description: F) -> Result<T> {
        self.map_err(|e| {
            Error::with_source(ErrorKind::IoError, description(), e)
        })
    }
}
