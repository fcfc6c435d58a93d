use thiserror::Error;

//create types errors for easy testability

/// Failure of a single collector during one scrape. Never fatal for the scrape.
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("failed to read {path}: {source}")]
    ProcReadError {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse {field} from {path}: {raw}")]
    ParseError {
        path: String,
        field: String,
        raw: String,
    },

    #[error("data source failed: {0}")]
    DataSource(String),

    #[error("{origin} returned no rows")]
    EmptyResultSet { origin: String },

    #[error("collection timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("metric sink closed, scrape was abandoned")]
    SinkClosed,

    #[error("{metric} expects {expected} label values, got {got}")]
    LabelMismatch {
        metric: String,
        expected: usize,
        got: usize,
    },

    #[error("collector panicked: {0}")]
    Panicked(String),
}

/// Startup errors. These block the exporter from starting.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("collector {name} is already registered")]
    Conflict { name: String },

    #[error("collector {name} is not registered")]
    NotFound { name: String },

    #[error("failed to build collector {name}: {source}")]
    Build {
        name: String,
        source: CollectorError,
    },

    #[error("collector {name} describes invalid metric {metric}: {source}")]
    InvalidDescriptor {
        name: String,
        metric: String,
        source: prometheus::Error,
    },
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("failed to render exposition text: {0}")]
    Render(#[from] prometheus::Error),

    #[error("exposition text is not utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}
