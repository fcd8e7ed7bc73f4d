use thiserror::Error;

/// Chart data the importer cannot build a timeline from.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ImportError {
    #[error("Missing required chart header: {key}")]
    MissingHeader { key: &'static str },

    #[error("Invalid tempo: {value:?}")]
    InvalidTempo { value: String },

    #[error("Malformed beat value {value:?} at {block}:{tick}")]
    MalformedBeat {
        block: usize,
        tick: usize,
        value: String,
    },
}
