//! Error types for the acquisition core.
//!
//! Two layers of errors exist:
//!
//! - [`GraphError`]: rejected graph-construction operations (bad endpoint,
//!   type mismatch, duplicate name). These are caught while the graph is
//!   being built and must never surface during a run.
//! - [`DaqError`]: the application-level error type. Consolidates graph,
//!   settings, codec, hardware and I/O failures behind one enum so callers
//!   can use `?` throughout.
//!
//! During a run the core deliberately converts most failures into logged
//! diagnostics instead of propagating them: a module that cannot acquire
//! leaves its channels empty for the cycle, a missing output directory
//! drops the cycle's record. Partial data beats a stalled run.

use crate::data::PayloadKind;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Errors rejected while building or modifying the plugin graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Output and input connector declare different payload kinds.
    #[error("type mismatch: output '{output}' carries {output_kind}, input '{input}' expects {input_kind}")]
    TypeMismatch {
        output: String,
        input: String,
        output_kind: PayloadKind,
        input_kind: PayloadKind,
    },

    /// The input connector already has an upstream link.
    #[error("input '{0}' is already connected")]
    AlreadyConnected(String),

    /// The requested edge would close a cycle.
    #[error("connecting '{output}' to '{input}' would create a cycle")]
    WouldCycle { output: String, input: String },

    /// No plugin with this name exists in the graph.
    #[error("no plugin named '{0}' in the graph")]
    UnknownPlugin(String),

    /// The plugin exists but has no such port in the given direction.
    #[error("plugin '{plugin}' has no {direction} port named '{port}'")]
    UnknownPort {
        plugin: String,
        direction: &'static str,
        port: String,
    },

    /// A plugin with this name is already part of the graph.
    #[error("a plugin named '{0}' already exists in the graph")]
    DuplicateName(String),

    /// The registry knows no plugin type with this identifier.
    #[error("unknown plugin type '{0}'")]
    UnknownType(String),

    /// An endpoint string did not parse as `plugin.port`.
    #[error("invalid endpoint '{0}', expected 'plugin.port'")]
    BadEndpoint(String),
}

/// Errors from encoding or decoding event records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The record does not start with the event magic word.
    #[error("bad event magic {found:#06x}")]
    BadMagic { found: u16 },

    /// The buffer ends before the record does.
    #[error("truncated event record: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    /// Header length and channel mask are mutually inconsistent.
    #[error("malformed event header (length {header_words} words)")]
    MalformedHeader { header_words: u16 },

    /// A channel holds more samples than a length-table entry can carry.
    #[error("channel {channel} holds {len} samples, exceeding the record limit")]
    ChannelTooLong { channel: usize, len: usize },
}

/// Primary error type for the acquisition application.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Graph construction or modification was rejected.
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    /// Event record encoding or decoding failed.
    #[error("event codec error: {0}")]
    Codec(#[from] CodecError),

    /// The settings store could not be read or written.
    #[error("settings error: {0}")]
    Settings(String),

    /// A hardware module reported a failure.
    #[error("hardware error: {0}")]
    Hardware(String),

    /// A plugin failed while processing a cycle.
    #[error("processing error: {0}")]
    Processing(String),

    /// File or socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
