use thiserror::Error;

/// Internal failure of one analysis invocation.
///
/// These are never reported as nullness violations: they mean the input or the
/// analyzer is broken, not that the analyzed code has a null-safety bug.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub(crate) enum AnalysisError {
    #[error("{method}: reference to undeclared local `{name}`")]
    UnknownLocal { method: String, name: String },
    #[error("{method}: local `{local}` is read before any definition")]
    UndefinedLocal { method: String, local: String },
    #[error("{method}: `{keyword}` outside of a loop")]
    InvalidControlTransfer {
        method: String,
        keyword: &'static str,
    },
    #[error("{method}: malformed control-flow graph: {detail}")]
    MalformedGraph { method: String, detail: String },
    #[error("{method}: no fact recorded for value-box {index} of node {node}")]
    UnvisitedValueBox {
        method: String,
        node: usize,
        index: usize,
    },
    #[error("{method}: dataflow did not converge after {iterations} node visits")]
    NonConvergence { method: String, iterations: usize },
    #[error("invalid type descriptor `{descriptor}`")]
    InvalidDescriptor { descriptor: String },
}
