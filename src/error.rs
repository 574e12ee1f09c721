use thiserror::Error;

/// Problems with the decision graph or kiosk settings. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("decision graph is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("decision graph has no \"start\" node")]
    MissingStart,

    #[error("node '{node}' points to unknown node '{target}'")]
    DanglingReference { node: String, target: String },

    #[error("node '{node}' is malformed: {reason}")]
    MalformedBranch { node: String, reason: String },

    #[error("traversal reached unknown node '{0}'")]
    UnknownNode(String),

    #[error("invalid value '{value}' for {key}")]
    InvalidSetting { key: &'static str, value: String },
}

/// A condition expression could not be evaluated. Always recovered as `false`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("syntax error in '{expr}': {reason}")]
    Syntax { expr: String, reason: String },

    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("cannot apply '{op}' to {lhs} and {rhs}")]
    TypeMismatch {
        op: &'static str,
        lhs: &'static str,
        rhs: &'static str,
    },
}

/// Failure of an external collaborator (voice or ledger).
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("listen cancelled by stop signal")]
    Cancelled,

    #[error("voice gateway fault: {0}")]
    Voice(String),

    #[error("ledger fault: {0}")]
    Ledger(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DialogueError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}
