use thiserror::Error;

// ================================
// Ledger Error Types
// ================================

/// Errors returned by every ledger operation.
///
/// None of these are process-fatal: they are returned to the caller and the
/// enclosing branch is discarded.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Unknown route: {0}")]
    UnknownRoute(String),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Contract error: {0}")]
    ContractLogic(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store corruption: {0}")]
    Corruption(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        // borsh reports decode failures as io errors
        Self::Store(err.to_string())
    }
}

// ================================
// Sandbox Error Types
// ================================

/// Faults raised while instantiating or calling guest bytecode.
///
/// Messages describe the fault kind only; guest memory offsets are never
/// included.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    #[error("Engine configuration failed: {0}")]
    Engine(String),

    #[error("Invalid module: {0}")]
    Module(String),

    #[error("Export not found: {0}")]
    ExportNotFound(String),

    #[error("Execution trapped: {0}")]
    Trap(String),

    #[error("Marshaling failed: {0}")]
    Marshal(String),

    #[error("Execution budget exhausted")]
    OutOfFuel,

    #[error("Guest memory limit exceeded")]
    MemoryLimit,
}

pub type Result<T> = std::result::Result<T, Error>;
