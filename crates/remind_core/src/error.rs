use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AppError {
    #[error("invalid_input - {0}")]
    InvalidInput(String),
    #[error("not_found - {0}")]
    NotFound(String),
    #[error("invalid_data - {0}")]
    InvalidData(String),
    #[error("storage_error - {0}")]
    Storage(String),
    #[error("io_error - {0}")]
    Io(String),
    #[error("delivery_error - {0}")]
    Delivery(String),
}

impl AppError {
    pub fn invalid_input<M: Into<String>>(message: M) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn not_found<M: Into<String>>(message: M) -> Self {
        Self::NotFound(message.into())
    }

    pub fn invalid_data<M: Into<String>>(message: M) -> Self {
        Self::InvalidData(message.into())
    }

    pub fn storage<M: Into<String>>(message: M) -> Self {
        Self::Storage(message.into())
    }

    pub fn io<M: Into<String>>(message: M) -> Self {
        Self::Io(message.into())
    }

    pub fn delivery<M: Into<String>>(message: M) -> Self {
        Self::Delivery(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::NotFound(_) => "not_found",
            Self::InvalidData(_) => "invalid_data",
            Self::Storage(_) => "storage_error",
            Self::Io(_) => "io_error",
            Self::Delivery(_) => "delivery_error",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::InvalidInput(message)
            | Self::NotFound(message)
            | Self::InvalidData(message)
            | Self::Storage(message)
            | Self::Io(message)
            | Self::Delivery(message) => message,
        }
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
