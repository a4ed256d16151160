/// What kind of failure an [`AppError`] represents.
///
/// Almost everything is fatal. The one exception is an atmosphere request
/// outside the valid interpolation domain: the fit loop turns that into a
/// penalty instead of aborting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Fatal,
    AtmosphereOutOfRange,
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    kind: ErrorKind,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            kind: ErrorKind::Fatal,
            message: message.into(),
        }
    }

    /// Parameters or atmosphere left the valid interpolation domain.
    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self {
            exit_code: 4,
            kind: ErrorKind::AtmosphereOutOfRange,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }

    pub fn is_out_of_range(&self) -> bool {
        self.kind == ErrorKind::AtmosphereOutOfRange
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("kind", &self.kind)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
