pub type ExrLayersResult<T> = Result<T, ExrLayersError>;

#[derive(thiserror::Error, Debug)]
pub enum ExrLayersError {
    /// A programming precondition was violated (unbound channel, missing source, ...).
    #[error("logic error: {0}")]
    Logic(String),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("out of memory: failed to allocate {requested} bytes")]
    OutOfMemory { requested: u64 },

    #[error("parse error: {0}")]
    Parse(String),

    /// The host asked us to stop. Callers usually suppress reporting for this one.
    #[error("operation aborted")]
    Aborted,

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ExrLayersError {
    pub fn logic(msg: impl Into<String>) -> Self {
        Self::Logic(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn out_of_memory(requested: u64) -> Self {
        Self::OutOfMemory { requested }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }

    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

impl From<std::io::Error> for ExrLayersError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            ExrLayersError::logic("x")
                .to_string()
                .contains("logic error:")
        );
        assert!(ExrLayersError::io("x").to_string().contains("i/o error:"));
        assert!(
            ExrLayersError::parse("x")
                .to_string()
                .contains("parse error:")
        );
        assert!(
            ExrLayersError::out_of_memory(64)
                .to_string()
                .contains("64 bytes")
        );
        assert_eq!(ExrLayersError::Aborted.to_string(), "operation aborted");
    }

    #[test]
    fn predicates_distinguish_kinds() {
        assert!(ExrLayersError::Aborted.is_abort());
        assert!(!ExrLayersError::io("short read").is_abort());
        assert!(ExrLayersError::out_of_memory(1).is_out_of_memory());
        assert!(ExrLayersError::from(std::io::Error::other("eof")).is_io());
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = ExrLayersError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
