use crate::foundation::error::{ExrLayersError, ExrLayersResult};

/// Read-side document settings.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    /// Clamp A-tagged channels to `[0, 1]` after loading.
    pub clip_alpha: bool,
    /// Prefix the first part's channels with its part name too.
    pub rename_first_part: bool,
    /// Give every alpha channel a layer of its own.
    pub split_alpha: bool,
    /// Rebuild layers from the stored layer-string attribute when the file carries one.
    pub use_layers_string: bool,
    pub threads: Option<usize>,
    /// Byte budget for channel buffers. Exceeding it behaves like an allocator refusal.
    pub memory_limit: Option<u64>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            clip_alpha: true,
            rename_first_part: false,
            split_alpha: false,
            use_layers_string: true,
            threads: None,
            memory_limit: None,
        }
    }
}

impl ReadOptions {
    pub fn from_json_str(s: &str) -> ExrLayersResult<Self> {
        let options: Self = serde_json::from_str(s)
            .map_err(|e| ExrLayersError::parse(format!("read options: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> ExrLayersResult<()> {
        validate_threads(self.threads)
    }
}

/// Write-side document settings.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    pub threads: Option<usize>,
    pub memory_limit: Option<u64>,
    /// Rows per block on the low-memory write path; derived from the budget when unset.
    pub safe_lines: Option<usize>,
    pub write_layers_string: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            threads: None,
            memory_limit: None,
            safe_lines: None,
            write_layers_string: true,
        }
    }
}

impl WriteOptions {
    pub fn from_json_str(s: &str) -> ExrLayersResult<Self> {
        let options: Self = serde_json::from_str(s)
            .map_err(|e| ExrLayersError::parse(format!("write options: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> ExrLayersResult<()> {
        validate_threads(self.threads)?;
        if self.safe_lines == Some(0) {
            return Err(ExrLayersError::logic("'safe_lines' must be >= 1 when set"));
        }
        Ok(())
    }
}

fn validate_threads(threads: Option<usize>) -> ExrLayersResult<()> {
    if threads == Some(0) {
        return Err(ExrLayersError::logic("'threads' must be >= 1 when set"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let opts = ReadOptions::from_json_str(r#"{"split_alpha": true}"#).unwrap();
        assert!(opts.split_alpha);
        assert!(opts.clip_alpha);
        assert!(opts.use_layers_string);
        assert_eq!(opts.memory_limit, None);

        let opts = WriteOptions::from_json_str("{}").unwrap();
        assert_eq!(opts, WriteOptions::default());
    }

    #[test]
    fn zero_threads_is_rejected() {
        let err = ReadOptions::from_json_str(r#"{"threads": 0}"#).unwrap_err();
        assert!(err.to_string().contains("threads"));
        assert!(WriteOptions::from_json_str(r#"{"safe_lines": 0}"#).is_err());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = ReadOptions::from_json_str("{").unwrap_err();
        assert!(matches!(err, ExrLayersError::Parse(_)));
    }
}
