use derive_builder::Builder;

/// Default maximum length of a frame, in bytes.
const DEFAULT_MAX_FRAME_LEN: usize = 1 << 24;

/// Configuration for a connection.
#[derive(Debug, Clone, Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct ConnectionConfig {
    /// Maximum length of a single frame, in bytes.
    #[builder(default = "DEFAULT_MAX_FRAME_LEN")]
    max_frame_len: usize,
}

impl ConnectionConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if self.max_frame_len == Some(0) {
            return Err("max_frame_len must be greater than zero".to_string());
        }

        Ok(())
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl ConnectionConfig {
    /// Creates a new builder for `ConnectionConfig`.
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    /// Returns the maximum length of a frame.
    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}
