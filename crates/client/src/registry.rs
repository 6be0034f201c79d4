//! Backends available to the client out of the box.

use rewind_core::BackendRegistry;

/// Built-in backends plus `s3` when the `s3` feature is enabled.
pub fn default_backends() -> BackendRegistry {
    #[allow(unused_mut)]
    let mut registry = BackendRegistry::with_builtins();
    #[cfg(feature = "s3")]
    registry.register("s3", std::sync::Arc::new(rewind_s3::S3Provider));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backends() {
        let registry = default_backends();
        assert!(registry.resolve("memory").is_ok());
        assert!(registry.resolve("sqlite").is_ok());
        #[cfg(feature = "s3")]
        assert!(registry.resolve("s3").is_ok());
    }
}
