//! Error types for plugin loading.

use thiserror::Error;

/// Result alias used throughout the plugin loader.
pub type PluginResult<T> = std::result::Result<T, PluginLoaderError>;

/// Failures surfaced by the plugin loader.
#[derive(Debug, Error)]
pub enum PluginLoaderError {
    /// The shared library could not be opened.
    #[error("failed to load library {path}: {reason}")]
    LibraryLoad {
        /// Path of the library that failed to open.
        path: String,
        /// Underlying loader diagnostic.
        reason: String,
    },

    /// The shared library could not be unloaded.
    #[error("failed to unload library: {reason}")]
    LibraryUnload {
        /// Underlying loader diagnostic.
        reason: String,
    },

    /// No factory for the requested class is visible to the requesting loader.
    #[error("could not create instance of class {class_name}")]
    CreateClass {
        /// The derived class name that was requested.
        class_name: String,
    },
}

impl PluginLoaderError {
    pub(crate) fn create_class(class_name: impl Into<String>) -> Self {
        Self::CreateClass {
            class_name: class_name.into(),
        }
    }

    pub(crate) fn library_unload(reason: impl Into<String>) -> Self {
        Self::LibraryUnload {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_display_names_path() {
        let err = PluginLoaderError::LibraryLoad {
            path: "libmissing.so".to_string(),
            reason: "file not found".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("libmissing.so"), "{rendered}");
        assert!(rendered.contains("file not found"), "{rendered}");
    }

    #[test]
    fn test_create_class_error_display_names_class() {
        let err = PluginLoaderError::create_class("Bear");
        assert!(err.to_string().contains("Bear"));
    }
}
