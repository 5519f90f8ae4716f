//! Runtime configuration for handle acquisition, mapping and marshaling
//!
//! This module provides the switches that decide how strictly the interop layer treats
//! sentinel handles, unreachable marshaling entry points and failures on cleanup paths.

/// Configuration shared by the handle, mapping and marshaling components
///
/// The default mirrors the behaviour expected by framework hosts:
/// - Sentinel handle values are rejected at acquisition
/// - Unreachable marshaling entry points assert in debug builds
/// - Release failures swallowed on cleanup paths are logged
/// - Named mappings are created in the session-local namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteropConfig {
    /// Accept sentinel values in [`crate::HandleGuard::acquire_with`]; the resulting guard is
    /// permanently invalid and never released
    pub allow_invalid_handles: bool,

    /// Assert when a marshaling entry point that the platform never calls on a proxy is reached
    /// (`debug_assert!`, so only effective in debug builds)
    pub assert_unreachable_marshal: bool,

    /// Emit a warning when a release failure is swallowed by a drop or no-throw path
    pub log_release_failures: bool,

    /// Namespace prefix applied to mapping names that do not carry one (default: `Local\`)
    pub mapping_name_prefix: &'static str,
}

impl Default for InteropConfig {
    fn default() -> Self {
        Self {
            allow_invalid_handles: false,
            assert_unreachable_marshal: cfg!(debug_assertions),
            log_release_failures: true,
            mapping_name_prefix: "Local\\",
        }
    }
}

impl InteropConfig {
    /// Creates a strict configuration
    ///
    /// Rejects sentinels and always asserts on unreachable marshaling paths.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            allow_invalid_handles: false,
            assert_unreachable_marshal: true,
            log_release_failures: true,
            mapping_name_prefix: "Local\\",
        }
    }

    /// Creates a permissive configuration
    ///
    /// Accepts sentinel handles and reports unreachable marshaling paths as errors only.
    /// Useful for hosts that wrap handles they did not create.
    #[must_use]
    pub fn permissive() -> Self {
        Self {
            allow_invalid_handles: true,
            assert_unreachable_marshal: false,
            log_release_failures: true,
            mapping_name_prefix: "Local\\",
        }
    }

    /// Creates a configuration suitable for production hosts
    ///
    /// Never asserts; unreachable paths surface as [`crate::Error::NotImplemented`].
    #[must_use]
    pub fn production() -> Self {
        Self {
            allow_invalid_handles: false,
            assert_unreachable_marshal: false,
            log_release_failures: true,
            mapping_name_prefix: "Local\\",
        }
    }

    /// Qualifies a mapping name with [`InteropConfig::mapping_name_prefix`]
    ///
    /// Names that already carry a namespace (`Global\`, `Local\`, ...) are kept as they are.
    #[must_use]
    pub fn qualified_mapping_name(&self, name: &str) -> String {
        if name.contains('\\') {
            name.to_string()
        } else {
            format!("{}{}", self.mapping_name_prefix, name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interop_config_presets() {
        let strict = InteropConfig::strict();
        assert!(!strict.allow_invalid_handles);
        assert!(strict.assert_unreachable_marshal);

        let permissive = InteropConfig::permissive();
        assert!(permissive.allow_invalid_handles);
        assert!(!permissive.assert_unreachable_marshal);

        let production = InteropConfig::production();
        assert!(!production.allow_invalid_handles);
        assert!(!production.assert_unreachable_marshal);
        assert!(production.log_release_failures);
    }

    #[test]
    fn test_default_config() {
        let default = InteropConfig::default();
        assert!(!default.allow_invalid_handles);
        assert_eq!(default.assert_unreachable_marshal, cfg!(debug_assertions));
        assert_eq!(default.mapping_name_prefix, "Local\\");
    }

    #[test]
    fn test_qualified_mapping_name() {
        let config = InteropConfig::default();
        assert_eq!(config.qualified_mapping_name("sortkeys"), "Local\\sortkeys");
        assert_eq!(
            config.qualified_mapping_name("Global\\sortkeys"),
            "Global\\sortkeys"
        );
    }
}
