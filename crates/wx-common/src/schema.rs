//! Schema versioning.

/// Current schema version for all persisted result documents.
///
/// Follows semver: MAJOR.MINOR.PATCH
/// - MAJOR: Breaking changes (field removals, type changes)
/// - MINOR: Additive changes (new optional fields)
/// - PATCH: Bug fixes, documentation
pub const SCHEMA_VERSION: &str = "1.0.0";
