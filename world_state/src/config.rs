/// Construction-time parameters for a [`crate::WorldState`].
///
/// No external config-file format is specified: the engine is an embedded
/// library, not a standalone process, so these are plain constructor
/// arguments rather than something loaded from disk (§9 ambient stack).
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Whether the storage overlay enforces strict global-version checking.
    /// §6.1 requires `true` for the storage overlay and `false` for the
    /// changelog (the changelog instead turns on
    /// `set_strict_global_version_check` independently, see
    /// [`Self::changelog_strict_global_version_check`]).
    pub strict_storage_overlay: bool,

    /// Passed to `changelog.set_strict_global_version_check` at
    /// construction. §6.1 requires this to be `true` even though the
    /// changelog's overlay itself is built non-strict.
    pub changelog_strict_global_version_check: bool,

    /// Capacity hint for the dependency-set `Vec<Id>` a `check_and_update`
    /// call is expected to return; purely an allocation optimization.
    pub dependency_set_capacity_hint: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            strict_storage_overlay: true,
            changelog_strict_global_version_check: true,
            dependency_set_capacity_hint: 4,
        }
    }
}
