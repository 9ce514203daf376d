/// Registry tuning.
///
/// ```rust
/// use rebind_core::RegistryConfig;
///
/// let config = RegistryConfig::default().with_max_drain_cycles(8);
/// assert_eq!(config.max_drain_cycles, 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RegistryConfig {
    /// Upper bound on notification cycles a single write may run while
    /// draining writes that subscribers make back into the same cell.
    /// Values below 1 behave as 1.
    pub max_drain_cycles: usize,
    /// Log delivery failures through the `log` facade in addition to the
    /// failure hook.
    pub log_failures: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_drain_cycles: 100,
            log_failures: true,
        }
    }
}

impl RegistryConfig {
    pub fn with_max_drain_cycles(mut self, cycles: usize) -> Self {
        self.max_drain_cycles = cycles;
        self
    }

    pub fn with_log_failures(mut self, enabled: bool) -> Self {
        self.log_failures = enabled;
        self
    }

    pub(crate) fn drain_limit(&self) -> usize {
        self.max_drain_cycles.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limit_still_runs_one_cycle() {
        let config = RegistryConfig::default().with_max_drain_cycles(0);
        assert_eq!(config.drain_limit(), 1);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: RegistryConfig = serde_json::from_str(r#"{"max_drain_cycles": 4}"#).unwrap();
        assert_eq!(config.max_drain_cycles, 4);
        assert!(config.log_failures);
    }
}
