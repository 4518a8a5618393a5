use gradwright_core::{Error, Result};

/// Environment variable read by [`DistAutogradConfig::from_env`].
pub const WORKER_ID_ENV: &str = "GRADWRIGHT_WORKER_ID";

/// Configuration of a context registry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DistAutogradConfig {
    /// Identity of this worker, `0..=65535`. Checked at init time.
    pub worker_id: i64,
}

impl DistAutogradConfig {
    /// Set the worker id.
    pub fn with_worker_id(mut self, worker_id: i64) -> Self {
        self.worker_id = worker_id;
        self
    }

    /// Read the worker id from `GRADWRIGHT_WORKER_ID`; worker 0 when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var(WORKER_ID_ENV) {
            Ok(raw) => Ok(Self::default().with_worker_id(parse_worker_id(&raw)?)),
            Err(std::env::VarError::NotPresent) => Ok(Self::default()),
            Err(e) => Err(Error::msg(format!("{WORKER_ID_ENV}: {e}"))),
        }
    }
}

fn parse_worker_id(raw: &str) -> Result<i64> {
    raw.trim()
        .parse::<i64>()
        .map_err(|e| Error::msg(format!("{WORKER_ID_ENV}={raw:?} is not an integer: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let cfg = DistAutogradConfig::default().with_worker_id(12);
        assert_eq!(cfg.worker_id, 12);
        assert_eq!(DistAutogradConfig::default().worker_id, 0);
    }

    #[test]
    fn test_parse_worker_id() {
        assert_eq!(parse_worker_id(" 42\n").unwrap(), 42);
        // Range is checked by the registry, not here.
        assert_eq!(parse_worker_id("70000").unwrap(), 70000);
        let err = parse_worker_id("three").unwrap_err();
        assert!(matches!(err, Error::Msg(_)), "{err}");
    }

    // The only test touching the variable, so no other test races on it.
    #[test]
    fn test_from_env() {
        std::env::remove_var(WORKER_ID_ENV);
        assert_eq!(DistAutogradConfig::from_env().unwrap().worker_id, 0);

        std::env::set_var(WORKER_ID_ENV, "17");
        assert_eq!(DistAutogradConfig::from_env().unwrap().worker_id, 17);

        std::env::set_var(WORKER_ID_ENV, "worker-3");
        let err = DistAutogradConfig::from_env().unwrap_err();
        assert!(matches!(err, Error::Msg(ref m) if m.contains(WORKER_ID_ENV)), "{err}");

        std::env::remove_var(WORKER_ID_ENV);
    }
}
