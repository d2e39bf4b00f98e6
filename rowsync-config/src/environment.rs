use std::fmt;
use std::io::Error;
use std::str::FromStr;

/// Environment variable holding the name of the running environment.
const APP_ENVIRONMENT_ENV_NAME: &str = "APP_ENVIRONMENT";

/// Production environment identifier.
const PROD_ENV_NAME: &str = "prod";

/// Staging environment identifier.
const STAGING_ENV_NAME: &str = "staging";

/// Development environment identifier.
const DEV_ENV_NAME: &str = "dev";

/// Runtime environment of the operator.
///
/// Selects the environment-specific configuration file and the log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production environment.
    Prod,
    /// Staging environment.
    Staging,
    /// Development environment.
    Dev,
}

impl Environment {
    /// Loads the environment from the `APP_ENVIRONMENT` environment variable.
    ///
    /// Falls back to [`Environment::Prod`] when the variable is not set, so that a deployed
    /// operator never accidentally runs with development settings.
    pub fn load() -> Result<Environment, Error> {
        match std::env::var(APP_ENVIRONMENT_ENV_NAME) {
            Ok(value) => value.parse(),
            Err(_) => Ok(Environment::Prod),
        }
    }

    /// Sets the `APP_ENVIRONMENT` environment variable to this environment.
    ///
    /// Only meant for tests and tooling that run before any other thread reads the environment.
    pub fn set(&self) {
        unsafe { std::env::set_var(APP_ENVIRONMENT_ENV_NAME, self.as_str()) }
    }

    /// Returns the identifier used in file names and in `APP_ENVIRONMENT`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Prod => PROD_ENV_NAME,
            Environment::Staging => STAGING_ENV_NAME,
            Environment::Dev => DEV_ENV_NAME,
        }
    }

    /// Returns `true` for [`Environment::Prod`] and [`Environment::Staging`].
    pub fn is_prod(&self) -> bool {
        matches!(self, Self::Prod | Self::Staging)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = Error;

    /// Parses an environment name case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            PROD_ENV_NAME => Ok(Self::Prod),
            STAGING_ENV_NAME => Ok(Self::Staging),
            DEV_ENV_NAME => Ok(Self::Dev),
            other => Err(Error::other(format!(
                "{other} is not a supported environment. Use either `{PROD_ENV_NAME}`/`{STAGING_ENV_NAME}`/`{DEV_ENV_NAME}`.",
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_environments_case_insensitively() {
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Prod);
        assert_eq!("Staging".parse::<Environment>().unwrap(), Environment::Staging);
        assert_eq!("DEV".parse::<Environment>().unwrap(), Environment::Dev);
    }

    #[test]
    fn rejects_unknown_environment() {
        let err = "qa".parse::<Environment>().unwrap_err();
        assert!(err.to_string().contains("qa is not a supported environment"));
    }

    #[test]
    fn staging_counts_as_prod() {
        assert!(Environment::Prod.is_prod());
        assert!(Environment::Staging.is_prod());
        assert!(!Environment::Dev.is_prod());
        assert_eq!(Environment::Staging.to_string(), "staging");
    }
}
