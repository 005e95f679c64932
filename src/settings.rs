use log::warn;
use matchday_api::acquisition::DEFAULT_MAX_IN_FLIGHT;
use matchday_api::client::{DEFAULT_LEAGUE, OPENLIGA_API, OpenLigaClient};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_url: String,
    pub league: String,
    pub store_path: PathBuf,
    pub max_fetches: usize,
    pub timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: OPENLIGA_API.to_owned(),
            league: DEFAULT_LEAGUE.to_owned(),
            store_path: PathBuf::from("matchday.json"),
            max_fetches: DEFAULT_MAX_IN_FLIGHT,
            timeout: Duration::from_secs(10),
        }
    }
}

impl Settings {
    /// Read `MATCHDAY_*` overrides from the environment.
    pub fn load() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            api_url: var("MATCHDAY_API_URL").unwrap_or(defaults.api_url),
            league: var("MATCHDAY_LEAGUE").unwrap_or(defaults.league),
            store_path: var("MATCHDAY_STORE").map(PathBuf::from).unwrap_or(defaults.store_path),
            max_fetches: parse_or("MATCHDAY_MAX_FETCHES", var("MATCHDAY_MAX_FETCHES"), defaults.max_fetches),
            timeout: Duration::from_secs(parse_or(
                "MATCHDAY_TIMEOUT_SECS",
                var("MATCHDAY_TIMEOUT_SECS"),
                defaults.timeout.as_secs(),
            )),
        }
    }

    pub fn client(&self) -> OpenLigaClient {
        OpenLigaClient::new()
            .with_base_url(self.api_url.as_str())
            .with_timeout(self.timeout)
    }
}

fn parse_or<T: FromStr + Copy>(key: &str, raw: Option<String>, default: T) -> T {
    match raw {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("ignoring invalid {key}={raw}");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(vars: &[(&str, &str)]) -> Settings {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_overrides() {
        assert_eq!(settings_from(&[]), Settings::default());
    }

    #[test]
    fn overrides_are_read() {
        let settings = settings_from(&[
            ("MATCHDAY_LEAGUE", "bl2"),
            ("MATCHDAY_STORE", "/tmp/bl2.json"),
            ("MATCHDAY_MAX_FETCHES", "3"),
            ("MATCHDAY_TIMEOUT_SECS", "30"),
        ]);
        assert_eq!(settings.league, "bl2");
        assert_eq!(settings.store_path, PathBuf::from("/tmp/bl2.json"));
        assert_eq!(settings.max_fetches, 3);
        assert_eq!(settings.timeout, Duration::from_secs(30));
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let settings = settings_from(&[("MATCHDAY_MAX_FETCHES", "lots"), ("MATCHDAY_LEAGUE", "  ")]);
        assert_eq!(settings.max_fetches, DEFAULT_MAX_IN_FLIGHT);
        assert_eq!(settings.league, DEFAULT_LEAGUE);
    }
}
