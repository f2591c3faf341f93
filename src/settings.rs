use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::models::{money, referrals::ReferralPolicy};

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Server {
    pub listen: String,
    pub secure_cookies: bool,
    pub session_ttl_hours: i64,
}

impl Default for Server {
    fn default() -> Self {
        Server {
            listen: "0.0.0.0:8080".to_string(),
            secure_cookies: false,
            session_ttl_hours: 24 * 30,
        }
    }
}

impl Server {
    /// Fails when `session_ttl_hours` is not positive or does not fit a
    /// `chrono::Duration`.
    pub fn session_ttl(&self) -> Result<chrono::Duration, ConfigError> {
        chrono::Duration::try_hours(self.session_ttl_hours)
            .filter(|ttl| *ttl > chrono::Duration::zero())
            .ok_or_else(|| {
                ConfigError::Message(format!(
                    "server.session_ttl_hours out of range: {}",
                    self.session_ttl_hours
                ))
            })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Storage {
    pub backend: StorageBackend,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Postgres {
    pub url: String,
    pub max_connections: u32,
}

impl Default for Postgres {
    fn default() -> Self {
        Postgres {
            url: String::new(),
            max_connections: 5,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Admin {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Otp {
    /// Rupees.
    pub default_price: f64,
}

impl Default for Otp {
    fn default() -> Self {
        Otp { default_price: 1.0 }
    }
}

impl Otp {
    pub fn default_price_paise(&self) -> i64 {
        money::from_rupees(self.default_price)
            .filter(|paise| *paise > 0)
            .unwrap_or(money::PAISE_PER_RUPEE)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Referral {
    pub policy: ReferralPolicy,
    /// Rupees credited to the referrer.
    pub reward: f64,
}

impl Default for Referral {
    fn default() -> Self {
        Referral {
            policy: ReferralPolicy::Manual,
            reward: 10.0,
        }
    }
}

impl Referral {
    pub fn reward_paise(&self) -> i64 {
        money::from_rupees(self.reward)
            .filter(|paise| *paise >= 0)
            .unwrap_or(0)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: Server,
    pub storage: Storage,
    pub postgres: Postgres,
    pub admin: Admin,
    pub otp: Otp,
    pub referral: Referral,
}

impl Settings {
    /// Layers `path` (if present) and `OTP_WALLET__SECTION__KEY` environment
    /// variables over the defaults.
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("OTP_WALLET")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.server.session_ttl()?;

        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = Settings::new("does-not-exist.toml").unwrap();
        assert_eq!(settings.server.listen, "0.0.0.0:8080");
        assert_eq!(settings.storage.backend, StorageBackend::Memory);
        assert_eq!(settings.otp.default_price_paise(), 100);
        assert_eq!(settings.referral.policy, ReferralPolicy::Manual);
        assert_eq!(settings.referral.reward_paise(), 1000);
    }

    #[test]
    fn session_ttl_must_be_positive_and_in_range() {
        let ttl = |hours| {
            Server {
                session_ttl_hours: hours,
                ..Server::default()
            }
            .session_ttl()
        };

        assert_eq!(ttl(720).unwrap(), chrono::Duration::hours(720));
        assert!(ttl(0).is_err());
        assert!(ttl(-1).is_err());
        assert!(ttl(i64::MAX).is_err());
    }

    #[test]
    fn non_positive_default_price_is_replaced() {
        let otp = Otp {
            default_price: -3.0,
        };
        assert_eq!(otp.default_price_paise(), 100);
    }
}
