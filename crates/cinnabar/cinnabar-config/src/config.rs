use crate::endpoint::Endpoint;
use chrono::{NaiveTime, Weekday};
use chrono_tz::Tz;
use galena_msg::FixVersion;
use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize, Debug)]
pub struct SessionConfig {
    #[serde(default = "defaults::is_duplex")]
    pub is_duplex: bool,
    #[serde(default)]
    pub initiate_logon: bool,
    #[serde(default)]
    pub reset_seq_numbers_at_logon: bool,
    /// Two-letter day codes, e.g. ["MO", "TU", "WE", "TH", "FR"].
    #[serde(default = "defaults::session_days")]
    pub session_days: Vec<String>,
    pub fix_application_version: String,
    pub fix_session_version: String,
    /// Seconds.
    #[serde(default = "defaults::heartbeat_interval")]
    pub heartbeat_interval: u32,
    /// Seconds.
    #[serde(default = "defaults::test_request_delay")]
    pub test_request_delay: u32,
    /// Seconds before session start during which connections come up.
    #[serde(default)]
    pub session_warm_up_time: u32,
    /// "HH:MM" in the configured time zone.
    pub session_start: String,
    pub session_end: String,
    /// IANA zone name.
    #[serde(default = "defaults::timezone")]
    pub timezone: String,
    /// `<family:?|4|6><kind:C|L><address>|<port>`
    pub in_going: String,
    /// Required for simplex sessions, unused for duplex.
    #[serde(default)]
    pub out_going: Option<String>,
    #[serde(default = "defaults::journal_path")]
    pub journal_path: String,
    /// Field separator byte; only tests override this.
    #[serde(default = "defaults::field_separator")]
    pub field_separator: u8,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("bad endpoint '{value}'")]
    BadEndpoint { value: String },

    #[error("bad time of day '{value}', expected HH:MM")]
    BadTime { value: String },

    #[error("unknown day code '{value}'")]
    BadDay { value: String },

    #[error("unknown time zone '{value}'")]
    BadTimezone { value: String },

    #[error("unsupported FIX version '{value}'")]
    BadVersion { value: String },

    #[error("simplex session is missing its outgoing endpoint")]
    MissingOutgoing,
}

mod defaults {
    pub fn is_duplex() -> bool {
        true
    }

    pub fn session_days() -> Vec<String> {
        ["MO", "TU", "WE", "TH", "FR"].map(String::from).to_vec()
    }

    pub fn heartbeat_interval() -> u32 {
        30
    }

    pub fn test_request_delay() -> u32 {
        60
    }

    pub fn timezone() -> String {
        "UTC".into()
    }

    pub fn journal_path() -> String {
        "/var/lib/cinnabar/session.db".into()
    }

    pub fn field_separator() -> u8 {
        0x01
    }
}

impl SessionConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config: SessionConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every derived field once so failures surface at load time,
    /// not mid-session.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session_version()?;
        self.application_version()?;
        self.weekdays()?;
        self.start_time()?;
        self.end_time()?;
        self.zone()?;
        self.ingoing_endpoint()?;
        if !self.is_duplex {
            match &self.out_going {
                Some(e) => {
                    Endpoint::parse(e)?;
                }
                None => return Err(ConfigError::MissingOutgoing),
            }
        }
        Ok(())
    }

    /// The version used for tag 8 on the wire.
    pub fn session_version(&self) -> Result<FixVersion, ConfigError> {
        FixVersion::parse(&self.fix_session_version).ok_or_else(|| ConfigError::BadVersion {
            value: self.fix_session_version.clone(),
        })
    }

    pub fn application_version(&self) -> Result<FixVersion, ConfigError> {
        FixVersion::parse(&self.fix_application_version).ok_or_else(|| ConfigError::BadVersion {
            value: self.fix_application_version.clone(),
        })
    }

    pub fn weekdays(&self) -> Result<Vec<Weekday>, ConfigError> {
        self.session_days
            .iter()
            .map(|code| match code.to_ascii_uppercase().as_str() {
                "MO" => Ok(Weekday::Mon),
                "TU" => Ok(Weekday::Tue),
                "WE" => Ok(Weekday::Wed),
                "TH" => Ok(Weekday::Thu),
                "FR" => Ok(Weekday::Fri),
                "SA" => Ok(Weekday::Sat),
                "SU" => Ok(Weekday::Sun),
                _ => Err(ConfigError::BadDay {
                    value: code.clone(),
                }),
            })
            .collect()
    }

    pub fn start_time(&self) -> Result<NaiveTime, ConfigError> {
        parse_hhmm(&self.session_start)
    }

    pub fn end_time(&self) -> Result<NaiveTime, ConfigError> {
        parse_hhmm(&self.session_end)
    }

    pub fn zone(&self) -> Result<Tz, ConfigError> {
        self.timezone.parse().map_err(|_| ConfigError::BadTimezone {
            value: self.timezone.clone(),
        })
    }

    pub fn ingoing_endpoint(&self) -> Result<Endpoint, ConfigError> {
        Endpoint::parse(&self.in_going)
    }

    pub fn outgoing_endpoint(&self) -> Result<Option<Endpoint>, ConfigError> {
        self.out_going.as_deref().map(Endpoint::parse).transpose()
    }
}

fn parse_hhmm(s: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| ConfigError::BadTime {
        value: s.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointKind;

    const MINIMAL: &str = r#"
        fix_application_version = "FIX.4.4"
        fix_session_version = "FIX.4.4"
        session_start = "08:00"
        session_end = "17:30"
        in_going = "4L0.0.0.0|9880"
    "#;

    #[test]
    fn minimal_duplex_config_fills_defaults() {
        let c: SessionConfig = toml::from_str(MINIMAL).unwrap();
        c.validate().unwrap();
        assert!(c.is_duplex);
        assert_eq!(c.heartbeat_interval, 30);
        assert_eq!(c.field_separator, 0x01);
        assert_eq!(c.weekdays().unwrap().len(), 5);
        assert_eq!(c.session_version().unwrap(), FixVersion::Fix44);
        assert_eq!(c.ingoing_endpoint().unwrap().kind, EndpointKind::Listen);
        assert_eq!(c.start_time().unwrap(), NaiveTime::from_hms_opt(8, 0, 0).unwrap());
    }

    #[test]
    fn simplex_requires_an_outgoing_endpoint() {
        let mut c: SessionConfig = toml::from_str(MINIMAL).unwrap();
        c.is_duplex = false;
        assert!(matches!(c.validate(), Err(ConfigError::MissingOutgoing)));

        c.out_going = Some("4Cupstream.example.com|5001".into());
        c.validate().unwrap();
        assert!(c.outgoing_endpoint().unwrap().is_some());
    }

    #[test]
    fn bad_values_are_typed_errors() {
        let mut c: SessionConfig = toml::from_str(MINIMAL).unwrap();
        c.session_days = vec!["XX".into()];
        assert!(matches!(c.weekdays(), Err(ConfigError::BadDay { .. })));

        c.session_start = "25:99".into();
        assert!(matches!(c.start_time(), Err(ConfigError::BadTime { .. })));

        c.timezone = "Mars/Olympus".into();
        assert!(matches!(c.zone(), Err(ConfigError::BadTimezone { .. })));

        c.fix_session_version = "FIX.9.9".into();
        assert!(matches!(
            c.session_version(),
            Err(ConfigError::BadVersion { .. })
        ));
    }
}
