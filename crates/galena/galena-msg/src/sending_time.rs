use crate::version::FixVersion;
use chrono::{DateTime, Utc};

/// Formats a tag 52/122 timestamp for `version`.
///
/// FIX 4.0 and 4.1 use `YYYYMMDD-HH:MM:SS`; every later version, and the
/// CUSTOM protocol, uses `YYYYMMDD-HH:MM:SS.sss`.
pub fn format_sending_time(version: FixVersion, at: DateTime<Utc>) -> String {
    if version.sending_time_has_millis() {
        at.format("%Y%m%d-%H:%M:%S%.3f").to_string()
    } else {
        at.format("%Y%m%d-%H:%M:%S").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn precision_follows_version() {
        let at = Utc.with_ymd_and_hms(2012, 11, 5, 23, 24, 37).unwrap();
        assert_eq!(
            format_sending_time(FixVersion::Fix41, at),
            "20121105-23:24:37"
        );
        assert_eq!(
            format_sending_time(FixVersion::Fix44, at),
            "20121105-23:24:37.000"
        );
    }
}
