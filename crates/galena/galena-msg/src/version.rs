/// Supported values for tag 8, `BeginString`.
///
/// `Custom` allows a private messaging protocol on top of the engine; its
/// precondition is that tags 52 and 122 use the fixed format
/// `YYYYMMDD-HH:MM:SS.sss`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FixVersion {
    Custom,
    Fix40,
    Fix41,
    Fix42,
    Fix43,
    Fix44,
    Fix50,
    Fix50Sp1,
    Fix50Sp2,
    Fixt11,
}

impl FixVersion {
    /// The wire value of tag 8 for this version.
    pub fn as_str(self) -> &'static str {
        match self {
            FixVersion::Custom => "CUSTOM",
            FixVersion::Fix40 => "FIX.4.0",
            FixVersion::Fix41 => "FIX.4.1",
            FixVersion::Fix42 => "FIX.4.2",
            FixVersion::Fix43 => "FIX.4.3",
            FixVersion::Fix44 => "FIX.4.4",
            FixVersion::Fix50 => "FIX.5.0",
            FixVersion::Fix50Sp1 => "FIX.5.0.SP1",
            FixVersion::Fix50Sp2 => "FIX.5.0.SP2",
            FixVersion::Fixt11 => "FIXT.1.1",
        }
    }

    /// Parses a tag 8 value. Returns `None` for unknown versions.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "CUSTOM" => FixVersion::Custom,
            "FIX.4.0" => FixVersion::Fix40,
            "FIX.4.1" => FixVersion::Fix41,
            "FIX.4.2" => FixVersion::Fix42,
            "FIX.4.3" => FixVersion::Fix43,
            "FIX.4.4" => FixVersion::Fix44,
            "FIX.5.0" => FixVersion::Fix50,
            "FIX.5.0.SP1" => FixVersion::Fix50Sp1,
            "FIX.5.0.SP2" => FixVersion::Fix50Sp2,
            "FIXT.1.1" => FixVersion::Fixt11,
            _ => return None,
        })
    }

    /// Whether tag 52 (`SendingTime`) carries milliseconds for this
    /// version. FIX 4.0 and 4.1 use second precision
    /// (`YYYYMMDD-HH:MM:SS`); everything later, and `Custom`, uses
    /// `YYYYMMDD-HH:MM:SS.sss`.
    #[inline]
    pub fn sending_time_has_millis(self) -> bool {
        !matches!(self, FixVersion::Fix40 | FixVersion::Fix41)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_version_string() {
        for v in [
            FixVersion::Custom,
            FixVersion::Fix40,
            FixVersion::Fix41,
            FixVersion::Fix42,
            FixVersion::Fix43,
            FixVersion::Fix44,
            FixVersion::Fix50,
            FixVersion::Fix50Sp1,
            FixVersion::Fix50Sp2,
            FixVersion::Fixt11,
        ] {
            assert_eq!(FixVersion::parse(v.as_str()), Some(v));
        }
        assert_eq!(FixVersion::parse("FIX.9.9"), None);
    }

    #[test]
    fn only_early_versions_lack_millis() {
        assert!(!FixVersion::Fix40.sending_time_has_millis());
        assert!(!FixVersion::Fix41.sending_time_has_millis());
        assert!(FixVersion::Fix42.sending_time_has_millis());
        assert!(FixVersion::Custom.sending_time_has_millis());
    }
}
