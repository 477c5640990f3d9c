use core::str::FromStr;

use domain::base::Name;

use crate::enforcer::policy::parse_span_secs;
use crate::enforcer::UnixTime;
use crate::error::Error;

/// Parse a zone name.
///
/// Zones are stored by their name in lower case and without the trailing
/// dot.
pub fn parse_zone_name(arg: &str) -> Result<String, Error> {
    let name = Name::<Vec<u8>>::from_str(&arg.to_lowercase())
        .map_err(|e| Error::from(format!("invalid zone name {arg}: {e}")))?;
    let mut res = name.to_string();
    if res.ends_with('.') && res.len() > 1 {
        res.pop();
    }
    Ok(res)
}

/// Parse a duration such as `1h` or `30 days` into seconds.
///
/// A plain number is taken as seconds.
pub fn parse_duration(arg: &str) -> Result<u64, Error> {
    if let Ok(secs) = arg.parse::<u64>() {
        return Ok(secs);
    }
    parse_span_secs(arg).map_err(Error::from)
}

/// Parse a point in time, given as seconds or an RFC 3339 timestamp.
pub fn parse_time(arg: &str) -> Result<UnixTime, Error> {
    UnixTime::from_str(arg).map_err(Error::from)
}

/// Parse a point in time, or `off` for none.
pub fn parse_opt_time(arg: &str) -> Result<Option<UnixTime>, Error> {
    if arg == "off" {
        return Ok(None);
    }
    parse_time(arg).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_names() {
        assert_eq!(parse_zone_name("Example.COM.").unwrap(), "example.com");
        assert_eq!(parse_zone_name("example.com").unwrap(), "example.com");
        assert!(parse_zone_name("exa..mple").is_err());
    }

    #[test]
    fn durations_and_times() {
        assert_eq!(parse_duration("1h").unwrap(), 3600);
        assert_eq!(parse_duration("2 days").unwrap(), 172_800);
        assert_eq!(parse_duration("90").unwrap(), 90);
        assert!(parse_duration("soon").is_err());
        assert_eq!(parse_opt_time("off").unwrap(), None);
        assert_eq!(
            parse_opt_time("100").unwrap(),
            Some(UnixTime::from_secs(100))
        );
    }
}
