//! Protocol volume mapping
//!
//! Senders express volume in dB attenuation: `-144` is mute and `[-30, 0]`
//! is the audible range. Players work with a linear `0.0..=1.0` factor.

/// Protocol value meaning mute
pub const MUTE: f64 = -144.0;

/// Quietest audible protocol value
pub const MIN_AUDIBLE: f64 = -30.0;

/// Map a protocol volume onto `0.0..=1.0`
pub fn normalize(volume: f64) -> f64 {
    if volume <= MIN_AUDIBLE {
        return 0.0;
    }
    ((volume - MIN_AUDIBLE) / -MIN_AUDIBLE).clamp(0.0, 1.0)
}

/// Map a `0.0..=1.0` volume back onto the protocol range
pub fn denormalize(volume: f64) -> f64 {
    if volume <= 0.0 {
        return MUTE;
    }
    if volume >= 1.0 {
        return 0.0;
    }
    MIN_AUDIBLE + -MIN_AUDIBLE * volume
}

/// Pull the value out of a `text/parameters` body such as `volume: -15.0`
pub fn parse_parameter(body: &str) -> Option<f64> {
    body.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim() != "volume" {
            return None;
        }
        value.trim().parse().ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoints() {
        assert_eq!(normalize(MUTE), 0.0);
        assert_eq!(normalize(0.0), 1.0);
        assert_eq!(normalize(-30.0), 0.0);
        assert!((normalize(-15.0) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_normalize_stays_in_range() {
        let mut v = -30.0;
        while v <= 0.0 {
            let n = normalize(v);
            assert!((0.0..=1.0).contains(&n), "{} -> {}", v, n);
            v += 0.25;
        }
        assert_eq!(normalize(12.0), 1.0);
    }

    #[test]
    fn test_denormalize() {
        assert_eq!(denormalize(0.0), MUTE);
        assert_eq!(denormalize(1.0), 0.0);
        assert_eq!(denormalize(0.5), -15.0);
        assert!((normalize(denormalize(0.3)) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_parse_parameter() {
        assert_eq!(parse_parameter("volume: -11.123877\r\n"), Some(-11.123877));
        assert_eq!(parse_parameter("progress: 1/2/3\r\nvolume: 0\r\n"), Some(0.0));
        assert_eq!(parse_parameter("progress: 1/2/3\r\n"), None);
        assert_eq!(parse_parameter("volume: loud"), None);
    }
}
