//! Human-readable duration fields (`"30s"`, `"2m"`, `"1h 30m"`)

/// Serde adapter for `Option<Duration>` written as a humantime string
pub mod optional {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => humantime::parse_duration(s)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize)]
    struct Holder {
        #[serde(default, with = "super::optional")]
        timeout: Option<Duration>,
    }

    #[test]
    fn parses_common_forms() {
        for (text, secs) in [("30s", 30), ("2m", 120), ("1h 30m", 5400)] {
            let h: Holder = serde_yaml::from_str(&format!("timeout: {text}")).unwrap();
            assert_eq!(h.timeout, Some(Duration::from_secs(secs)));
        }
    }

    #[test]
    fn missing_is_none() {
        let h: Holder = serde_yaml::from_str("{}").unwrap();
        assert_eq!(h.timeout, None);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(serde_yaml::from_str::<Holder>("timeout: soon").is_err());
    }
}
