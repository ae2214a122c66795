/// Strip an optional `0x`/`0X` prefix.
pub fn strip_0x(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

/// Lowercase a hex string and make sure it carries a `0x` prefix.
pub fn normalize_hex(value: &str) -> String {
    format!("0x{}", strip_0x(value).to_ascii_lowercase())
}

/// Parse a JSON-RPC quantity (`0x1a`) into a `u64`.
pub fn parse_quantity(value: &str) -> Result<u64, String> {
    let digits = strip_0x(value);
    if digits.is_empty() {
        return Err(format!("empty quantity: {value:?}"));
    }
    u64::from_str_radix(digits, 16).map_err(|e| format!("invalid quantity {value:?}: {e}"))
}

pub fn to_quantity(value: u64) -> String {
    format!("{value:#x}")
}

/// Serde adapter for `u64` fields encoded as JSON-RPC quantities.
///
/// Plain JSON numbers are accepted as well, since some providers and relayers
/// return decimal block numbers.
pub mod quantity {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::to_quantity(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => super::parse_quantity(&text).map_err(D::Error::custom),
            Raw::Number(n) => Ok(n),
        }
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<u64>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(v) => super::serialize(v, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<u64>, D::Error> {
            #[derive(Deserialize)]
            struct Wrapper(#[serde(with = "super")] u64);

            let wrapped: Option<Wrapper> = Option::deserialize(deserializer)?;
            Ok(wrapped.map(|Wrapper(v)| v))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantities_parse_with_and_without_prefix() {
        assert_eq!(parse_quantity("0x1a").unwrap(), 26);
        assert_eq!(parse_quantity("ff").unwrap(), 255);
        assert!(parse_quantity("0x").is_err());
        assert!(parse_quantity("0xzz").is_err());
        assert_eq!(to_quantity(4096), "0x1000");
    }

    #[test]
    fn quantity_serde_accepts_numbers_and_strings() {
        #[derive(serde::Deserialize)]
        struct Sample {
            #[serde(with = "quantity")]
            a: u64,
            #[serde(with = "quantity")]
            b: u64,
            #[serde(default, with = "quantity::option")]
            c: Option<u64>,
        }

        let sample: Sample = serde_json::from_str(r#"{"a":"0x10","b":17,"c":null}"#).unwrap();
        assert_eq!(sample.a, 16);
        assert_eq!(sample.b, 17);
        assert_eq!(sample.c, None);
    }

    #[test]
    fn normalize_lowercases_and_prefixes() {
        assert_eq!(normalize_hex("ABcd"), "0xabcd");
        assert_eq!(normalize_hex("0XABcd"), "0xabcd");
    }
}
