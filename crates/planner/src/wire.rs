//! Serde adapters for floats that may be non-finite.
//!
//! JSON has no literal for NaN or infinity and `serde_json` writes them as
//! `null`, which cannot be read back into an `f64`. These adapters write
//! finite values as numbers and the rest as the strings `"NaN"`, `"inf"`
//! and `"-inf"`, so a diverged leg crosses ranks unchanged.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Repr {
    Number(f64),
    Text(String),
}

impl Repr {
    fn into_f64<E: serde::de::Error>(self) -> Result<f64, E> {
        match self {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => match text.parse::<f64>() {
                Ok(value) if !value.is_finite() => Ok(value),
                _ => Err(E::custom(format!("`{text}` is not a non-finite float"))),
            },
        }
    }
}

/// `#[serde(with = "crate::wire::float")]` for one `f64`.
pub mod float {
    use super::*;

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.collect_str(value)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Repr::deserialize(deserializer)?.into_f64()
    }
}

#[derive(Serialize, Deserialize)]
#[serde(transparent)]
struct Wire(#[serde(with = "float")] f64);

/// `#[serde(with = "crate::wire::floats")]` for a `Vec<f64>`.
pub mod floats {
    use super::*;

    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|&value| Wire(value)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        let values = Vec::<Wire>::deserialize(deserializer)?;
        Ok(values.into_iter().map(|Wire(value)| value).collect())
    }
}
