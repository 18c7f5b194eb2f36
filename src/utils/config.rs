//! Parsing of the `--params` TOML string.

use crate::utils::BenchError;

use serde::de::DeserializeOwned;

/// Parses an optional TOML string into `T`. Keys left out keep the values
/// of `T::default()` and unknown keys are rejected, so `T` is expected to
/// carry `#[serde(default, deny_unknown_fields)]`.
pub(crate) fn parse_params<T>(params_str: Option<&str>) -> Result<T, BenchError>
where
    T: Default + DeserializeOwned,
{
    match params_str {
        None => Ok(T::default()),
        Some(s) => Ok(toml::from_str(s)?),
    }
}
