pub mod run;
pub mod schedule;
pub mod sendpost;
pub mod serve;
pub mod stage;

use anyhow::bail;
use sendpost_core::Parameters;

/// Build a parameter bag from `key=value` arguments. Values that parse as
/// JSON keep their type; anything else is taken as a string.
pub fn parse_params(pairs: &[String]) -> anyhow::Result<Parameters> {
    let mut params = Parameters::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("parameter '{pair}' must look like key=value");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("parameter '{pair}' has an empty key");
        }
        params.insert(key.to_string(), parse_value(raw));
    }
    Ok(params)
}

pub fn parse_value(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}
