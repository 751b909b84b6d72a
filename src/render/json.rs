use serde::Serialize;

use crate::error::DirectPlusError;

pub fn to_pretty<T: Serialize>(value: &T) -> Result<String, DirectPlusError> {
    Ok(serde_json::to_string_pretty(value)?)
}
