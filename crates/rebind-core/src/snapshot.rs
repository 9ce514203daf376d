//! JSON snapshots of a registry's values.

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::dispatch::WriteOutcome;
use crate::error::Result;
use crate::registry::Registry;

impl<V> Registry<V>
where
    V: Clone + PartialEq + Serialize + DeserializeOwned + 'static,
{
    /// Serializes [`snapshot`](Registry::snapshot) as a JSON object.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }

    /// Writes every entry of a JSON object through the normal write path, so
    /// subscribers see restored values like any other change. Keys not in the
    /// object are left alone.
    pub fn restore_json(&self, json: &str) -> Result<Vec<(String, WriteOutcome)>> {
        let values: BTreeMap<String, V> = serde_json::from_str(json)?;
        let outcomes = values
            .into_iter()
            .map(|(key, value)| {
                let outcome = self.write(&key, value);
                (key, outcome)
            })
            .collect();
        Ok(outcomes)
    }
}
