//! Decoding of the `getAll` response
//!
//! ```json
//! {"modules": {
//!   "outputModules": [{"moduleNumber": 1, "state": true,
//!                      "outputStates": [{"outputNumber": 1, "outputState": false}]}],
//!   "inputModules":  [{"moduleNumber": 2, "state": true,
//!                      "inputStates": [{"inputNumber": 3, "inputState": true}]}]
//! }}
//! ```
//!
//! Modules whose `state` is false are not installed and are skipped.

use ihc_core::TopicAddress;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Default, Deserialize)]
struct GetAllResponse {
    #[serde(default)]
    modules: Modules,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Modules {
    output_modules: Vec<OutputModule>,
    input_modules: Vec<InputModule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutputModule {
    module_number: Option<u32>,
    #[serde(default)]
    state: bool,
    #[serde(default)]
    output_states: Vec<OutputState>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutputState {
    output_number: Option<u32>,
    #[serde(default)]
    output_state: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InputModule {
    module_number: Option<u32>,
    #[serde(default)]
    state: bool,
    #[serde(default)]
    input_states: Vec<InputState>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InputState {
    input_number: Option<u32>,
    #[serde(default)]
    input_state: bool,
}

/// Every known terminal and its reported state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    entries: Vec<(TopicAddress, bool)>,
}

impl Snapshot {
    pub fn new(entries: Vec<(TopicAddress, bool)>) -> Self {
        Self { entries }
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let response: GetAllResponse = serde_json::from_value(value)?;
        let mut entries = Vec::new();

        for module in response.modules.output_modules.iter().filter(|m| m.state) {
            let Some(module_number) = module.module_number else {
                continue;
            };
            entries.extend(module.output_states.iter().filter_map(|o| {
                let address = TopicAddress::output(module_number, o.output_number?);
                Some((address, o.output_state))
            }));
        }

        for module in response.modules.input_modules.iter().filter(|m| m.state) {
            let Some(module_number) = module.module_number else {
                continue;
            };
            entries.extend(module.input_states.iter().filter_map(|i| {
                let address = TopicAddress::input(module_number, i.input_number?);
                Some((address, i.input_state))
            }));
        }

        Ok(Self { entries })
    }

    pub fn iter(&self) -> impl Iterator<Item = &(TopicAddress, bool)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_active_modules_only() {
        let snapshot = Snapshot::from_value(json!({
            "modules": {
                "outputModules": [
                    {"moduleNumber": 1, "state": true, "outputStates": [
                        {"outputNumber": 1, "outputState": true},
                        {"outputNumber": 2, "outputState": false}
                    ]},
                    {"moduleNumber": 2, "state": false, "outputStates": [
                        {"outputNumber": 1, "outputState": true}
                    ]}
                ],
                "inputModules": [
                    {"moduleNumber": 3, "state": true, "inputStates": [
                        {"inputNumber": 7, "inputState": true}
                    ]}
                ]
            }
        }))
        .unwrap();

        let entries: Vec<_> = snapshot.iter().copied().collect();
        assert_eq!(
            entries,
            vec![
                (TopicAddress::output(1, 1), true),
                (TopicAddress::output(1, 2), false),
                (TopicAddress::input(3, 7), true),
            ]
        );
    }

    #[test]
    fn test_missing_sections_yield_empty_snapshot() {
        assert!(Snapshot::from_value(json!({})).unwrap().is_empty());
        assert!(Snapshot::from_value(json!({"modules": {}})).unwrap().is_empty());
    }

    #[test]
    fn test_entries_without_numbers_are_skipped() {
        let snapshot = Snapshot::from_value(json!({
            "modules": {"outputModules": [
                {"state": true, "outputStates": [{"outputNumber": 1, "outputState": true}]},
                {"moduleNumber": 5, "state": true, "outputStates": [{"outputState": true}]}
            ]}
        }))
        .unwrap();
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_wrong_shape_is_an_error() {
        assert!(Snapshot::from_value(json!({"modules": {"outputModules": 3}})).is_err());
    }
}
