use serde::{Deserialize, Serialize};

/// Default namespace of the time-series vocabulary.
pub const DEFAULT_NAMESPACE: &str = "https://github.com/magbak/chrontext#";

/// Relation IRIs linking graph entities to their time series.
///
/// Detection is purely structural over these IRIs: a series variable linked
/// by `has_data_point` to a point carrying `has_timestamp` / `has_value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vocabulary {
    pub has_timeseries: String,
    pub has_data_point: String,
    pub has_timestamp: String,
    pub has_value: String,
    pub has_external_id: String,
    pub has_timeseries_table: String,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::with_namespace(DEFAULT_NAMESPACE)
    }
}

impl Vocabulary {
    /// The standard relation names under `namespace`.
    pub fn with_namespace(namespace: &str) -> Self {
        let iri = |local: &str| format!("{}{}", namespace, local);
        Self {
            has_timeseries: iri("hasTimeseries"),
            has_data_point: iri("hasDataPoint"),
            has_timestamp: iri("hasTimestamp"),
            has_value: iri("hasValue"),
            has_external_id: iri("hasExternalId"),
            has_timeseries_table: iri("hasTimeseriesTable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_namespace() {
        let vocabulary = Vocabulary::default();
        assert_eq!(vocabulary.has_value, "https://github.com/magbak/chrontext#hasValue");
        assert_eq!(
            Vocabulary::with_namespace("http://ex/").has_external_id,
            "http://ex/hasExternalId"
        );
    }

    #[test]
    fn test_partial_override_from_json() {
        let vocabulary: Vocabulary =
            serde_json::from_str(r#"{"has_value": "http://ex/value"}"#).unwrap();
        assert_eq!(vocabulary.has_value, "http://ex/value");
        assert_eq!(vocabulary.has_timestamp, Vocabulary::default().has_timestamp);
    }
}
