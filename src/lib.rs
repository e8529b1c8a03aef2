pub mod alerter;
pub mod analyzer;
pub mod config;
pub mod engine;
pub mod normalize;
pub mod settings;
pub mod source;
pub mod storage;

/// Common types used across modules
pub mod types {
    use chrono::{DateTime, Utc};
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Serialize, Serializer};

    /// Metric identifier for every quantity a sensor station can report
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum MetricId {
        Pm1,
        Pm25,
        Pm10,
        Co,
        Co2,
        O3,
        No2,
        Temperature,
        Humidity,
        Pressure,
        Light,
        VocIndex,
        NoxIndex,
    }

    impl MetricId {
        pub const COUNT: usize = 13;

        /// All metrics in canonical order.
        pub const ALL: [MetricId; MetricId::COUNT] = [
            MetricId::Pm1,
            MetricId::Pm25,
            MetricId::Pm10,
            MetricId::Co,
            MetricId::Co2,
            MetricId::O3,
            MetricId::No2,
            MetricId::Temperature,
            MetricId::Humidity,
            MetricId::Pressure,
            MetricId::Light,
            MetricId::VocIndex,
            MetricId::NoxIndex,
        ];

        /// Position of this metric in [`MetricId::ALL`].
        pub fn index(self) -> usize {
            self as usize
        }

        /// Wire key used by sensor payloads and configuration files.
        pub fn key(self) -> &'static str {
            match self {
                MetricId::Pm1 => "pm1",
                MetricId::Pm25 => "pm25",
                MetricId::Pm10 => "pm10",
                MetricId::Co => "co",
                MetricId::Co2 => "co2",
                MetricId::O3 => "o3",
                MetricId::No2 => "no2",
                MetricId::Temperature => "temperature",
                MetricId::Humidity => "humidity",
                MetricId::Pressure => "pressure",
                MetricId::Light => "light",
                MetricId::VocIndex => "voc_index",
                MetricId::NoxIndex => "nox_index",
            }
        }

        pub fn from_key(key: &str) -> Option<MetricId> {
            MetricId::ALL.iter().copied().find(|m| m.key() == key)
        }

        pub fn unit(self) -> &'static str {
            match self {
                MetricId::Pm1 | MetricId::Pm25 | MetricId::Pm10 => "µg/m³",
                MetricId::Co | MetricId::Co2 => "ppm",
                MetricId::O3 | MetricId::No2 => "ppb",
                MetricId::Temperature => "°C",
                MetricId::Humidity => "%",
                MetricId::Pressure => "hPa",
                MetricId::Light => "lux",
                MetricId::VocIndex | MetricId::NoxIndex => "index",
            }
        }
    }

    impl std::fmt::Display for MetricId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.key())
        }
    }

    /// Fixed-shape metric record: one optional value per known metric.
    ///
    /// `None` means the sensor did not report the metric. Zero is a value.
    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    pub struct MetricValues {
        values: [Option<f64>; MetricId::COUNT],
    }

    impl MetricValues {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn get(&self, metric: MetricId) -> Option<f64> {
            self.values[metric.index()]
        }

        pub fn set(&mut self, metric: MetricId, value: f64) {
            self.values[metric.index()] = Some(value);
        }

        pub fn with(mut self, metric: MetricId, value: f64) -> Self {
            self.set(metric, value);
            self
        }

        /// Present metrics in canonical order.
        pub fn iter(&self) -> impl Iterator<Item = (MetricId, f64)> + '_ {
            MetricId::ALL
                .iter()
                .filter_map(move |m| self.get(*m).map(|v| (*m, v)))
        }

        pub fn len(&self) -> usize {
            self.values.iter().filter(|v| v.is_some()).count()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    impl Serialize for MetricValues {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let mut map = serializer.serialize_map(Some(self.len()))?;
            for (metric, value) in self.iter() {
                map.serialize_entry(metric.key(), &value)?;
            }
            map.end()
        }
    }

    /// One timestamped snapshot of all sensor metrics
    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct Reading {
        pub timestamp: DateTime<Utc>,
        pub location: Option<String>,
        pub metrics: MetricValues,
    }

    /// Severity tiers, ordered from best to worst
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "UPPERCASE")]
    pub enum Severity {
        Good,
        Moderate,
        Bad,
        Hazardous,
    }

    impl Severity {
        /// Parse a lowercase filter name as used in configuration files.
        pub fn from_name(name: &str) -> Option<Severity> {
            match name.to_ascii_lowercase().as_str() {
                "good" => Some(Severity::Good),
                "moderate" => Some(Severity::Moderate),
                "bad" => Some(Severity::Bad),
                "hazardous" => Some(Severity::Hazardous),
                _ => None,
            }
        }
    }

    impl std::fmt::Display for Severity {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Severity::Good => write!(f, "GOOD"),
                Severity::Moderate => write!(f, "MODERATE"),
                Severity::Bad => write!(f, "BAD"),
                Severity::Hazardous => write!(f, "HAZARDOUS"),
            }
        }
    }

    /// What triggered an alert
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum AlertKind {
        /// A metric's tier moved into BAD or HAZARDOUS
        ThresholdCrossing,
        /// The overall severity of a reading differs from the previous one
        OverallChange,
        /// The latest sample of a metric is a z-score outlier
        Anomaly,
    }

    impl std::fmt::Display for AlertKind {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                AlertKind::ThresholdCrossing => write!(f, "threshold"),
                AlertKind::OverallChange => write!(f, "overall"),
                AlertKind::Anomaly => write!(f, "anomaly"),
            }
        }
    }

    /// An alert to be dispatched
    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct Alert {
        pub timestamp: DateTime<Utc>,
        pub kind: AlertKind,
        pub severity: Severity,
        pub metric: Option<MetricId>,
        pub value: f64,
        pub threshold: Option<f64>,
        pub message: String,
        pub location: Option<String>,
        pub station: String,
    }

    /// Everything the engine hands to the notification side
    #[derive(Debug, Clone)]
    pub enum Event {
        Reading(Reading),
        Alert(Alert),
    }
}
