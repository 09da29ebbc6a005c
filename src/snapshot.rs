use serde::Serialize;
use std::collections::BTreeMap;

pub const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub cpu: CpuReading,
    pub memory: MemoryReading,
    pub disk: Vec<DiskReading>,
    pub host: HostReading,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CpuReading {
    pub physical_cores: usize,
    pub logical_cores: usize,
    pub nominal_frequency_mhz: u64,
    pub current_frequency_mhz: u64,
    pub temperatures: Vec<f32>,
    pub free_fraction: f64,
    pub usage_fraction: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryReading {
    pub total_bytes: Option<u64>,
    pub available_bytes: Option<u64>,
    pub used_bytes: Option<u64>,
    pub usage_fraction: Option<f64>,
    pub swap_total_bytes: Option<u64>,
    pub swap_free_bytes: Option<u64>,
    pub swap_used_bytes: Option<u64>,
    pub swap_usage_fraction: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskReading {
    pub device: String,
    pub mountpoint: String,
    pub total_bytes: Option<u64>,
    pub free_bytes: Option<u64>,
    pub usage_fraction: Option<f64>,
    pub read_bytes_per_sec: Option<u64>,
    pub write_bytes_per_sec: Option<u64>,
}

impl DiskReading {
    /// Placeholder returned when no partition could be measured.
    pub fn sentinel() -> Self {
        Self {
            device: UNKNOWN.to_string(),
            mountpoint: UNKNOWN.to_string(),
            total_bytes: None,
            free_bytes: None,
            usage_fraction: None,
            read_bytes_per_sec: None,
            write_bytes_per_sec: None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.device == UNKNOWN
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostReading {
    pub hostname: String,
    pub os: String,
    pub platform: String,
    pub kernel_version: String,
    pub uptime_seconds: u64,
    pub virtualization: String,
}

impl HostReading {
    pub fn sentinel() -> Self {
        Self {
            hostname: UNKNOWN.to_string(),
            os: UNKNOWN.to_string(),
            platform: UNKNOWN.to_string(),
            kernel_version: UNKNOWN.to_string(),
            uptime_seconds: 0,
            virtualization: UNKNOWN.to_string(),
        }
    }
}

/// One probe-internal fault and the snapshot fields it degraded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldFailure {
    pub affected_fields: Vec<String>,
    pub message: String,
}

impl FieldFailure {
    pub fn new<I, S>(fields: I, message: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            affected_fields: fields.into_iter().map(Into::into).collect(),
            message: message.into(),
        }
    }

    /// Top-level category of the first affected field (`cpu`, `disk`, ...).
    /// Per-device tags look like `disk[/home].read_bytes_per_sec`.
    pub fn category(&self) -> &str {
        self.affected_fields
            .first()
            .and_then(|f| f.split(['.', '[']).next())
            .filter(|c| !c.is_empty())
            .unwrap_or(UNKNOWN)
    }

    #[cfg(test)]
    pub fn names(&self, field: &str) -> bool {
        self.affected_fields.iter().any(|f| f == field)
    }
}

/// Body of every metrics response: best-effort data plus what could not be measured.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub errors: Vec<FieldFailure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_category_uses_first_field_prefix() {
        let failure = FieldFailure::new(["disk.total_bytes", "disk.free_bytes"], "boom");
        assert_eq!(failure.category(), "disk");
        assert!(failure.names("disk.free_bytes"));
        assert!(!failure.names("disk.usage_fraction"));

        let tagged = FieldFailure::new(["disk[/mnt/a.b]"], "boom");
        assert_eq!(tagged.category(), "disk");

        let empty = FieldFailure::new(Vec::<String>::new(), "boom");
        assert_eq!(empty.category(), UNKNOWN);
    }

    #[test]
    fn extensions_are_omitted_when_empty() {
        let snapshot = Snapshot {
            cpu: CpuReading::default(),
            memory: MemoryReading::default(),
            disk: vec![DiskReading::sentinel()],
            host: HostReading::sentinel(),
            extensions: BTreeMap::new(),
        };
        let json = serde_json::to_value(&snapshot).expect("serialize snapshot");
        assert!(json.get("extensions").is_none());
        assert_eq!(json["disk"][0]["device"], "unknown");
        assert!(json["memory"]["usage_fraction"].is_null());
    }
}
