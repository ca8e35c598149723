use crate::db;
use crate::error::EngineError;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingsSection {
    Centralization,
    Statistics,
}

impl SettingsSection {
    pub const ALL: [SettingsSection; 2] =
        [SettingsSection::Centralization, SettingsSection::Statistics];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "centralization" => Some(Self::Centralization),
            "statistics" => Some(Self::Statistics),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Centralization => "centralization",
            Self::Statistics => "statistics",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Centralization => "setup.centralization",
            Self::Statistics => "setup.statistics",
        }
    }
}

fn default_section(section: SettingsSection) -> Value {
    match section {
        SettingsSection::Centralization => json!({
            "allowedRoles": ["teacher", "director", "administrator"]
        }),
        SettingsSection::Statistics => json!({
            "passPercent": 51.0,
            "honorPercent": 85.0,
            "tenScaleMax": 10.0
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal settings object must be a JSON object".to_string())
}

fn parse_f64_range(v: &Value, key: &str, min: f64, max: f64) -> Result<f64, String> {
    let n = v
        .as_f64()
        .ok_or_else(|| format!("{} must be a number", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_roles(v: &Value, key: &str) -> Result<Vec<String>, String> {
    let arr = v
        .as_array()
        .ok_or_else(|| format!("{} must be an array of strings", key))?;
    let mut roles: Vec<String> = Vec::with_capacity(arr.len());
    for item in arr {
        let Some(s) = item.as_str() else {
            return Err(format!("{} must be an array of strings", key));
        };
        let s = s.trim().to_ascii_lowercase();
        if s.is_empty() || s.len() > 32 {
            return Err(format!("{} entries must be 1..=32 characters", key));
        }
        if !roles.contains(&s) {
            roles.push(s);
        }
    }
    if roles.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    Ok(roles)
}

pub fn merge_section_patch(
    section: SettingsSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SettingsSection::Centralization => match k.as_str() {
                "allowedRoles" => {
                    obj.insert(k.clone(), json!(parse_roles(v, k)?));
                }
                _ => return Err(format!("unknown centralization field: {}", k)),
            },
            SettingsSection::Statistics => match k.as_str() {
                "passPercent" | "honorPercent" => {
                    obj.insert(k.clone(), json!(parse_f64_range(v, k, 1.0, 100.0)?));
                }
                "tenScaleMax" => {
                    obj.insert(k.clone(), json!(parse_f64_range(v, k, 1.0, 99.0)?));
                }
                _ => return Err(format!("unknown statistics field: {}", k)),
            },
        }
    }
    if section == SettingsSection::Statistics {
        let pass = obj.get("passPercent").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let honor = obj.get("honorPercent").and_then(|v| v.as_f64()).unwrap_or(0.0);
        if honor < pass {
            return Err("honorPercent must be >= passPercent".into());
        }
    }
    Ok(())
}

pub fn load_section(conn: &Connection, section: SettingsSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults instead of failing reads.
            let mut candidate = current.clone();
            if merge_section_patch(section, &mut candidate, saved_obj).is_ok() {
                current = candidate;
            }
        }
    }
    Ok(current)
}

pub fn update_section(
    conn: &Connection,
    section: SettingsSection,
    patch: &Map<String, Value>,
) -> Result<Value, EngineError> {
    let mut current = load_section(conn, section).map_err(settings_err)?;
    merge_section_patch(section, &mut current, patch)
        .map_err(|message| EngineError::InvalidSettings { message })?;
    db::settings_set_json(conn, section.key(), &current).map_err(settings_err)?;
    Ok(current)
}

fn settings_err(e: anyhow::Error) -> EngineError {
    match e.downcast::<rusqlite::Error>() {
        Ok(sql) => EngineError::Store(sql),
        Err(other) => EngineError::InvalidSettings {
            message: other.to_string(),
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsSettings {
    pub pass_percent: f64,
    pub honor_percent: f64,
    /// Largest observed score that still identifies the 0-10 scale.
    pub ten_scale_max: f64,
}

impl Default for StatisticsSettings {
    fn default() -> Self {
        Self {
            pass_percent: 51.0,
            honor_percent: 85.0,
            ten_scale_max: 10.0,
        }
    }
}

pub fn statistics_settings(conn: &Connection) -> Result<StatisticsSettings, EngineError> {
    let v = load_section(conn, SettingsSection::Statistics).map_err(settings_err)?;
    let d = StatisticsSettings::default();
    Ok(StatisticsSettings {
        pass_percent: v["passPercent"].as_f64().unwrap_or(d.pass_percent),
        honor_percent: v["honorPercent"].as_f64().unwrap_or(d.honor_percent),
        ten_scale_max: v["tenScaleMax"].as_f64().unwrap_or(d.ten_scale_max),
    })
}

pub fn allowed_roles(conn: &Connection) -> Result<Vec<String>, EngineError> {
    let v = load_section(conn, SettingsSection::Centralization).map_err(settings_err)?;
    Ok(v["allowedRoles"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|r| r.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default())
}
