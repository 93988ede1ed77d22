//! Parameter codec (C3): serializes/deserializes the injector→bootstrap
//! parameter block and the plugin load/unload/message payloads to the
//! line-delimited `key=value` text form chosen in spec §6 (an implementer
//! may pick line-delimited `key=value` or a bracketed object; this crate
//! picks the former so the injected bootstrap needs no JSON dependency).
use std::collections::HashMap;
use std::fmt::Write as _;

use bifrost_common::{Error, Result};

fn parse_fields(text: &str) -> HashMap<&str, &str> {
    text.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim(), v))
        .collect()
}

fn require<'a>(fields: &HashMap<&str, &'a str>, key: &str) -> Result<&'a str> {
    fields
        .get(key)
        .copied()
        .ok_or_else(|| Error::ParameterDecode(key.to_string()))
}

/// Parameters handed from the injector to the bootstrap module (spec §6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectorParam {
    pub shared_memory_name: String,
    pub shared_memory_size: u64,
    pub pid: u32,
    pub working_directory: String,
    pub custom_argument: String,
}

impl InjectorParam {
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "shared_memory_name={}", self.shared_memory_name);
        let _ = writeln!(out, "shared_memory_size={}", self.shared_memory_size);
        let _ = writeln!(out, "pid={}", self.pid);
        let _ = writeln!(out, "working_directory={}", self.working_directory);
        let _ = writeln!(out, "custom_argument={}", self.custom_argument);
        out
    }

    pub fn deserialize(text: &str) -> Result<Self> {
        let fields = parse_fields(text);
        Ok(Self {
            shared_memory_name: require(&fields, "shared_memory_name")?.to_string(),
            shared_memory_size: require(&fields, "shared_memory_size")?
                .parse()
                .map_err(|_| Error::ParameterDecode("shared_memory_size".to_string()))?,
            pid: require(&fields, "pid")?
                .parse()
                .map_err(|_| Error::ParameterDecode("pid".to_string()))?,
            working_directory: require(&fields, "working_directory")?.to_string(),
            custom_argument: require(&fields, "custom_argument").map(str::to_string).unwrap_or_default(),
        })
    }
}

/// One plugin module to load (spec §6's plugin-load list).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginToLoad {
    pub identifier: String,
    pub path: String,
    pub arguments: String,
    pub force_load: bool,
}

/// Ordered list of plugins to load, embedded in `custom_argument`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PluginLoadParam {
    pub plugins: Vec<PluginToLoad>,
}

impl PluginLoadParam {
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "count={}", self.plugins.len());
        for (i, p) in self.plugins.iter().enumerate() {
            let _ = writeln!(out, "plugin.{i}.identifier={}", p.identifier);
            let _ = writeln!(out, "plugin.{i}.path={}", p.path);
            let _ = writeln!(out, "plugin.{i}.arguments={}", p.arguments);
            let _ = writeln!(out, "plugin.{i}.force_load={}", p.force_load);
        }
        out
    }

    pub fn deserialize(text: &str) -> Result<Self> {
        let fields = parse_fields(text);
        let count: usize = require(&fields, "count")?
            .parse()
            .map_err(|_| Error::ParameterDecode("count".to_string()))?;
        let mut plugins = Vec::with_capacity(count);
        for i in 0..count {
            plugins.push(PluginToLoad {
                identifier: require(&fields, &format!("plugin.{i}.identifier"))?.to_string(),
                path: require(&fields, &format!("plugin.{i}.path"))?.to_string(),
                arguments: fields
                    .get(format!("plugin.{i}.arguments").as_str())
                    .copied()
                    .unwrap_or("")
                    .to_string(),
                force_load: fields
                    .get(format!("plugin.{i}.force_load").as_str())
                    .copied()
                    .unwrap_or("false")
                    .parse()
                    .unwrap_or(false),
            });
        }
        Ok(Self { plugins })
    }
}

/// Plugins to unload, by name, plus an unload-all flag.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PluginUnloadParam {
    pub unload_all: bool,
    pub plugins: Vec<String>,
}

impl PluginUnloadParam {
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "unload_all={}", self.unload_all);
        let _ = writeln!(out, "count={}", self.plugins.len());
        for (i, name) in self.plugins.iter().enumerate() {
            let _ = writeln!(out, "plugin.{i}={name}");
        }
        out
    }

    pub fn deserialize(text: &str) -> Result<Self> {
        let fields = parse_fields(text);
        let unload_all = require(&fields, "unload_all")?
            .parse()
            .map_err(|_| Error::ParameterDecode("unload_all".to_string()))?;
        let count: usize = require(&fields, "count")?
            .parse()
            .map_err(|_| Error::ParameterDecode("count".to_string()))?;
        let mut plugins = Vec::with_capacity(count);
        for i in 0..count {
            plugins.push(require(&fields, &format!("plugin.{i}"))?.to_string());
        }
        Ok(Self { unload_all, plugins })
    }
}

/// A message routed to a single already-loaded plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginMessageParam {
    pub plugin_identifier: String,
    pub message: String,
}

impl PluginMessageParam {
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "plugin_identifier={}", self.plugin_identifier);
        let _ = writeln!(out, "message={}", self.message);
        out
    }

    pub fn deserialize(text: &str) -> Result<Self> {
        let fields = parse_fields(text);
        Ok(Self {
            plugin_identifier: require(&fields, "plugin_identifier")?.to_string(),
            message: require(&fields, "message").map(str::to_string).unwrap_or_default(),
        })
    }
}

/// The three request shapes the bootstrap module's `message` entry point can
/// receive, disambiguated by a leading `kind=` field (spec §6 leaves the
/// entry point's dispatch open; a single envelope field keeps the three
/// payload encodings above unchanged).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginRequest {
    Load(PluginLoadParam),
    Unload(PluginUnloadParam),
    Message(PluginMessageParam),
}

impl PluginRequest {
    pub fn serialize(&self) -> String {
        let (kind, body) = match self {
            Self::Load(p) => ("load", p.serialize()),
            Self::Unload(p) => ("unload", p.serialize()),
            Self::Message(p) => ("message", p.serialize()),
        };
        format!("kind={kind}\n{body}")
    }

    pub fn deserialize(text: &str) -> Result<Self> {
        let fields = parse_fields(text);
        match require(&fields, "kind")? {
            "load" => Ok(Self::Load(PluginLoadParam::deserialize(text)?)),
            "unload" => Ok(Self::Unload(PluginUnloadParam::deserialize(text)?)),
            "message" => Ok(Self::Message(PluginMessageParam::deserialize(text)?)),
            other => Err(Error::ParameterDecode(format!("kind={other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injector_param_round_trips() {
        let p = InjectorParam {
            shared_memory_name: "bifrost".to_string(),
            shared_memory_size: 16 * 1024 * 1024,
            pid: 4242,
            working_directory: r"C:\work".to_string(),
            custom_argument: "plugin.dll:--verbose".to_string(),
        };
        let round_tripped = InjectorParam::deserialize(&p.serialize()).unwrap();
        assert_eq!(p, round_tripped);
    }

    #[test]
    fn missing_field_reports_which_one() {
        let err = InjectorParam::deserialize("shared_memory_name=bifrost\n").unwrap_err();
        match err {
            Error::ParameterDecode(field) => assert_eq!(field, "shared_memory_size"),
            other => panic!("expected ParameterDecode, got {other:?}"),
        }
    }

    #[test]
    fn plugin_load_param_round_trips_with_multiple_entries() {
        let p = PluginLoadParam {
            plugins: vec![
                PluginToLoad {
                    identifier: "demo".to_string(),
                    path: r"C:\plugins\demo.dll".to_string(),
                    arguments: "--flag".to_string(),
                    force_load: true,
                },
                PluginToLoad {
                    identifier: "second".to_string(),
                    path: r"C:\plugins\second.dll".to_string(),
                    arguments: String::new(),
                    force_load: false,
                },
            ],
        };
        assert_eq!(PluginLoadParam::deserialize(&p.serialize()).unwrap(), p);
    }

    #[test]
    fn plugin_unload_param_round_trips() {
        let p = PluginUnloadParam {
            unload_all: false,
            plugins: vec!["demo".to_string(), "second".to_string()],
        };
        assert_eq!(PluginUnloadParam::deserialize(&p.serialize()).unwrap(), p);
    }

    #[test]
    fn plugin_message_param_round_trips() {
        let p = PluginMessageParam {
            plugin_identifier: "demo".to_string(),
            message: "ping".to_string(),
        };
        assert_eq!(PluginMessageParam::deserialize(&p.serialize()).unwrap(), p);
    }

    #[test]
    fn plugin_request_dispatches_on_kind() {
        let req = PluginRequest::Unload(PluginUnloadParam {
            unload_all: true,
            plugins: vec![],
        });
        assert_eq!(PluginRequest::deserialize(&req.serialize()).unwrap(), req);
    }

    #[test]
    fn plugin_request_rejects_unknown_kind() {
        let err = PluginRequest::deserialize("kind=bogus\n").unwrap_err();
        match err {
            Error::ParameterDecode(field) => assert_eq!(field, "kind=bogus"),
            other => panic!("expected ParameterDecode, got {other:?}"),
        }
    }
}
