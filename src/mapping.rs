//! Static lookup tables shipped inside the binary: tool name to policy pack,
//! and the default passport location of each supported framework.

use std::sync::OnceLock;

use serde::Deserialize;

const TOOL_PACK_MAPPING: &str = include_str!("../tool-pack-mapping.json");
const DEFAULT_PASSPORT_PATHS: &str = include_str!("../default-passport-paths.json");

/// Pack used when no rule matches and the table names no default.
pub const FALLBACK_PACK: &str = "system.command.execute.v1";

#[derive(Debug, Deserialize)]
pub struct PackRule {
    pub pack: String,
    #[serde(default)]
    pub prefixes: Vec<String>,
    #[serde(default)]
    pub substrings: Vec<String>,
}

impl PackRule {
    fn matches(&self, tool: &str) -> bool {
        self.prefixes.iter().any(|p| tool.starts_with(p.as_str()))
            || self.substrings.iter().any(|s| tool.contains(s.as_str()))
    }
}

#[derive(Debug, Deserialize)]
pub struct PackMapping {
    #[serde(default = "default_pack")]
    pub default: String,
    #[serde(default)]
    pub rules: Vec<PackRule>,
}

fn default_pack() -> String {
    FALLBACK_PACK.to_string()
}

impl PackMapping {
    /// Rules are tried in declaration order; the first match wins.
    pub fn pack_for(&self, tool_name: &str) -> &str {
        let tool = tool_name.trim().to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&tool))
            .map_or(self.default.as_str(), |rule| rule.pack.as_str())
    }
}

#[derive(Debug, Deserialize)]
pub struct FrameworkPassport {
    pub framework: String,
    pub path: String,
}

#[derive(Debug, Deserialize)]
struct PassportPathTable {
    paths: Vec<FrameworkPassport>,
}

pub fn pack_mapping() -> &'static PackMapping {
    static MAPPING: OnceLock<PackMapping> = OnceLock::new();
    MAPPING.get_or_init(|| {
        serde_json::from_str(TOOL_PACK_MAPPING).expect("embedded tool-pack mapping must parse")
    })
}

/// Framework default passport paths, in lookup order. Paths are unexpanded
/// (`~/...`).
pub fn default_passport_paths() -> &'static [FrameworkPassport] {
    static PATHS: OnceLock<Vec<FrameworkPassport>> = OnceLock::new();
    PATHS.get_or_init(|| {
        serde_json::from_str::<PassportPathTable>(DEFAULT_PASSPORT_PATHS)
            .expect("embedded default passport paths must parse")
            .paths
    })
}

pub fn default_passport_path(framework: &str) -> Option<&'static str> {
    default_passport_paths()
        .iter()
        .find(|entry| entry.framework.eq_ignore_ascii_case(framework))
        .map(|entry| entry.path.as_str())
}

/// Policy pack id governing a tool.
pub fn tool_to_pack_id(tool_name: &str) -> &'static str {
    pack_mapping().pack_for(tool_name)
}
