//! Principal name <-> XID type map
//!
//! Loaded once at startup from a line oriented file:
//!
//! ```text
//! # name  type
//! ad      0x10
//! hid     0x11
//! ether   0x13
//! ```
//!
//! Malformed or duplicated lines are logged and skipped, never fatal.

use crate::error::{NwpdError, Result};
use crate::types::XidType;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Default principal file location
pub const DEFAULT_PRINCIPALS_FILE: &str = "/etc/xia/principals";

/// XID type 0 is reserved for "not a type"
const XIDTYPE_NAT: u32 = 0;

#[derive(Debug, Clone, Default)]
pub struct PrincipalMap {
    by_name: HashMap<String, XidType>,
    by_type: HashMap<XidType, String>,
}

impl PrincipalMap {
    /// Load the map from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            NwpdError::Principal(format!("couldn't read {}: {}", path.display(), e))
        })?;
        let map = Self::parse(&content);
        debug!(path = %path.display(), count = map.len(), "Loaded principal map");
        Ok(map)
    }

    /// Parse file content, skipping bad lines
    pub fn parse(content: &str) -> Self {
        let mut map = Self::default();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }

            let mut fields = line.split_whitespace();
            let (Some(name), Some(ty), None) = (fields.next(), fields.next(), fields.next())
            else {
                warn!(line = lineno + 1, input = line, "Ignoring invalid principal line");
                continue;
            };
            let Some(ty) = parse_type(ty) else {
                warn!(line = lineno + 1, input = line, "Ignoring invalid principal type");
                continue;
            };
            if let Err(e) = map.insert(name, XidType(ty)) {
                warn!(line = lineno + 1, error = %e, "Ignoring principal");
            }
        }
        map
    }

    /// Add one mapping; names are case-insensitive
    pub fn insert(&mut self, name: &str, ty: XidType) -> Result<()> {
        if !is_valid_name(name) || ty.0 == XIDTYPE_NAT {
            return Err(NwpdError::Principal(format!(
                "invalid principal name or type '{}' ({})",
                name, ty
            )));
        }
        let name = name.to_ascii_lowercase();
        if self.by_name.contains_key(&name) || self.by_type.contains_key(&ty) {
            return Err(NwpdError::Principal(format!(
                "duplicated principal '{}' ({})",
                name, ty
            )));
        }
        self.by_name.insert(name.clone(), ty);
        self.by_type.insert(ty, name);
        Ok(())
    }

    pub fn name_to_type(&self, name: &str) -> Result<XidType> {
        self.by_name
            .get(&name.to_ascii_lowercase())
            .copied()
            .ok_or_else(|| NwpdError::Principal(format!("unknown principal '{}'", name)))
    }

    pub fn type_to_name(&self, ty: XidType) -> Option<&str> {
        self.by_type.get(&ty).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

fn parse_type(s: &str) -> Option<u32> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 15
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// The two principal types the daemon needs, resolved once at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrincipalTypes {
    /// Autonomous-domain prefixes that get announced
    pub ad: XidType,
    /// Ethernet-bound host identities
    pub ether: XidType,
}

impl PrincipalTypes {
    pub fn resolve(map: &PrincipalMap) -> Result<Self> {
        Ok(Self {
            ad: map.name_to_type("ad")?,
            ether: map.name_to_type("ether")?,
        })
    }
}
