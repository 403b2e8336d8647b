// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Manager config + peer roster loading (SPEC_FULL.md §4.11). Grounded on
// examples/original_source/eROIL/src/config/config.cpp's `parse_kv_file`,
// `parse_csv_file`, and `make_indexable_by_id`. Bespoke two-format parsing,
// not a general config crate — the formats are tiny and fixed.

use std::collections::HashMap;
use std::fs;

use crate::error::ConfigError;
use crate::route_table::NodeId;

pub const LOCAL_HOST: &str = "127.0.0.1";
pub const PORT_START: u16 = 8080;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerMode {
    Normal,
    TestLocalShmOnly,
    TestLocalSocketOnly,
    TestSimNetwork,
}

#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub id: NodeId,
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub id: NodeId,
    pub mode: ManagerMode,
    pub nodes: Vec<NodeInfo>,
    pub mcast_group_ip: String,
    pub mcast_port: u16,
    pub mcast_bind_ip: String,
    pub mcast_ttl: u32,
    pub mcast_loopback: bool,
    pub mcast_reuse_addr: bool,
}

/// `key=value` lines; `#`-prefixed comments and blank lines are skipped.
pub fn parse_kv_file(path: &str) -> Result<HashMap<String, String>, ConfigError> {
    let text = fs::read_to_string(path).map_err(|_| ConfigError::NotFound(path.to_string()))?;
    let mut out = HashMap::new();
    for line in text.lines() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(pos) = line.find('=') {
            out.insert(line[..pos].to_string(), line[pos + 1..].to_string());
        }
    }
    Ok(out)
}

/// Comma-separated rows; same comment/blank-line skip rules as
/// `parse_kv_file`.
pub fn parse_csv_file(path: &str) -> Result<Vec<Vec<String>>, ConfigError> {
    let text = fs::read_to_string(path).map_err(|_| ConfigError::NotFound(path.to_string()))?;
    let mut rows = Vec::new();
    for line in text.lines() {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        rows.push(line.split(',').map(|s| s.to_string()).collect());
    }
    Ok(rows)
}

/// Re-index a node list by id, rejecting negative or duplicate ids (mirrors
/// `make_indexable_by_id`). Gaps are filled with an invalid sentinel entry
/// (`id = -1`) so index == id for every real entry.
pub fn make_indexable_by_id(nodes: Vec<NodeInfo>) -> Result<Vec<NodeInfo>, ConfigError> {
    if nodes.is_empty() {
        return Ok(Vec::new());
    }
    let largest = nodes.iter().map(|n| n.id).max().unwrap();
    let smallest = nodes.iter().map(|n| n.id).min().unwrap();
    if smallest < 0 {
        return Err(ConfigError::NegativeId);
    }
    let mut indexable: Vec<NodeInfo> = (0..=largest)
        .map(|_| NodeInfo {
            id: -1,
            ip: String::new(),
            port: 0,
        })
        .collect();
    for node in nodes {
        let idx = node.id as usize;
        if indexable[idx].id >= 0 {
            return Err(ConfigError::DuplicateId(node.id));
        }
        indexable[idx] = node;
    }
    Ok(indexable)
}

pub fn build_node_info(path: &str) -> Result<Vec<NodeInfo>, ConfigError> {
    let rows = parse_csv_file(path)?;
    if rows.is_empty() {
        return Err(ConfigError::Empty(path.to_string()));
    }
    let mut nodes = Vec::with_capacity(rows.len());
    for row in &rows {
        if row.len() != 3 {
            return Err(ConfigError::MalformedRow {
                file: path.to_string(),
                row: row.join(","),
            });
        }
        let id: NodeId = row[0]
            .trim()
            .parse()
            .map_err(|_| ConfigError::MalformedRow { file: path.to_string(), row: row.join(",") })?;
        let port: u16 = row[2]
            .trim()
            .parse()
            .map_err(|_| ConfigError::MalformedRow { file: path.to_string(), row: row.join(",") })?;
        nodes.push(NodeInfo {
            id,
            ip: row[1].trim().to_string(),
            port,
        });
    }
    make_indexable_by_id(nodes)
}

/// Synthesize a fake 20-node local roster for the test modes (mirrors
/// `build_fake_node_info`): `127.0.0.1:8080+id`.
pub fn build_fake_node_info() -> Vec<NodeInfo> {
    (0..20u32)
        .map(|i| NodeInfo {
            id: i as NodeId,
            ip: LOCAL_HOST.to_string(),
            port: PORT_START + i as u16,
        })
        .collect()
}

fn parse_mode(s: &str) -> ManagerMode {
    match s.trim() {
        "TestLocalShmOnly" => ManagerMode::TestLocalShmOnly,
        "TestLocalSocketOnly" => ManagerMode::TestLocalSocketOnly,
        "TestSimNetwork" => ManagerMode::TestSimNetwork,
        _ => ManagerMode::Normal,
    }
}

pub fn get_manager_cfg(id: NodeId, manager_cfg_path: &str, roster_path: &str) -> Result<ManagerConfig, ConfigError> {
    let kv = parse_kv_file(manager_cfg_path).unwrap_or_default();
    let mode = kv.get("mode").map(|s| parse_mode(s)).unwrap_or(ManagerMode::Normal);
    let nodes = match mode {
        ManagerMode::Normal => build_node_info(roster_path)?,
        _ => build_fake_node_info(),
    };
    Ok(ManagerConfig {
        id,
        mode,
        nodes,
        mcast_group_ip: kv
            .get("mcast_group_ip")
            .cloned()
            .unwrap_or_else(|| crate::wire::DISCOVERY_GROUP.to_string()),
        mcast_port: kv
            .get("mcast_port")
            .and_then(|s| s.parse().ok())
            .unwrap_or(crate::wire::DISCOVERY_PORT),
        mcast_bind_ip: kv.get("mcast_bind_ip").cloned().unwrap_or_else(|| "0.0.0.0".to_string()),
        mcast_ttl: kv
            .get("mcast_ttl")
            .and_then(|s| s.parse().ok())
            .unwrap_or(crate::wire::DISCOVERY_TTL),
        mcast_loopback: kv.get("mcast_loopback").map(|s| s == "1" || s == "true").unwrap_or(true),
        mcast_reuse_addr: kv.get("mcast_reuse_addr").map(|s| s == "1" || s == "true").unwrap_or(true),
    })
}
