//! Host Disk Inventory
//!
//! Parses `lsblk` output from a remote host, decides which whole disks are
//! free for Longhorn, and resolves the operator's selection against them.

use crate::domain::ports::BlockDevice;
use crate::error::{Error, Result};
use std::collections::{BTreeSet, HashMap};

// =============================================================================
// Constants
// =============================================================================

/// Inventory command; raw output, no headings, one row per device per parent
pub const LSBLK_COMMAND: &str = "lsblk -rno NAME,SIZE,TYPE,MOUNTPOINT,FSTYPE,PKNAME";

/// Name prefixes that never qualify even when reported as `disk`
const EXCLUDED_PREFIXES: [&str; 4] = ["loop", "ram", "zram", "sr"];

// =============================================================================
// Parsing
// =============================================================================

/// Decode lsblk's `\xHH` escapes (raw mode escapes spaces in mountpoints)
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && bytes[i + 1] == b'x' {
            let hex = field.get(i + 2..i + 4).and_then(|h| u8::from_str_radix(h, 16).ok());
            if let Some(byte) = hex {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse `lsblk -rno NAME,SIZE,TYPE,MOUNTPOINT,FSTYPE,PKNAME` output.
///
/// Fields are single-space separated and empty columns stay empty, so the
/// split must keep empty pieces.
pub fn parse_lsblk(output: &str) -> Vec<BlockDevice> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(' ').collect();
            let field = |i: usize| fields.get(i).map(|f| unescape(f)).unwrap_or_default();
            let name = field(0);
            if name.is_empty() {
                return None;
            }
            Some(BlockDevice {
                name,
                size: field(1),
                device_type: field(2),
                mountpoint: field(3),
                fstype: field(4),
                parent: field(5),
            })
        })
        .collect()
}

// =============================================================================
// Free Disk Discovery
// =============================================================================

/// Names of every device that is mounted or has a mounted descendant
fn busy_devices(devices: &[BlockDevice]) -> BTreeSet<String> {
    let mut parents: HashMap<&str, Vec<&str>> = HashMap::new();
    for device in devices {
        if !device.parent.is_empty() {
            parents
                .entry(device.name.as_str())
                .or_default()
                .push(device.parent.as_str());
        }
    }

    let mut busy = BTreeSet::new();
    let mut stack: Vec<&str> = devices
        .iter()
        .filter(|d| d.is_mounted())
        .map(|d| d.name.as_str())
        .collect();
    while let Some(name) = stack.pop() {
        if !busy.insert(name.to_string()) {
            continue;
        }
        if let Some(ancestors) = parents.get(name) {
            stack.extend(ancestors.iter().copied());
        }
    }
    busy
}

fn excluded_name(name: &str) -> bool {
    EXCLUDED_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Why a device cannot be provisioned, if it cannot
pub fn unavailable_reason(device: &BlockDevice, busy: &BTreeSet<String>) -> Option<String> {
    if !device.is_disk() {
        return Some(format!("not a whole disk (type {})", device.device_type));
    }
    if excluded_name(&device.name) {
        return Some("virtual device".to_string());
    }
    if device.is_mounted() {
        return Some(format!("mounted at {}", device.mountpoint));
    }
    if busy.contains(&device.name) {
        return Some("has mounted partitions (system disk)".to_string());
    }
    None
}

/// Whole disks with nothing mounted on them or beneath them, in host order
pub fn free_disks(devices: &[BlockDevice]) -> Vec<BlockDevice> {
    let busy = busy_devices(devices);
    let mut seen = BTreeSet::new();
    devices
        .iter()
        .filter(|d| unavailable_reason(d, &busy).is_none())
        .filter(|d| seen.insert(d.name.clone()))
        .cloned()
        .collect()
}

// =============================================================================
// Selection
// =============================================================================

/// Parse an interactive answer: `all` or comma-separated 1-based indices
pub fn parse_selection(input: &str, count: usize) -> Result<Vec<usize>> {
    let input = input.trim();
    if input.eq_ignore_ascii_case("all") {
        return Ok((0..count).collect());
    }
    if input.is_empty() {
        return Err(Error::Selection("no disks selected".to_string()));
    }

    let mut picked = Vec::new();
    for part in input.split(',') {
        let part = part.trim();
        let index: usize = part
            .parse()
            .map_err(|_| Error::Selection(format!("'{}' is not a disk number", part)))?;
        if index == 0 || index > count {
            return Err(Error::Selection(format!(
                "{} is out of range (1-{})",
                index, count
            )));
        }
        if picked.contains(&(index - 1)) {
            return Err(Error::Selection(format!("disk {} selected twice", index)));
        }
        picked.push(index - 1);
    }
    Ok(picked)
}

/// Strip an optional `/dev/` prefix
pub fn device_name(device: &str) -> &str {
    device.trim().trim_start_matches("/dev/")
}

/// Resolve an explicit device list against the host inventory
pub fn select_explicit(requested: &[String], devices: &[BlockDevice]) -> Result<Vec<BlockDevice>> {
    let busy = busy_devices(devices);
    let mut selected: Vec<BlockDevice> = Vec::new();

    for raw in requested {
        let name = device_name(raw);
        let device = devices
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| Error::DiskNotFound {
                device: name.to_string(),
            })?;
        if let Some(reason) = unavailable_reason(device, &busy) {
            return Err(Error::DiskUnavailable {
                device: name.to_string(),
                reason,
            });
        }
        if selected.iter().any(|d| d.name == name) {
            return Err(Error::Selection(format!("{} listed twice", name)));
        }
        selected.push(device.clone());
    }

    if selected.is_empty() {
        return Err(Error::Selection("no disks selected".to_string()));
    }
    Ok(selected)
}

// =============================================================================
// Naming
// =============================================================================

pub fn device_path(name: &str) -> String {
    format!("/dev/{}", name)
}

/// First partition node; names ending in a digit take a `p` separator
pub fn partition_path(name: &str) -> String {
    if name.ends_with(|c: char| c.is_ascii_digit()) {
        format!("/dev/{}p1", name)
    } else {
        format!("/dev/{}1", name)
    }
}

pub fn mountpoint_for(prefix: &str, name: &str) -> String {
    format!("{}{}", prefix, name)
}

pub fn fstab_line(uuid: &str, mountpoint: &str, filesystem: &str) -> String {
    format!("UUID={} {} {} defaults,nofail 0 2", uuid, mountpoint, filesystem)
}
