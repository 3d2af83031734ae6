//! Addressing: `ProcessorName.PortName.SlotIndex`, and the name-range
//! expansion grammar used both for processor name patterns
//! (`name(1-4,7)` -> `name1`..`name4`, `name7`) and connection rule
//! components (spec.md §4.6, §6).

use crate::error::{AxonError, Result};

/// A fully-resolved `(output_address, input_address)` connection endpoint,
/// or a processor/port-only reference, depending on context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotAddress {
    pub processor: String,
    pub port: Option<String>,
    pub slot: Option<i32>,
}

impl SlotAddress {
    pub fn new(processor: impl Into<String>, port: Option<String>, slot: Option<i32>) -> Self {
        Self {
            processor: processor.into(),
            port,
            slot,
        }
    }
}

impl std::fmt::Display for SlotAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.processor)?;
        if let Some(port) = &self.port {
            write!(f, ".{port}")?;
            if let Some(slot) = self.slot {
                write!(f, ".{slot}")?;
            }
        }
        Ok(())
    }
}

/// Parses `proc[.port[.slot]]` into a `SlotAddress`. Each component after
/// `proc` is optional.
pub fn parse_address(s: &str) -> Result<SlotAddress> {
    let s = s.trim();
    let parts: Vec<&str> = s.split('.').collect();
    if parts.is_empty() || parts[0].is_empty() {
        return Err(AxonError::invalid_graph(format!("empty address: `{s}`")));
    }
    let processor = parts[0].to_string();
    let port = parts.get(1).map(|p| p.to_string());
    let slot = match parts.get(2) {
        Some(raw) => Some(
            raw.parse::<i32>()
                .map_err(|_| AxonError::invalid_graph(format!("invalid slot index in address `{s}`")))?,
        ),
        None => None,
    };
    Ok(SlotAddress::new(processor, port, slot))
}

/// Expands `name(1-3,5)` into `["name1", "name2", "name3", "name5"]`, and a
/// bare `name` into `["name"]`. Grounded on the original's
/// `expandProcessorName` (a regex over `\w+[a-zA-Z]` + `(?:\d+|\([\d,\-]+\))`),
/// reworked here as a small hand-rolled parser since the grammar is bounded
/// and fixed.
pub fn expand_name_pattern(pattern: &str) -> Result<Vec<String>> {
    let pattern: String = pattern.chars().filter(|c| !c.is_whitespace()).collect();

    let Some(open) = pattern.find('(') else {
        // No range syntax: a bare trailing integer (`name1`) names exactly
        // that one processor, nothing to expand.
        return Ok(vec![pattern]);
    };
    if !pattern.ends_with(')') {
        return Err(AxonError::invalid_graph(format!(
            "unterminated name-range pattern: `{pattern}`"
        )));
    }
    let base = &pattern[..open];
    let body = &pattern[open + 1..pattern.len() - 1];

    let mut names = Vec::new();
    for part in body.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((lo, hi)) = part.split_once('-') {
            let lo: i64 = lo
                .trim()
                .parse()
                .map_err(|_| AxonError::invalid_graph(format!("bad range start in `{pattern}`")))?;
            let hi: i64 = hi
                .trim()
                .parse()
                .map_err(|_| AxonError::invalid_graph(format!("bad range end in `{pattern}`")))?;
            if lo > hi {
                return Err(AxonError::invalid_graph(format!("descending range in `{pattern}`")));
            }
            for n in lo..=hi {
                names.push(format!("{base}{n}"));
            }
        } else {
            let n: i64 = part
                .parse()
                .map_err(|_| AxonError::invalid_graph(format!("bad index in `{pattern}`")))?;
            names.push(format!("{base}{n}"));
        }
    }
    if names.is_empty() {
        return Err(AxonError::invalid_graph(format!("empty name-range pattern: `{pattern}`")));
    }
    Ok(names)
}
