//! The format capability table.
//!
//! Maps each format token to what the service can do with it: read it, write
//! it in-process, write it through the external tool, and whether it has to
//! be normalised first. The built-in half of the table is static; the
//! external-tool half comes from probing the installed ImageMagick once at
//! startup (`magick -list format`).
//!
//! ## Refresh policy
//!
//! The table is owned by [`crate::Converter`] behind a [`SharedCapabilities`]
//! cell. Readers take an `Arc` snapshot, so a conversion always sees one
//! consistent table. The tool is re-probed only when a caller asks for it
//! via [`crate::Converter::refresh_capabilities`]; nothing re-probes on a timer.
//! A missing tool leaves every `writable_by_external_tool` flag false; it
//! never fails startup.

use crate::format::{Format, KNOWN_FORMATS};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// What the service can do with one format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FormatCapability {
    pub readable: bool,
    pub writable_by_fast_path: bool,
    pub writable_by_external_tool: bool,
    pub requires_preprocessing: bool,
}

/// Identity of the installed external tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub path: PathBuf,
    pub version: Option<String>,
}

/// One row of the tool's format listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolFormat {
    pub token: String,
    pub readable: bool,
    pub writable: bool,
}

/// Everything learned by probing the external tool.
#[derive(Debug, Clone, Default)]
pub struct ToolProbe {
    /// `None` when the tool is not installed.
    pub tool: Option<ToolInfo>,
    /// Parsed format listing; empty if the listing could not be obtained.
    pub formats: Vec<ToolFormat>,
    /// Whether the bitmap tracer (potrace) is installed.
    pub tracer_available: bool,
}

/// Formats the in-process codec can encode.
const FAST_WRITABLE: &[Format] = &[
    Format::Jpeg,
    Format::Png,
    Format::Webp,
    Format::Tiff,
    Format::Avif,
    Format::Gif,
];

/// Formats the in-process codec can decode.
const FAST_READABLE: &[Format] = &[
    Format::Jpeg,
    Format::Png,
    Format::Webp,
    Format::Tiff,
    Format::Gif,
    Format::Bmp,
    Format::Ico,
    Format::Tga,
];

/// Inputs that are normalised to PNG before the main conversion.
///
/// HEIF/HEIC live here: the in-process codec cannot decode them, so they are
/// never sent down the fast path.
const REQUIRES_PREPROCESSING: &[Format] = &[
    Format::Heic,
    Format::Heif,
    Format::Psd,
    Format::Xcf,
    Format::Cr2,
    Format::Nef,
    Format::Arw,
    Format::Dng,
    Format::Djvu,
    Format::Pdf,
    Format::Eps,
    Format::Ps,
    Format::Ai,
    Format::Svg,
];

/// Assumed writable when the tool exists but its format list is unreadable.
const TOOL_FALLBACK_WRITABLE: &[Format] = &[
    Format::Jpeg,
    Format::Png,
    Format::Gif,
    Format::Tiff,
    Format::Bmp,
    Format::Ico,
    Format::Webp,
    Format::Ps,
    Format::Eps,
    Format::Svg,
];

/// Static + probed format capabilities.
#[derive(Debug, Clone, Serialize)]
pub struct CapabilityTable {
    formats: BTreeMap<String, FormatCapability>,
    tool: Option<ToolInfo>,
    tracer_available: bool,
}

impl CapabilityTable {
    /// The table with no external tool installed.
    pub fn builtin() -> Self {
        let mut formats = BTreeMap::new();
        for f in KNOWN_FORMATS {
            formats.insert(
                f.token().to_string(),
                FormatCapability {
                    readable: FAST_READABLE.contains(f),
                    writable_by_fast_path: FAST_WRITABLE.contains(f),
                    writable_by_external_tool: false,
                    requires_preprocessing: REQUIRES_PREPROCESSING.contains(f),
                },
            );
        }
        Self {
            formats,
            tool: None,
            tracer_available: false,
        }
    }

    /// Build the table from a tool probe.
    pub fn from_probe(probe: &ToolProbe) -> Self {
        let mut table = Self::builtin();
        let Some(ref info) = probe.tool else {
            return table;
        };
        table.tool = Some(info.clone());
        table.tracer_available = probe.tracer_available;

        if probe.formats.is_empty() {
            for f in TOOL_FALLBACK_WRITABLE {
                let entry = table.formats.entry(f.token().to_string()).or_default();
                entry.readable = true;
                entry.writable_by_external_tool = true;
            }
            return table;
        }

        for tf in &probe.formats {
            let format = Format::from_token(&tf.token);
            if format.is_malformed() {
                continue;
            }
            let entry = table.formats.entry(format.token().to_string()).or_default();
            entry.readable |= tf.readable;
            entry.writable_by_external_tool |= tf.writable;
        }
        table
    }

    /// Capability of `format`; all-false for tokens nobody knows.
    pub fn get(&self, format: &Format) -> FormatCapability {
        self.formats
            .get(format.token())
            .copied()
            .unwrap_or_default()
    }

    pub fn is_fast_writable(&self, format: &Format) -> bool {
        self.get(format).writable_by_fast_path
    }

    pub fn requires_preprocessing(&self, format: &Format) -> bool {
        self.get(format).requires_preprocessing
    }

    pub fn tool_available(&self) -> bool {
        self.tool.is_some()
    }

    pub fn tool(&self) -> Option<&ToolInfo> {
        self.tool.as_ref()
    }

    pub fn tracer_available(&self) -> bool {
        self.tracer_available
    }

    /// Whether any converter can produce `target`.
    pub fn can_write(&self, target: &Format) -> bool {
        let cap = self.get(target);
        *target == Format::Pdf || cap.writable_by_fast_path || cap.writable_by_external_tool
    }

    /// Tool-only output formats, for client-side format pickers.
    pub fn advanced_formats(&self) -> Vec<String> {
        self.formats
            .iter()
            .filter(|(_, c)| c.writable_by_external_tool && !c.writable_by_fast_path)
            .map(|(t, _)| t.clone())
            .collect()
    }

    /// Summary for the capability probe interface.
    pub fn report(&self) -> CapabilityReport {
        CapabilityReport {
            tool_available: self.tool_available(),
            tool: self.tool.clone(),
            tracer_available: self.tracer_available,
            fast_path_formats: self
                .formats
                .iter()
                .filter(|(_, c)| c.writable_by_fast_path)
                .map(|(t, _)| t.clone())
                .collect(),
            advanced_formats: self.advanced_formats(),
        }
    }
}

impl Default for CapabilityTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Serialisable answer to "what can this server do?".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityReport {
    pub tool_available: bool,
    pub tool: Option<ToolInfo>,
    pub tracer_available: bool,
    pub fast_path_formats: Vec<String>,
    pub advanced_formats: Vec<String>,
}

/// A swappable, snapshot-readable capability table.
#[derive(Debug)]
pub struct SharedCapabilities {
    inner: RwLock<Arc<CapabilityTable>>,
}

impl SharedCapabilities {
    pub fn new(table: CapabilityTable) -> Self {
        Self {
            inner: RwLock::new(Arc::new(table)),
        }
    }

    /// Current table. Survives a poisoned lock.
    pub fn snapshot(&self) -> Arc<CapabilityTable> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Swap in a freshly probed table.
    pub fn replace(&self, table: CapabilityTable) {
        let table = Arc::new(table);
        match self.inner.write() {
            Ok(mut guard) => *guard = table,
            Err(poisoned) => *poisoned.into_inner() = table,
        }
    }
}

// ── Probe output parsing ────────────────────────────────────────────────────

static RE_FORMAT_ROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*([A-Za-z0-9][A-Za-z0-9_-]*)\*?\s+([r-])([w-])([+-])\s").unwrap()
});

/// Parse the table printed by `magick -list format`.
pub fn parse_format_list(listing: &str) -> Vec<ToolFormat> {
    RE_FORMAT_ROW
        .captures_iter(listing)
        .map(|caps| ToolFormat {
            token: caps[1].to_ascii_lowercase(),
            readable: &caps[2] == "r",
            writable: &caps[3] == "w",
        })
        .collect()
}

/// Extract "ImageMagick 7.1.1-21 Q16-HDRI" from `magick -version`.
pub fn parse_version(output: &str) -> Option<String> {
    let first = output.lines().next()?.trim();
    let v = first.strip_prefix("Version:").unwrap_or(first).trim();
    let v: String = v.split_whitespace().take(3).collect::<Vec<_>>().join(" ");
    if v.is_empty() {
        None
    } else {
        Some(v)
    }
}
