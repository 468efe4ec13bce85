//! Tree metadata (`.treeinfo`) reader.
//!
//! The file is INI-style:
//!
//! ```text
//! [general]
//! family = Fedora
//! arch = x86_64
//!
//! [images-x86_64]
//! kernel = images/pxeboot/vmlinuz
//! initrd = images/pxeboot/initrd.img
//! boot.iso = images/boot.iso
//!
//! [images-xen]
//! kernel = images/xen/vmlinuz
//! initrd = images/xen/initrd.img
//! ```

use std::collections::BTreeMap;
use std::fs;

use thiserror::Error;
use tracing::debug;

use crate::error::{IoContext, Result};
use crate::fetch::FetchSession;

/// Location of the metadata file relative to the tree root.
pub const TREEINFO_PATH: &str = ".treeinfo";

const IMAGES_PREFIX: &str = "images-";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataParseError {
    #[error("malformed tree metadata at line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("tree metadata has no '{key}' in section [{section}]")]
    MissingKey { section: String, key: String },
}

/// Media paths from one `images-<tag>` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageSet {
    pub kernel: Option<String>,
    pub initrd: Option<String>,
    pub boot_iso: Option<String>,
}

impl ImageSet {
    /// The kernel/initrd pair, when the section names both.
    pub fn kernel_pair(&self) -> Option<(&str, &str)> {
        Some((self.kernel.as_deref()?, self.initrd.as_deref()?))
    }
}

/// Parsed tree metadata. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeMetadata {
    family: String,
    arch: Option<String>,
    version: Option<String>,
    images: BTreeMap<String, ImageSet>,
}

impl TreeMetadata {
    pub fn parse(text: &str) -> Result<Self, MetadataParseError> {
        let sections = parse_ini(text)?;

        let general = sections
            .get("general")
            .ok_or_else(|| MetadataParseError::MissingKey {
                section: "general".to_string(),
                key: "family".to_string(),
            })?;
        let family = general
            .get("family")
            .cloned()
            .ok_or_else(|| MetadataParseError::MissingKey {
                section: "general".to_string(),
                key: "family".to_string(),
            })?;

        let images = sections
            .iter()
            .filter_map(|(name, keys)| {
                let tag = name.strip_prefix(IMAGES_PREFIX)?;
                Some((
                    tag.to_string(),
                    ImageSet {
                        kernel: keys.get("kernel").cloned(),
                        initrd: keys.get("initrd").cloned(),
                        boot_iso: keys.get("boot.iso").cloned(),
                    },
                ))
            })
            .collect();

        Ok(Self {
            family,
            arch: general.get("arch").cloned(),
            version: general.get("version").cloned(),
            images,
        })
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    /// The tree's own `general.arch`, if declared.
    pub fn arch(&self) -> Option<&str> {
        self.arch.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// The `images-<tag>` section, if present.
    pub fn images(&self, tag: &str) -> Option<&ImageSet> {
        self.images.get(tag)
    }

    pub fn image_tags(&self) -> impl Iterator<Item = &str> {
        self.images.keys().map(String::as_str)
    }
}

type Sections = BTreeMap<String, BTreeMap<String, String>>;

/// Parse an INI document the way Python's ConfigParser reads `.treeinfo`:
/// `#`/`;` comments, `key = value` or `key: value`, lower-cased keys and
/// indented continuation lines.
fn parse_ini(text: &str) -> Result<Sections, MetadataParseError> {
    let mut sections: Sections = BTreeMap::new();
    let mut current: Option<String> = None;
    let mut last_key: Option<String> = None;

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let syntax = |message: &str| MetadataParseError::Syntax {
            line: line_no,
            message: message.to_string(),
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        let continuation = raw.starts_with(' ') || raw.starts_with('\t');
        if continuation {
            if let (Some(section), Some(key)) = (&current, &last_key) {
                if let Some(value) = sections
                    .get_mut(section)
                    .and_then(|keys| keys.get_mut(key))
                {
                    if !value.is_empty() {
                        value.push('\n');
                    }
                    value.push_str(trimmed);
                    continue;
                }
            }
        }

        if let Some(header) = trimmed.strip_prefix('[') {
            let name = header
                .strip_suffix(']')
                .ok_or_else(|| syntax("unterminated section header"))?
                .trim();
            if name.is_empty() {
                return Err(syntax("empty section name"));
            }
            sections.entry(name.to_string()).or_default();
            current = Some(name.to_string());
            last_key = None;
            continue;
        }

        let Some(section) = &current else {
            return Err(syntax("key outside of any section"));
        };

        let split_at = trimmed
            .find(['=', ':'])
            .ok_or_else(|| syntax("expected 'key = value'"))?;
        let key = trimmed[..split_at].trim().to_ascii_lowercase();
        if key.is_empty() {
            return Err(syntax("empty key"));
        }
        let value = trimmed[split_at + 1..].trim().to_string();

        sections
            .entry(section.clone())
            .or_default()
            .insert(key.clone(), value);
        last_key = Some(key);
    }

    Ok(sections)
}

/// Read the tree's metadata file, if it has one.
///
/// The fetched copy is deleted whether or not it parses. A malformed file
/// comes back as [`crate::Error::MetadataParse`].
pub fn read_metadata(session: &mut FetchSession<'_>) -> Result<Option<TreeMetadata>> {
    if !session.has_file(TREEINFO_PATH) {
        return Ok(None);
    }

    debug!("Detected {} file", TREEINFO_PATH);
    let local = session.acquire(TREEINFO_PATH)?;
    let read = fs::read(&local).io_context(|| format!("reading {}", local.display()));
    session.discard(&local);

    let text = String::from_utf8_lossy(&read?).into_owned();
    Ok(Some(TreeMetadata::parse(&text)?))
}
