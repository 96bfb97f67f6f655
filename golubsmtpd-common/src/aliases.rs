//! Local alias maps in the `/etc/aliases` format.
//!
//! Lines have the form `alias: recipient[, recipient]*`. `#` introduces a
//! comment, blank lines are skipped, and malformed lines are skipped with a
//! warning rather than failing the whole load. A recipient without `@` is
//! qualified with `@localhost`. Lookup is case-sensitive.

use std::{io, path::Path};

use ahash::AHashMap;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct AliasMap {
    aliases: AHashMap<String, Vec<String>>,
}

impl AliasMap {
    /// Load an alias map from the given file.
    pub fn load(path: &Path) -> io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::parse(&raw))
    }

    /// Parse alias file content. Never fails; bad lines are skipped.
    pub fn parse(raw: &str) -> Self {
        let mut aliases: AHashMap<String, Vec<String>> = AHashMap::new();

        for (line_no, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((alias, rest)) = line.split_once(':') else {
                warn!(line = line_no + 1, "skipping malformed alias line");
                continue;
            };

            let alias = alias.trim();
            if alias.is_empty() {
                warn!(line = line_no + 1, "skipping alias line with empty name");
                continue;
            }

            let mut recipients: Vec<String> = rest
                .split(',')
                .flat_map(str::split_whitespace)
                .filter(|recipient| !recipient.is_empty())
                .map(|recipient| {
                    if recipient.contains('@') {
                        recipient.to_string()
                    } else {
                        format!("{recipient}@localhost")
                    }
                })
                .collect();

            if recipients.is_empty() {
                warn!(
                    alias,
                    line = line_no + 1,
                    "skipping alias with no recipients"
                );
                continue;
            }

            recipients.sort();
            recipients.dedup();
            debug!(alias, count = recipients.len(), "parsed alias");
            aliases.insert(alias.to_string(), recipients);
        }

        Self { aliases }
    }

    /// Resolve an alias to its recipients; empty when unknown.
    pub fn resolve(&self, alias: &str) -> Vec<String> {
        self.aliases.get(alias).cloned().unwrap_or_default()
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.aliases.contains_key(alias)
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}
