// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Tag-based port naming.
//!
//! A node's ports are written in the graph description as a list of
//! specifications, each one of:
//!
//! - `name`: an untagged port; untagged ports are indexed by position
//! - `TAG:name`: index 0 of tag `TAG`
//! - `TAG:index:name`: an explicit index within tag `TAG`
//!
//! A [`TagMap`] groups those specifications by tag, checks that every tag's
//! indices form the contiguous run `0..k`, and hands out dense
//! [`CollectionItemId`]s in (order of first appearance of the tag, index) order.

use crate::error::{FlowKitError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense id of one entry in a [`TagMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CollectionItemId(usize);

impl CollectionItemId {
    pub const fn new(value: usize) -> Self {
        Self(value)
    }

    pub const fn value(self) -> usize {
        self.0
    }
}

impl fmt::Display for CollectionItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A parsed port specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagIndexName {
    pub tag: String,
    /// `None` when written without an explicit index.
    pub index: Option<usize>,
    pub name: String,
}

impl TagIndexName {
    /// Renders the specification back into `TAG:index:name` form.
    pub fn to_spec(&self) -> String {
        match (&self.tag[..], self.index) {
            ("", _) => self.name.clone(),
            (tag, None) => format!("{tag}:{}", self.name),
            (tag, Some(index)) => format!("{tag}:{index}:{}", self.name),
        }
    }
}

/// True for `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {},
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// True for `[A-Z_][A-Z0-9_]*`.
pub fn is_valid_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() || c == '_' => {},
        _ => return false,
    }
    chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn parse_index(spec: &str, raw: &str) -> Result<usize> {
    let well_formed = !raw.is_empty()
        && raw.chars().all(|c| c.is_ascii_digit())
        && (raw == "0" || !raw.starts_with('0'));
    if !well_formed {
        return Err(FlowKitError::Configuration(format!(
            "Invalid index '{raw}' in port specification '{spec}'"
        )));
    }
    raw.parse().map_err(|_| {
        FlowKitError::Configuration(format!("Index '{raw}' out of range in '{spec}'"))
    })
}

/// Parses one `name`, `TAG:name` or `TAG:index:name` specification.
///
/// # Errors
///
/// Returns `FlowKitError::Configuration` if the tag, index or name fails the
/// identifier grammar.
pub fn parse_tag_index_name(spec: &str) -> Result<TagIndexName> {
    let parts: Vec<&str> = spec.split(':').collect();
    let (tag, index, name) = match parts.as_slice() {
        [name] => (String::new(), None, *name),
        [tag, name] => ((*tag).to_string(), None, *name),
        [tag, index, name] => ((*tag).to_string(), Some(parse_index(spec, index)?), *name),
        _ => {
            return Err(FlowKitError::Configuration(format!(
                "Port specification '{spec}' has too many ':' separated parts"
            )));
        },
    };

    if parts.len() > 1 && !is_valid_tag(&tag) {
        return Err(FlowKitError::Configuration(format!(
            "Tag '{tag}' in '{spec}' must match [A-Z_][A-Z0-9_]*"
        )));
    }
    if !is_valid_name(name) {
        return Err(FlowKitError::Configuration(format!(
            "Name '{name}' in '{spec}' must match [A-Za-z_][A-Za-z0-9_]*"
        )));
    }
    Ok(TagIndexName { tag, index, name: name.to_string() })
}

/// One resolved entry of a [`TagMap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagMapEntry {
    pub tag: String,
    pub index: usize,
    pub id: CollectionItemId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TagData {
    tag: String,
    first_id: usize,
    count: usize,
}

/// Maps tags and indices to dense ids.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagMap {
    /// Tags in order of first appearance.
    tags: Vec<TagData>,
    /// Entries in id order.
    entries: Vec<TagMapEntry>,
}

impl TagMap {
    /// Builds a tag map from an ordered list of port specifications.
    ///
    /// # Errors
    ///
    /// Returns `FlowKitError::Configuration` on a grammar violation, a duplicate
    /// (tag, index), a gap in a tag's indices, or a tag written both with the
    /// implicit `TAG:name` form and with other entries.
    pub fn new<S: AsRef<str>>(specs: &[S]) -> Result<Self> {
        // Group by tag, keeping first-appearance order of tags.
        let mut groups: Vec<(String, Vec<TagIndexName>)> = Vec::new();
        for spec in specs {
            let parsed = parse_tag_index_name(spec.as_ref())?;
            match groups.iter_mut().find(|(tag, _)| *tag == parsed.tag) {
                Some((_, members)) => members.push(parsed),
                None => groups.push((parsed.tag.clone(), vec![parsed])),
            }
        }

        let mut tags = Vec::with_capacity(groups.len());
        let mut entries = Vec::with_capacity(specs.len());
        for (tag, members) in groups {
            let first_id = entries.len();
            let count = members.len();
            let mut slots: Vec<Option<String>> = vec![None; count];

            if tag.is_empty() {
                for (position, member) in members.into_iter().enumerate() {
                    slots[position] = Some(member.name);
                }
            } else {
                let implicit = members.iter().filter(|m| m.index.is_none()).count();
                if implicit > 0 && count > 1 {
                    return Err(FlowKitError::Configuration(format!(
                        "Tag '{tag}' is used both as '{tag}:name' and with other entries; \
                         use explicit '{tag}:index:name' for every entry"
                    )));
                }
                for member in members {
                    let index = member.index.unwrap_or(0);
                    if index >= count {
                        return Err(FlowKitError::Configuration(format!(
                            "Tag '{tag}' has {count} entries but uses index {index}; \
                             indices must be contiguous from 0"
                        )));
                    }
                    if slots[index].is_some() {
                        return Err(FlowKitError::Configuration(format!(
                            "Duplicate port '{tag}:{index}'"
                        )));
                    }
                    slots[index] = Some(member.name);
                }
            }

            for (index, name) in slots.into_iter().enumerate() {
                // Every slot is filled: count entries, indices < count, no duplicates.
                let name = name.ok_or_else(|| {
                    FlowKitError::Configuration(format!("Tag '{tag}' is missing index {index}"))
                })?;
                entries.push(TagMapEntry {
                    tag: tag.clone(),
                    index,
                    id: CollectionItemId::new(entries.len()),
                    name,
                });
            }
            tags.push(TagData { tag, first_id, count });
        }

        Ok(Self { tags, entries })
    }

    /// Total number of entries (ids are `0..num_entries()`).
    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn tag_data(&self, tag: &str) -> Option<&TagData> {
        self.tags.iter().find(|t| t.tag == tag)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tag_data(tag).is_some()
    }

    /// Number of entries using `tag` (0 when the tag is absent).
    pub fn num_entries_for_tag(&self, tag: &str) -> usize {
        self.tag_data(tag).map_or(0, |t| t.count)
    }

    /// Id of the first entry with `tag`.
    pub fn begin_id(&self, tag: &str) -> Option<CollectionItemId> {
        self.tag_data(tag).map(|t| CollectionItemId::new(t.first_id))
    }

    /// Id of `tag:index`.
    pub fn id(&self, tag: &str, index: usize) -> Option<CollectionItemId> {
        self.tag_data(tag)
            .filter(|t| index < t.count)
            .map(|t| CollectionItemId::new(t.first_id + index))
    }

    /// Id of the `index`-th untagged entry.
    pub fn id_for_index(&self, index: usize) -> Option<CollectionItemId> {
        self.id("", index)
    }

    pub fn entry(&self, id: CollectionItemId) -> Option<&TagMapEntry> {
        self.entries.get(id.value())
    }

    /// Id of the entry whose name is `name`, if any.
    pub fn id_for_name(&self, name: &str) -> Option<CollectionItemId> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.id)
    }

    /// Tags in order of first appearance.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(|t| t.tag.as_str())
    }

    /// Entries in id order.
    pub fn entries(&self) -> impl Iterator<Item = &TagMapEntry> {
        self.entries.iter()
    }

    /// Names in id order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Human-readable `TAG:index` for an id, used in error messages.
    pub fn describe(&self, id: CollectionItemId) -> String {
        self.entry(id).map_or_else(
            || format!("#{id}"),
            |e| {
                if e.tag.is_empty() {
                    format!("#{} ('{}')", e.index, e.name)
                } else {
                    format!("{}:{} ('{}')", e.tag, e.index, e.name)
                }
            },
        )
    }

    /// Renders every entry back into its canonical `TAG:index:name` form.
    pub fn canonical_specs(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| {
                if e.tag.is_empty() {
                    e.name.clone()
                } else {
                    format!("{}:{}:{}", e.tag, e.index, e.name)
                }
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_follow_first_appearance_then_index() {
        let map = TagMap::new(&["VIDEO:1:b", "AUDIO:x", "VIDEO:0:a", "plain", "other"]).unwrap();
        let entries: Vec<_> =
            map.entries().map(|e| (e.tag.as_str(), e.index, e.id.value(), e.name.as_str())).collect();
        assert_eq!(
            entries,
            vec![
                ("VIDEO", 0, 0, "a"),
                ("VIDEO", 1, 1, "b"),
                ("AUDIO", 0, 2, "x"),
                ("", 0, 3, "plain"),
                ("", 1, 4, "other"),
            ]
        );
        assert_eq!(map.num_entries(), 5);
        assert_eq!(map.id("VIDEO", 1), Some(CollectionItemId::new(1)));
        assert_eq!(map.id_for_index(1), Some(CollectionItemId::new(4)));
        assert_eq!(map.id("VIDEO", 2), None);
        assert_eq!(map.num_entries_for_tag("AUDIO"), 1);
        assert_eq!(map.tags().collect::<Vec<_>>(), vec!["VIDEO", "AUDIO", ""]);
    }

    #[test]
    fn test_gap_in_indices_is_rejected() {
        let err = TagMap::new(&["TAG:0:a", "TAG:2:b"]).unwrap_err();
        assert!(matches!(err, FlowKitError::Configuration(ref m) if m.contains("TAG")));
    }

    #[test]
    fn test_duplicate_index_is_rejected() {
        let err = TagMap::new(&["TAG:0:a", "TAG:0:b"]).unwrap_err();
        assert!(err.to_string().contains("Duplicate port 'TAG:0'"));
    }

    #[test]
    fn test_implicit_and_explicit_mix_is_rejected() {
        let err = TagMap::new(&["TAG:a", "TAG:1:b"]).unwrap_err();
        assert!(err.to_string().contains("Tag 'TAG'"));
    }

    #[test]
    fn test_grammar() {
        assert!(TagMap::new(&["lower:name"]).is_err());
        assert!(TagMap::new(&["TAG:9name"]).is_err());
        assert!(TagMap::new(&["TAG:01:name"]).is_err());
        assert!(TagMap::new(&["A:B:C:D"]).is_err());
        assert!(TagMap::new(&["_T2:0:name_2"]).is_ok());
    }

    #[test]
    fn test_contiguous_indices_property() {
        let map = TagMap::new(&["T:2:c", "T:0:a", "T:1:b", "U:0:d"]).unwrap();
        for tag in map.tags() {
            let indices: Vec<usize> =
                map.entries().filter(|e| e.tag == tag).map(|e| e.index).collect();
            assert_eq!(indices, (0..map.num_entries_for_tag(tag)).collect::<Vec<_>>());
        }
        assert_eq!(map.canonical_specs(), vec!["T:0:a", "T:1:b", "T:2:c", "U:0:d"]);
    }
}
