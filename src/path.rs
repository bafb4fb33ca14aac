//! Body paths and URL templates.
//!
//! A [`BodyPath`] addresses a slot inside the nested JSON body
//! (`input.customFields.price`, `sources[0].url`). A [`UrlTemplate`] is an
//! operation URL with `{{ $parameter.<id> }}` placeholders.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde_json::{Map, Value};

/// One step of a [`BodyPath`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Parsed dot/array path into a JSON body.
///
/// Ordering is segment-wise, so `items[2]` sorts before `items[10]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BodyPath {
    segments: Vec<PathSegment>,
}

impl BodyPath {
    /// Parse a path such as `input.customFields.price` or `sources[0].url`.
    ///
    /// The first segment must be a key: bodies are always objects.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut segments = Vec::new();

        for part in raw.split('.') {
            let (key, mut rest) = match part.find('[') {
                Some(idx) => (&part[..idx], &part[idx..]),
                None => (part, ""),
            };
            if key.is_empty() {
                return Err(format!("empty key in \"{}\"", raw));
            }
            segments.push(PathSegment::Key(key.to_string()));

            while !rest.is_empty() {
                let Some(close) = rest.find(']') else {
                    return Err(format!("unclosed '[' in \"{}\"", raw));
                };
                let index = rest[1..close]
                    .parse::<usize>()
                    .map_err(|_| format!("invalid index \"{}\" in \"{}\"", &rest[1..close], raw))?;
                segments.push(PathSegment::Index(index));
                rest = &rest[close + 1..];
                if !rest.is_empty() && !rest.starts_with('[') {
                    return Err(format!("unexpected \"{}\" after index in \"{}\"", rest, raw));
                }
            }
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Merge `value` into `target` at this path.
    ///
    /// Intermediate objects and arrays are created on demand. When the slot
    /// already holds an object and `value` is an object, the two are merged
    /// key by key. Any other collision is a conflict unless both sides are
    /// equal. Array indices may only overwrite or append.
    pub fn merge_into(&self, target: &mut Map<String, Value>, value: Value) -> Result<(), String> {
        let Some((PathSegment::Key(head), rest)) = self.segments.split_first() else {
            return Err(self.to_string());
        };

        match target.get_mut(head) {
            Some(slot) => merge_at(slot, rest, value),
            None => build_nested(rest, value).map(|nested| {
                target.insert(head.clone(), nested);
            }),
        }
        .map_err(|()| self.to_string())
    }
}

/// Merge `(path, tag, value)` entries into a fresh object.
///
/// Entries are applied in path order, ties broken by tag. Indices of each
/// array are renumbered densely, so `tags[1]` without `tags[0]` lands in
/// `tags[0]`. On conflict the entry's tag and its path as written are
/// returned.
pub fn merge_entries(
    mut entries: Vec<(&BodyPath, usize, Value)>,
) -> Result<Map<String, Value>, (usize, String)> {
    entries.sort_by(|a, b| a.0.cmp(b.0).then(a.1.cmp(&b.1)));
    let paths: Vec<&BodyPath> = entries.iter().map(|(path, _, _)| *path).collect();
    let placed = compact_indices(&paths);

    let mut object = Map::new();
    for ((path, tag, value), slot) in entries.into_iter().zip(placed) {
        slot.merge_into(&mut object, value)
            .map_err(|_| (tag, path.to_string()))?;
    }
    Ok(object)
}

/// Renumber array indices by rank among the indices used for the same array.
///
/// An array is identified by the path prefix leading to it, as written.
fn compact_indices(paths: &[&BodyPath]) -> Vec<BodyPath> {
    let mut used: BTreeMap<&[PathSegment], BTreeSet<usize>> = BTreeMap::new();
    for path in paths {
        for (i, segment) in path.segments.iter().enumerate() {
            if let PathSegment::Index(index) = segment {
                used.entry(&path.segments[..i]).or_default().insert(*index);
            }
        }
    }

    paths
        .iter()
        .map(|path| {
            let segments = path
                .segments
                .iter()
                .enumerate()
                .map(|(i, segment)| match segment {
                    PathSegment::Index(index) => {
                        let rank = used
                            .get(&path.segments[..i])
                            .map_or(*index, |set| set.range(..*index).count());
                        PathSegment::Index(rank)
                    }
                    key => key.clone(),
                })
                .collect();
            BodyPath { segments }
        })
        .collect()
}

impl fmt::Display for BodyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if i == 0 => write!(f, "{}", key)?,
                PathSegment::Key(key) => write!(f, ".{}", key)?,
                PathSegment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

fn merge_at(slot: &mut Value, segments: &[PathSegment], value: Value) -> Result<(), ()> {
    let Some((head, rest)) = segments.split_first() else {
        return merge_values(slot, value);
    };

    match (head, slot) {
        (PathSegment::Key(key), Value::Object(map)) => match map.get_mut(key) {
            Some(child) => merge_at(child, rest, value),
            None => {
                let nested = build_nested(rest, value)?;
                map.insert(key.clone(), nested);
                Ok(())
            }
        },
        (PathSegment::Index(index), Value::Array(items)) => {
            if *index < items.len() {
                merge_at(&mut items[*index], rest, value)
            } else if *index == items.len() {
                items.push(build_nested(rest, value)?);
                Ok(())
            } else {
                Err(())
            }
        }
        _ => Err(()),
    }
}

fn merge_values(slot: &mut Value, value: Value) -> Result<(), ()> {
    match (slot, value) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, child) in incoming {
                match existing.get_mut(&key) {
                    Some(current) => merge_values(current, child)?,
                    None => {
                        existing.insert(key, child);
                    }
                }
            }
            Ok(())
        }
        (existing, incoming) if *existing == incoming => Ok(()),
        _ => Err(()),
    }
}

/// Fresh container for `segments`; only index 0 can start a new array.
fn build_nested(segments: &[PathSegment], value: Value) -> Result<Value, ()> {
    let Some((head, rest)) = segments.split_first() else {
        return Ok(value);
    };

    match head {
        PathSegment::Key(key) => {
            let mut map = Map::new();
            map.insert(key.clone(), build_nested(rest, value)?);
            Ok(Value::Object(map))
        }
        PathSegment::Index(0) => Ok(Value::Array(vec![build_nested(rest, value)?])),
        PathSegment::Index(_) => Err(()),
    }
}

/// A piece of a [`UrlTemplate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlSegment {
    Literal(String),
    Placeholder(String),
}

/// Operation URL with `{{ $parameter.<id> }}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    raw: String,
    segments: Vec<UrlSegment>,
}

impl UrlTemplate {
    /// Parse a URL template.
    ///
    /// Accepts `{{ $parameter.name }}` and `{{ $parameter["name"] }}`,
    /// with optional whitespace and a leading `=` on the whole template.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let body = raw.strip_prefix('=').unwrap_or(raw);
        let mut segments = Vec::new();
        let mut rest = body;

        while let Some(open) = rest.find("{{") {
            if open > 0 {
                segments.push(UrlSegment::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 2..];
            let Some(close) = after.find("}}") else {
                return Err(format!("unclosed placeholder in \"{}\"", raw));
            };
            let name = parse_placeholder(after[..close].trim())
                .ok_or_else(|| format!("unsupported placeholder \"{}\"", after[..close].trim()))?;
            segments.push(UrlSegment::Placeholder(name));
            rest = &after[close + 2..];
        }
        if !rest.is_empty() {
            segments.push(UrlSegment::Literal(rest.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[UrlSegment] {
        &self.segments
    }

    /// Placeholder names in order of appearance.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            UrlSegment::Placeholder(name) => Some(name.as_str()),
            UrlSegment::Literal(_) => None,
        })
    }
}

fn parse_placeholder(expr: &str) -> Option<String> {
    let rest = expr.strip_prefix("$parameter")?;
    let name = if let Some(dotted) = rest.strip_prefix('.') {
        dotted
    } else {
        let quoted = rest.strip_prefix('[')?.strip_suffix(']')?;
        quoted
            .strip_prefix('"')
            .and_then(|q| q.strip_suffix('"'))
            .or_else(|| quoted.strip_prefix('\'').and_then(|q| q.strip_suffix('\'')))?
    };
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    valid.then(|| name.to_string())
}
