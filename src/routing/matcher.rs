//! Path pattern matching module
//!
//! Route paths are made of segments:
//! - literal (`/users`)
//! - parameter (`/{id}`), matches exactly one segment
//! - greedy parameter (`/{proxy+}`), matches one or more trailing segments
//!
//! Precedence is decided segment by segment from the left:
//! literal beats parameter, parameter beats greedy.

use std::collections::{BTreeMap, HashSet};

/// One segment of a route path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
    Greedy(String),
}

impl Segment {
    /// Lower is more specific
    const fn rank(&self) -> u8 {
        match self {
            Self::Literal(_) => 0,
            Self::Param(_) => 1,
            Self::Greedy(_) => 2,
        }
    }
}

/// Parsed route path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    /// Parse a route path such as `/users/{id}` or `/{proxy+}`
    pub fn parse(raw: &str) -> Result<Self, String> {
        let Some(rest) = raw.strip_prefix('/') else {
            return Err("path must start with '/'".to_string());
        };

        let mut segments = Vec::new();
        let mut names = HashSet::new();

        if !rest.is_empty() {
            let parts: Vec<&str> = rest.split('/').collect();
            let last = parts.len() - 1;

            for (index, part) in parts.iter().enumerate() {
                let segment = parse_segment(part)?;
                match &segment {
                    Segment::Greedy(_) if index != last => {
                        return Err(format!("greedy segment '{part}' must be last"));
                    }
                    Segment::Param(name) | Segment::Greedy(name) => {
                        if !names.insert(name.clone()) {
                            return Err(format!("duplicate parameter '{name}'"));
                        }
                    }
                    Segment::Literal(_) => {}
                }
                segments.push(segment);
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Shape of the path with parameter names erased
    ///
    /// Two patterns with the same key match exactly the same requests.
    pub fn structural_key(&self) -> String {
        let mut key = String::new();
        for segment in &self.segments {
            key.push('/');
            match segment {
                Segment::Literal(lit) => key.push_str(lit),
                Segment::Param(_) => key.push_str("{}"),
                Segment::Greedy(_) => key.push_str("{+}"),
            }
        }
        if key.is_empty() {
            key.push('/');
        }
        key
    }

    /// Precedence vector, compared lexicographically (lower wins)
    pub fn rank(&self) -> Vec<u8> {
        self.segments.iter().map(Segment::rank).collect()
    }

    /// Match request path segments, returning the captured parameters
    pub fn match_segments(&self, path: &[&str]) -> Option<BTreeMap<String, String>> {
        let mut params = BTreeMap::new();

        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(lit) => {
                    if path.get(index) != Some(&lit.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = path.get(index)?;
                    params.insert(name.clone(), (*value).to_string());
                }
                Segment::Greedy(name) => {
                    if path.len() <= index {
                        return None;
                    }
                    params.insert(name.clone(), path[index..].join("/"));
                    return Some(params);
                }
            }
        }

        (path.len() == self.segments.len()).then_some(params)
    }
}

fn parse_segment(part: &str) -> Result<Segment, String> {
    if part.is_empty() {
        return Err("empty path segment".to_string());
    }

    if let Some(inner) = part.strip_prefix('{') {
        let Some(inner) = inner.strip_suffix('}') else {
            return Err(format!("unterminated parameter '{part}'"));
        };
        let (name, greedy) = match inner.strip_suffix('+') {
            Some(name) => (name, true),
            None => (inner, false),
        };
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(format!("invalid parameter name in '{part}'"));
        }
        return Ok(if greedy {
            Segment::Greedy(name.to_string())
        } else {
            Segment::Param(name.to_string())
        });
    }

    if part.contains('{') || part.contains('}') {
        return Err(format!("braces are only allowed around a whole segment: '{part}'"));
    }
    Ok(Segment::Literal(part.to_string()))
}

/// Split a request path into segments, ignoring empty ones
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}
