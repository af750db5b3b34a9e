use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    cmp::Ordering,
    convert::Infallible,
    fmt::Display,
    hash::{Hash, Hasher},
    str::FromStr,
};

/// One step into a state tree: an object key or an array index.
///
/// A key in canonical decimal form (`"7"`, not `"07"`) names the same step
/// as the index it spells, so `Key("7") == Index(7)`. Objects keyed by ids
/// are addressed the same way whether the path was parsed, built with
/// [`path!`](crate::path!) or recorded from a delta.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segment {
    Index(usize),
    Key(String),
}

impl Segment {
    /// Parse one textual segment: canonical decimals become indices.
    pub fn parse(part: &str) -> Segment {
        match canonical_index(part) {
            Some(i) => Segment::Index(i),
            None => Segment::Key(part.to_owned()),
        }
    }

    /// The index this segment spells, if any.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Segment::Index(i) => Some(*i),
            Segment::Key(k) => canonical_index(k),
        }
    }
}

fn canonical_index(part: &str) -> Option<usize> {
    let digits = !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    if !digits || (part.len() > 1 && part.starts_with('0')) {
        return None;
    }
    part.parse().ok()
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Segment {}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Indices sort before keys.
impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.as_index(), other.as_index()) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.to_string().cmp(&other.to_string()),
        }
    }
}

impl Hash for Segment {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.as_index() {
            Some(i) => {
                0u8.hash(state);
                i.hash(state);
            }
            None => {
                1u8.hash(state);
                self.to_string().hash(state);
            }
        }
    }
}

impl From<usize> for Segment {
    fn from(index: usize) -> Self {
        Segment::Index(index)
    }
}

// Integer literals default to i32, so `path!("tasks", 0)` lands here.
impl From<i32> for Segment {
    fn from(index: i32) -> Self {
        usize::try_from(index)
            .map(Segment::Index)
            .unwrap_or_else(|_| Segment::Key(index.to_string()))
    }
}

impl From<&str> for Segment {
    fn from(key: &str) -> Self {
        Segment::Key(key.to_owned())
    }
}

impl From<String> for Segment {
    fn from(key: String) -> Self {
        Segment::Key(key)
    }
}

impl Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Segment::Index(i) => write!(f, "{}", i),
            Segment::Key(k) => write!(f, "{}", k),
        }
    }
}

/// An ordered sequence of keys and indices, starting at the root of a state
/// tree. The empty path is the root itself.
///
/// The textual form joins segments with `.`, e.g. `tasks.0.summary`. When
/// parsing, canonical decimal segments become indices.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<Segment>);

impl Path {
    pub fn root() -> Self {
        Path(Vec::new())
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn child(&self, segment: impl Into<Segment>) -> Path {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Path(segments)
    }

    pub fn push(&mut self, segment: impl Into<Segment>) {
        self.0.push(segment.into());
    }

    pub fn parent(&self) -> Option<Path> {
        match self.0.split_last() {
            Some((_, init)) => Some(Path(init.to_vec())),
            None => None,
        }
    }

    pub fn last(&self) -> Option<&Segment> {
        self.0.last()
    }

    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// `self` is a strict prefix of `other`.
    pub fn is_ancestor_of(&self, other: &Path) -> bool {
        other.0.len() > self.0.len() && other.starts_with(self)
    }

    /// Equal, ancestor or descendant.
    pub fn is_related(&self, other: &Path) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }

    /// The strict ancestors of this path, outermost first. The root is not
    /// included.
    pub fn ancestors(&self) -> impl Iterator<Item = Path> + '_ {
        (1..self.0.len()).map(move |n| Path(self.0[..n].to_vec()))
    }

    pub fn get<'v>(&self, value: &'v Value) -> Option<&'v Value> {
        self.0.iter().try_fold(value, |v, s| step(v, s))
    }

    pub fn get_mut<'v>(&self, value: &'v mut Value) -> Option<&'v mut Value> {
        self.0.iter().try_fold(value, |v, s| step_mut(v, s))
    }

    /// RFC 6901 JSON pointer for this path.
    pub fn to_pointer(&self) -> String {
        self.0
            .iter()
            .map(|s| format!("/{}", s.to_string().replace('~', "~0").replace('/', "~1")))
            .collect()
    }
}

fn step<'v>(value: &'v Value, segment: &Segment) -> Option<&'v Value> {
    match (value, segment) {
        (Value::Array(items), Segment::Index(i)) => items.get(*i),
        (Value::Array(items), Segment::Key(k)) => k.parse::<usize>().ok().and_then(|i| items.get(i)),
        (Value::Object(fields), Segment::Key(k)) => fields.get(k),
        (Value::Object(fields), Segment::Index(i)) => fields.get(&i.to_string()),
        _ => None,
    }
}

fn step_mut<'v>(value: &'v mut Value, segment: &Segment) -> Option<&'v mut Value> {
    match (value, segment) {
        (Value::Array(items), Segment::Index(i)) => items.get_mut(*i),
        (Value::Array(items), Segment::Key(k)) => {
            k.parse::<usize>().ok().and_then(move |i| items.get_mut(i))
        }
        (Value::Object(fields), Segment::Key(k)) => fields.get_mut(k),
        (Value::Object(fields), Segment::Index(i)) => fields.get_mut(&i.to_string()),
        _ => None,
    }
}

impl Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s: Vec<String> = self.0.iter().map(|s| s.to_string()).collect();
        write!(f, "{}", s.join("."))
    }
}

impl FromStr for Path {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Path::root());
        }
        Ok(s.split('.').map(Segment::parse).collect())
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(p) => p,
            Err(e) => match e {},
        }
    }
}

impl FromIterator<Segment> for Path {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Path(iter.into_iter().collect())
    }
}

/// Build a [`Path`] from keys and indices: `path!("tasks", 0, "summary")`.
#[macro_export]
macro_rules! path {
    () => {
        $crate::path::Path::root()
    };
    ($($segment:expr),+ $(,)?) => {
        <$crate::path::Path as ::core::iter::FromIterator<$crate::path::Segment>>::from_iter([
            $($crate::path::Segment::from($segment)),+
        ])
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_and_display() {
        let p: Path = "tasks.0.summary".parse().unwrap();
        assert_eq!(p, path!("tasks", 0, "summary"));
        assert_eq!(p.to_string(), "tasks.0.summary");
        assert_eq!(Path::from(""), Path::root());
    }

    #[test]
    fn test_relations() {
        let tasks = path!("tasks");
        let first = path!("tasks", 0);
        let other = path!("task");
        assert!(tasks.is_ancestor_of(&first));
        assert!(!first.is_ancestor_of(&tasks));
        assert!(!tasks.is_ancestor_of(&tasks));
        assert!(tasks.is_related(&first));
        assert!(first.is_related(&tasks));
        assert!(!other.is_related(&tasks));
        assert_eq!(first.parent(), Some(tasks));
    }

    #[test]
    fn test_ancestors_exclude_root_and_self() {
        let p = path!("a", "b", 2);
        let ancestors: Vec<Path> = p.ancestors().collect();
        assert_eq!(ancestors, vec![path!("a"), path!("a", "b")]);
        assert_eq!(Path::root().ancestors().count(), 0);
    }

    #[test]
    fn test_get() {
        let v = json!({"tasks": [{"summary": "a"}, {"summary": "b"}], "7": true});
        assert_eq!(path!("tasks", 1, "summary").get(&v), Some(&json!("b")));
        assert_eq!(path!("tasks", 2).get(&v), None);
        assert_eq!(path!(7).get(&v), Some(&json!(true)));
        assert_eq!(Path::root().get(&v), Some(&v));
    }

    #[test]
    fn test_get_mut() {
        let mut v = json!({"tasks": [1, 2]});
        *path!("tasks", 0).get_mut(&mut v).unwrap() = json!(5);
        assert_eq!(v, json!({"tasks": [5, 2]}));
    }

    #[test]
    fn test_numeric_keys_match_indices() {
        let parsed: Path = "byId.7".parse().unwrap();
        let recorded = path!("byId").child("7");
        assert_eq!(parsed, recorded);
        assert_eq!(path!("byId", 7), recorded);
        assert!(recorded.starts_with(&parsed));

        let mut seen = std::collections::HashSet::new();
        seen.insert(recorded);
        assert!(seen.contains(&parsed));

        // Not canonical, so these stay keys.
        assert_eq!(Segment::parse("07"), Segment::Key("07".to_owned()));
        assert_ne!(Segment::parse("07"), Segment::Index(7));
        assert_ne!(Segment::parse("+7"), Segment::Index(7));
        assert_eq!(Segment::parse("x"), Segment::Key("x".to_owned()));
    }

    #[test]
    fn test_pointer_escaping() {
        assert_eq!(path!("a/b", "c~d", 3).to_pointer(), "/a~1b/c~0d/3");
        assert_eq!(Path::root().to_pointer(), "");
    }
}
