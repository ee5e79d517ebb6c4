use std::{
    collections::HashSet,
    fmt,
    fs::File,
    io::{BufReader, Read, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::{PatchError, Result};

/// Key of the node sequence in a workflow export.
pub const DEFAULT_NODES_KEY: &str = "nodes";

/// An in-memory workflow document.
///
/// Object keys keep their original order and numbers keep their original
/// text, so a document that is loaded and saved without a patch comes back
/// with the same fields and values. Repeated keys in one object are rejected
/// on load.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    root: Value,
}

impl Document {
    pub fn new(root: Value) -> Self {
        Document { root }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub(crate) fn root_mut(&mut self) -> &mut Value {
        &mut self.root
    }

    pub fn into_value(self) -> Value {
        self.root
    }

    /// Parse a document from a string. `origin` is only used in error messages.
    pub fn parse(s: &str, origin: &str) -> Result<Self> {
        Self::from_slice(s.as_bytes(), origin)
    }

    pub fn from_reader<R: Read>(mut reader: R, origin: &str) -> Result<Self> {
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|e| PatchError::io(origin, e))?;
        Self::from_slice(&bytes, origin)
    }

    fn from_slice(bytes: &[u8], origin: &str) -> Result<Self> {
        let root: Value = serde_json::from_slice(bytes).map_err(|e| PatchError::parse(origin, e))?;
        serde_json::from_slice::<UniqueKeys>(bytes).map_err(|e| PatchError::parse(origin, e))?;
        Ok(Document::new(root))
    }

    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| PatchError::io(path, e))?;
        let doc = Self::from_reader(BufReader::new(file), &path.display().to_string())?;
        tracing::debug!("document loaded");
        Ok(doc)
    }

    /// Render with two-space indentation and a trailing newline.
    pub fn to_string_pretty(&self) -> Result<String> {
        let mut s = serde_json::to_string_pretty(&self.root).map_err(PatchError::Serialize)?;
        s.push('\n');
        Ok(s)
    }

    /// Write the rendered document to `writer`. `destination` names the
    /// writer in error messages.
    pub fn write_to<W: Write>(&self, mut writer: W, destination: impl Into<PathBuf>) -> Result<()> {
        let rendered = self.to_string_pretty()?;
        writer
            .write_all(rendered.as_bytes())
            .and_then(|()| writer.flush())
            .map_err(|e| PatchError::io(destination, e))
    }

    /// Save to `path`, replacing it atomically.
    ///
    /// The document is written to a temporary file next to `path` which is
    /// then renamed over it, so a failure never leaves a truncated file
    /// behind. Permissions of an existing destination are kept.
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let rendered = self.to_string_pretty()?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| PatchError::io(dir, e))?;
        tmp.write_all(rendered.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| PatchError::io(tmp.path(), e))?;
        if let Ok(meta) = std::fs::metadata(path) {
            tmp.as_file()
                .set_permissions(meta.permissions())
                .map_err(|e| PatchError::io(tmp.path(), e))?;
        }
        tmp.persist(path).map_err(|e| PatchError::io(path, e.error))?;
        tracing::debug!(bytes = rendered.len(), "document saved");
        Ok(())
    }

    /// The node sequence stored under `key`.
    pub fn nodes(&self, key: &str) -> Result<&Vec<Value>> {
        let root = self.root.as_object().ok_or_else(|| PatchError::Shape {
            reason: format!("top level is {}, not a mapping", type_name(&self.root)),
        })?;
        match root.get(key) {
            Some(Value::Array(nodes)) => Ok(nodes),
            Some(other) => Err(PatchError::Shape {
                reason: format!("`{}` is {}, not a sequence", key, type_name(other)),
            }),
            None => Err(PatchError::Shape {
                reason: format!("no `{}` key at top level", key),
            }),
        }
    }

    /// Names of all nodes that have one, in document order.
    pub fn node_names(&self, key: &str) -> Result<Vec<&str>> {
        Ok(self
            .nodes(key)?
            .iter()
            .filter_map(|n| n.get("name").and_then(Value::as_str))
            .collect())
    }
}

impl FromStr for Document {
    type Err = PatchError;

    fn from_str(s: &str) -> Result<Self> {
        Document::parse(s, "<string>")
    }
}

/// Walks a JSON text and fails on the first object that repeats a key.
struct UniqueKeys;

impl<'de> Deserialize<'de> for UniqueKeys {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(UniqueKeysVisitor)
    }
}

struct UniqueKeysVisitor;

impl<'de> Visitor<'de> for UniqueKeysVisitor {
    type Value = UniqueKeys;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a JSON value")
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> Result<UniqueKeys, E> {
        Ok(UniqueKeys)
    }

    fn visit_i64<E: de::Error>(self, _: i64) -> Result<UniqueKeys, E> {
        Ok(UniqueKeys)
    }

    fn visit_u64<E: de::Error>(self, _: u64) -> Result<UniqueKeys, E> {
        Ok(UniqueKeys)
    }

    fn visit_f64<E: de::Error>(self, _: f64) -> Result<UniqueKeys, E> {
        Ok(UniqueKeys)
    }

    fn visit_str<E: de::Error>(self, _: &str) -> Result<UniqueKeys, E> {
        Ok(UniqueKeys)
    }

    fn visit_unit<E: de::Error>(self) -> Result<UniqueKeys, E> {
        Ok(UniqueKeys)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<UniqueKeys, A::Error> {
        while seq.next_element::<UniqueKeys>()?.is_some() {}
        Ok(UniqueKeys)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<UniqueKeys, A::Error> {
        let mut seen = HashSet::new();
        while let Some(key) = map.next_key::<String>()? {
            if seen.contains(&key) {
                return Err(de::Error::custom(format_args!("duplicate key `{}`", key)));
            }
            seen.insert(key);
            map.next_value::<UniqueKeys>()?;
        }
        Ok(UniqueKeys)
    }
}

pub(crate) fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}
