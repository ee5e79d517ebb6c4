use std::{fmt, str::FromStr};

use json_patch::{AddOperation, Patch, PatchOperation, ReplaceOperation};
use serde_json::Value;

use crate::{
    document::{type_name, DEFAULT_NODES_KEY},
    sanitize, Document, PatchError, Result, SanitizePolicy,
};

/// The mapping inside a node that patched fields live in.
pub const PARAMETERS_KEY: &str = "parameters";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchPolicy {
    /// Patch only the first node with a matching name.
    #[default]
    First,
    /// Patch every node with a matching name.
    All,
}

/// Which node(s) to patch, by `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSelector {
    pub name: String,
    pub policy: MatchPolicy,
}

impl NodeSelector {
    pub fn first(name: impl Into<String>) -> Self {
        NodeSelector {
            name: name.into(),
            policy: MatchPolicy::First,
        }
    }

    pub fn all(name: impl Into<String>) -> Self {
        NodeSelector {
            name: name.into(),
            policy: MatchPolicy::All,
        }
    }

    fn matches(&self, node: &Value) -> bool {
        node.get("name").and_then(Value::as_str) == Some(self.name.as_str())
    }
}

/// Dotted path to a field, relative to the node.
///
/// Always starts with `parameters`; `jsonBody` and `parameters.jsonBody` are
/// the same path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl FromStr for FieldPath {
    type Err = PatchError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| PatchError::FieldPath {
            path: s.to_owned(),
            reason: reason.to_owned(),
        };
        let mut segments: Vec<String> = s.split('.').map(str::to_owned).collect();
        if segments.iter().any(String::is_empty) {
            return Err(invalid("empty segment"));
        }
        if segments[0] != PARAMETERS_KEY {
            segments.insert(0, PARAMETERS_KEY.to_owned());
        }
        if segments.len() < 2 {
            return Err(invalid("must name a field inside `parameters`"));
        }
        Ok(FieldPath { segments })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOptions {
    /// Top-level key holding the node sequence.
    pub nodes_key: String,
    pub sanitize: SanitizePolicy,
}

impl Default for PatchOptions {
    fn default() -> Self {
        PatchOptions {
            nodes_key: DEFAULT_NODES_KEY.to_owned(),
            sanitize: SanitizePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatchResult {
    pub matched: bool,
    /// Number of nodes written.
    pub patched: usize,
    /// Positions of the patched nodes in the node sequence.
    pub node_indices: Vec<usize>,
    /// The value that was written.
    pub value: String,
    /// Length of `value` in bytes.
    pub sanitized_len: usize,
    pub line_breaks_removed: usize,
    /// Prior value of the field in each patched node, `None` if it was absent.
    pub previous: Vec<Option<Value>>,
    /// The edit as an RFC 6902 patch against the document root.
    pub operations: Patch,
}

impl PatchResult {
    /// Whether any patched node ended up with a different value.
    pub fn changed(&self) -> bool {
        self.previous
            .iter()
            .any(|p| p.as_ref().and_then(Value::as_str) != Some(self.value.as_str()))
    }
}

fn pointer_token(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}

/// Build the operations that set `field` in the node at `index`, creating
/// missing intermediate mappings. Returns the prior value as well.
fn field_operations(
    node: &Value,
    index: usize,
    nodes_key: &str,
    field: &FieldPath,
    value: &str,
) -> Result<(Vec<PatchOperation>, Option<Value>)> {
    let mut pointer = format!("/{}/{}", pointer_token(nodes_key), index);
    let mut ops = Vec::new();
    // `None` once we have stepped past the existing tree.
    let mut current = Some(node);
    let (last, parents) = field
        .segments()
        .split_last()
        .expect("FieldPath has at least two segments");

    for (depth, segment) in parents.iter().enumerate() {
        pointer.push('/');
        pointer.push_str(&pointer_token(segment));
        current = match current.and_then(|c| c.get(segment)) {
            Some(v @ Value::Object(_)) => Some(v),
            Some(other) => {
                return Err(PatchError::FieldPath {
                    path: field.to_string(),
                    reason: format!(
                        "`{}` is {}, not a mapping",
                        field.segments()[..=depth].join("."),
                        type_name(other)
                    ),
                })
            }
            None => {
                ops.push(PatchOperation::Add(AddOperation {
                    path: parse_pointer(&pointer, field)?,
                    value: Value::Object(Default::default()),
                }));
                None
            }
        };
    }

    pointer.push('/');
    pointer.push_str(&pointer_token(last));
    let path = parse_pointer(&pointer, field)?;
    let value = Value::String(value.to_owned());
    let previous = current.and_then(|c| c.get(last)).cloned();
    ops.push(match previous {
        Some(_) => PatchOperation::Replace(ReplaceOperation { path, value }),
        None => PatchOperation::Add(AddOperation { path, value }),
    });
    Ok((ops, previous))
}

fn parse_pointer<T: FromStr>(pointer: &str, field: &FieldPath) -> Result<T>
where
    T::Err: fmt::Display,
{
    pointer.parse().map_err(|e: T::Err| PatchError::FieldPath {
        path: field.to_string(),
        reason: e.to_string(),
    })
}

/// Write the sanitized `template` into `field` of the node(s) chosen by
/// `selector`.
///
/// The value replaces whatever was there before; it is not merged. On error
/// `doc` is left untouched.
#[tracing::instrument(skip_all, fields(node = %selector.name, field = %field))]
pub fn patch(
    doc: &mut Document,
    selector: &NodeSelector,
    field: &FieldPath,
    template: &str,
    options: &PatchOptions,
) -> Result<PatchResult> {
    let nodes = doc.nodes(&options.nodes_key)?;
    let mut node_indices: Vec<usize> = nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| selector.matches(n))
        .map(|(i, _)| i)
        .collect();
    if selector.policy == MatchPolicy::First {
        node_indices.truncate(1);
    }
    if node_indices.is_empty() {
        return Err(PatchError::NodeNotFound {
            name: selector.name.clone(),
            nodes_key: options.nodes_key.clone(),
            searched: nodes.len(),
        });
    }

    let sanitized = sanitize(template, options.sanitize)?;
    tracing::debug!(
        line_breaks = sanitized.line_breaks,
        len = sanitized.value.len(),
        "template sanitized"
    );

    let mut operations = Vec::new();
    let mut previous = Vec::with_capacity(node_indices.len());
    for &i in &node_indices {
        let (ops, prev) =
            field_operations(&nodes[i], i, &options.nodes_key, field, &sanitized.value)?;
        operations.extend(ops);
        previous.push(prev);
    }

    json_patch::patch(doc.root_mut(), &operations).map_err(|e| PatchError::Shape {
        reason: e.to_string(),
    })?;

    tracing::info!(patched = node_indices.len(), "field written");
    Ok(PatchResult {
        matched: true,
        patched: node_indices.len(),
        node_indices,
        sanitized_len: sanitized.value.len(),
        value: sanitized.value,
        line_breaks_removed: sanitized.line_breaks,
        previous,
        operations: Patch(operations),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{ErrorKind, SanitizeFault};

    fn writer_doc() -> Document {
        Document::new(json!({
            "name": "w4u",
            "nodes": [
                {"name": "Agent: Writer", "parameters": {"jsonBody": "old"}},
            ],
            "connections": {"Agent: Writer": {"main": []}},
        }))
    }

    fn field(s: &str) -> FieldPath {
        s.parse().unwrap()
    }

    fn run(doc: &mut Document, selector: NodeSelector, path: &str) -> Result<PatchResult> {
        patch(doc, &selector, &field(path), "v", &PatchOptions::default())
    }

    #[test]
    fn test_end_to_end_writer_example() {
        let mut doc = writer_doc();
        let r = patch(
            &mut doc,
            &NodeSelector::first("Agent: Writer"),
            &field("parameters.jsonBody"),
            "line1\nline2",
            &PatchOptions::default(),
        )
        .unwrap();
        assert!(r.matched);
        assert_eq!(r.patched, 1);
        assert_eq!(r.sanitized_len, "line1 line2".len());
        assert_eq!(r.previous, vec![Some(json!("old"))]);
        assert!(r.changed());
        assert_eq!(
            doc.root(),
            &json!({
                "name": "w4u",
                "nodes": [
                    {"name": "Agent: Writer", "parameters": {"jsonBody": "line1 line2"}},
                ],
                "connections": {"Agent: Writer": {"main": []}},
            })
        );
        let reparsed: Document = doc.to_string_pretty().unwrap().parse().unwrap();
        assert_eq!(reparsed, doc);
    }

    #[test]
    fn test_missing_node_leaves_document_unmodified() {
        let mut doc = writer_doc();
        let before = doc.clone();
        let err = patch(
            &mut doc,
            &NodeSelector::first("Agent: Reader"),
            &field("jsonBody"),
            "x",
            &PatchOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NodeNotFound);
        assert!(err.to_string().contains("Agent: Reader"));
        assert_eq!(doc, before);
    }

    #[test]
    fn test_sanitization_error_leaves_document_unmodified() {
        let mut doc = writer_doc();
        let before = doc.clone();
        let err = patch(
            &mut doc,
            &NodeSelector::first("Agent: Writer"),
            &field("jsonBody"),
            "={{ \"open\n }}",
            &PatchOptions::default(),
        )
        .unwrap_err();
        match err {
            PatchError::Sanitization { fault, .. } => {
                assert_eq!(fault, SanitizeFault::UnterminatedLiteral { quote: '"' })
            }
            e => panic!("unexpected error: {e}"),
        }
        assert_eq!(doc, before);
    }

    #[test]
    fn test_first_and_all() {
        let base = Document::new(json!({
            "nodes": [
                {"name": "A", "parameters": {}},
                {"name": "B", "parameters": {}},
                {"name": "A", "parameters": {"body": "keep?"}},
            ]
        }));

        let mut doc = base.clone();
        let r = run(&mut doc, NodeSelector::first("A"), "body").unwrap();
        assert_eq!(r.node_indices, vec![0]);
        assert_eq!(doc.root()["nodes"][0]["parameters"]["body"], "v");
        assert_eq!(doc.root()["nodes"][2]["parameters"]["body"], "keep?");

        let mut doc = base.clone();
        let r = run(&mut doc, NodeSelector::all("A"), "body").unwrap();
        assert_eq!(r.patched, 2);
        assert_eq!(r.node_indices, vec![0, 2]);
        assert_eq!(r.previous, vec![None, Some(json!("keep?"))]);
        assert_eq!(doc.root()["nodes"][0]["parameters"]["body"], "v");
        assert_eq!(doc.root()["nodes"][2]["parameters"]["body"], "v");
        assert_eq!(doc.root()["nodes"][1], base.root()["nodes"][1]);
    }

    #[test]
    fn test_overwrite_not_merge() {
        let mut doc = Document::new(json!({
            "nodes": [{"name": "A", "parameters": {"body": {"nested": true}}}]
        }));
        patch(
            &mut doc,
            &NodeSelector::first("A"),
            &field("body"),
            "flat",
            &PatchOptions::default(),
        )
        .unwrap();
        assert_eq!(doc.root()["nodes"][0]["parameters"]["body"], "flat");
    }

    #[test]
    fn test_creates_missing_parameters() {
        let mut doc = Document::new(json!({"nodes": [{"name": "A"}]}));
        let r = patch(
            &mut doc,
            &NodeSelector::first("A"),
            &field("options.body"),
            "v",
            &PatchOptions::default(),
        )
        .unwrap();
        assert_eq!(r.operations.0.len(), 3);
        assert_eq!(
            doc.root()["nodes"][0],
            json!({"name": "A", "parameters": {"options": {"body": "v"}}})
        );
    }

    #[test]
    fn test_intermediate_not_a_mapping() {
        let mut doc = Document::new(json!({
            "nodes": [{"name": "A", "parameters": {"options": "text"}}]
        }));
        let before = doc.clone();
        let err = patch(
            &mut doc,
            &NodeSelector::first("A"),
            &field("parameters.options.body"),
            "v",
            &PatchOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FieldPath);
        assert_eq!(
            err.to_string(),
            "invalid field path \"parameters.options.body\": `parameters.options` is a string, not a mapping"
        );
        assert_eq!(doc, before);
    }

    #[test]
    fn test_operations_are_json_patch() {
        let mut doc = writer_doc();
        let r = patch(
            &mut doc,
            &NodeSelector::first("Agent: Writer"),
            &field("jsonBody"),
            "new",
            &PatchOptions::default(),
        )
        .unwrap();
        assert_eq!(
            serde_json::to_value(&r.operations).unwrap(),
            json!([{"op": "replace", "path": "/nodes/0/parameters/jsonBody", "value": "new"}])
        );
        // replaying the patch on the original gives the same document
        let mut replay = writer_doc().into_value();
        json_patch::patch(&mut replay, &r.operations.0).unwrap();
        assert_eq!(&replay, doc.root());
    }

    #[test]
    fn test_pointer_escaping() {
        let mut doc = Document::new(json!({
            "nodes": [{"name": "A", "parameters": {}}]
        }));
        let r = run(&mut doc, NodeSelector::first("A"), "a/b~c").unwrap();
        assert_eq!(
            serde_json::to_value(&r.operations).unwrap()[0]["path"],
            "/nodes/0/parameters/a~1b~0c"
        );
        assert_eq!(doc.root()["nodes"][0]["parameters"]["a/b~c"], "v");
    }

    #[test]
    fn test_unchanged_value() {
        let mut doc = writer_doc();
        let r = patch(
            &mut doc,
            &NodeSelector::first("Agent: Writer"),
            &field("jsonBody"),
            "old",
            &PatchOptions::default(),
        )
        .unwrap();
        assert!(!r.changed());
    }

    #[test]
    fn test_custom_nodes_key() {
        let mut doc = Document::new(json!({"steps": [{"name": "A", "parameters": {}}]}));
        let options = PatchOptions {
            nodes_key: "steps".to_owned(),
            ..Default::default()
        };
        patch(&mut doc, &NodeSelector::first("A"), &field("x"), "v", &options).unwrap();
        assert_eq!(doc.root()["steps"][0]["parameters"]["x"], "v");

        let err = patch(
            &mut doc,
            &NodeSelector::first("A"),
            &field("x"),
            "v",
            &PatchOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Shape);
    }

    #[test]
    fn test_node_not_a_mapping() {
        let mut doc = Document::new(json!({"nodes": [["name", "A"]]}));
        // never matches, since it has no `name` key
        let err = run(&mut doc, NodeSelector::first("A"), "x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NodeNotFound);
    }

    #[test]
    fn test_outer_format_escaping() {
        let mut doc = writer_doc();
        let template = "={{ \"say \\\"hi\\\"\" + 'C:\\\\dir' }}\n";
        let r = patch(
            &mut doc,
            &NodeSelector::first("Agent: Writer"),
            &field("jsonBody"),
            template,
            &PatchOptions::default(),
        )
        .unwrap();
        let saved = doc.to_string_pretty().unwrap();
        assert!(saved.contains(r#""jsonBody": "={{ \"say \\\"hi\\\"\" + 'C:\\\\dir' }} ""#));
        let reparsed: Document = saved.parse().unwrap();
        assert_eq!(reparsed.root()["nodes"][0]["parameters"]["jsonBody"], r.value.as_str());
        assert_eq!(r.value, "={{ \"say \\\"hi\\\"\" + 'C:\\\\dir' }} ");
    }

    #[test]
    fn test_field_path_parse() {
        assert_eq!(field("jsonBody").to_string(), "parameters.jsonBody");
        assert_eq!(field("parameters.jsonBody").to_string(), "parameters.jsonBody");
        assert_eq!(field("options.body").segments(), ["parameters", "options", "body"]);
        assert_eq!(
            "parameters".parse::<FieldPath>().unwrap_err().kind(),
            ErrorKind::FieldPath
        );
        assert!("".parse::<FieldPath>().is_err());
        assert!("a..b".parse::<FieldPath>().is_err());
        assert!("parameters.".parse::<FieldPath>().is_err());
    }
}
