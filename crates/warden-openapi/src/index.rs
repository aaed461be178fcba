//! The permission index: a segment trie over path templates.
//!
//! Match priority: exact path + exact method, then exact path + ALL verb,
//! then the deepest prefix template (trailing `*` or trailing slash) with an
//! exact method, then that prefix's ALL verb. Literal segments win over
//! parameter segments, with backtracking.
//!
//! Raw paths are split on `/` before percent-decoding, and each segment is
//! decoded exactly once: `a%2Fb` and `a%252Fb` both stay single segments
//! (double encoding is preserved, not folded).

use std::collections::HashMap;

use percent_encoding::percent_decode_str;

use crate::error::SpecError;
use crate::spec::{PermissionSpec, PolicyConfig};

/// The sentinel verb matching any method without a more specific entry.
pub const ALL_HTTP_METHOD: &str = "all";

/// A successful lookup: the descriptor plus captured path parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteMatch {
    pub config: PolicyConfig,
    pub path_params: HashMap<String, String>,
}

/// Immutable `(method, path)` → [`PolicyConfig`] index.
#[derive(Debug, Default)]
pub struct PermissionIndex {
    root: Node,
}

#[derive(Debug, Default)]
struct Node {
    children: HashMap<String, Node>,
    param: Option<Box<ParamChild>>,
    verbs: HashMap<String, PolicyConfig>,
    all: Option<PolicyConfig>,
    /// Entry matching strictly deeper paths (trailing `*` or trailing `/`).
    prefix: Option<Box<PrefixEntry>>,
}

#[derive(Debug)]
struct ParamChild {
    name: String,
    node: Node,
}

#[derive(Debug, Default)]
struct PrefixEntry {
    verbs: HashMap<String, PolicyConfig>,
    all: Option<PolicyConfig>,
}

/// One template segment after normalization.
#[derive(Debug, PartialEq)]
enum Segment {
    Literal(String),
    Param(String),
}

impl PermissionIndex {
    /// Build the index from a loaded spec.
    pub fn build(spec: &PermissionSpec) -> Result<Self, SpecError> {
        let mut index = Self::default();
        for (template, verbs) in &spec.paths {
            for (method, config) in verbs {
                index.register(template, method, config.clone())?;
            }
        }
        Ok(index)
    }

    fn register(
        &mut self,
        template: &str,
        method: &str,
        config: PolicyConfig,
    ) -> Result<(), SpecError> {
        let (segments, kind) = parse_template(template)?;

        let mut node = &mut self.root;
        for segment in segments {
            node = match segment {
                Segment::Literal(text) => node.children.entry(text).or_default(),
                Segment::Param(name) => {
                    let param = node.param.get_or_insert_with(|| {
                        Box::new(ParamChild {
                            name: name.clone(),
                            node: Node::default(),
                        })
                    });
                    if param.name != name {
                        return Err(SpecError::Invalid(format!(
                            "conflicting parameter names at {template}: {{{}}} vs {{{name}}}",
                            param.name
                        )));
                    }
                    &mut param.node
                }
            };
        }

        let method = method.to_lowercase();
        match kind {
            TemplateKind::Exact => set_entry(node, &method, config),
            TemplateKind::Wildcard => {
                let prefix = node.prefix.get_or_insert_with(Box::default);
                if method == ALL_HTTP_METHOD {
                    prefix.all = Some(config);
                } else {
                    prefix.verbs.insert(method, config);
                }
            }
            TemplateKind::TrailingSlash => {
                // the literal path-with-slash matches exactly, and the
                // template also claims everything nested beneath it
                let leaf = node.children.entry(String::new()).or_default();
                set_entry(leaf, &method, config.clone());
                let prefix = node.prefix.get_or_insert_with(Box::default);
                if method == ALL_HTTP_METHOD {
                    prefix.all = Some(config);
                } else {
                    prefix.verbs.insert(method, config);
                }
            }
        }
        Ok(())
    }

    /// Resolve the most specific descriptor for a request.
    pub fn find(&self, method: &str, path: &str) -> Result<RouteMatch, SpecError> {
        let method = method.to_lowercase();
        let segments = split_request_path(path);

        let mut prefixes: Vec<PrefixCandidate<'_>> = Vec::new();
        let mut params = HashMap::new();
        let terminal = walk(&self.root, &segments, &mut params, &mut prefixes, 0);

        if let Some((node, params)) = terminal {
            if let Some(config) = node.verbs.get(&method) {
                return Ok(RouteMatch {
                    config: config.clone(),
                    path_params: params,
                });
            }
            if let Some(config) = &node.all {
                return Ok(RouteMatch {
                    config: config.clone(),
                    path_params: params,
                });
            }
        }

        // deepest prefix template wins; method beats ALL at each depth
        prefixes.sort_by(|a, b| b.depth.cmp(&a.depth));
        for candidate in &prefixes {
            let config = candidate
                .entry
                .verbs
                .get(&method)
                .or(candidate.entry.all.as_ref());
            if let Some(config) = config {
                return Ok(RouteMatch {
                    config: config.clone(),
                    path_params: candidate.params.clone(),
                });
            }
        }

        Err(SpecError::NotFoundOasDefinition {
            method: method.to_uppercase(),
            path: path.to_string(),
        })
    }
}

fn set_entry(node: &mut Node, method: &str, config: PolicyConfig) {
    if method == ALL_HTTP_METHOD {
        node.all = Some(config);
    } else {
        node.verbs.insert(method.to_string(), config);
    }
}

struct PrefixCandidate<'a> {
    entry: &'a PrefixEntry,
    params: HashMap<String, String>,
    depth: usize,
}

fn walk<'a>(
    node: &'a Node,
    segments: &[String],
    params: &mut HashMap<String, String>,
    prefixes: &mut Vec<PrefixCandidate<'a>>,
    depth: usize,
) -> Option<(&'a Node, HashMap<String, String>)> {
    if let Some(prefix) = &node.prefix {
        if !segments.is_empty() {
            prefixes.push(PrefixCandidate {
                entry: prefix,
                params: params.clone(),
                depth,
            });
        }
    }

    let Some((segment, rest)) = segments.split_first() else {
        return Some((node, params.clone()));
    };

    if let Some(child) = node.children.get(segment) {
        if let Some(found) = walk(child, rest, params, prefixes, depth + 1) {
            return Some(found);
        }
    }

    if let Some(param) = &node.param {
        params.insert(param.name.clone(), segment.clone());
        if let Some(found) = walk(&param.node, rest, params, prefixes, depth + 1) {
            return Some(found);
        }
        params.remove(&param.name);
    }

    None
}

#[derive(Debug, PartialEq)]
enum TemplateKind {
    Exact,
    Wildcard,
    TrailingSlash,
}

/// Normalize and split a path template.
///
/// Colon parameters become brace parameters; `*` is only accepted as the
/// final, standalone segment.
fn parse_template(template: &str) -> Result<(Vec<Segment>, TemplateKind), SpecError> {
    if !template.starts_with('/') {
        return Err(SpecError::Invalid(format!(
            "path template must start with /: {template}"
        )));
    }

    let raw: Vec<&str> = template[1..].split('/').collect();
    let mut segments = Vec::with_capacity(raw.len());
    let mut kind = TemplateKind::Exact;

    for (position, segment) in raw.iter().enumerate() {
        let last = position == raw.len() - 1;
        if segment.contains('*') {
            if !last || *segment != "*" {
                return Err(SpecError::Invalid(format!(
                    "wildcard must be the last path segment: {template}"
                )));
            }
            kind = TemplateKind::Wildcard;
            continue;
        }
        if last && segment.is_empty() && raw.len() > 1 {
            kind = TemplateKind::TrailingSlash;
            continue;
        }
        if let Some(name) = segment.strip_prefix(':') {
            segments.push(Segment::Param(name.to_string()));
        } else if segment.starts_with('{') && segment.ends_with('}') {
            segments.push(Segment::Param(segment[1..segment.len() - 1].to_string()));
        } else {
            segments.push(Segment::Literal(segment.to_string()));
        }
    }

    Ok((segments, kind))
}

/// Split a raw request path into percent-decoded segments.
///
/// Decoding happens after the split and exactly once per segment, so an
/// encoded slash never introduces a segment boundary and a double-encoded
/// one stays encoded.
fn split_request_path(path: &str) -> Vec<String> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    trimmed
        .split('/')
        .map(|segment| percent_decode_str(segment).decode_utf8_lossy().into_owned())
        .collect()
}
