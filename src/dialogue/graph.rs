use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use log::warn;
use serde::Deserialize;

use crate::dialogue::condition;
use crate::error::ConfigError;

pub const START_NODE: &str = "start";

// ---------------------------------------------------------------------------
// Node model
// ---------------------------------------------------------------------------

/// What a node does on entry, parsed from its `action` string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum Action {
    /// `"say:<text>"`
    Say(String),
    /// `"end"`
    End,
    /// Name of a registered zero-argument operation.
    Operation(String),
}

impl From<String> for Action {
    fn from(raw: String) -> Self {
        if let Some(text) = raw.strip_prefix("say:") {
            Action::Say(text.trim().to_string())
        } else if raw.trim() == "end" {
            Action::End
        } else {
            Action::Operation(raw.trim().to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenFor {
    #[default]
    Plate,
    Confirmation,
}

/// An inline `yes`/`no` object: optional counter, then one nested condition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InlineBranch {
    #[serde(default)]
    pub counter: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub yes: Option<String>,
    #[serde(default)]
    pub no: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Branch {
    Target(String),
    Inline(InlineBranch),
}

/// A single vertex of the decision graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub action: Option<Action>,
    #[serde(default)]
    pub listen: bool,
    #[serde(default)]
    pub listen_for: ListenFor,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default)]
    pub yes: Option<Branch>,
    #[serde(default)]
    pub no: Option<Branch>,
    #[serde(default)]
    pub next: Option<String>,
    /// Free text for graph authors; ignored by the engine.
    #[serde(default)]
    pub description: Option<String>,
}

impl Node {
    pub fn is_terminal(&self) -> bool {
        self.action == Some(Action::End)
    }

    /// Every node id this node can transition to.
    pub fn targets(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for branch in [&self.yes, &self.no].into_iter().flatten() {
            match branch {
                Branch::Target(id) => out.push(id.as_str()),
                Branch::Inline(inline) => {
                    out.extend(inline.yes.as_deref());
                    out.extend(inline.no.as_deref());
                }
            }
        }
        out.extend(self.next.as_deref());
        out
    }
}

// ---------------------------------------------------------------------------
// Decision graph
// ---------------------------------------------------------------------------

/// The full dialogue: a map of node-id -> Node, always containing `start`.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct DecisionGraph {
    nodes: HashMap<String, Node>,
}

impl DecisionGraph {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let graph: DecisionGraph = serde_json::from_str(raw)?;
        graph.validate()?;
        Ok(graph)
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Distinct operation names used as node actions, sorted.
    pub fn operations(&self) -> Vec<&str> {
        let mut ops: Vec<&str> = self
            .nodes
            .values()
            .filter_map(|node| match &node.action {
                Some(Action::Operation(name)) => Some(name.as_str()),
                _ => None,
            })
            .collect();
        ops.sort_unstable();
        ops.dedup();
        ops
    }

    /// Reject graphs the engine cannot walk. Dead ends only warn: reaching
    /// one at runtime is reported by the engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.nodes.contains_key(START_NODE) {
            return Err(ConfigError::MissingStart);
        }

        let mut ids: Vec<&String> = self.nodes.keys().collect();
        ids.sort();
        for id in ids {
            let node = &self.nodes[id];
            let malformed = |reason: &str| ConfigError::MalformedBranch {
                node: id.clone(),
                reason: reason.to_string(),
            };

            if node.condition.is_some() && (node.yes.is_none() || node.no.is_none()) {
                return Err(malformed("condition needs both 'yes' and 'no'"));
            }
            if node.condition.is_none() && (node.yes.is_some() || node.no.is_some()) {
                return Err(malformed("'yes'/'no' without a condition"));
            }
            for branch in [&node.yes, &node.no].into_iter().flatten() {
                if let Branch::Inline(inline) = branch {
                    if inline.condition.is_none() || inline.yes.is_none() || inline.no.is_none()
                    {
                        return Err(malformed(
                            "inline branch needs 'condition', 'yes' and 'no'",
                        ));
                    }
                }
            }

            for target in node.targets() {
                if !self.nodes.contains_key(target) {
                    return Err(ConfigError::DanglingReference {
                        node: id.clone(),
                        target: target.to_string(),
                    });
                }
            }

            if !node.is_terminal() && node.targets().is_empty() {
                warn!("Node '{id}' has no outgoing transition; reaching it is a dead end");
            }
            for expr in self.conditions_of(node) {
                if !expr.contains(char::is_whitespace) {
                    // Possibly a predicate name; checked against the registry at runtime.
                    continue;
                }
                if let Err(e) = condition::parse(expr) {
                    warn!("Node '{id}': {e}; it will evaluate to false");
                }
            }
        }
        Ok(())
    }

    fn conditions_of<'a>(&self, node: &'a Node) -> Vec<&'a str> {
        let mut out: Vec<&str> = node.condition.as_deref().into_iter().collect();
        for branch in [&node.yes, &node.no].into_iter().flatten() {
            if let Branch::Inline(inline) = branch {
                out.extend(inline.condition.as_deref());
            }
        }
        out
    }

    /// Node ids reachable from `start`.
    pub fn reachable(&self) -> HashSet<&str> {
        let mut seen = HashSet::new();
        let mut stack = vec![START_NODE];
        while let Some(id) = stack.pop() {
            let Some((key, node)) = self.nodes.get_key_value(id) else {
                continue;
            };
            if !seen.insert(key.as_str()) {
                continue;
            }
            stack.extend(node.targets());
        }
        seen
    }

    /// Number of non-terminal nodes on the longest acyclic path from `start`.
    pub fn longest_path(&self) -> usize {
        let mut on_path = HashSet::new();
        self.longest_from(START_NODE, &mut on_path)
    }

    fn longest_from<'a>(&'a self, node_id: &'a str, on_path: &mut HashSet<&'a str>) -> usize {
        let node = match self.nodes.get(node_id) {
            Some(n) => n,
            None => return 0,
        };
        if node.is_terminal() || !on_path.insert(node_id) {
            return 0;
        }
        let max_child = node
            .targets()
            .into_iter()
            .map(|id| self.longest_from(id, on_path))
            .max()
            .unwrap_or(0);
        on_path.remove(node_id);
        1 + max_child
    }
}
