use std::collections::HashMap;
use std::sync::Arc;

use polars::prelude::*;

use crate::error::Error;

/// Free-form attributes forwarded from the caller of a research request
/// down to handlers and listeners.
pub type Attrs = HashMap<String, serde_json::Value>;

/// Derives the handler method name for a research name: lower-cased, with
/// spaces, dots and dashes replaced by underscores, behind a fixed prefix.
/// The research "Research.Test 1" resolves to "research_research_test_1".
pub fn research_method_name(research_name: &str) -> String {
    let mut result = String::with_capacity(research_name.len() + 9);
    result.push_str("research_");
    for c in research_name.to_lowercase().chars() {
        match c {
            ' ' | '.' | '-' => result.push('_'),
            other => result.push(other),
        }
    }
    result
}

/// A research result: a single frame or a group of named child nodes with
/// frames on the leaves, at arbitrary depth. Group entries preserve
/// insertion order.
#[derive(Debug, Clone)]
pub enum ResearchNode {
    Frame(Arc<DataFrame>),
    Group(Vec<(String, ResearchNode)>),
}

impl ResearchNode {
    pub fn frame(frame: DataFrame) -> Self {
        ResearchNode::Frame(Arc::new(frame))
    }

    pub fn group(entries: Vec<(String, ResearchNode)>) -> Self {
        ResearchNode::Group(entries)
    }

    /// A group with a single entry.
    pub fn singleton(name: impl Into<String>, node: ResearchNode) -> Self {
        ResearchNode::Group(vec![(name.into(), node)])
    }

    /// The `{name: frame}` shape a research handler returns.
    pub fn named_frame(name: impl Into<String>, frame: DataFrame) -> Self {
        ResearchNode::singleton(name, ResearchNode::frame(frame))
    }

    pub fn is_frame(&self) -> bool {
        matches!(self, ResearchNode::Frame(_))
    }

    pub fn is_group(&self) -> bool {
        matches!(self, ResearchNode::Group(_))
    }

    pub fn as_frame(&self) -> Option<&Arc<DataFrame>> {
        match self {
            ResearchNode::Frame(frame) => Some(frame),
            ResearchNode::Group(_) => None,
        }
    }

    pub fn expect_frame(&self) -> Result<&DataFrame, Error> {
        self.as_frame().map(|frame| frame.as_ref()).ok_or_else(|| {
            Error::general_error("Expected a frame, found a research group".to_string())
        })
    }

    /// Group entries; empty for a frame.
    pub fn entries(&self) -> &[(String, ResearchNode)] {
        match self {
            ResearchNode::Frame(_) => &[],
            ResearchNode::Group(entries) => entries,
        }
    }

    pub fn get(&self, key: &str) -> Option<&ResearchNode> {
        self.entries()
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, node)| node)
    }

    /// Inserts or replaces an entry in a group, keeping its position when
    /// the key already exists.
    pub fn insert(&mut self, key: impl Into<String>, node: ResearchNode) -> Result<(), Error> {
        let key = key.into();
        match self {
            ResearchNode::Frame(_) => Err(Error::general_error(format!(
                "Can't insert '{}' into a frame node",
                key
            ))),
            ResearchNode::Group(entries) => {
                if let Some(entry) = entries.iter_mut().find(|(name, _)| *name == key) {
                    entry.1 = node;
                } else {
                    entries.push((key, node));
                }
                Ok(())
            }
        }
    }

    /// Nesting depth of the node: 0 for a frame or an empty group, else one
    /// more than the deepest child.
    pub fn level(&self) -> usize {
        match self {
            ResearchNode::Frame(_) => 0,
            ResearchNode::Group(entries) => entries
                .iter()
                .map(|(_, node)| 1 + node.level())
                .max()
                .unwrap_or(0),
        }
    }

    /// Summarizes a nested research into row counts.
    ///
    /// A level-1 group becomes a frame with `subgoal` and `value` columns,
    /// a level-2 group a frame with `goal`, `subgoal` and `value` columns,
    /// and deeper groups recurse per key. A bare frame is an error.
    pub fn summary(&self) -> Result<ResearchNode, Error> {
        let entries = match self {
            ResearchNode::Group(entries) if !entries.is_empty() => entries,
            _ => {
                return Err(Error::general_error(
                    "Research is not well defined - expected a group with frames on the leaves"
                        .to_string(),
                ))
            }
        };
        match self.level() {
            1 => {
                let mut subgoals = Vec::with_capacity(entries.len());
                let mut values = Vec::with_capacity(entries.len());
                for (subgoal, node) in entries {
                    subgoals.push(subgoal.clone());
                    values.push(node.expect_frame()?.height() as i64);
                }
                let frame = df!("subgoal" => subgoals, "value" => values)
                    .map_err(|e| Error::general_error(format!("Summary failed: {}", e)))?;
                Ok(ResearchNode::frame(frame))
            }
            2 => {
                let mut goals = Vec::new();
                let mut subgoals = Vec::new();
                let mut values = Vec::new();
                for (goal, node) in entries {
                    for (subgoal, leaf) in node.entries() {
                        goals.push(goal.clone());
                        subgoals.push(subgoal.clone());
                        values.push(leaf.expect_frame()?.height() as i64);
                    }
                }
                let frame = df!("goal" => goals, "subgoal" => subgoals, "value" => values)
                    .map_err(|e| Error::general_error(format!("Summary failed: {}", e)))?;
                Ok(ResearchNode::frame(frame))
            }
            _ => {
                let mut result = Vec::with_capacity(entries.len());
                for (key, node) in entries {
                    result.push((key.clone(), node.summary()?));
                }
                Ok(ResearchNode::Group(result))
            }
        }
    }
}
