//! Remote node identifiers and selective-sync set kinds

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Opaque identifier of a remote file or folder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId(String);

impl NodeId {
    /// Create a new NodeId
    ///
    /// # Errors
    /// Returns `DomainError::InvalidNodeId` if the id is empty.
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.is_empty() {
            return Err(DomainError::InvalidNodeId(
                "node id cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for NodeId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

/// The three per-sync node sets driving selective sync.
///
/// A decided node id appears in at most one of BlackList/WhiteList; a node
/// in UndecidedList is absent from the other two until resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeSetKind {
    BlackList,
    WhiteList,
    UndecidedList,
}

impl NodeSetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeSetKind::BlackList => "black_list",
            NodeSetKind::WhiteList => "white_list",
            NodeSetKind::UndecidedList => "undecided_list",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "black_list" => Some(NodeSetKind::BlackList),
            "white_list" => Some(NodeSetKind::WhiteList),
            "undecided_list" => Some(NodeSetKind::UndecidedList),
            _ => None,
        }
    }
}

impl Display for NodeSetKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_rejects_empty() {
        assert!(NodeId::new("").is_err());
        assert!(NodeId::new("n1").is_ok());
    }

    #[test]
    fn test_node_id_serde_roundtrip() {
        let id = NodeId::new("01ABCDEF").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_kind_parse_roundtrip() {
        for kind in [
            NodeSetKind::BlackList,
            NodeSetKind::WhiteList,
            NodeSetKind::UndecidedList,
        ] {
            assert_eq!(NodeSetKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(NodeSetKind::parse("grey_list"), None);
    }
}
