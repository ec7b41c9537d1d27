use crate::error::{Result, UngradedError};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// One block of the course tree.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentNode {
    pub category: String,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ContentNode {
    /// The name exactly as authored. Blank names count as missing.
    pub fn display_name(&self) -> Option<&str> {
        self.metadata
            .get("display_name")
            .and_then(Value::as_str)
            .filter(|name| !name.trim().is_empty())
    }

    /// Presence test only: `"graded": false` still counts as carrying the marker.
    pub fn has_metadata_key(&self, key: &str) -> bool {
        self.metadata.contains_key(key)
    }

    pub fn is_category(&self, category: &str) -> bool {
        self.category == category
    }
}

/// The course-structure document: block id to node, in document order.
#[derive(Debug, Clone, Default)]
pub struct CourseStructure {
    blocks: Vec<(String, ContentNode)>,
    index: HashMap<String, usize>,
}

impl CourseStructure {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let raw: Map<String, Value> = serde_json::from_slice(bytes)?;
        Self::from_map(raw)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Self::from_slice(content.as_bytes())
    }

    fn from_map(raw: Map<String, Value>) -> Result<Self> {
        let mut structure = Self {
            blocks: Vec::with_capacity(raw.len()),
            index: HashMap::with_capacity(raw.len()),
        };

        for (id, value) in raw {
            let node: ContentNode =
                serde_json::from_value(value).map_err(|e| UngradedError::StructureParse {
                    message: format!("block {}: {}", id, e),
                })?;
            structure.index.insert(id.clone(), structure.blocks.len());
            structure.blocks.push((id, node));
        }

        Ok(structure)
    }

    pub fn get(&self, id: &str) -> Option<&ContentNode> {
        self.index.get(id).map(|&i| &self.blocks[i].1)
    }

    /// Resolve a child reference, failing when the tree points at a block
    /// that is not in the document.
    pub fn child(&self, parent: &str, id: &str) -> Result<&ContentNode> {
        self.get(id).ok_or_else(|| UngradedError::DanglingReference {
            id: id.to_string(),
            parent: parent.to_string(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ContentNode)> {
        self.blocks.iter().map(|(id, node)| (id.as_str(), node))
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn count_category(&self, category: &str) -> usize {
        self.blocks
            .iter()
            .filter(|(_, node)| node.is_category(category))
            .count()
    }
}

/// Final segment of a block id, e.g. the hash in
/// `i4x://BerkeleyX/GG101x/problem/db71da27320a44bdb45df31d0d801e20` or in
/// `block-v1:Org+Course+Run+type@problem+block@db71...`.
pub fn short_block_id(id: &str) -> &str {
    id.rsplit(['/', '@'])
        .find(|segment| !segment.is_empty())
        .unwrap_or(id)
}
