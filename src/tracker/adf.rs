//! Minimal Atlassian Document Format (ADF) model.
//!
//! Only what comment bodies need: a `doc` holding block nodes that hold
//! inline `text` nodes. Issue descriptions are never parsed into this type.

use serde::{Deserialize, Serialize};

pub const ADF_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub version: u32,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<Node>,
}

impl Node {
    pub fn text(text: &str) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.to_string()),
            content: Vec::new(),
        }
    }

    pub fn paragraph(children: Vec<Node>) -> Self {
        Self {
            kind: "paragraph".to_string(),
            text: None,
            content: children,
        }
    }

    fn collect_text(&self, out: &mut String) {
        if let Some(text) = &self.text {
            out.push_str(text);
        }
        for child in &self.content {
            child.collect_text(out);
        }
    }
}

impl Document {
    /// A document with a single paragraph holding `text` verbatim.
    pub fn paragraph(text: &str) -> Self {
        Self {
            version: ADF_VERSION,
            kind: "doc".to_string(),
            content: vec![Node::paragraph(vec![Node::text(text)])],
        }
    }

    /// Flatten the document to plain text, one line per top-level block.
    pub fn plain_text(&self) -> String {
        self.content
            .iter()
            .map(|block| {
                let mut line = String::new();
                block.collect_text(&mut line);
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
