//! Thin wrapper around the XPath engine.
//!
//! The parser only ever needs three shapes of answer from the book: a list
//! of nodes (chapter/section enumeration), a list of strings (urls,
//! checksums, build commands) and an optional first string (name, version).
//! Empty or missing expressions evaluate to the empty value.

use anyhow::Result;
use std::fs;
use std::path::Path;
use sxd_document::dom::Document;
use sxd_document::{parser as xml_parser, Package};
use sxd_xpath::nodeset::Node;
use sxd_xpath::{Context, Factory, Value};

use crate::error::SkwError;

/// A parsed book document.
#[derive(Debug)]
pub struct BookXml {
    package: Package,
}

impl BookXml {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(SkwError::XmlMissing(format!(
                "{} (run 'skw-build install-book' first)",
                path.display()
            ))
            .into());
        }
        let raw = fs::read_to_string(path)
            .map_err(|e| SkwError::XmlMissing(format!("{}: {}", path.display(), e)))?;
        let package = xml_parser::parse(&raw)
            .map_err(|e| SkwError::XmlMalformed(format!("{}: {:?}", path.display(), e)))?;
        Ok(Self { package })
    }

    pub fn from_str(raw: &str) -> Result<Self> {
        let package = xml_parser::parse(raw)
            .map_err(|e| SkwError::XmlMalformed(format!("{:?}", e)))?;
        Ok(Self { package })
    }

    pub fn document(&self) -> Document<'_> {
        self.package.as_document()
    }
}

/// Compiles and evaluates XPath expressions against book nodes.
pub struct XpathEngine {
    factory: Factory,
}

impl XpathEngine {
    pub fn new() -> Self {
        Self {
            factory: Factory::new(),
        }
    }

    fn compile(&self, expr: &str) -> Result<sxd_xpath::XPath> {
        self.factory
            .build(expr)
            .map_err(|e| SkwError::ConfigInvalid(format!("invalid XPath '{expr}': {:?}", e)))?
            .ok_or_else(|| {
                SkwError::ConfigInvalid(format!("invalid XPath '{expr}': empty expression")).into()
            })
    }

    fn evaluate<'d, N>(&self, node: N, expr: &str) -> Result<Value<'d>>
    where
        N: Into<Node<'d>>,
    {
        let xpath = self.compile(expr)?;
        let context = Context::new();
        xpath
            .evaluate(&context, node)
            .map_err(|e| SkwError::ConfigInvalid(format!("evaluating XPath '{expr}': {:?}", e)).into())
    }

    /// Matched nodes in document order; empty expression matches nothing.
    pub fn nodes<'d, N>(&self, node: N, expr: Option<&str>) -> Result<Vec<Node<'d>>>
    where
        N: Into<Node<'d>>,
    {
        let Some(expr) = non_blank(expr) else {
            return Ok(Vec::new());
        };
        match self.evaluate(node, expr)? {
            Value::Nodeset(set) => Ok(set.document_order()),
            _ => Ok(Vec::new()),
        }
    }

    /// Trimmed, non-empty string values of the match; one per matched node.
    pub fn strings<'d, N>(&self, node: N, expr: Option<&str>) -> Result<Vec<String>>
    where
        N: Into<Node<'d>>,
    {
        let Some(expr) = non_blank(expr) else {
            return Ok(Vec::new());
        };
        let strings = match self.evaluate(node, expr)? {
            Value::Nodeset(set) => set
                .document_order()
                .iter()
                .map(|n| n.string_value())
                .collect(),
            Value::String(s) => vec![s],
            Value::Number(n) => vec![n.to_string()],
            Value::Boolean(b) => vec![b.to_string()],
        };
        Ok(strings
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }

    /// First string value of the match, if any.
    pub fn first_string<'d, N>(&self, node: N, expr: Option<&str>) -> Result<Option<String>>
    where
        N: Into<Node<'d>>,
    {
        Ok(self.strings(node, expr)?.into_iter().next())
    }
}

impl Default for XpathEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// The `id` attribute of an element node.
pub fn node_id(node: &Node<'_>) -> Option<String> {
    match node {
        Node::Element(el) => el.attribute("id").map(|a| a.value().to_string()),
        _ => None,
    }
}

fn non_blank(expr: Option<&str>) -> Option<&str> {
    expr.map(str::trim).filter(|e| !e.is_empty())
}
