//! Parsed HTML documents.
//!
//! `scraper` parses into a tree that can't cross threads, so the parse is
//! copied into an owned arena that can be shared by every waiter of the
//! markup view.

use crate::error::{RequestError, Result};
use scraper::{Html, Selector};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Doctype(String),
    Comment(String),
    Text(String),
    Element { name: String, attrs: Vec<(String, String)> },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    children: Vec<NodeId>,
}

impl Node {
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn tag_name(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Element { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        match &self.kind {
            NodeKind::Element { attrs, .. } => attrs.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str()),
            _ => None,
        }
    }
}

/// An element matched by [`Document::select`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selected {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub text: String,
    pub html: String,
}

pub struct Document {
    source: String,
    nodes: Vec<Node>,
}

impl Document {
    /// Parses `source` the way a browser would; malformed markup is repaired,
    /// never rejected.
    pub fn parse(source: &str) -> Self {
        let html = Html::parse_document(source);

        let mut nodes = vec![Node { kind: NodeKind::Root, children: Vec::new() }];
        let mut pending = vec![(html.tree.root(), 0)];
        while let Some((parent_ref, parent)) = pending.pop() {
            for child in parent_ref.children() {
                let kind = match child.value() {
                    scraper::Node::Doctype(doctype) => NodeKind::Doctype(doctype.name().to_owned()),
                    scraper::Node::Comment(comment) => NodeKind::Comment((**comment).to_owned()),
                    scraper::Node::Text(text) => NodeKind::Text((**text).to_owned()),
                    scraper::Node::Element(element) => NodeKind::Element {
                        name: element.name().to_owned(),
                        attrs: element.attrs().map(|(n, v)| (n.to_owned(), v.to_owned())).collect(),
                    },
                    _ => continue,
                };
                let id = nodes.len();
                nodes.push(Node { kind, children: Vec::new() });
                nodes[parent].children.push(NodeId(id));
                pending.push((child, id));
            }
        }

        Self { source: source.to_owned(), nodes }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Elements named `name`, in document order.
    pub fn elements_by_tag<'a>(&'a self, name: &'a str) -> impl Iterator<Item = NodeId> + 'a {
        self.descendants(self.root()).filter(move |id| self.node(*id).tag_name().is_some_and(|tag| tag.eq_ignore_ascii_case(name)))
    }

    /// `id` and everything below it, in document order.
    pub fn descendants(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut stack = vec![id];
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(self.node(next).children.iter().rev().copied());
            Some(next)
        })
    }

    /// Concatenated text below `id`.
    pub fn text_of(&self, id: NodeId) -> String {
        self.descendants(id)
            .filter_map(|id| match &self.node(id).kind {
                NodeKind::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn text(&self) -> String {
        self.text_of(self.root())
    }

    pub fn title(&self) -> Option<String> {
        self.elements_by_tag("title").next().map(|id| self.text_of(id).trim().to_owned())
    }

    /// Elements matching the CSS selector `css`.
    pub fn select(&self, css: &str) -> Result<Vec<Selected>> {
        let selector = Selector::parse(css).map_err(|e| RequestError::markup(format!("bad selector {css:?}: {e}")))?;
        let html = Html::parse_document(&self.source);
        Ok(html
            .select(&selector)
            .map(|element| Selected {
                name: element.value().name().to_owned(),
                attrs: element.value().attrs().map(|(n, v)| (n.to_owned(), v.to_owned())).collect(),
                text: element.text().collect(),
                html: element.html(),
            })
            .collect())
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document").field("nodes", &self.nodes.len()).field("title", &self.title()).finish()
    }
}
