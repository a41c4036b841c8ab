//! Newick format parser and writer.
//!
//! Supports the standard Newick grammar:
//! ```text
//! tree     = subtree ';'
//! subtree  = '(' children ')' label | label
//! children = subtree (',' subtree)*
//! label    = name? (':' length)?
//! ```
//!
//! Cluster summaries are written with [`write_with_lengths`], which takes
//! branch lengths from an estimate vector instead of the tree's own nodes.

use crate::tree::{Node, NodeId, PhyloTree};
use bmclust_core::{BmclustError, Result};

/// Parse a Newick format string into a `PhyloTree`.
pub fn parse(input: &str) -> Result<PhyloTree> {
    let mut parser = Parser::new(input.as_bytes());
    let (nodes, root) = parser.parse_tree()?;
    PhyloTree::from_nodes(nodes, root)
}

/// Serialize a `PhyloTree` to a Newick format string.
pub fn write(tree: &PhyloTree) -> String {
    let mut buf = String::new();
    write_subtree(tree, tree.root(), &|id| tree.node(id).branch_length, &mut buf);
    buf.push(';');
    buf
}

/// Serialize `tree` using `lengths[id]` as the branch length of every
/// non-root node.
pub fn write_with_lengths(tree: &PhyloTree, lengths: &[f64]) -> Result<String> {
    if lengths.len() != tree.node_count() {
        return Err(BmclustError::InvalidInput(format!(
            "expected {} branch lengths, got {}",
            tree.node_count(),
            lengths.len()
        )));
    }
    let root = tree.root();
    let lookup = |id: NodeId| if id == root { None } else { Some(lengths[id]) };
    let mut buf = String::new();
    write_subtree(tree, root, &lookup, &mut buf);
    buf.push(';');
    Ok(buf)
}

fn write_subtree(
    tree: &PhyloTree,
    id: NodeId,
    length_of: &dyn Fn(NodeId) -> Option<f64>,
    buf: &mut String,
) {
    let node = tree.node(id);
    if !node.children.is_empty() {
        buf.push('(');
        for (i, &child) in node.children.iter().enumerate() {
            if i > 0 {
                buf.push(',');
            }
            write_subtree(tree, child, length_of, buf);
        }
        buf.push(')');
    }
    if let Some(ref name) = node.name {
        buf.push_str(name);
    }
    if let Some(len) = length_of(id) {
        buf.push(':');
        buf.push_str(&format_length(len));
    }
}

/// Ten decimal places with trailing zeros stripped.
fn format_length(len: f64) -> String {
    let s = format!("{:.10}", len);
    let s = s.trim_end_matches('0');
    s.trim_end_matches('.').to_string()
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    nodes: Vec<Node>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            nodes: Vec::new(),
        }
    }

    fn parse_tree(&mut self) -> Result<(Vec<Node>, NodeId)> {
        self.skip_whitespace();
        let root = self.parse_subtree(None)?;
        self.skip_whitespace();
        if self.peek() != Some(b';') {
            return Err(BmclustError::Parse(
                "expected ';' at end of Newick string".into(),
            ));
        }
        self.pos += 1;
        Ok((std::mem::take(&mut self.nodes), root))
    }

    fn parse_subtree(&mut self, parent: Option<NodeId>) -> Result<NodeId> {
        self.skip_whitespace();
        let id = self.alloc_node(parent);

        if self.peek() == Some(b'(') {
            self.pos += 1;
            loop {
                let child = self.parse_subtree(Some(id))?;
                self.nodes[id].children.push(child);
                self.skip_whitespace();
                if self.peek() == Some(b',') {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            if self.peek() != Some(b')') {
                return Err(BmclustError::Parse("expected ')' in Newick string".into()));
            }
            self.pos += 1;
        }

        self.parse_label(id)?;
        Ok(id)
    }

    fn parse_label(&mut self, id: NodeId) -> Result<()> {
        self.skip_whitespace();
        let name = self.take_while(|b| {
            !matches!(b, b':' | b',' | b')' | b'(' | b';' | b' ' | b'\t' | b'\n' | b'\r')
        });
        if !name.is_empty() {
            self.nodes[id].name = Some(name);
        }
        self.skip_whitespace();
        if self.peek() == Some(b':') {
            self.pos += 1;
            self.skip_whitespace();
            let len_str =
                self.take_while(|b| matches!(b, b'0'..=b'9' | b'.' | b'-' | b'+' | b'e' | b'E'));
            if len_str.is_empty() {
                return Err(BmclustError::Parse("expected number after ':'".into()));
            }
            let len: f64 = len_str.parse().map_err(|_| {
                BmclustError::Parse(format!("invalid branch length: '{}'", len_str))
            })?;
            self.nodes[id].branch_length = Some(len);
        }
        Ok(())
    }

    fn take_while(&mut self, accept: impl Fn(u8) -> bool) -> String {
        let start = self.pos;
        while self.peek().is_some_and(&accept) {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn alloc_node(&mut self, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            parent,
            children: Vec::new(),
            branch_length: None,
            name: None,
            is_ancestor: false,
        });
        id
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn leaf_name() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z0-9]{0,5}"
    }

    /// Caterpillar trees with 2-6 leaves and positive branch lengths.
    fn caterpillar() -> impl Strategy<Value = String> {
        proptest::collection::vec((leaf_name(), 0.001f64..5.0), 2..=6).prop_map(|leaves| {
            let mut s = format!(
                "({}:{},{}:{})",
                leaves[0].0, leaves[0].1, leaves[1].0, leaves[1].1
            );
            for (name, len) in &leaves[2..] {
                s = format!("({}:1,{}:{})", s, name, len);
            }
            s.push(';');
            s
        })
    }

    proptest! {
        #[test]
        fn roundtrip_preserves_shape(newick in caterpillar()) {
            let tree = parse(&newick).unwrap();
            let again = parse(&write(&tree)).unwrap();
            prop_assert_eq!(tree.node_count(), again.node_count());
            prop_assert_eq!(tree.leaf_names(), again.leaf_names());
        }

        #[test]
        fn parse_does_not_panic(s in "\\PC{0,100}") {
            let _ = parse(&s);
        }
    }
}
