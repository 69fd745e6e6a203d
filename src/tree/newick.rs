//! Newick reading and writing.
//!
//! Supports quoted and unquoted labels, branch lengths, internal node labels
//! and bracketed comments. Both directions use explicit stacks.

use super::{NodeId, PhyloNode, PhyloTree, TreeError};

const DELIMITERS: &[u8] = b"(),:;[";

struct Parser<'a> {
    text: &'a [u8],
    pos: usize,
    nodes: Vec<PhyloNode>,
}

impl<'a> Parser<'a> {
    fn error(&self, message: impl Into<String>) -> TreeError {
        TreeError::Newick {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn add_child(&mut self, parent: NodeId) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(PhyloNode {
            parent: Some(parent),
            ..PhyloNode::default()
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    fn quoted_label(&mut self) -> Result<String, TreeError> {
        let start = self.pos;
        self.pos += 1;
        let mut label = Vec::new();
        loop {
            match self.text.get(self.pos) {
                None => {
                    self.pos = start;
                    return Err(self.error("unterminated quoted label"));
                }
                Some(b'\'') if self.text.get(self.pos + 1) == Some(&b'\'') => {
                    label.push(b'\'');
                    self.pos += 2;
                }
                Some(b'\'') => {
                    self.pos += 1;
                    break;
                }
                Some(&b) => {
                    label.push(b);
                    self.pos += 1;
                }
            }
        }
        Ok(String::from_utf8_lossy(&label).into_owned())
    }

    fn bare_token(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(&b) = self.text.get(self.pos) {
            if DELIMITERS.contains(&b) || b.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
        }
        // Slicing at ASCII delimiters keeps UTF-8 boundaries intact.
        std::str::from_utf8(&self.text[start..self.pos]).unwrap_or_default()
    }

    fn skip_comment(&mut self) -> Result<(), TreeError> {
        match self.text[self.pos..].iter().position(|&b| b == b']') {
            Some(end) => {
                self.pos += end + 1;
                Ok(())
            }
            None => Err(self.error("unterminated comment")),
        }
    }

    fn run(mut self) -> Result<PhyloTree, TreeError> {
        let root = NodeId(0);
        self.nodes.push(PhyloNode::default());
        let mut current = root;
        let mut depth = 0usize;
        let mut finished = false;

        while let Some(&b) = self.text.get(self.pos) {
            if finished {
                if !b.is_ascii_whitespace() {
                    return Err(self.error("text after ';'"));
                }
                self.pos += 1;
                continue;
            }
            match b {
                b'(' => {
                    current = self.add_child(current);
                    depth += 1;
                    self.pos += 1;
                }
                b',' => {
                    let Some(parent) = self.nodes[current.0].parent else {
                        return Err(self.error("',' outside parentheses"));
                    };
                    current = self.add_child(parent);
                    self.pos += 1;
                }
                b')' => {
                    let Some(parent) = self.nodes[current.0].parent.filter(|_| depth > 0) else {
                        return Err(self.error("unbalanced ')'"));
                    };
                    current = parent;
                    depth -= 1;
                    self.pos += 1;
                }
                b':' => {
                    self.pos += 1;
                    let token = self.bare_token();
                    let length: f64 = token
                        .parse()
                        .map_err(|_| self.error(format!("bad branch length '{}'", token)))?;
                    self.nodes[current.0].branch_length = Some(length);
                }
                b';' => {
                    if depth != 0 {
                        return Err(self.error("missing ')' before ';'"));
                    }
                    finished = true;
                    self.pos += 1;
                }
                b'[' => self.skip_comment()?,
                b'\'' => {
                    let label = self.quoted_label()?;
                    self.nodes[current.0].name = Some(label);
                }
                b if b.is_ascii_whitespace() => self.pos += 1,
                _ => {
                    let label = self.bare_token().to_string();
                    if !label.is_empty() {
                        self.nodes[current.0].name = Some(label);
                    }
                }
            }
        }
        if depth != 0 {
            return Err(self.error("unbalanced '('"));
        }
        Ok(PhyloTree {
            nodes: self.nodes,
            root,
        })
    }
}

/// Parse Newick text into a fresh arena.
pub(super) fn parse(text: &str) -> Result<PhyloTree, TreeError> {
    let text = text.trim();
    if text.is_empty() || text == ";" {
        return Err(TreeError::Newick {
            offset: 0,
            message: "empty tree".into(),
        });
    }
    Parser {
        text: text.as_bytes(),
        pos: 0,
        nodes: Vec::new(),
    }
    .run()
}

fn needs_quotes(label: &str) -> bool {
    label
        .bytes()
        .any(|b| DELIMITERS.contains(&b) || b == b']' || b == b'\'' || b.is_ascii_whitespace())
}

fn push_label(out: &mut String, label: &str) {
    if needs_quotes(label) {
        out.push('\'');
        out.push_str(&label.replace('\'', "''"));
        out.push('\'');
    } else {
        out.push_str(label);
    }
}

enum Step {
    Open(NodeId),
    Close(NodeId),
    Comma,
}

/// Serialize a tree to Newick.
pub(super) fn write(tree: &PhyloTree) -> String {
    let mut out = String::new();
    let mut stack = vec![Step::Open(tree.root)];
    while let Some(step) = stack.pop() {
        match step {
            Step::Open(id) => {
                let children = tree.node(id).children();
                stack.push(Step::Close(id));
                if !children.is_empty() {
                    out.push('(');
                    for (i, &child) in children.iter().enumerate().rev() {
                        stack.push(Step::Open(child));
                        if i > 0 {
                            stack.push(Step::Comma);
                        }
                    }
                }
            }
            Step::Comma => out.push(','),
            Step::Close(id) => {
                let node = tree.node(id);
                if !node.is_leaf() {
                    out.push(')');
                }
                if let Some(name) = node.name() {
                    push_label(&mut out, name);
                }
                if let Some(length) = node.branch_length() {
                    out.push(':');
                    out.push_str(&length.to_string());
                }
            }
        }
    }
    out.push(';');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_labels_lengths_and_comments() {
        let tree = parse("((A:0.1,'B c':2)[&comment]node_1:1e-3, 'it''s' )  ;\n").unwrap();
        assert_eq!(tree.leaf_names(), ["A", "B c", "it's"]);
        let internal = tree.node(tree.root()).children()[0];
        assert_eq!(tree.node(internal).name(), Some("node_1"));
        assert_eq!(tree.node(internal).branch_length(), Some(0.001));
        assert_eq!(tree.node(tree.root()).name(), None);
    }

    #[test]
    fn writes_what_it_reads() {
        let text = "((A:0.1,'B c':2)node_1:0.5,'it''s')root;";
        let tree = parse(text).unwrap();
        assert_eq!(write(&tree), text);
    }

    #[test]
    fn single_leaf_tree() {
        let tree = parse("lonely;").unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.leaf_names(), ["lonely"]);
        assert_eq!(write(&tree), "lonely;");
    }

    #[test]
    fn rejects_malformed_text() {
        for bad in ["((a,b);", "(a,b));", "a,b;", "(a:x,b);", "(a,b); c", "('a,b);", ""] {
            assert!(
                matches!(parse(bad), Err(TreeError::Newick { .. })),
                "accepted {:?}",
                bad
            );
        }
    }
}
