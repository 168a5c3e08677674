//! Arena-backed n-gram trie holding counts per word-id path.
use std::collections::BTreeMap;

use crate::dictionary::WordId;

/// Index of a node in the trie arena. The root is always `0`.
pub type NodeId = usize;

pub const ROOT: NodeId = 0;

/// One n-gram: the path from the root to this node.
///
/// Besides the occurrence count a node carries the Kneser-Ney continuation
/// counts and the time of its last increment. A node may exist with a zero
/// count when it only serves as a parent or holds continuation counts.
#[derive(Debug, Clone, Default)]
pub struct Node {
    pub count: u32,
    /// Time of the last increment, for recency weighting.
    pub time: u32,
    /// Number of distinct word types preceding this n-gram.
    pub n1pxr: u32,
    /// Number of distinct (predecessor, successor) pairs around this n-gram.
    pub n1pxrx: u32,
    children: BTreeMap<WordId, NodeId>,
}

impl Node {
    /// Children ordered by word id.
    pub fn children(&self) -> impl Iterator<Item = (WordId, NodeId)> + '_ {
        self.children.iter().map(|(wid, id)| (*wid, *id))
    }
}

/// N-gram trie.
///
/// # Example
/// ```
/// use wordpredict_core::trie::NGramTrie;
///
/// let mut trie = NGramTrie::new();
/// let node = trie.add_node(&[4, 5]);
/// trie.node_mut(node).count += 2;
///
/// assert_eq!(trie.get_node(&[4, 5]), Some(node));
/// assert!(trie.get_node(&[4]).is_some());  // parent created on the way
/// assert!(trie.get_node(&[5]).is_none());
/// ```
#[derive(Debug, Clone)]
pub struct NGramTrie {
    nodes: Vec<Node>,
}

impl Default for NGramTrie {
    fn default() -> Self {
        Self::new()
    }
}

impl NGramTrie {
    /// Create a trie with just the root.
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::default()],
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.nodes.push(Node::default());
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    /// Node for `wids`, or `None` if the path doesn't exist. The empty path
    /// is the root.
    pub fn get_node(&self, wids: &[WordId]) -> Option<NodeId> {
        let mut id = ROOT;
        for wid in wids {
            id = *self.nodes[id].children.get(wid)?;
        }
        Some(id)
    }

    /// Node for `wids`, creating missing nodes along the path.
    pub fn add_node(&mut self, wids: &[WordId]) -> NodeId {
        let mut id = ROOT;
        for wid in wids {
            id = match self.nodes[id].children.get(wid) {
                Some(child) => *child,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(Node::default());
                    self.nodes[id].children.insert(*wid, child);
                    child
                }
            };
        }
        id
    }

    /// Number of children with a non-zero count.
    pub fn num_successors(&self, id: NodeId) -> u32 {
        self.nodes[id]
            .children()
            .filter(|(_, child)| self.nodes[*child].count > 0)
            .count() as u32
    }

    /// Sum of the counts of all children.
    pub fn sum_child_counts(&self, id: NodeId) -> u64 {
        self.nodes[id]
            .children()
            .map(|(_, child)| u64::from(self.nodes[child].count))
            .sum()
    }

    /// All nodes at `depth`, with their word-id paths, in depth-first order.
    pub fn nodes_at_depth(&self, depth: usize) -> Vec<(Vec<WordId>, NodeId)> {
        let mut out = Vec::new();
        let mut path = Vec::with_capacity(depth);
        self.collect_at_depth(ROOT, depth, &mut path, &mut out);
        out
    }

    fn collect_at_depth(
        &self,
        id: NodeId,
        depth: usize,
        path: &mut Vec<WordId>,
        out: &mut Vec<(Vec<WordId>, NodeId)>,
    ) {
        if path.len() == depth {
            out.push((path.clone(), id));
            return;
        }
        for (wid, child) in self.nodes[id].children() {
            path.push(wid);
            self.collect_at_depth(child, depth, path, out);
            path.pop();
        }
    }
}
