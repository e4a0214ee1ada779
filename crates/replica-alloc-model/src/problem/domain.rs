// Copyright (c) 2025 Felix Kahle.
//
// Permission is hereby granted, free of charge, to any person obtaining
// a copy of this software and associated documentation files (the
// "Software"), to deal in the Software without restriction, including
// without limitation the rights to use, copy, modify, merge, publish,
// distribute, sublicense, and/or sell copies of the Software, and to
// permit persons to whom the Software is furnished to do so, subject to
// the following conditions:
//
// The above copyright notice and this permission notice shall be
// included in all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,
// EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
// MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE
// LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION
// OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION
// WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

/// The root of every domain tree; depth 0, empty segment.
pub const ROOT_DOMAIN: usize = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
struct DomainNode {
    segment: String,
    parent: Option<usize>,
    children: Vec<usize>,
    node_count: usize,
}

/// The static half of a domain hierarchy: one tree node per domain
/// segment, carrying the count of up nodes under it. The per-partition
/// replica-count tree in the solver mirrors this shape index-for-index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainTree {
    nodes: Vec<DomainNode>,
}

impl Default for DomainTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DomainTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![DomainNode {
                segment: String::new(),
                parent: None,
                children: Vec::new(),
                node_count: 0,
            }],
        }
    }

    /// Walks `path` from the root, creating missing segments, and returns
    /// the leaf domain index.
    pub fn ensure_path<S: AsRef<str>>(&mut self, path: &[S]) -> usize {
        let mut current = ROOT_DOMAIN;
        for segment in path {
            let segment = segment.as_ref();
            let found = self.nodes[current]
                .children
                .iter()
                .copied()
                .find(|&c| self.nodes[c].segment == segment);
            current = match found {
                Some(c) => c,
                None => {
                    let idx = self.nodes.len();
                    self.nodes.push(DomainNode {
                        segment: segment.to_owned(),
                        parent: Some(current),
                        children: Vec::new(),
                        node_count: 0,
                    });
                    self.nodes[current].children.push(idx);
                    idx
                }
            };
        }
        current
    }

    /// Registers one up node under `leaf`, incrementing counts up to the
    /// root.
    pub fn record_node(&mut self, leaf: usize) {
        let mut current = Some(leaf);
        while let Some(d) = current {
            self.nodes[d].node_count += 1;
            current = self.nodes[d].parent;
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        // The root always exists; "empty" means no real domains.
        self.nodes.len() <= 1
    }

    #[inline]
    pub fn parent(&self, domain: usize) -> Option<usize> {
        self.nodes[domain].parent
    }

    #[inline]
    pub fn children(&self, domain: usize) -> &[usize] {
        &self.nodes[domain].children
    }

    #[inline]
    pub fn segment(&self, domain: usize) -> &str {
        &self.nodes[domain].segment
    }

    #[inline]
    pub fn node_count(&self, domain: usize) -> usize {
        self.nodes[domain].node_count
    }

    #[inline]
    pub fn is_leaf(&self, domain: usize) -> bool {
        self.nodes[domain].children.is_empty()
    }

    /// Chain of domain indices from the root's child down to `leaf`
    /// (the root itself is omitted: every chain shares it).
    pub fn path_from_root(&self, leaf: usize) -> Vec<usize> {
        let mut path = Vec::new();
        let mut current = Some(leaf);
        while let Some(d) = current {
            if d != ROOT_DOMAIN {
                path.push(d);
            }
            current = self.nodes[d].parent;
        }
        path.reverse();
        path
    }

    /// True when `descendant` lies in the subtree rooted at `ancestor`
    /// (a domain is its own ancestor).
    pub fn is_under(&self, descendant: usize, ancestor: usize) -> bool {
        let mut current = Some(descendant);
        while let Some(d) = current {
            if d == ancestor {
                return true;
            }
            current = self.nodes[d].parent;
        }
        false
    }

    /// A tree with at most one real branch constrains nothing.
    #[inline]
    pub fn is_trivial(&self) -> bool {
        self.nodes[ROOT_DOMAIN].children.len() <= 1
    }

    /// Every recorded node sits alone in its own top-level domain, so
    /// distribution over domains degenerates to distribution over nodes.
    pub fn is_per_node(&self) -> bool {
        self.nodes[ROOT_DOMAIN]
            .children
            .iter()
            .all(|&d| self.nodes[d].node_count <= 1)
    }
}
