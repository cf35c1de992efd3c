use std::fmt;

/// Shape of a structured bundle of values, independent of the values
/// themselves. Flattening orders leaves depth-first, left to right.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tree {
    Leaf,
    Tuple(Vec<Tree>),
}

impl Tree {
    pub fn leaf() -> Tree {
        Tree::Leaf
    }

    pub fn tuple(children: Vec<Tree>) -> Tree {
        Tree::Tuple(children)
    }

    pub fn pair(first: Tree, second: Tree) -> Tree {
        Tree::Tuple(vec![first, second])
    }

    pub fn num_leaves(&self) -> usize {
        match self {
            Tree::Leaf => 1,
            Tree::Tuple(children) => children.iter().map(Tree::num_leaves).sum(),
        }
    }

    pub fn children(&self) -> &[Tree] {
        match self {
            Tree::Leaf => &[],
            Tree::Tuple(children) => children,
        }
    }

    /// Renders the tree with one caller-supplied string per leaf, consumed in
    /// flattening order.
    ///
    /// Panics if `leaves` runs out before every leaf is rendered.
    pub fn render_with(&self, leaves: &mut impl Iterator<Item = String>) -> String {
        match self {
            Tree::Leaf => match leaves.next() {
                Some(rendered) => rendered,
                None => panic!("render_with: fewer renderings than leaves"),
            },
            Tree::Tuple(children) => {
                let rendered = children
                    .iter()
                    .map(|child| child.render_with(leaves))
                    .collect::<Vec<_>>();
                format!("({})", rendered.join(", "))
            }
        }
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tree::Leaf => write!(f, "*"),
            Tree::Tuple(children) => {
                write!(f, "(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", child)?;
                }
                write!(f, ")")
            }
        }
    }
}
