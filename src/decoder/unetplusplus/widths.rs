use crate::schedule::ChannelSchedule;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeWidth {
    pub depth: usize,
    pub column: usize,
    pub in_channels: usize,
    pub out_channels: usize,
}

/// Input/output widths of every nested decoder node `x[i][j]`, `j >= 1`.
///
/// Node `(i, j)` concatenates `j` same-depth maps of width `f[i]` with one
/// upsampled map of width `f[i + 1]`, so it reads `j * f[i] + f[i + 1]`
/// channels and writes `f[i]`. Entries are stored in evaluation order:
/// column by column, deepest node of each column first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeWidthTable {
    levels: usize,
    nodes: Vec<NodeWidth>,
}

impl NodeWidthTable {
    pub fn from_schedule(schedule: &ChannelSchedule) -> Self {
        let levels = schedule.len();
        let widths = schedule.widths();

        let nodes = (1..levels)
            .flat_map(|column| {
                (0..levels - column).rev().map(move |depth| NodeWidth {
                    depth,
                    column,
                    in_channels: column * widths[depth] + widths[depth + 1],
                    out_channels: widths[depth],
                })
            })
            .collect();

        Self { levels, nodes }
    }

    /// Number of decoder columns, `L - 1`.
    pub fn columns(&self) -> usize {
        self.levels - 1
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeWidth> {
        self.nodes.iter()
    }

    /// Nodes of one column, deepest first.
    pub fn column(&self, column: usize) -> impl Iterator<Item = &NodeWidth> {
        self.nodes.iter().filter(move |node| node.column == column)
    }

    pub fn get(&self, depth: usize, column: usize) -> Option<&NodeWidth> {
        self.nodes
            .iter()
            .find(|node| node.depth == depth && node.column == column)
    }
}
