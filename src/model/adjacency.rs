use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// How the spatial step mixes information across joints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "edges", rename_all = "snake_case")]
pub enum JointAdjacency {
    /// One convolution kernel spanning the whole joint axis.
    Dense,
    /// Undirected skeleton edges; mixing follows the normalised adjacency.
    Graph(Vec<[usize; 2]>),
}

impl Default for JointAdjacency {
    fn default() -> Self {
        Self::Dense
    }
}

impl JointAdjacency {
    /// First edge endpoint outside `0..num_joints`, if any.
    pub fn invalid_joint(&self, num_joints: usize) -> Option<usize> {
        match self {
            Self::Dense => None,
            Self::Graph(edges) => edges.iter().flatten().copied().find(|&j| j >= num_joints),
        }
    }

    /// `D^-1/2 (A + I) D^-1/2`, or `None` for dense mixing.
    pub fn normalized(&self, num_joints: usize) -> Option<Array2<f32>> {
        let Self::Graph(edges) = self else {
            return None;
        };

        let mut adj = Array2::<f32>::eye(num_joints);
        for &[a, b] in edges {
            if a < num_joints && b < num_joints {
                adj[[a, b]] = 1.0;
                adj[[b, a]] = 1.0;
            }
        }

        let inv_sqrt_deg: Vec<f32> = adj
            .rows()
            .into_iter()
            .map(|row| 1.0 / row.sum().sqrt())
            .collect();
        for ((i, j), v) in adj.indexed_iter_mut() {
            *v *= inv_sqrt_deg[i] * inv_sqrt_deg[j];
        }
        Some(adj)
    }
}
