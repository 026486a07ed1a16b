//! Runtime configuration for matrix construction.

use serde::{Deserialize, Serialize};

/// Whether a mesh matrix remembers its last index translation.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum StencilPolicy {
    /// Translate on every call.
    #[default]
    Recompute,
    /// Reuse the translation while the local indices stay identical.
    Keep,
}

/// Construction parameters shared by all matrix flavours.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixConfig {
    /// Expected entries per row.
    pub bandwidth: usize,
    /// Estimated total number of nonzeros; overrides a zero `bandwidth`.
    pub size_hint: Option<usize>,
    /// Stencil caching for mesh matrices.
    pub stencil: StencilPolicy,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            bandwidth: 1,
            size_hint: None,
            stencil: StencilPolicy::Recompute,
        }
    }
}

impl MatrixConfig {
    pub fn with_bandwidth(bandwidth: usize) -> Self {
        Self {
            bandwidth,
            ..Self::default()
        }
    }

    /// Effective bandwidth for a `rows x cols` matrix.
    pub fn effective_bandwidth(&self, rows: u64, cols: u64) -> usize {
        match self.size_hint {
            Some(hint) if self.bandwidth == 0 => {
                let size = rows.max(cols).max(1) as usize;
                hint.div_ceil(size)
            }
            _ => self.bandwidth,
        }
    }

    /// Per-row reservation before finalize: half again the bandwidth.
    pub fn row_reserve(bandwidth: usize) -> usize {
        bandwidth * 3 / 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_hint_only_applies_to_zero_bandwidth() {
        let cfg = MatrixConfig {
            bandwidth: 0,
            size_hint: Some(25),
            ..Default::default()
        };
        assert_eq!(cfg.effective_bandwidth(10, 10), 3);
        let cfg = MatrixConfig {
            bandwidth: 5,
            size_hint: Some(25),
            ..Default::default()
        };
        assert_eq!(cfg.effective_bandwidth(10, 10), 5);
        assert_eq!(MatrixConfig::row_reserve(4), 6);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: MatrixConfig = serde_json::from_str(r#"{"stencil":"Keep"}"#).unwrap();
        assert_eq!(cfg.bandwidth, 1);
        assert_eq!(cfg.stencil, StencilPolicy::Keep);
        let back = serde_json::to_string(&cfg).unwrap();
        assert!(back.contains("\"bandwidth\":1"));
    }
}
