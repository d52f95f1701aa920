//! Scratch memory owned by a solver session.

use tracing::info;

use crate::error::MpcError;

/// A zero-initialised block of doubles handed to the engine on every solve.
///
/// The buffer is allocated once and never resized, so its address is stable
/// for the lifetime of the owning session.
#[derive(Debug)]
pub struct SolverWorkspace {
    buffer: Vec<f64>,
}

impl SolverWorkspace {
    /// Allocate `len` doubles, reporting failure instead of aborting.
    pub fn allocate(len: usize) -> Result<Self, MpcError> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(len)
            .map_err(|_| MpcError::WorkspaceAllocation { len })?;
        buffer.resize(len, 0.0);
        info!(len, "allocated solver workspace");
        Ok(Self { buffer })
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.buffer
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.buffer
    }

    /// Start of the block, for identity checks.
    pub fn as_ptr(&self) -> *const f64 {
        self.buffer.as_ptr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_zeroed() {
        let ws = SolverWorkspace::allocate(16).unwrap();
        assert_eq!(ws.len(), 16);
        assert!(ws.as_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn empty_workspace_is_valid() {
        let ws = SolverWorkspace::allocate(0).unwrap();
        assert!(ws.is_empty());
    }

    #[test]
    fn impossible_size_is_reported() {
        let err = SolverWorkspace::allocate(usize::MAX).unwrap_err();
        assert!(matches!(err, MpcError::WorkspaceAllocation { len } if len == usize::MAX));
    }
}
