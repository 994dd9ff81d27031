//! Replay Guard
//!
//! Each pass after calibration walks the eligible ops in the same order
//! the ledger recorded them. The guard keeps that pass's position and
//! fails as soon as the live sequence leaves the recorded one.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use tracing::warn;

use crate::error::{ControlFlowViolation, QuantError, QuantResult};
use crate::ledger::{Ledger, QuantizableOpRecord};
use crate::op::OperationRef;
use crate::registry;

/// Replay position of one pass over a finalized ledger.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayGuard {
    next: usize,
}

impl ReplayGuard {
    /// Guard at the start of a pass.
    pub fn new() -> Self {
        Self::default()
    }

    /// Matches `op` against the next recorded occurrence and advances.
    pub fn check<'l>(
        &mut self,
        ledger: &'l Ledger,
        op: &OperationRef,
    ) -> QuantResult<&'l QuantizableOpRecord> {
        let Some(record) = ledger.record(self.next) else {
            warn!(
                position = self.next,
                recorded = ledger.len(),
                op = %op,
                "eligible op encountered after the recorded sequence ended"
            );
            return Err(QuantError::DynamicControlFlow {
                kind: ControlFlowViolation::LedgerExhausted,
                encountered: op.to_string(),
                recorded: None,
            });
        };

        if !registry::are_same_operation(op, &record.op) {
            warn!(
                position = self.next,
                op = %op,
                recorded = %record.op,
                "eligible op differs from the recorded occurrence"
            );
            return Err(QuantError::DynamicControlFlow {
                kind: ControlFlowViolation::OpMismatch,
                encountered: op.to_string(),
                recorded: Some(record.op.to_string()),
            });
        }

        self.next += 1;
        Ok(record)
    }

    /// Number of occurrences matched so far.
    pub fn position(&self) -> usize {
        self.next
    }

    /// Rewinds to the first occurrence for a new pass.
    pub fn reset(&mut self) {
        self.next = 0;
    }
}

// =============================================================================
// Tests
// =============================================================================
