use crate::sim::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    Bra,
    Bsr,
    Jmp,
    Jsr,
    Rts,
}

impl BranchKind {
    #[must_use]
    pub fn is_call(self) -> bool {
        matches!(self, Self::Bsr | Self::Jsr)
    }

    #[must_use]
    pub fn is_relative(self) -> bool {
        matches!(self, Self::Bra | Self::Bsr)
    }
}

/// A delayed unconditional branch. `target` takes effect after the delay slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Branch {
    pub opcode: u16,
    pub kind: BranchKind,
    pub target: u32,
}

impl Branch {
    #[must_use]
    pub fn is_call(&self) -> bool {
        self.kind.is_call()
    }
}

/// Observable effect of one executed instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Generic,
    Read { source: u32, value: Value },
    Write { target: u32, value: Value },
    Branch(Branch),
    /// Conditional branches and BRAF. Never treated as calls.
    ControlFlow { target: u32, taken: bool },
}

#[cfg(test)]
mod tests {
    use super::BranchKind;

    #[test]
    fn only_bsr_and_jsr_are_calls() {
        let calls: Vec<_> = [
            BranchKind::Bra,
            BranchKind::Bsr,
            BranchKind::Jmp,
            BranchKind::Jsr,
            BranchKind::Rts,
        ]
        .into_iter()
        .filter(|k| k.is_call())
        .collect();
        assert_eq!(calls, vec![BranchKind::Bsr, BranchKind::Jsr]);
        assert!(BranchKind::Bra.is_relative());
        assert!(!BranchKind::Jmp.is_relative());
    }
}
