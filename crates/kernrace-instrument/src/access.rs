//! Shared-array access discovery.
//!
//! `AccessCollector` scans one command and reports the shared-array accesses
//! it performs as structured events. Events are ephemeral: the instrumenter
//! consumes them at the program point where they were discovered.

use std::fmt;

use serde::{Deserialize, Serialize};

use kernrace_ivl::ast::{AssignTarget, Cmd, Expr, Program};

use crate::InstrumentationError;

/// Attribute marking a call command as an atomic read-modify-write.
pub const ATOMIC_ATTR: &str = "atomic";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessKind {
    Read,
    Write,
    Atomic,
}

impl AccessKind {
    pub const ALL: [AccessKind; 3] = [AccessKind::Read, AccessKind::Write, AccessKind::Atomic];

    pub fn is_read_or_write(self) -> bool {
        matches!(self, AccessKind::Read | AccessKind::Write)
    }

    /// Pending access kinds that conflict with an incoming access of this
    /// kind. Atomics do not conflict with each other.
    pub fn conflicting(self) -> &'static [AccessKind] {
        match self {
            AccessKind::Read => &[AccessKind::Write, AccessKind::Atomic],
            AccessKind::Write => &[AccessKind::Read, AccessKind::Write, AccessKind::Atomic],
            AccessKind::Atomic => &[AccessKind::Read, AccessKind::Write],
        }
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessKind::Read => "READ",
            AccessKind::Write => "WRITE",
            AccessKind::Atomic => "ATOMIC",
        };
        f.write_str(s)
    }
}

/// One shared-array access at one program point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessEvent {
    pub array: String,
    pub kind: AccessKind,
    pub offset: Expr,
    /// The written value, for WRITE events with benign tracking.
    pub value: Option<Expr>,
}

pub struct AccessCollector<'a> {
    program: &'a Program,
}

impl<'a> AccessCollector<'a> {
    pub fn new(program: &'a Program) -> Self {
        AccessCollector { program }
    }

    /// All shared-array accesses the command performs, reads first, in
    /// program order. READ events are deduplicated per command by (array,
    /// offset) structural equality; dereferences of read-only arrays are
    /// never reported as reads.
    pub fn collect(&self, cmd: &Cmd) -> Result<Vec<AccessEvent>, InstrumentationError> {
        match cmd {
            Cmd::Assign { targets, values } => {
                if targets.len() != values.len() {
                    return Err(InstrumentationError::ContractViolation(format!(
                        "parallel assignment with {} targets but {} values",
                        targets.len(),
                        values.len()
                    )));
                }
                let mut events = Vec::new();
                let mut seen_reads: Vec<(String, Expr)> = Vec::new();
                for value in values {
                    self.collect_reads(value, &mut seen_reads, &mut events);
                }
                for target in targets {
                    if let AssignTarget::MapStore { index, .. } = target {
                        self.collect_reads(index, &mut seen_reads, &mut events);
                    }
                }
                for (target, value) in targets.iter().zip(values.iter()) {
                    match target {
                        AssignTarget::Simple(_) => {}
                        AssignTarget::MapStore { array, index } => {
                            if self.program.is_shared_array(array) {
                                events.push(AccessEvent {
                                    array: array.clone(),
                                    kind: AccessKind::Write,
                                    offset: index.clone(),
                                    value: Some(value.clone()),
                                });
                            } else if !self.program.globals.iter().any(|g| g.name == *array) {
                                return Err(InstrumentationError::ContractViolation(format!(
                                    "store into undeclared array `{array}`"
                                )));
                            }
                        }
                    }
                }
                Ok(events)
            }
            Cmd::Call(call) if call.attrs.has(ATOMIC_ATTR) => {
                if call.outs.len() != 2 {
                    return Err(InstrumentationError::ContractViolation(format!(
                        "atomic call to `{}` declares {} outputs, expected value and array",
                        call.callee,
                        call.outs.len()
                    )));
                }
                let array = &call.outs[1];
                if !self.program.is_shared_array(array) {
                    return Err(InstrumentationError::ContractViolation(format!(
                        "atomic call to `{}` targets `{array}`, which is not a shared array",
                        call.callee
                    )));
                }
                let offset = call.ins.first().ok_or_else(|| {
                    InstrumentationError::ContractViolation(format!(
                        "atomic call to `{}` carries no offset argument",
                        call.callee
                    ))
                })?;
                Ok(vec![AccessEvent {
                    array: array.clone(),
                    kind: AccessKind::Atomic,
                    offset: offset.clone(),
                    value: None,
                }])
            }
            _ => Ok(Vec::new()),
        }
    }

    fn collect_reads(
        &self,
        expr: &Expr,
        seen: &mut Vec<(String, Expr)>,
        events: &mut Vec<AccessEvent>,
    ) {
        match expr {
            Expr::Literal(_) | Expr::Ident(_) => {}
            Expr::NAry { args, .. } => {
                for a in args {
                    self.collect_reads(a, seen, events);
                }
            }
            Expr::Select { array, index } => {
                self.collect_reads(index, seen, events);
                let Some(decl) = self.program.shared_array(array) else {
                    return;
                };
                if decl.read_only {
                    return;
                }
                let key = (array.clone(), (**index).clone());
                if seen.contains(&key) {
                    return;
                }
                seen.push(key);
                events.push(AccessEvent {
                    array: array.clone(),
                    kind: AccessKind::Read,
                    offset: (**index).clone(),
                    value: None,
                });
            }
        }
    }
}
