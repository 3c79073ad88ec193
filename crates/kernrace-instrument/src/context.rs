//! Run-scoped instrumentation state.
//!
//! `RaceCheckContext` owns everything the instrumenter synthesizes during
//! one run: the race-checking-procedure table (with create-or-return
//! identity semantics), the shadow-variable registry, state-label and
//! candidate counters, and the thread-projection sets. It is created per
//! run and passed explicitly; there is no process-wide table.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use tracing::debug;

use kernrace_ivl::ast::{
    Candidate, Implementation, InferenceStage, Procedure, Program, Variable,
};

use crate::access::AccessKind;

/// External option surface of the instrumenter.
#[derive(Debug, Clone)]
pub struct InstrumentationOptions {
    /// Track written/read values so value-identical races are not reported.
    pub benign_tracking: bool,
    /// Emit log calls only; no check procedures, no race requires.
    pub log_only: bool,
}

impl Default for InstrumentationOptions {
    fn default() -> Self {
        InstrumentationOptions {
            benign_tracking: true,
            log_only: false,
        }
    }
}

/// Attribute stamped on synthesized procedures restricted to the first
/// modeled thread's projection.
pub const THREAD_1_ONLY_ATTR: &str = "thread_1_only";

/// Attribute stamped on synthesized procedures restricted to the second
/// modeled thread's projection.
pub const THREAD_2_ONLY_ATTR: &str = "thread_2_only";

pub fn has_occurred_var(kind: AccessKind, array: &str) -> String {
    format!("_{kind}_HAS_OCCURRED_{array}")
}

pub fn offset_var(kind: AccessKind, array: &str) -> String {
    format!("_{kind}_OFFSET_{array}")
}

pub fn value_var(kind: AccessKind, array: &str) -> String {
    format!("_{kind}_VALUE_{array}")
}

pub fn value_old_var(array: &str) -> String {
    format!("_WRITE_VALUE_OLD_{array}")
}

pub fn benign_flag_var(array: &str) -> String {
    format!("_WRITE_READ_BENIGN_FLAG_{array}")
}

pub fn log_procedure_name(kind: AccessKind, array: &str) -> String {
    format!("_LOG_{kind}_{array}")
}

pub fn check_procedure_name(kind: AccessKind, array: &str) -> String {
    format!("_CHECK_{kind}_{array}")
}

pub fn update_benign_flag_procedure_name(array: &str) -> String {
    format!("_UPDATE_WRITE_READ_BENIGN_FLAG_{array}")
}

#[derive(Debug, Default)]
pub struct RaceCheckContext {
    pub options: InstrumentationOptions,
    procedures: IndexMap<String, Rc<RefCell<Procedure>>>,
    implementations: Vec<Implementation>,
    shadow_vars: IndexMap<String, Variable>,
    instrumented: IndexSet<(String, AccessKind)>,
    check_state_counter: usize,
    candidate_counter: usize,
    only_thread_1: IndexSet<String>,
    only_thread_2: IndexSet<String>,
}

impl RaceCheckContext {
    pub fn new(options: InstrumentationOptions) -> Self {
        RaceCheckContext {
            options,
            procedures: IndexMap::new(),
            implementations: Vec::new(),
            shadow_vars: IndexMap::new(),
            instrumented: IndexSet::new(),
            check_state_counter: 0,
            candidate_counter: 0,
            only_thread_1: IndexSet::new(),
            only_thread_2: IndexSet::new(),
        }
    }

    /// The declaration registered under `name`, creating it with `build` on
    /// first request. Every later request returns the identical object.
    pub fn race_checking_procedure(
        &mut self,
        name: &str,
        build: impl FnOnce() -> Procedure,
    ) -> Rc<RefCell<Procedure>> {
        self.procedures
            .entry(name.to_string())
            .or_insert_with(|| Rc::new(RefCell::new(build())))
            .clone()
    }

    pub fn procedure(&self, name: &str) -> Option<Rc<RefCell<Procedure>>> {
        self.procedures.get(name).cloned()
    }

    pub fn register_implementation(&mut self, imp: Implementation) {
        self.implementations.push(imp);
    }

    pub fn register_shadow_var(&mut self, var: Variable) {
        self.shadow_vars.entry(var.name.clone()).or_insert(var);
    }

    /// Record that (array, kind) has been instrumented; returns `true` the
    /// first time, so declaration work runs once per pair.
    pub fn mark_instrumented(&mut self, array: &str, kind: AccessKind) -> bool {
        self.instrumented.insert((array.to_string(), kind))
    }

    pub fn is_instrumented(&self, array: &str, kind: AccessKind) -> bool {
        self.instrumented.contains(&(array.to_string(), kind))
    }

    /// All (array, kind) pairs instrumented so far, in first-seen order.
    pub fn instrumented_pairs(&self) -> impl Iterator<Item = (&str, AccessKind)> {
        self.instrumented.iter().map(|(a, k)| (a.as_str(), *k))
    }

    /// A fresh `check_state_<N>` label for trace reconstruction.
    pub fn fresh_state_label(&mut self) -> String {
        let label = format!("check_state_{}", self.check_state_counter);
        self.check_state_counter += 1;
        label
    }

    /// A fresh candidate marker `_c<N>`.
    pub fn fresh_candidate(&mut self, tag: &str, stage: InferenceStage) -> Candidate {
        let name = format!("_c{}", self.candidate_counter);
        self.candidate_counter += 1;
        debug!(%name, tag, ?stage, "proposing candidate");
        Candidate {
            name,
            tag: tag.to_string(),
            stage,
        }
    }

    /// How many candidate markers have been handed out so far.
    pub fn candidate_count(&self) -> usize {
        self.candidate_counter
    }

    /// Restrict a synthesized procedure to the first modeled thread's
    /// projection.
    pub fn restrict_to_thread_1(&mut self, name: impl Into<String>) {
        self.only_thread_1.insert(name.into());
    }

    /// Restrict a synthesized procedure to the second modeled thread's
    /// projection.
    pub fn restrict_to_thread_2(&mut self, name: impl Into<String>) {
        self.only_thread_2.insert(name.into());
    }

    pub fn is_thread_1_only(&self, name: &str) -> bool {
        self.only_thread_1.contains(name)
    }

    pub fn is_thread_2_only(&self, name: &str) -> bool {
        self.only_thread_2.contains(name)
    }

    /// Move every registered declaration into the program: shadow globals,
    /// race-checking procedures stamped with their thread-projection
    /// attribute, and synthesized implementations. The projection must
    /// survive into the artifact: the downstream dualiser only ever sees
    /// the emitted program, not this context.
    pub fn flush_declarations(&mut self, program: &mut Program) {
        for (_, var) in std::mem::take(&mut self.shadow_vars) {
            program.add_global_if_absent(var);
        }
        for (name, proc) in &self.procedures {
            if program.procedure(name).is_none() {
                let mut decl = proc.borrow().clone();
                if self.only_thread_1.contains(name) {
                    decl.attrs.add(THREAD_1_ONLY_ATTR, Vec::new());
                }
                if self.only_thread_2.contains(name) {
                    decl.attrs.add(THREAD_2_ONLY_ATTR, Vec::new());
                }
                program.procedures.push(decl);
            }
        }
        for imp in std::mem::take(&mut self.implementations) {
            if program.implementation(&imp.name).is_none() {
                program.implementations.push(imp);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_lookup_returns_the_identical_declaration() {
        let mut ctx = RaceCheckContext::new(InstrumentationOptions::default());
        let name = log_procedure_name(AccessKind::Write, "A");
        let first = ctx.race_checking_procedure(&name, || Procedure::new(name.clone()));
        let second = ctx.race_checking_procedure(&name, || {
            panic!("builder must not run for an existing declaration")
        });
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn state_labels_increase_monotonically() {
        let mut ctx = RaceCheckContext::new(InstrumentationOptions::default());
        assert_eq!(ctx.fresh_state_label(), "check_state_0");
        assert_eq!(ctx.fresh_state_label(), "check_state_1");
    }

    #[test]
    fn shadow_variable_names_follow_the_declared_scheme() {
        assert_eq!(
            has_occurred_var(AccessKind::Read, "a"),
            "_READ_HAS_OCCURRED_a"
        );
        assert_eq!(offset_var(AccessKind::Atomic, "a"), "_ATOMIC_OFFSET_a");
        assert_eq!(value_var(AccessKind::Write, "a"), "_WRITE_VALUE_a");
        assert_eq!(value_old_var("a"), "_WRITE_VALUE_OLD_a");
        assert_eq!(benign_flag_var("a"), "_WRITE_READ_BENIGN_FLAG_a");
        assert_eq!(
            update_benign_flag_procedure_name("a"),
            "_UPDATE_WRITE_READ_BENIGN_FLAG_a"
        );
    }
}
