//! Shadow-state instrumentation.
//!
//! `ShadowStateInstrumenter` rewrites every implementation body so that each
//! shared-array access is logged by the first modeled thread and checked
//! against pending accesses by the second. Per access the inserted order is
//! fixed: log call, then (for tracked writes) the benign-flag update call,
//! then a `captureState` marker and the check call. The check's race
//! requires read shadow state the log call just wrote, so this order is a
//! soundness requirement, not a style choice.
//!
//! Procedure bodies vary by backend; they are produced by an injected
//! [`InstrumentationStrategy`].

use kernrace_ivl::ast::{
    AssignTarget, Attributes, CallCmd, Cmd, Expr, IfStmt, Implementation, Param, Procedure,
    Program, Requires, SharedArray, Stmt, Type, Variable, WhileStmt,
};
use kernrace_ivl::gpu;

use crate::access::{AccessCollector, AccessEvent, AccessKind, ATOMIC_ATTR};
use crate::context::{
    benign_flag_var, check_procedure_name, has_occurred_var, log_procedure_name, offset_var,
    update_benign_flag_procedure_name, value_old_var, value_var, InstrumentationOptions,
    RaceCheckContext,
};
use crate::InstrumentationError;
use tracing::info;

pub const SOURCELOC_ATTR: &str = "sourceloc";
pub const CAPTURE_STATE_ATTR: &str = "captureState";
pub const STATE_ID_ATTR: &str = "state_id";
pub const RACE_ATTR: &str = "race";
pub const ARRAY_ATTR: &str = "array";
pub const INLINE_ATTR: &str = "inline";

const PRED_PARAM: &str = "_P";
const OFFSET_PARAM: &str = "_offset";
const VALUE_PARAM: &str = "_value";
const VALUE_OLD_PARAM: &str = "_value_old";

/// Backend-varying pieces of the instrumentation: the bodies of the
/// synthesized procedures and the race requires of the check procedure.
pub trait InstrumentationStrategy {
    /// Locals and body of `_LOG_<kind>_<array>`.
    fn log_access_body(
        &self,
        array: &SharedArray,
        kind: AccessKind,
        options: &InstrumentationOptions,
    ) -> (Vec<Variable>, Vec<Stmt>);

    /// The race requires of `_CHECK_<kind>_<array>`, one per conflicting
    /// pending kind.
    fn check_access_requires(
        &self,
        array: &SharedArray,
        kind: AccessKind,
        options: &InstrumentationOptions,
    ) -> Vec<Requires>;

    /// Body of `_UPDATE_WRITE_READ_BENIGN_FLAG_<array>`.
    fn update_benign_flag_body(&self, array: &SharedArray) -> Vec<Stmt>;
}

/// The default instrumentation: nondeterministic access tracking in the log
/// procedure, per-conflict race requires in the check procedure, and
/// value-based benign-write suppression.
#[derive(Debug, Default)]
pub struct StandardStrategy;

impl InstrumentationStrategy for StandardStrategy {
    fn log_access_body(
        &self,
        array: &SharedArray,
        kind: AccessKind,
        options: &InstrumentationOptions,
    ) -> (Vec<Variable>, Vec<Stmt>) {
        let track = Variable {
            name: "track".to_string(),
            ty: Type::Bool,
        };
        let mut then_branch = vec![
            Stmt::Cmd(Cmd::assign(
                AssignTarget::Simple(has_occurred_var(kind, &array.name)),
                Expr::tru(),
            )),
            Stmt::Cmd(Cmd::assign(
                AssignTarget::Simple(offset_var(kind, &array.name)),
                Expr::ident(OFFSET_PARAM),
            )),
        ];
        if options.benign_tracking && kind.is_read_or_write() {
            then_branch.push(Stmt::Cmd(Cmd::assign(
                AssignTarget::Simple(value_var(kind, &array.name)),
                Expr::ident(VALUE_PARAM),
            )));
        }
        if options.benign_tracking && kind == AccessKind::Write {
            then_branch.push(Stmt::Cmd(Cmd::assign(
                AssignTarget::Simple(value_old_var(&array.name)),
                Expr::ident(VALUE_OLD_PARAM),
            )));
            // A write that leaves memory unchanged is benign for any
            // concurrent read.
            then_branch.push(Stmt::Cmd(Cmd::assign(
                AssignTarget::Simple(benign_flag_var(&array.name)),
                Expr::eq(Expr::ident(VALUE_PARAM), Expr::ident(VALUE_OLD_PARAM)),
            )));
        }
        let body = vec![
            Stmt::Cmd(Cmd::Havoc {
                vars: vec![track.name.clone()],
            }),
            Stmt::If(IfStmt {
                guard: Expr::and(Expr::ident(PRED_PARAM), Expr::ident("track")),
                then_branch,
                else_branch: Vec::new(),
            }),
        ];
        (vec![track], body)
    }

    fn check_access_requires(
        &self,
        array: &SharedArray,
        kind: AccessKind,
        options: &InstrumentationOptions,
    ) -> Vec<Requires> {
        kind.conflicting()
            .iter()
            .map(|&pending| {
                let mut conj = Vec::new();
                if array.scope == kernrace_ivl::ast::ArrayScope::GroupShared {
                    conj.push(gpu::threads_in_same_group());
                }
                conj.push(Expr::ident(PRED_PARAM));
                conj.push(Expr::ident(has_occurred_var(pending, &array.name)));
                conj.push(Expr::eq(
                    Expr::ident(offset_var(pending, &array.name)),
                    Expr::ident(OFFSET_PARAM),
                ));
                if options.benign_tracking {
                    match (kind, pending) {
                        (AccessKind::Read, AccessKind::Write) => {
                            conj.push(Expr::not(Expr::ident(benign_flag_var(&array.name))));
                        }
                        (AccessKind::Write, AccessKind::Write) => {
                            conj.push(Expr::ne(
                                Expr::ident(VALUE_PARAM),
                                Expr::ident(value_var(AccessKind::Write, &array.name)),
                            ));
                        }
                        (AccessKind::Write, AccessKind::Read) => {
                            conj.push(Expr::ne(
                                Expr::ident(VALUE_PARAM),
                                Expr::ident(value_var(AccessKind::Read, &array.name)),
                            ));
                        }
                        _ => {}
                    }
                }
                let mut attrs = Attributes::new();
                attrs.add(RACE_ATTR, Vec::new());
                attrs.add_string(ARRAY_ATTR, array.name.clone());
                Requires {
                    expr: Expr::not(Expr::and_all(conj)),
                    candidate: None,
                    attrs,
                }
            })
            .collect()
    }

    fn update_benign_flag_body(&self, array: &SharedArray) -> Vec<Stmt> {
        // A second write at the pending offset with a different value makes
        // the pending write dangerous for reads.
        let differs = Expr::and_all([
            Expr::ident(PRED_PARAM),
            Expr::ident(has_occurred_var(AccessKind::Write, &array.name)),
            Expr::eq(
                Expr::ident(offset_var(AccessKind::Write, &array.name)),
                Expr::ident(OFFSET_PARAM),
            ),
            Expr::ne(
                Expr::ident(VALUE_PARAM),
                Expr::ident(value_var(AccessKind::Write, &array.name)),
            ),
        ]);
        vec![Stmt::Cmd(Cmd::assign(
            AssignTarget::Simple(benign_flag_var(&array.name)),
            Expr::ite(
                differs,
                Expr::fls(),
                Expr::ident(benign_flag_var(&array.name)),
            ),
        ))]
    }
}

pub struct ShadowStateInstrumenter<'a, S: InstrumentationStrategy> {
    strategy: &'a S,
}

impl<'a, S: InstrumentationStrategy> ShadowStateInstrumenter<'a, S> {
    pub fn new(strategy: &'a S) -> Self {
        ShadowStateInstrumenter { strategy }
    }

    /// Rewrite every implementation, register all declarations the rewrite
    /// needs, and add the no-pending-access preconditions to kernel entry
    /// procedures.
    pub fn instrument(
        &self,
        program: &mut Program,
        context: &mut RaceCheckContext,
    ) -> Result<(), InstrumentationError> {
        let mut imps = std::mem::take(&mut program.implementations);
        for imp in &mut imps {
            let mut sourceloc: Option<Attributes> = None;
            let body = std::mem::take(&mut imp.body);
            imp.body = self.rewrite_stmts(program, context, body, &Expr::tru(), &mut sourceloc)?;
        }
        program.implementations = imps;
        context.flush_declarations(program);
        add_kernel_preconditions(program, context);
        info!(
            pairs = context.instrumented_pairs().count(),
            "race instrumentation complete"
        );
        Ok(())
    }

    fn rewrite_stmts(
        &self,
        program: &Program,
        context: &mut RaceCheckContext,
        stmts: Vec<Stmt>,
        guard: &Expr,
        sourceloc: &mut Option<Attributes>,
    ) -> Result<Vec<Stmt>, InstrumentationError> {
        let mut out = Vec::new();
        for stmt in stmts {
            match stmt {
                Stmt::Cmd(Cmd::Assert { attrs, .. }) if attrs.has(SOURCELOC_ATTR) => {
                    // Captured and stripped; replayed onto synthesized calls.
                    *sourceloc = Some(attrs);
                }
                Stmt::Cmd(cmd) => {
                    let events = AccessCollector::new(program).collect(&cmd)?;
                    for event in &events {
                        self.ensure_declarations(program, context, &event.array, event.kind)?;
                        out.extend(self.access_calls(context, event, guard, sourceloc.as_ref())?);
                    }
                    match cmd {
                        Cmd::Call(call) if call.attrs.has(ATOMIC_ATTR) => {
                            // The atomic's effect is modeled adversarially:
                            // the call is dropped and its result left
                            // unconstrained.
                            out.push(Stmt::Cmd(Cmd::Havoc {
                                vars: vec![call.outs[0].clone()],
                            }));
                        }
                        other => out.push(Stmt::Cmd(other)),
                    }
                }
                Stmt::While(w) => {
                    let inner = conjoin(guard, &w.guard);
                    out.push(Stmt::While(WhileStmt {
                        guard: w.guard.clone(),
                        invariants: w.invariants,
                        body: self.rewrite_stmts(program, context, w.body, &inner, sourceloc)?,
                    }));
                }
                Stmt::If(i) => {
                    let then_guard = conjoin(guard, &i.guard);
                    let else_guard = conjoin(guard, &Expr::not(i.guard.clone()));
                    out.push(Stmt::If(IfStmt {
                        guard: i.guard.clone(),
                        then_branch: self.rewrite_stmts(
                            program,
                            context,
                            i.then_branch,
                            &then_guard,
                            sourceloc,
                        )?,
                        else_branch: self.rewrite_stmts(
                            program,
                            context,
                            i.else_branch,
                            &else_guard,
                            sourceloc,
                        )?,
                    }));
                }
            }
        }
        Ok(out)
    }

    /// The log / benign-update / captureState+check sequence for one event.
    fn access_calls(
        &self,
        context: &mut RaceCheckContext,
        event: &AccessEvent,
        guard: &Expr,
        sourceloc: Option<&Attributes>,
    ) -> Result<Vec<Stmt>, InstrumentationError> {
        let benign = context.options.benign_tracking;
        let log_only = context.options.log_only;
        let mut replay = Attributes::new();
        if let Some(sl) = sourceloc {
            replay.extend_from(sl);
        }

        let value = if benign && event.kind.is_read_or_write() {
            Some(match event.kind {
                AccessKind::Write => event.value.clone().ok_or_else(|| {
                    InstrumentationError::ContractViolation(format!(
                        "write to `{}` carries no value expression",
                        event.array
                    ))
                })?,
                _ => Expr::select(event.array.clone(), event.offset.clone()),
            })
        } else {
            None
        };

        let mut out = Vec::new();

        let mut log_ins = vec![guard.clone(), event.offset.clone()];
        if let Some(v) = &value {
            log_ins.push(v.clone());
            if event.kind == AccessKind::Write {
                // The value about to be overwritten.
                log_ins.push(Expr::select(event.array.clone(), event.offset.clone()));
            }
        }
        out.push(Stmt::Cmd(Cmd::Call(CallCmd {
            callee: log_procedure_name(event.kind, &event.array),
            ins: log_ins,
            outs: Vec::new(),
            attrs: replay.clone(),
        })));

        if event.kind == AccessKind::Write && benign {
            let v = value.clone().unwrap_or_else(Expr::tru);
            out.push(Stmt::Cmd(Cmd::Call(CallCmd {
                callee: update_benign_flag_procedure_name(&event.array),
                ins: vec![guard.clone(), event.offset.clone(), v],
                outs: Vec::new(),
                attrs: replay.clone(),
            })));
        }

        if !log_only {
            let label = context.fresh_state_label();
            let mut capture = Attributes::new();
            capture.add_string(CAPTURE_STATE_ATTR, label.clone());
            out.push(Stmt::Cmd(Cmd::Assume {
                expr: Expr::tru(),
                attrs: capture,
            }));

            let mut check_ins = vec![guard.clone(), event.offset.clone()];
            if let Some(v) = &value {
                check_ins.push(v.clone());
            }
            let mut check_attrs = replay;
            check_attrs.add_string(STATE_ID_ATTR, label);
            out.push(Stmt::Cmd(Cmd::Call(CallCmd {
                callee: check_procedure_name(event.kind, &event.array),
                ins: check_ins,
                outs: Vec::new(),
                attrs: check_attrs,
            })));
        }
        Ok(out)
    }

    /// Register the shadow variables, procedures, and procedure bodies an
    /// (array, kind) pair needs; runs once per pair per run.
    fn ensure_declarations(
        &self,
        program: &Program,
        context: &mut RaceCheckContext,
        array_name: &str,
        kind: AccessKind,
    ) -> Result<(), InstrumentationError> {
        if !context.mark_instrumented(array_name, kind) {
            return Ok(());
        }
        let array = program.shared_array(array_name).ok_or_else(|| {
            InstrumentationError::ContractViolation(format!(
                "access event for undeclared array `{array_name}`"
            ))
        })?;
        let options = context.options.clone();

        ensure_shadow_vars(context, array, kind, &options);
        if !options.log_only {
            // The check requires read the conflicting kinds' shadow state.
            for &pending in kind.conflicting() {
                ensure_shadow_vars(context, array, pending, &options);
            }
        }

        let log_name = log_procedure_name(kind, array_name);
        let log_params = log_check_params(array, kind, &options, true);
        let log_modifies = written_shadow_vars(array, kind, &options);
        context.race_checking_procedure(&log_name, || {
            let mut proc = Procedure::new(log_name.clone());
            proc.in_params = log_params.clone();
            proc.modifies = log_modifies.clone();
            proc.attrs = Attributes::single(INLINE_ATTR);
            proc
        });
        context.restrict_to_thread_1(log_name.clone());
        let (locals, body) = self.strategy.log_access_body(array, kind, &options);
        context.register_implementation(Implementation {
            name: log_name,
            in_params: log_params,
            out_params: Vec::new(),
            locals,
            body,
            attrs: Attributes::new(),
        });

        if kind == AccessKind::Write && options.benign_tracking {
            let update_name = update_benign_flag_procedure_name(array_name);
            let update_params = vec![
                bool_param(PRED_PARAM),
                typed_param(OFFSET_PARAM, array.index_ty.clone()),
                typed_param(VALUE_PARAM, array.elem_ty.clone()),
            ];
            let flag = benign_flag_var(array_name);
            context.race_checking_procedure(&update_name, || {
                let mut proc = Procedure::new(update_name.clone());
                proc.in_params = update_params.clone();
                proc.modifies = vec![flag.clone()];
                proc.attrs = Attributes::single(INLINE_ATTR);
                proc
            });
            context.restrict_to_thread_2(update_name.clone());
            context.register_implementation(Implementation {
                name: update_name,
                in_params: update_params,
                out_params: Vec::new(),
                locals: Vec::new(),
                body: self.strategy.update_benign_flag_body(array),
                attrs: Attributes::new(),
            });
        }

        if !options.log_only {
            let check_name = check_procedure_name(kind, array_name);
            let check_params = log_check_params(array, kind, &options, false);
            let requires = self.strategy.check_access_requires(array, kind, &options);
            context.race_checking_procedure(&check_name, || {
                let mut proc = Procedure::new(check_name.clone());
                proc.in_params = check_params.clone();
                proc.requires = requires.clone();
                proc
            });
            context.restrict_to_thread_2(check_name);
        }
        Ok(())
    }
}

fn conjoin(a: &Expr, b: &Expr) -> Expr {
    if *a == Expr::tru() {
        b.clone()
    } else {
        Expr::and(a.clone(), b.clone())
    }
}

fn bool_param(name: &str) -> Param {
    Param {
        name: name.to_string(),
        ty: Type::Bool,
    }
}

fn typed_param(name: &str, ty: Type) -> Param {
    Param {
        name: name.to_string(),
        ty,
    }
}

/// Parameter list of a log (`with_value_old`) or check procedure:
/// predicate, offset, then the value parameters benign tracking adds.
fn log_check_params(
    array: &SharedArray,
    kind: AccessKind,
    options: &InstrumentationOptions,
    with_value_old: bool,
) -> Vec<Param> {
    let mut params = vec![
        bool_param(PRED_PARAM),
        typed_param(OFFSET_PARAM, array.index_ty.clone()),
    ];
    if options.benign_tracking && kind.is_read_or_write() {
        params.push(typed_param(VALUE_PARAM, array.elem_ty.clone()));
        if with_value_old && kind == AccessKind::Write {
            params.push(typed_param(VALUE_OLD_PARAM, array.elem_ty.clone()));
        }
    }
    params
}

fn written_shadow_vars(
    array: &SharedArray,
    kind: AccessKind,
    options: &InstrumentationOptions,
) -> Vec<String> {
    let mut vars = vec![
        has_occurred_var(kind, &array.name),
        offset_var(kind, &array.name),
    ];
    if options.benign_tracking && kind.is_read_or_write() {
        vars.push(value_var(kind, &array.name));
    }
    if options.benign_tracking && kind == AccessKind::Write {
        vars.push(value_old_var(&array.name));
        vars.push(benign_flag_var(&array.name));
    }
    vars
}

fn ensure_shadow_vars(
    context: &mut RaceCheckContext,
    array: &SharedArray,
    kind: AccessKind,
    options: &InstrumentationOptions,
) {
    context.register_shadow_var(Variable {
        name: has_occurred_var(kind, &array.name),
        ty: Type::Bool,
    });
    context.register_shadow_var(Variable {
        name: offset_var(kind, &array.name),
        ty: array.index_ty.clone(),
    });
    if options.benign_tracking && kind.is_read_or_write() {
        context.register_shadow_var(Variable {
            name: value_var(kind, &array.name),
            ty: array.elem_ty.clone(),
        });
    }
    if options.benign_tracking && kind == AccessKind::Write {
        context.register_shadow_var(Variable {
            name: value_old_var(&array.name),
            ty: array.elem_ty.clone(),
        });
        context.register_shadow_var(Variable {
            name: benign_flag_var(&array.name),
            ty: Type::Bool,
        });
    }
}

/// Kernel entry procedures start with no pending access on any instrumented
/// array.
fn add_kernel_preconditions(program: &mut Program, context: &RaceCheckContext) {
    let kernels: Vec<String> = program
        .kernel_procedures()
        .map(|p| p.name.clone())
        .collect();
    let pairs: Vec<(String, AccessKind)> = context
        .instrumented_pairs()
        .map(|(a, k)| (a.to_string(), k))
        .collect();
    for kernel in kernels {
        if let Some(proc) = program.procedure_mut(&kernel) {
            for (array, kind) in &pairs {
                proc.requires.push(Requires::plain(Expr::not(Expr::ident(
                    has_occurred_var(*kind, array),
                ))));
            }
        }
    }
}

/// The shadow-state resets a barrier performs for one array: under the reset
/// condition no access is pending afterwards. A group barrier only
/// synchronizes threads of one group, so for global arrays the reset is
/// additionally guarded by the two modeled threads sharing a group.
pub fn barrier_reset_statements(array: &SharedArray, reset: &Expr) -> Vec<Cmd> {
    let antecedent = match array.scope {
        kernrace_ivl::ast::ArrayScope::Global => {
            Expr::and(reset.clone(), gpu::threads_in_same_group())
        }
        kernrace_ivl::ast::ArrayScope::GroupShared => reset.clone(),
    };
    AccessKind::ALL
        .iter()
        .map(|&kind| {
            Cmd::assume(Expr::imp(
                antecedent.clone(),
                Expr::not(Expr::ident(has_occurred_var(kind, &array.name))),
            ))
        })
        .collect()
}
