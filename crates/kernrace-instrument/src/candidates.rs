//! Candidate-invariant synthesis.
//!
//! After instrumentation, every loop is inspected for shadow-state facts
//! worth conjecturing: that no access of a kind occurred, that accessed
//! offsets stay within one work-group's block, that they follow a
//! thread-affine range, or that they satisfy a small predicate set. The
//! matchers are independent functions returning `Option`, tried in order;
//! an unmatched shape yields no candidate and never an error.

use indexmap::IndexSet;
use tracing::info;

use kernrace_ivl::analysis::VarDefAnalysis;
use kernrace_ivl::ast::{
    Attributes, Cmd, Ensures, Expr, InferenceStage, Invariant, Literal, Op, Program, Requires,
    Stmt, WhileStmt,
};
use kernrace_ivl::gpu;
use kernrace_ivl::region::{flatten_commands, Region};

use crate::access::AccessKind;
use crate::context::{has_occurred_var, log_procedure_name, offset_var, RaceCheckContext};

/// Attribute marking a procedure as a group barrier.
pub const BARRIER_ATTR: &str = "barrier";

const TAG_LOWER_BOUND_BLOCK: &str = "accessLowerBoundBlock";
const TAG_UPPER_BOUND_BLOCK: &str = "accessUpperBoundBlock";
const TAG_RANGE_C_TIMES_LID: &str = "accessedOffsetInRangeCTimesLid";
const TAG_RANGE_C_TIMES_GID: &str = "accessedOffsetInRangeCTimesGid";
const TAG_OFFSET_PREDICATES: &str = "accessedOffsetsSatisfyPredicates";
const TAG_OFFSET_IS_THREAD_ID: &str = "accessedOffsetIsThreadId";

pub struct CandidateInvariantSynthesizer;

impl CandidateInvariantSynthesizer {
    /// Attach candidate invariants to every loop and candidate
    /// requires/ensures to every non-synthesized procedure, for each
    /// instrumented (array, kind) pair.
    pub fn synthesize(program: &mut Program, context: &mut RaceCheckContext) {
        let pairs: Vec<(String, AccessKind)> = context
            .instrumented_pairs()
            .map(|(a, k)| (a.to_string(), k))
            .collect();

        let mut imps = std::mem::take(&mut program.implementations);
        for imp in &mut imps {
            let analysis = VarDefAnalysis::build(program, imp);
            let mut body = std::mem::take(&mut imp.body);
            visit_loops(&mut body, program, context, &analysis, &pairs);
            imp.body = body;
        }
        program.implementations = imps;

        add_procedure_candidates(program, context, &pairs);
        info!(
            candidates = context.candidate_count(),
            "candidate synthesis complete"
        );
    }
}

fn visit_loops(
    stmts: &mut [Stmt],
    program: &Program,
    context: &mut RaceCheckContext,
    analysis: &VarDefAnalysis,
    pairs: &[(String, AccessKind)],
) {
    for stmt in stmts {
        match stmt {
            Stmt::While(w) => {
                visit_loops(&mut w.body, program, context, analysis, pairs);
                loop_candidates(w, program, context, analysis, pairs);
            }
            Stmt::If(i) => {
                visit_loops(&mut i.then_branch, program, context, analysis, pairs);
                visit_loops(&mut i.else_branch, program, context, analysis, pairs);
            }
            Stmt::Cmd(_) => {}
        }
    }
}

fn loop_candidates(
    w: &mut WhileStmt,
    program: &Program,
    context: &mut RaceCheckContext,
    analysis: &VarDefAnalysis,
    pairs: &[(String, AccessKind)],
) {
    let modset = Region::modified_vars(&*w, program);
    let has_barrier = flatten_commands(&w.body).iter().any(|c| match c {
        Cmd::Call(call) => program
            .procedure(&call.callee)
            .is_some_and(|p| p.attrs.has(BARRIER_ATTR)),
        _ => false,
    });
    let guard = guard_bound(&w.guard, analysis, 4);

    let mut invariants = Vec::new();
    for (array, kind) in pairs {
        let has = Expr::ident(has_occurred_var(*kind, array));
        let off = Expr::ident(offset_var(*kind, array));

        // A no-access conjecture is hopeless unless the loop both touches
        // the shadow state and synchronizes on a barrier.
        if has_barrier && modset.contains(&has_occurred_var(*kind, array)) {
            let tag = format!("no{}", kind.to_string().to_lowercase());
            let candidate = context.fresh_candidate(&tag, InferenceStage::Basic);
            invariants.push(Invariant {
                expr: Expr::not(has.clone()),
                candidate: Some(candidate),
            });
        }

        let offsets = offsets_accessed(&w.body, *kind, array);

        for offset in &offsets {
            if let Some((lower, upper)) = block_bounded(offset, &modset, analysis) {
                let candidate =
                    context.fresh_candidate(TAG_LOWER_BOUND_BLOCK, InferenceStage::AccessPattern);
                invariants.push(Invariant {
                    expr: Expr::imp(has.clone(), Expr::sle(lower, off.clone())),
                    candidate: Some(candidate),
                });
                let candidate =
                    context.fresh_candidate(TAG_UPPER_BOUND_BLOCK, InferenceStage::AccessPattern);
                invariants.push(Invariant {
                    expr: Expr::imp(has.clone(), Expr::slt(off.clone(), upper)),
                    candidate: Some(candidate),
                });
            }
        }

        if let Some((sym, bound)) = &guard {
            for offset in &offsets {
                if let Some((id, tag)) = thread_affine(offset, sym, bound, analysis) {
                    let stride = Expr::mul(bound.clone(), id);
                    let candidate = context.fresh_candidate(tag, InferenceStage::AccessPattern);
                    invariants.push(Invariant {
                        expr: Expr::imp(
                            has.clone(),
                            Expr::and(
                                Expr::sle(stride.clone(), off.clone()),
                                Expr::slt(off.clone(), Expr::add(stride, bound.clone())),
                            ),
                        ),
                        candidate: Some(candidate),
                    });
                }
            }
        }

        let predicates: Vec<Expr> = offsets
            .iter()
            .filter_map(|o| offset_predicate(o, &off, analysis))
            .collect();
        if !predicates.is_empty() {
            let candidate =
                context.fresh_candidate(TAG_OFFSET_PREDICATES, InferenceStage::AccessPattern);
            invariants.push(Invariant {
                expr: Expr::imp(has.clone(), Expr::or_all(predicates)),
                candidate: Some(candidate),
            });
        }
    }
    w.invariants.extend(invariants);
}

/// The offset arguments of every log call for (kind, array) in the
/// statements, deduplicated structurally, in program order.
pub fn offsets_accessed(stmts: &[Stmt], kind: AccessKind, array: &str) -> Vec<Expr> {
    let callee = log_procedure_name(kind, array);
    let mut offsets: Vec<Expr> = Vec::new();
    for cmd in flatten_commands(stmts) {
        if let Cmd::Call(call) = cmd {
            if call.callee == callee {
                if let Some(offset) = call.ins.get(1) {
                    if !offsets.contains(offset) {
                        offsets.push(offset.clone());
                    }
                }
            }
        }
    }
    offsets
}

/// Match `A + B` where exactly one side is invariant under the loop's
/// modified set and its substituted definition mentions exactly one group-id
/// symbol. Returns the block's lower bound and the upper bound with the
/// group id advanced by one.
fn block_bounded(
    offset: &Expr,
    modset: &IndexSet<String>,
    analysis: &VarDefAnalysis,
) -> Option<(Expr, Expr)> {
    let Expr::NAry { op: Op::Add, args } = offset else {
        return None;
    };
    if args.len() != 2 {
        return None;
    }
    let invariant = |e: &Expr| e.idents().iter().all(|n| !modset.contains(n));
    let side = match (invariant(&args[0]), invariant(&args[1])) {
        (true, false) => &args[0],
        (false, true) => &args[1],
        _ => return None,
    };
    let subst = analysis.subst_definitions(side)?;
    let group_ids: IndexSet<String> = subst
        .expr
        .idents()
        .into_iter()
        .filter(|n| gpu::is_group_id(n))
        .collect();
    if group_ids.len() != 1 {
        return None;
    }
    let gid = group_ids.first()?.clone();
    let next_block = subst
        .expr
        .substitute(&gid, &Expr::add(Expr::ident(gid.clone()), Expr::bv32(1)));
    Some((subst.expr, next_block))
}

/// Recover (loop symbol, bound) from a guard of the shape `i < C`, a negated
/// `i > C`, or either shape reached through double negation, a duplicated
/// conjunct pair, or the guard variable's definition.
fn guard_bound(guard: &Expr, analysis: &VarDefAnalysis, depth: usize) -> Option<(String, Expr)> {
    if depth == 0 {
        return None;
    }
    match guard {
        Expr::NAry { op, args } if args.len() == 2 && matches!(op, Op::Slt | Op::Ult) => {
            match &args[0] {
                Expr::Ident(i) => Some((i.clone(), args[1].clone())),
                _ => None,
            }
        }
        Expr::NAry { op: Op::Not, args } if args.len() == 1 => match &args[0] {
            Expr::NAry { op, args: inner }
                if inner.len() == 2 && matches!(op, Op::Sgt | Op::Ugt) =>
            {
                match &inner[0] {
                    Expr::Ident(i) => Some((i.clone(), inner[1].clone())),
                    _ => None,
                }
            }
            Expr::NAry { op: Op::Not, args: inner } if inner.len() == 1 => {
                guard_bound(&inner[0], analysis, depth - 1)
            }
            _ => None,
        },
        Expr::NAry { op: Op::And, args } if args.len() == 2 && args[0] == args[1] => {
            guard_bound(&args[0], analysis, depth - 1)
        }
        Expr::Ident(n) => {
            let def = analysis.def_of(n)?.clone();
            guard_bound(&def, analysis, depth - 1)
        }
        _ => None,
    }
}

/// Match `i + id·C` (either operand order) against the loop symbol and
/// bound, for the local or global thread identifier.
fn thread_affine(
    offset: &Expr,
    sym: &str,
    bound: &Expr,
    analysis: &VarDefAnalysis,
) -> Option<(Expr, &'static str)> {
    let Expr::NAry { op: Op::Add, args } = offset else {
        return None;
    };
    if args.len() != 2 {
        return None;
    }
    let scaled = if matches!(&args[0], Expr::Ident(n) if n == sym) {
        &args[1]
    } else if matches!(&args[1], Expr::Ident(n) if n == sym) {
        &args[0]
    } else {
        return None;
    };
    let Expr::NAry { op: Op::Mul, args: factors } = scaled else {
        return None;
    };
    if factors.len() != 2 {
        return None;
    }
    let id = if &factors[1] == bound {
        &factors[0]
    } else if &factors[0] == bound {
        &factors[1]
    } else {
        return None;
    };
    if gpu::is_local_id(id, analysis) {
        Some((Expr::ident(gpu::LOCAL_ID_X), TAG_RANGE_C_TIMES_LID))
    } else if gpu::is_global_id(id, analysis) {
        Some((gpu::global_id_expr(), TAG_RANGE_C_TIMES_GID))
    } else {
        None
    }
}

/// The pointwise predicate abstracting one logged offset: an equality for a
/// constant definition, a stride constraint otherwise.
fn offset_predicate(offset: &Expr, off_var: &Expr, analysis: &VarDefAnalysis) -> Option<Expr> {
    let subst = analysis.subst_definitions(offset)?;
    if subst.is_constant {
        return Some(Expr::eq(off_var.clone(), subst.expr));
    }
    let is_constant = |e: &Expr| {
        analysis
            .subst_definitions(e)
            .map(|s| s.is_constant)
            .unwrap_or(false)
    };
    StrideConstraint::from_expr(&subst.expr, &is_constant).maybe_build_predicate(off_var)
}

/// Arithmetic-progression abstraction of an offset expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrideConstraint {
    Bottom,
    Eq(Expr),
    Mod { stride: Expr, phase: Expr },
}

impl StrideConstraint {
    pub fn from_expr(expr: &Expr, is_constant: &dyn Fn(&Expr) -> bool) -> Self {
        if is_constant(expr) {
            return StrideConstraint::Eq(expr.clone());
        }
        match expr {
            Expr::NAry { op: Op::Add, args } if args.len() == 2 => StrideConstraint::join_add(
                StrideConstraint::from_expr(&args[0], is_constant),
                StrideConstraint::from_expr(&args[1], is_constant),
            ),
            Expr::NAry { op: Op::Mul, args } if args.len() == 2 => {
                if is_constant(&args[0]) {
                    StrideConstraint::Mod {
                        stride: args[0].clone(),
                        phase: Expr::bv32(0),
                    }
                } else if is_constant(&args[1]) {
                    StrideConstraint::Mod {
                        stride: args[1].clone(),
                        phase: Expr::bv32(0),
                    }
                } else {
                    StrideConstraint::Bottom
                }
            }
            _ => StrideConstraint::Bottom,
        }
    }

    fn join_add(a: StrideConstraint, b: StrideConstraint) -> Self {
        match (a, b) {
            (StrideConstraint::Eq(e), StrideConstraint::Mod { stride, phase })
            | (StrideConstraint::Mod { stride, phase }, StrideConstraint::Eq(e)) => {
                StrideConstraint::Mod {
                    stride,
                    phase: add_phase(phase, e),
                }
            }
            _ => StrideConstraint::Bottom,
        }
    }

    /// The predicate over the shadow offset variable, if the constraint is
    /// informative. Strides of 0 or 1 constrain nothing.
    pub fn maybe_build_predicate(&self, offset: &Expr) -> Option<Expr> {
        match self {
            StrideConstraint::Bottom => None,
            StrideConstraint::Eq(e) => Some(Expr::eq(offset.clone(), e.clone())),
            StrideConstraint::Mod { stride, phase } => {
                if matches!(stride, Expr::Literal(Literal::Bv { value: 0 | 1, .. })) {
                    return None;
                }
                let shifted = if is_zero(phase) {
                    offset.clone()
                } else {
                    Expr::sub(offset.clone(), phase.clone())
                };
                Some(Expr::eq(
                    Expr::modulo(shifted, stride.clone()),
                    Expr::bv32(0),
                ))
            }
        }
    }
}

fn add_phase(phase: Expr, addend: Expr) -> Expr {
    if is_zero(&phase) {
        addend
    } else {
        Expr::add(phase, addend)
    }
}

fn is_zero(e: &Expr) -> bool {
    matches!(e, Expr::Literal(Literal::Bv { value: 0, .. }))
}

/// Candidate requires/ensures on every non-synthesized procedure with an
/// implementation: no pending access, and accessed-offset-equals-local-id.
fn add_procedure_candidates(
    program: &mut Program,
    context: &mut RaceCheckContext,
    pairs: &[(String, AccessKind)],
) {
    let targets: Vec<String> = program
        .implementations
        .iter()
        .filter(|imp| !is_synthesized(&imp.name))
        .map(|imp| imp.name.clone())
        .collect();

    for name in targets {
        let accessed: Vec<(String, AccessKind)> = {
            let Some(imp) = program.implementation(&name) else {
                continue;
            };
            pairs
                .iter()
                .filter(|(array, kind)| !offsets_accessed(&imp.body, *kind, array).is_empty())
                .cloned()
                .collect()
        };
        for (array, kind) in accessed {
            let has = Expr::ident(has_occurred_var(kind, &array));
            let off = Expr::ident(offset_var(kind, &array));
            let no_access_tag = format!("no{}", kind.to_string().to_lowercase());
            let thread_id = Expr::imp(
                has.clone(),
                Expr::eq(off, Expr::ident(gpu::LOCAL_ID_X)),
            );

            let req_no = context.fresh_candidate(&no_access_tag, InferenceStage::Basic);
            let ens_no = context.fresh_candidate(&no_access_tag, InferenceStage::Basic);
            let req_tid =
                context.fresh_candidate(TAG_OFFSET_IS_THREAD_ID, InferenceStage::AccessPattern);
            let ens_tid =
                context.fresh_candidate(TAG_OFFSET_IS_THREAD_ID, InferenceStage::AccessPattern);

            let Some(proc) = program.procedure_mut(&name) else {
                continue;
            };
            proc.requires.push(Requires {
                expr: Expr::not(has.clone()),
                candidate: Some(req_no),
                attrs: Attributes::new(),
            });
            proc.ensures.push(Ensures {
                expr: Expr::not(has.clone()),
                candidate: Some(ens_no),
                attrs: Attributes::new(),
            });
            proc.requires.push(Requires {
                expr: thread_id.clone(),
                candidate: Some(req_tid),
                attrs: Attributes::new(),
            });
            proc.ensures.push(Ensures {
                expr: thread_id,
                candidate: Some(ens_tid),
                attrs: Attributes::new(),
            });
        }
    }
}

fn is_synthesized(name: &str) -> bool {
    name.starts_with("_LOG_") || name.starts_with("_CHECK_") || name.starts_with("_UPDATE_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InstrumentationOptions;
    use kernrace_ivl::ast::{
        ArrayScope, AssignTarget, CallCmd, Implementation, Procedure, SharedArray, Type,
    };

    fn log_call(kind: AccessKind, array: &str, offset: Expr) -> Stmt {
        Stmt::Cmd(Cmd::Call(CallCmd {
            callee: log_procedure_name(kind, array),
            ins: vec![Expr::tru(), offset],
            outs: vec![],
            attrs: Attributes::new(),
        }))
    }

    fn program_with_loop(body: Vec<Stmt>, guard: Expr) -> Program {
        let mut program = Program::default();
        program.shared_arrays.push(SharedArray {
            name: "a".into(),
            index_ty: Type::Bv(32),
            elem_ty: Type::Bv(32),
            scope: ArrayScope::Global,
            read_only: false,
        });
        let mut log = Procedure::new(log_procedure_name(AccessKind::Write, "a"));
        log.modifies = vec![
            has_occurred_var(AccessKind::Write, "a"),
            offset_var(AccessKind::Write, "a"),
        ];
        program.procedures.push(log);
        program.procedures.push(Procedure::new("k"));
        program.implementations.push(Implementation {
            name: "k".into(),
            in_params: vec![],
            out_params: vec![],
            locals: vec![],
            body: vec![Stmt::While(WhileStmt {
                guard,
                invariants: vec![],
                body,
            })],
            attrs: Attributes::new(),
        });
        program
    }

    fn context_with_write() -> RaceCheckContext {
        let mut ctx = RaceCheckContext::new(InstrumentationOptions::default());
        ctx.mark_instrumented("a", AccessKind::Write);
        ctx
    }

    fn loop_invariants(program: &Program) -> Vec<Invariant> {
        match &program.implementation("k").unwrap().body[0] {
            Stmt::While(w) => w.invariants.clone(),
            other => panic!("unexpected statement: {other:?}"),
        }
    }

    fn candidate_with_tag<'a>(invariants: &'a [Invariant], tag: &str) -> Option<&'a Invariant> {
        invariants
            .iter()
            .find(|i| i.candidate.as_ref().is_some_and(|c| c.tag == tag))
    }

    #[test]
    fn thread_affine_offset_under_bounded_guard_yields_range_candidate() {
        let offset = Expr::add(
            Expr::ident("i"),
            Expr::mul(Expr::ident(gpu::LOCAL_ID_X), Expr::bv32(4)),
        );
        let mut program = program_with_loop(
            vec![log_call(AccessKind::Write, "a", offset)],
            Expr::slt(Expr::ident("i"), Expr::bv32(4)),
        );
        let mut ctx = context_with_write();
        CandidateInvariantSynthesizer::synthesize(&mut program, &mut ctx);

        let invariants = loop_invariants(&program);
        let inv = candidate_with_tag(&invariants, TAG_RANGE_C_TIMES_LID).unwrap();
        let off = Expr::ident(offset_var(AccessKind::Write, "a"));
        let stride = Expr::mul(Expr::bv32(4), Expr::ident(gpu::LOCAL_ID_X));
        let expected = Expr::imp(
            Expr::ident(has_occurred_var(AccessKind::Write, "a")),
            Expr::and(
                Expr::sle(stride.clone(), off.clone()),
                Expr::slt(off, Expr::add(stride, Expr::bv32(4))),
            ),
        );
        assert_eq!(inv.expr, expected);
    }

    #[test]
    fn group_bounded_offset_yields_lower_and_upper_block_candidates() {
        // Offset 8*gid + k with k varying in the loop.
        let offset = Expr::add(
            Expr::mul(Expr::bv32(8), Expr::ident(gpu::GROUP_ID_X)),
            Expr::ident("k"),
        );
        let body = vec![
            log_call(AccessKind::Write, "a", offset),
            Stmt::Cmd(Cmd::assign(
                AssignTarget::Simple("k".into()),
                Expr::add(Expr::ident("k"), Expr::bv32(1)),
            )),
        ];
        let mut program = program_with_loop(body, Expr::ident("c"));
        let mut ctx = context_with_write();
        CandidateInvariantSynthesizer::synthesize(&mut program, &mut ctx);

        let invariants = loop_invariants(&program);
        let off = Expr::ident(offset_var(AccessKind::Write, "a"));
        let has = Expr::ident(has_occurred_var(AccessKind::Write, "a"));
        let base = Expr::mul(Expr::bv32(8), Expr::ident(gpu::GROUP_ID_X));
        let next = Expr::mul(
            Expr::bv32(8),
            Expr::add(Expr::ident(gpu::GROUP_ID_X), Expr::bv32(1)),
        );

        let lower = candidate_with_tag(&invariants, TAG_LOWER_BOUND_BLOCK).unwrap();
        assert_eq!(lower.expr, Expr::imp(has.clone(), Expr::sle(base, off.clone())));
        let upper = candidate_with_tag(&invariants, TAG_UPPER_BOUND_BLOCK).unwrap();
        assert_eq!(upper.expr, Expr::imp(has, Expr::slt(off, next)));
    }

    #[test]
    fn constant_offsets_collapse_to_an_equality_predicate() {
        // Three log sites, all at literal offset zero.
        let body = vec![
            log_call(AccessKind::Write, "a", Expr::bv32(0)),
            log_call(AccessKind::Write, "a", Expr::bv32(0)),
            log_call(AccessKind::Write, "a", Expr::bv32(0)),
        ];
        let mut program = program_with_loop(body, Expr::ident("c"));
        let mut ctx = context_with_write();
        CandidateInvariantSynthesizer::synthesize(&mut program, &mut ctx);

        let invariants = loop_invariants(&program);
        let inv = candidate_with_tag(&invariants, TAG_OFFSET_PREDICATES).unwrap();
        let expected = Expr::imp(
            Expr::ident(has_occurred_var(AccessKind::Write, "a")),
            Expr::eq(
                Expr::ident(offset_var(AccessKind::Write, "a")),
                Expr::bv32(0),
            ),
        );
        assert_eq!(inv.expr, expected);
    }

    #[test]
    fn non_constant_offset_falls_back_to_a_stride_predicate() {
        // m is defined once as 4*j with j loop-varying (reassigned, so it
        // stays open): no equality, but the stride shape is recoverable.
        let body = vec![
            Stmt::Cmd(Cmd::assign(
                AssignTarget::Simple("m".into()),
                Expr::mul(Expr::bv32(4), Expr::ident("j")),
            )),
            Stmt::Cmd(Cmd::assign(
                AssignTarget::Simple("j".into()),
                Expr::add(Expr::ident("j"), Expr::bv32(1)),
            )),
            Stmt::Cmd(Cmd::assign(
                AssignTarget::Simple("j".into()),
                Expr::add(Expr::ident("j"), Expr::bv32(1)),
            )),
            log_call(AccessKind::Write, "a", Expr::ident("m")),
        ];
        let mut program = program_with_loop(body, Expr::ident("c"));
        let mut ctx = context_with_write();
        CandidateInvariantSynthesizer::synthesize(&mut program, &mut ctx);

        let invariants = loop_invariants(&program);
        let inv = candidate_with_tag(&invariants, TAG_OFFSET_PREDICATES).unwrap();
        let expected = Expr::imp(
            Expr::ident(has_occurred_var(AccessKind::Write, "a")),
            Expr::eq(
                Expr::modulo(
                    Expr::ident(offset_var(AccessKind::Write, "a")),
                    Expr::bv32(4),
                ),
                Expr::bv32(0),
            ),
        );
        assert_eq!(inv.expr, expected);
    }

    #[test]
    fn no_access_candidate_requires_a_barrier_in_the_loop() {
        let mut barrier = Procedure::new("barrier");
        barrier.attrs = Attributes::single(BARRIER_ATTR);
        let barrier_call = Stmt::Cmd(Cmd::Call(CallCmd {
            callee: "barrier".into(),
            ins: vec![],
            outs: vec![],
            attrs: Attributes::new(),
        }));

        let with_barrier = vec![
            log_call(AccessKind::Write, "a", Expr::ident("i")),
            barrier_call.clone(),
        ];
        let mut program = program_with_loop(with_barrier, Expr::ident("c"));
        program.procedures.push(barrier.clone());
        let mut ctx = context_with_write();
        CandidateInvariantSynthesizer::synthesize(&mut program, &mut ctx);
        assert!(candidate_with_tag(&loop_invariants(&program), "nowrite").is_some());

        let without_barrier = vec![log_call(AccessKind::Write, "a", Expr::ident("i"))];
        let mut program = program_with_loop(without_barrier, Expr::ident("c"));
        let mut ctx = context_with_write();
        CandidateInvariantSynthesizer::synthesize(&mut program, &mut ctx);
        assert!(candidate_with_tag(&loop_invariants(&program), "nowrite").is_none());
    }

    #[test]
    fn negated_greater_than_guard_is_recognized() {
        let analysis = VarDefAnalysis::default();
        let guard = Expr::not(Expr::sgt(Expr::ident("i"), Expr::bv32(16)));
        let (sym, bound) = guard_bound(&guard, &analysis, 4).unwrap();
        assert_eq!(sym, "i");
        assert_eq!(bound, Expr::bv32(16));
    }

    #[test]
    fn procedure_scope_candidates_cover_accessed_pairs() {
        let mut program = program_with_loop(
            vec![log_call(AccessKind::Write, "a", Expr::ident("i"))],
            Expr::ident("c"),
        );
        let mut ctx = context_with_write();
        CandidateInvariantSynthesizer::synthesize(&mut program, &mut ctx);

        let proc = program.procedure("k").unwrap();
        assert_eq!(proc.requires.len(), 2);
        assert_eq!(proc.ensures.len(), 2);
        assert!(proc.requires.iter().all(|r| r.candidate.is_some()));
        let tags: Vec<_> = proc
            .requires
            .iter()
            .filter_map(|r| r.candidate.as_ref().map(|c| c.tag.as_str()))
            .collect();
        assert!(tags.contains(&"nowrite"));
        assert!(tags.contains(&TAG_OFFSET_IS_THREAD_ID));
    }
}
