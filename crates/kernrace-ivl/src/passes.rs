//! Program simplification and rewriting passes used by the inference
//! pipeline: check-call stripping, dead-variable elimination, mod-set
//! analysis, statement coalescing, attribute-driven inlining, loop
//! unrolling with state-label renumbering, and candidate-assignment
//! application.

use indexmap::{IndexMap, IndexSet};

use crate::ast::{
    AssignTarget, AttrValue, Attributes, Cmd, Expr, IfStmt, Implementation, Literal, Program,
    Stmt, Variable, WhileStmt,
};

/// Name prefix of synthesized check procedures.
pub const CHECK_PROCEDURE_PREFIX: &str = "_CHECK_";

/// Attribute carried by candidate asserts produced from unrolled loop
/// invariants; its value is the candidate name.
pub const CANDIDATE_ATTR: &str = "candidate";

const CAPTURE_STATE_ATTR: &str = "captureState";
const STATE_ID_ATTR: &str = "state_id";
const MAX_INLINE_ROUNDS: usize = 8;

/// Remove every call to a check procedure. Log calls and shadow state are
/// left in place so access patterns remain observable during invariant
/// discovery.
pub fn strip_check_calls(program: &mut Program) {
    for imp in &mut program.implementations {
        strip_checks_in(&mut imp.body);
    }
}

fn strip_checks_in(stmts: &mut Vec<Stmt>) {
    stmts.retain(|s| {
        !matches!(
            s,
            Stmt::Cmd(Cmd::Call(call)) if call.callee.starts_with(CHECK_PROCEDURE_PREFIX)
        )
    });
    for stmt in stmts {
        match stmt {
            Stmt::While(w) => strip_checks_in(&mut w.body),
            Stmt::If(i) => {
                strip_checks_in(&mut i.then_branch);
                strip_checks_in(&mut i.else_branch);
            }
            Stmt::Cmd(_) => {}
        }
    }
}

/// Remove global variables and per-implementation locals that no expression,
/// assignment target, havoc, or call references.
pub fn eliminate_dead_variables(program: &mut Program) {
    let mut used = IndexSet::new();
    for imp in &mut program.implementations {
        collect_used_stmts(&imp.body, &mut used);
    }
    for proc in &program.procedures {
        for r in &proc.requires {
            r.expr.collect_idents(&mut used);
        }
        for e in &proc.ensures {
            e.expr.collect_idents(&mut used);
        }
    }

    program.globals.retain(|g| used.contains(&g.name));
    for imp in &mut program.implementations {
        let mut body_used = IndexSet::new();
        collect_used_stmts(&imp.body, &mut body_used);
        imp.locals.retain(|l| body_used.contains(&l.name));
    }

    let live: IndexSet<String> = program
        .globals
        .iter()
        .map(|g| g.name.clone())
        .chain(program.shared_arrays.iter().map(|a| a.name.clone()))
        .collect();
    for proc in &mut program.procedures {
        proc.modifies.retain(|m| live.contains(m));
    }
}

fn collect_used_stmts(stmts: &[Stmt], used: &mut IndexSet<String>) {
    for stmt in stmts {
        match stmt {
            Stmt::Cmd(cmd) => collect_used_cmd(cmd, used),
            Stmt::While(w) => {
                w.guard.collect_idents(used);
                for inv in &w.invariants {
                    inv.expr.collect_idents(used);
                }
                collect_used_stmts(&w.body, used);
            }
            Stmt::If(i) => {
                i.guard.collect_idents(used);
                collect_used_stmts(&i.then_branch, used);
                collect_used_stmts(&i.else_branch, used);
            }
        }
    }
}

fn collect_used_cmd(cmd: &Cmd, used: &mut IndexSet<String>) {
    match cmd {
        Cmd::Assign { targets, values } => {
            for t in targets {
                match t {
                    AssignTarget::Simple(name) => {
                        used.insert(name.clone());
                    }
                    AssignTarget::MapStore { array, index } => {
                        used.insert(array.clone());
                        index.collect_idents(used);
                    }
                }
            }
            for v in values {
                v.collect_idents(used);
            }
        }
        Cmd::Call(call) => {
            for e in &call.ins {
                e.collect_idents(used);
            }
            used.extend(call.outs.iter().cloned());
        }
        Cmd::Assert { expr, .. } | Cmd::Assume { expr, .. } => expr.collect_idents(used),
        Cmd::Havoc { vars } => used.extend(vars.iter().cloned()),
    }
}

/// Recompute each procedure's modifies set from its implementation,
/// propagating through call chains to a fixed point.
pub fn do_mod_set_analysis(program: &mut Program) {
    let non_local: IndexSet<String> = program
        .globals
        .iter()
        .map(|g| g.name.clone())
        .chain(program.shared_arrays.iter().map(|a| a.name.clone()))
        .collect();

    let mut modsets: IndexMap<String, IndexSet<String>> = program
        .procedures
        .iter()
        .map(|p| (p.name.clone(), p.modifies.iter().cloned().collect()))
        .collect();

    loop {
        let mut changed = false;
        for imp in &program.implementations {
            let mut set = modsets.get(&imp.name).cloned().unwrap_or_default();
            let before = set.len();
            collect_modified(&imp.body, &non_local, &modsets, &mut set);
            if set.len() != before {
                changed = true;
            }
            modsets.insert(imp.name.clone(), set);
        }
        if !changed {
            break;
        }
    }

    for proc in &mut program.procedures {
        if let Some(set) = modsets.get(&proc.name) {
            proc.modifies = set.iter().cloned().collect();
        }
    }
}

fn collect_modified(
    stmts: &[Stmt],
    non_local: &IndexSet<String>,
    modsets: &IndexMap<String, IndexSet<String>>,
    out: &mut IndexSet<String>,
) {
    for stmt in stmts {
        match stmt {
            Stmt::Cmd(Cmd::Assign { targets, .. }) => {
                for t in targets {
                    let name = match t {
                        AssignTarget::Simple(n) => n,
                        AssignTarget::MapStore { array, .. } => array,
                    };
                    if non_local.contains(name) {
                        out.insert(name.clone());
                    }
                }
            }
            Stmt::Cmd(Cmd::Havoc { vars }) => {
                for v in vars {
                    if non_local.contains(v) {
                        out.insert(v.clone());
                    }
                }
            }
            Stmt::Cmd(Cmd::Call(call)) => {
                if let Some(callee_mods) = modsets.get(&call.callee) {
                    out.extend(callee_mods.iter().cloned());
                }
                for o in &call.outs {
                    if non_local.contains(o) {
                        out.insert(o.clone());
                    }
                }
            }
            Stmt::Cmd(_) => {}
            Stmt::While(w) => collect_modified(&w.body, non_local, modsets, out),
            Stmt::If(i) => {
                collect_modified(&i.then_branch, non_local, modsets, out);
                collect_modified(&i.else_branch, non_local, modsets, out);
            }
        }
    }
}

/// Structured analogue of block coalescing: splice conditionals with a
/// literal-true or literal-false guard, drop empty conditionals and loops
/// with a literal-false guard.
pub fn coalesce_statements(program: &mut Program) {
    for imp in &mut program.implementations {
        let body = std::mem::take(&mut imp.body);
        imp.body = coalesce(body);
    }
}

fn coalesce(stmts: Vec<Stmt>) -> Vec<Stmt> {
    let mut out = Vec::new();
    for stmt in stmts {
        match stmt {
            Stmt::If(i) => {
                let then_branch = coalesce(i.then_branch);
                let else_branch = coalesce(i.else_branch);
                match &i.guard {
                    Expr::Literal(Literal::Bool(true)) => out.extend(then_branch),
                    Expr::Literal(Literal::Bool(false)) => out.extend(else_branch),
                    _ if then_branch.is_empty() && else_branch.is_empty() => {}
                    _ => out.push(Stmt::If(IfStmt {
                        guard: i.guard,
                        then_branch,
                        else_branch,
                    })),
                }
            }
            Stmt::While(w) => {
                if matches!(w.guard, Expr::Literal(Literal::Bool(false))) {
                    continue;
                }
                out.push(Stmt::While(WhileStmt {
                    guard: w.guard,
                    invariants: w.invariants,
                    body: coalesce(w.body),
                }));
            }
            Stmt::Cmd(c) => out.push(Stmt::Cmd(c)),
        }
    }
    out
}

/// Inline calls to procedures carrying the `inline` attribute, bounded to a
/// fixed number of rounds.
pub fn inline_calls(program: &mut Program) {
    let inlinable: IndexSet<String> = program
        .procedures
        .iter()
        .filter(|p| p.attrs.has("inline"))
        .map(|p| p.name.clone())
        .collect();
    if inlinable.is_empty() {
        return;
    }
    let bodies: IndexMap<String, Implementation> = program
        .implementations
        .iter()
        .filter(|i| inlinable.contains(&i.name))
        .cloned()
        .map(|i| (i.name.clone(), i))
        .collect();

    for round in 0..MAX_INLINE_ROUNDS {
        let mut any = false;
        for imp in &mut program.implementations {
            let mut counter = 0usize;
            let body = std::mem::take(&mut imp.body);
            let (body, new_locals, inlined) =
                inline_in_stmts(body, &bodies, round, &mut counter);
            imp.body = body;
            imp.locals.extend(new_locals);
            any |= inlined;
        }
        if !any {
            break;
        }
    }
}

fn inline_in_stmts(
    stmts: Vec<Stmt>,
    bodies: &IndexMap<String, Implementation>,
    round: usize,
    counter: &mut usize,
) -> (Vec<Stmt>, Vec<Variable>, bool) {
    let mut out = Vec::new();
    let mut locals = Vec::new();
    let mut inlined = false;
    for stmt in stmts {
        match stmt {
            Stmt::Cmd(Cmd::Call(call)) if bodies.contains_key(&call.callee) => {
                let callee = &bodies[&call.callee];
                let prefix = format!("{}${}${}", call.callee, round, *counter);
                *counter += 1;
                inlined = true;

                let mut rename: IndexMap<String, String> = IndexMap::new();
                for p in callee
                    .in_params
                    .iter()
                    .chain(callee.out_params.iter())
                {
                    rename.insert(p.name.clone(), format!("{prefix}${}", p.name));
                }
                for l in &callee.locals {
                    rename.insert(l.name.clone(), format!("{prefix}${}", l.name));
                }

                for p in &callee.in_params {
                    locals.push(Variable {
                        name: rename[&p.name].clone(),
                        ty: p.ty.clone(),
                    });
                }
                for p in &callee.out_params {
                    locals.push(Variable {
                        name: rename[&p.name].clone(),
                        ty: p.ty.clone(),
                    });
                }
                for l in &callee.locals {
                    locals.push(Variable {
                        name: rename[&l.name].clone(),
                        ty: l.ty.clone(),
                    });
                }

                for (p, arg) in callee.in_params.iter().zip(call.ins.iter()) {
                    out.push(Stmt::Cmd(Cmd::assign(
                        AssignTarget::Simple(rename[&p.name].clone()),
                        arg.clone(),
                    )));
                }
                for s in &callee.body {
                    out.push(rename_stmt(s, &rename));
                }
                for (p, target) in callee.out_params.iter().zip(call.outs.iter()) {
                    out.push(Stmt::Cmd(Cmd::assign(
                        AssignTarget::Simple(target.clone()),
                        Expr::ident(rename[&p.name].clone()),
                    )));
                }
            }
            Stmt::Cmd(c) => out.push(Stmt::Cmd(c)),
            Stmt::While(w) => {
                let (body, inner_locals, did) = inline_in_stmts(w.body, bodies, round, counter);
                locals.extend(inner_locals);
                inlined |= did;
                out.push(Stmt::While(WhileStmt {
                    guard: w.guard,
                    invariants: w.invariants,
                    body,
                }));
            }
            Stmt::If(i) => {
                let (then_branch, then_locals, did_then) =
                    inline_in_stmts(i.then_branch, bodies, round, counter);
                let (else_branch, else_locals, did_else) =
                    inline_in_stmts(i.else_branch, bodies, round, counter);
                locals.extend(then_locals);
                locals.extend(else_locals);
                inlined |= did_then || did_else;
                out.push(Stmt::If(IfStmt {
                    guard: i.guard,
                    then_branch,
                    else_branch,
                }));
            }
        }
    }
    (out, locals, inlined)
}

fn rename_name(name: &str, rename: &IndexMap<String, String>) -> String {
    rename.get(name).cloned().unwrap_or_else(|| name.to_string())
}

fn rename_expr(expr: &Expr, rename: &IndexMap<String, String>) -> Expr {
    match expr {
        Expr::Literal(_) => expr.clone(),
        Expr::Ident(n) => Expr::Ident(rename_name(n, rename)),
        Expr::NAry { op, args } => Expr::NAry {
            op: *op,
            args: args.iter().map(|a| rename_expr(a, rename)).collect(),
        },
        Expr::Select { array, index } => Expr::Select {
            array: rename_name(array, rename),
            index: Box::new(rename_expr(index, rename)),
        },
    }
}

fn rename_stmt(stmt: &Stmt, rename: &IndexMap<String, String>) -> Stmt {
    match stmt {
        Stmt::Cmd(cmd) => Stmt::Cmd(match cmd {
            Cmd::Assign { targets, values } => Cmd::Assign {
                targets: targets
                    .iter()
                    .map(|t| match t {
                        AssignTarget::Simple(n) => AssignTarget::Simple(rename_name(n, rename)),
                        AssignTarget::MapStore { array, index } => AssignTarget::MapStore {
                            array: rename_name(array, rename),
                            index: rename_expr(index, rename),
                        },
                    })
                    .collect(),
                values: values.iter().map(|v| rename_expr(v, rename)).collect(),
            },
            Cmd::Call(call) => Cmd::Call(crate::ast::CallCmd {
                callee: call.callee.clone(),
                ins: call.ins.iter().map(|e| rename_expr(e, rename)).collect(),
                outs: call.outs.iter().map(|o| rename_name(o, rename)).collect(),
                attrs: call.attrs.clone(),
            }),
            Cmd::Assert { expr, attrs } => Cmd::Assert {
                expr: rename_expr(expr, rename),
                attrs: attrs.clone(),
            },
            Cmd::Assume { expr, attrs } => Cmd::Assume {
                expr: rename_expr(expr, rename),
                attrs: attrs.clone(),
            },
            Cmd::Havoc { vars } => Cmd::Havoc {
                vars: vars.iter().map(|v| rename_name(v, rename)).collect(),
            },
        }),
        Stmt::While(w) => Stmt::While(WhileStmt {
            guard: rename_expr(&w.guard, rename),
            invariants: w
                .invariants
                .iter()
                .map(|inv| crate::ast::Invariant {
                    expr: rename_expr(&inv.expr, rename),
                    candidate: inv.candidate.clone(),
                })
                .collect(),
            body: w.body.iter().map(|s| rename_stmt(s, rename)).collect(),
        }),
        Stmt::If(i) => Stmt::If(IfStmt {
            guard: rename_expr(&i.guard, rename),
            then_branch: i.then_branch.iter().map(|s| rename_stmt(s, rename)).collect(),
            else_branch: i.else_branch.iter().map(|s| rename_stmt(s, rename)).collect(),
        }),
    }
}

/// Unroll every loop to a fixed bound. Loop invariants become asserts at
/// each iteration head; candidate invariants keep their identity through a
/// `candidate` attribute so the assignment pass can still resolve them.
/// With `sound` set, the cut asserts the loop cannot iterate further;
/// otherwise further iterations are assumed away.
pub fn unroll_loops(program: &mut Program, bound: usize, sound: bool) {
    for imp in &mut program.implementations {
        let body = std::mem::take(&mut imp.body);
        imp.body = unroll_stmts(body, bound, sound);
    }
}

fn unroll_stmts(stmts: Vec<Stmt>, bound: usize, sound: bool) -> Vec<Stmt> {
    let mut out = Vec::new();
    for stmt in stmts {
        match stmt {
            Stmt::While(w) => {
                let body = unroll_stmts(w.body, bound, sound);
                out.extend(expand_loop(&w.guard, &w.invariants, &body, bound, sound));
            }
            Stmt::If(i) => out.push(Stmt::If(IfStmt {
                guard: i.guard,
                then_branch: unroll_stmts(i.then_branch, bound, sound),
                else_branch: unroll_stmts(i.else_branch, bound, sound),
            })),
            Stmt::Cmd(c) => out.push(Stmt::Cmd(c)),
        }
    }
    out
}

fn expand_loop(
    guard: &Expr,
    invariants: &[crate::ast::Invariant],
    body: &[Stmt],
    depth: usize,
    sound: bool,
) -> Vec<Stmt> {
    let mut out: Vec<Stmt> = invariants.iter().map(invariant_assert).collect();
    if depth == 0 {
        let exhausted = Expr::not(guard.clone());
        out.push(Stmt::Cmd(if sound {
            Cmd::assert(exhausted)
        } else {
            Cmd::assume(exhausted)
        }));
        return out;
    }
    let mut then_branch = body.to_vec();
    then_branch.extend(expand_loop(guard, invariants, body, depth - 1, sound));
    out.push(Stmt::If(IfStmt {
        guard: guard.clone(),
        then_branch,
        else_branch: Vec::new(),
    }));
    out
}

fn invariant_assert(inv: &crate::ast::Invariant) -> Stmt {
    let mut attrs = Attributes::new();
    if let Some(c) = &inv.candidate {
        attrs.add(CANDIDATE_ATTR, vec![AttrValue::String(c.name.clone())]);
    }
    Stmt::Cmd(Cmd::Assert {
        expr: inv.expr.clone(),
        attrs,
    })
}

/// Renumber `captureState` labels densely from zero, in program order, and
/// keep each check call's `state_id` attribute in sync with the capture
/// immediately preceding it. Unrolling clones loop bodies, so labels repeat
/// until this pass runs.
pub fn fix_state_ids(program: &mut Program) {
    let mut counter = 0usize;
    for imp in &mut program.implementations {
        let mut pending: Option<String> = None;
        fix_state_ids_in(&mut imp.body, &mut counter, &mut pending);
    }
}

fn fix_state_ids_in(stmts: &mut [Stmt], counter: &mut usize, pending: &mut Option<String>) {
    for stmt in stmts {
        match stmt {
            Stmt::Cmd(Cmd::Assume { attrs, .. }) if attrs.has(CAPTURE_STATE_ATTR) => {
                let label = format!("check_state_{}", *counter);
                *counter += 1;
                attrs.set_string(CAPTURE_STATE_ATTR, label.clone());
                *pending = Some(label);
            }
            Stmt::Cmd(Cmd::Call(call)) if call.attrs.has(STATE_ID_ATTR) => {
                if let Some(label) = pending.take() {
                    call.attrs.set_string(STATE_ID_ATTR, label);
                }
            }
            Stmt::Cmd(_) => {}
            Stmt::While(w) => fix_state_ids_in(&mut w.body, counter, pending),
            Stmt::If(i) => {
                fix_state_ids_in(&mut i.then_branch, counter, pending);
                fix_state_ids_in(&mut i.else_branch, counter, pending);
            }
        }
    }
}

/// Substitute the inference assignment into every candidate occurrence:
/// candidates resolved true become plain invariants, requires, ensures, or
/// asserts; candidates resolved false (or absent from the assignment) are
/// removed.
pub fn apply_assignment(program: &mut Program, assignment: &IndexMap<String, bool>) {
    let keep = |name: &str| assignment.get(name).copied().unwrap_or(false);

    for proc in &mut program.procedures {
        proc.requires.retain(|r| match &r.candidate {
            Some(c) => keep(&c.name),
            None => true,
        });
        for r in &mut proc.requires {
            r.candidate = None;
        }
        proc.ensures.retain(|e| match &e.candidate {
            Some(c) => keep(&c.name),
            None => true,
        });
        for e in &mut proc.ensures {
            e.candidate = None;
        }
    }

    for imp in &mut program.implementations {
        apply_assignment_stmts(&mut imp.body, assignment);
    }
}

fn apply_assignment_stmts(stmts: &mut Vec<Stmt>, assignment: &IndexMap<String, bool>) {
    let keep = |name: &str| assignment.get(name).copied().unwrap_or(false);
    stmts.retain(|s| match s {
        Stmt::Cmd(Cmd::Assert { attrs, .. }) => match attrs.find_string(CANDIDATE_ATTR) {
            Some(name) => keep(name),
            None => true,
        },
        _ => true,
    });
    for stmt in stmts {
        match stmt {
            Stmt::Cmd(Cmd::Assert { attrs, .. }) => {
                attrs.0.retain(|a| a.key != CANDIDATE_ATTR);
            }
            Stmt::Cmd(_) => {}
            Stmt::While(w) => {
                w.invariants.retain(|inv| match &inv.candidate {
                    Some(c) => keep(&c.name),
                    None => true,
                });
                for inv in &mut w.invariants {
                    inv.candidate = None;
                }
                apply_assignment_stmts(&mut w.body, assignment);
            }
            Stmt::If(i) => {
                apply_assignment_stmts(&mut i.then_branch, assignment);
                apply_assignment_stmts(&mut i.else_branch, assignment);
            }
        }
    }
}

/// Whether any candidate marker survives in the program.
pub fn has_unresolved_candidates(program: &Program) -> bool {
    for proc in &program.procedures {
        if proc.requires.iter().any(|r| r.candidate.is_some())
            || proc.ensures.iter().any(|e| e.candidate.is_some())
        {
            return true;
        }
    }
    program
        .implementations
        .iter()
        .any(|imp| stmts_have_candidates(&imp.body))
}

fn stmts_have_candidates(stmts: &[Stmt]) -> bool {
    stmts.iter().any(|s| match s {
        Stmt::Cmd(Cmd::Assert { attrs, .. }) => attrs.has(CANDIDATE_ATTR),
        Stmt::Cmd(_) => false,
        Stmt::While(w) => {
            w.invariants.iter().any(|inv| inv.candidate.is_some())
                || stmts_have_candidates(&w.body)
        }
        Stmt::If(i) => {
            stmts_have_candidates(&i.then_branch) || stmts_have_candidates(&i.else_branch)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        Candidate, CallCmd, InferenceStage, Invariant, Procedure, SharedArray, Type,
    };

    fn call(callee: &str) -> Stmt {
        Stmt::Cmd(Cmd::Call(CallCmd {
            callee: callee.into(),
            ins: vec![],
            outs: vec![],
            attrs: Attributes::new(),
        }))
    }

    fn implementation(name: &str, body: Vec<Stmt>) -> Implementation {
        Implementation {
            name: name.into(),
            in_params: vec![],
            out_params: vec![],
            locals: vec![],
            body,
            attrs: Attributes::new(),
        }
    }

    #[test]
    fn strip_check_calls_keeps_log_calls() {
        let mut program = Program {
            implementations: vec![implementation(
                "k",
                vec![
                    call("_LOG_WRITE_a"),
                    call("_CHECK_WRITE_a"),
                    Stmt::While(WhileStmt {
                        guard: Expr::tru(),
                        invariants: vec![],
                        body: vec![call("_CHECK_READ_a")],
                    }),
                ],
            )],
            ..Program::default()
        };
        strip_check_calls(&mut program);
        let cmds = crate::region::flatten_commands(&program.implementations[0].body);
        assert_eq!(cmds.len(), 1);
        assert!(matches!(cmds[0], Cmd::Call(c) if c.callee == "_LOG_WRITE_a"));
    }

    #[test]
    fn dead_globals_are_removed_and_referenced_ones_kept() {
        let mut program = Program {
            globals: vec![
                Variable {
                    name: "live".into(),
                    ty: Type::Bv(32),
                },
                Variable {
                    name: "dead".into(),
                    ty: Type::Bv(32),
                },
            ],
            implementations: vec![implementation(
                "k",
                vec![Stmt::Cmd(Cmd::assign(
                    AssignTarget::Simple("live".into()),
                    Expr::bv32(1),
                ))],
            )],
            ..Program::default()
        };
        eliminate_dead_variables(&mut program);
        let names: Vec<_> = program.globals.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["live"]);
    }

    #[test]
    fn mod_set_analysis_propagates_through_call_chains() {
        let mut program = Program {
            globals: vec![Variable {
                name: "g".into(),
                ty: Type::Bv(32),
            }],
            procedures: vec![
                Procedure::new("writer"),
                Procedure::new("caller"),
            ],
            implementations: vec![
                implementation(
                    "writer",
                    vec![Stmt::Cmd(Cmd::assign(
                        AssignTarget::Simple("g".into()),
                        Expr::bv32(0),
                    ))],
                ),
                implementation("caller", vec![call("writer")]),
            ],
            ..Program::default()
        };
        do_mod_set_analysis(&mut program);
        assert_eq!(program.procedure("writer").unwrap().modifies, vec!["g"]);
        assert_eq!(program.procedure("caller").unwrap().modifies, vec!["g"]);
    }

    #[test]
    fn coalesce_splices_literal_true_conditionals() {
        let mut program = Program {
            implementations: vec![implementation(
                "k",
                vec![
                    Stmt::If(IfStmt {
                        guard: Expr::tru(),
                        then_branch: vec![call("p")],
                        else_branch: vec![],
                    }),
                    Stmt::If(IfStmt {
                        guard: Expr::ident("c"),
                        then_branch: vec![],
                        else_branch: vec![],
                    }),
                ],
            )],
            ..Program::default()
        };
        coalesce_statements(&mut program);
        assert_eq!(program.implementations[0].body.len(), 1);
        assert!(matches!(&program.implementations[0].body[0], Stmt::Cmd(_)));
    }

    #[test]
    fn inline_substitutes_parameters_and_renames_locals() {
        let mut log = Procedure::new("_LOG_WRITE_a");
        log.attrs = Attributes::single("inline");
        log.in_params = vec![crate::ast::Param {
            name: "_offset".into(),
            ty: Type::Bv(32),
        }];
        let mut program = Program {
            globals: vec![Variable {
                name: "_WRITE_OFFSET_a".into(),
                ty: Type::Bv(32),
            }],
            procedures: vec![log],
            implementations: vec![
                Implementation {
                    name: "_LOG_WRITE_a".into(),
                    in_params: vec![crate::ast::Param {
                        name: "_offset".into(),
                        ty: Type::Bv(32),
                    }],
                    out_params: vec![],
                    locals: vec![],
                    body: vec![Stmt::Cmd(Cmd::assign(
                        AssignTarget::Simple("_WRITE_OFFSET_a".into()),
                        Expr::ident("_offset"),
                    ))],
                    attrs: Attributes::new(),
                },
                implementation(
                    "k",
                    vec![Stmt::Cmd(Cmd::Call(CallCmd {
                        callee: "_LOG_WRITE_a".into(),
                        ins: vec![Expr::bv32(4)],
                        outs: vec![],
                        attrs: Attributes::new(),
                    }))],
                ),
            ],
            ..Program::default()
        };
        inline_calls(&mut program);
        let k = program.implementation("k").unwrap();
        // Parameter binding assign plus the substituted body.
        assert_eq!(k.body.len(), 2);
        assert!(!k.locals.is_empty());
        match &k.body[1] {
            Stmt::Cmd(Cmd::Assign { targets, values }) => {
                assert_eq!(targets[0], AssignTarget::Simple("_WRITE_OFFSET_a".into()));
                assert!(matches!(&values[0], Expr::Ident(n) if n.contains("_offset")));
            }
            other => panic!("unexpected statement: {other:?}"),
        }
    }

    #[test]
    fn unroll_renumbers_state_labels_densely() {
        let mut check_attrs = Attributes::new();
        check_attrs.add_string("state_id", "check_state_7");
        let mut capture_attrs = Attributes::new();
        capture_attrs.add_string("captureState", "check_state_7");
        let body = vec![
            Stmt::Cmd(Cmd::Assume {
                expr: Expr::tru(),
                attrs: capture_attrs,
            }),
            Stmt::Cmd(Cmd::Call(CallCmd {
                callee: "_CHECK_WRITE_a".into(),
                ins: vec![],
                outs: vec![],
                attrs: check_attrs,
            })),
        ];
        let mut program = Program {
            implementations: vec![implementation(
                "k",
                vec![Stmt::While(WhileStmt {
                    guard: Expr::ident("c"),
                    invariants: vec![],
                    body,
                })],
            )],
            ..Program::default()
        };
        unroll_loops(&mut program, 2, false);
        fix_state_ids(&mut program);

        let mut labels = Vec::new();
        let mut call_labels = Vec::new();
        collect_labels(&program.implementations[0].body, &mut labels, &mut call_labels);
        assert_eq!(labels, vec!["check_state_0", "check_state_1"]);
        assert_eq!(call_labels, labels);
    }

    fn collect_labels(stmts: &[Stmt], captures: &mut Vec<String>, calls: &mut Vec<String>) {
        for s in stmts {
            match s {
                Stmt::Cmd(Cmd::Assume { attrs, .. }) => {
                    if let Some(l) = attrs.find_string("captureState") {
                        captures.push(l.to_string());
                    }
                }
                Stmt::Cmd(Cmd::Call(c)) => {
                    if let Some(l) = c.attrs.find_string("state_id") {
                        calls.push(l.to_string());
                    }
                }
                Stmt::Cmd(_) => {}
                Stmt::While(w) => collect_labels(&w.body, captures, calls),
                Stmt::If(i) => {
                    collect_labels(&i.then_branch, captures, calls);
                    collect_labels(&i.else_branch, captures, calls);
                }
            }
        }
    }

    #[test]
    fn apply_assignment_resolves_every_candidate_marker() {
        let candidate = |name: &str| Candidate {
            name: name.into(),
            tag: "noread".into(),
            stage: InferenceStage::Basic,
        };
        let mut program = Program {
            shared_arrays: vec![SharedArray {
                name: "a".into(),
                index_ty: Type::Bv(32),
                elem_ty: Type::Bv(32),
                scope: crate::ast::ArrayScope::Global,
                read_only: false,
            }],
            implementations: vec![implementation(
                "k",
                vec![Stmt::While(WhileStmt {
                    guard: Expr::ident("c"),
                    invariants: vec![
                        Invariant {
                            expr: Expr::ident("p"),
                            candidate: Some(candidate("_c0")),
                        },
                        Invariant {
                            expr: Expr::ident("q"),
                            candidate: Some(candidate("_c1")),
                        },
                    ],
                    body: vec![],
                })],
            )],
            ..Program::default()
        };
        let mut assignment = IndexMap::new();
        assignment.insert("_c0".to_string(), true);
        assignment.insert("_c1".to_string(), false);
        apply_assignment(&mut program, &assignment);

        assert!(!has_unresolved_candidates(&program));
        match &program.implementations[0].body[0] {
            Stmt::While(w) => {
                assert_eq!(w.invariants.len(), 1);
                assert_eq!(w.invariants[0].expr, Expr::ident("p"));
                assert!(w.invariants[0].candidate.is_none());
            }
            other => panic!("unexpected statement: {other:?}"),
        }
    }
}
