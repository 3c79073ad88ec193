//! Uniform region abstraction over loop bodies and procedure bodies.
//!
//! Candidate placement and offset-pattern search both consume regions: a
//! guard expression (`true` for a procedure body), the flattened command
//! sequence of the region, and the region's modified-variable set.

use indexmap::IndexSet;

use crate::ast::{AssignTarget, Cmd, Expr, Implementation, Program, Stmt, WhileStmt};

pub trait Region {
    /// The region's guard; `true` for a procedure body.
    fn guard(&self) -> Expr;

    /// All basic commands in the region, nested statements included, in
    /// program order.
    fn commands(&self) -> Vec<&Cmd>;

    /// Variables the region may modify: assignment and havoc targets plus
    /// the modifies sets of called procedures.
    fn modified_vars(&self, program: &Program) -> IndexSet<String> {
        let mut out = IndexSet::new();
        for cmd in self.commands() {
            match cmd {
                Cmd::Assign { targets, .. } => {
                    for t in targets {
                        match t {
                            AssignTarget::Simple(name) => {
                                out.insert(name.clone());
                            }
                            AssignTarget::MapStore { array, .. } => {
                                out.insert(array.clone());
                            }
                        }
                    }
                }
                Cmd::Havoc { vars } => {
                    out.extend(vars.iter().cloned());
                }
                Cmd::Call(call) => {
                    out.extend(call.outs.iter().cloned());
                    if let Some(proc) = program.procedure(&call.callee) {
                        out.extend(proc.modifies.iter().cloned());
                    }
                }
                Cmd::Assert { .. } | Cmd::Assume { .. } => {}
            }
        }
        out
    }
}

/// Flatten a statement sequence into its basic commands, in program order.
pub fn flatten_commands(stmts: &[Stmt]) -> Vec<&Cmd> {
    let mut out = Vec::new();
    collect(stmts, &mut out);
    out
}

fn collect<'a>(stmts: &'a [Stmt], out: &mut Vec<&'a Cmd>) {
    for stmt in stmts {
        match stmt {
            Stmt::Cmd(cmd) => out.push(cmd),
            Stmt::While(w) => collect(&w.body, out),
            Stmt::If(i) => {
                collect(&i.then_branch, out);
                collect(&i.else_branch, out);
            }
        }
    }
}

impl Region for WhileStmt {
    fn guard(&self) -> Expr {
        self.guard.clone()
    }

    fn commands(&self) -> Vec<&Cmd> {
        flatten_commands(&self.body)
    }
}

impl Region for Implementation {
    fn guard(&self) -> Expr {
        Expr::tru()
    }

    fn commands(&self) -> Vec<&Cmd> {
        flatten_commands(&self.body)
    }
}
