//! Variable-definition analysis.
//!
//! Maps each variable that is assigned exactly once in an implementation to
//! its defining expression, and substitutes definitions transitively. The
//! candidate synthesizer uses this to close offset expressions over the
//! thread-hierarchy constants before pattern matching.

use indexmap::{IndexMap, IndexSet};

use crate::ast::{AssignTarget, Cmd, Expr, Implementation, Program, Stmt};
use crate::gpu;

/// Maximum substitution depth; definitions deeper than this (or cyclic ones)
/// fail the substitution.
const MAX_SUBST_DEPTH: usize = 16;

/// Result of a definition substitution.
#[derive(Debug, Clone)]
pub struct Subst {
    pub expr: Expr,
    /// All remaining identifiers are program constants or thread-hierarchy
    /// symbols, so the expression is loop-invariant.
    pub is_constant: bool,
}

#[derive(Debug, Clone, Default)]
pub struct VarDefAnalysis {
    defs: IndexMap<String, Expr>,
    constants: IndexSet<String>,
}

impl VarDefAnalysis {
    /// Build the analysis for one implementation.
    pub fn build(program: &Program, implementation: &Implementation) -> Self {
        let mut assign_counts: IndexMap<String, usize> = IndexMap::new();
        let mut last_def: IndexMap<String, Expr> = IndexMap::new();
        collect_defs(&implementation.body, &mut assign_counts, &mut last_def);

        let mut defs = IndexMap::new();
        for (name, count) in &assign_counts {
            if *count == 1 {
                if let Some(def) = last_def.get(name) {
                    defs.insert(name.clone(), def.clone());
                }
            }
        }

        let constants = program
            .constants
            .iter()
            .map(|c| c.name.clone())
            .collect();

        VarDefAnalysis { defs, constants }
    }

    /// The unique definition of a variable, if it has one.
    pub fn def_of(&self, name: &str) -> Option<&Expr> {
        self.defs.get(gpu::strip_thread_suffix(name))
    }

    fn is_constant_symbol(&self, name: &str) -> bool {
        self.constants.contains(gpu::strip_thread_suffix(name))
            || self.constants.contains(name)
            || gpu::is_thread_hierarchy_symbol(name)
    }

    /// Substitute definitions into the expression until no substitutable
    /// identifier remains. Returns `None` if substitution does not terminate
    /// within the depth bound (cyclic definitions). Identifiers without a
    /// definition are left in place; `is_constant` reports whether every
    /// remaining identifier is a constant symbol.
    pub fn subst_definitions(&self, expr: &Expr) -> Option<Subst> {
        let substituted = self.subst(expr, MAX_SUBST_DEPTH)?;
        let is_constant = substituted
            .idents()
            .iter()
            .all(|n| self.is_constant_symbol(n));
        Some(Subst {
            expr: substituted,
            is_constant,
        })
    }

    fn subst(&self, expr: &Expr, depth: usize) -> Option<Expr> {
        match expr {
            Expr::Literal(_) => Some(expr.clone()),
            Expr::Ident(n) => match self.def_of(n) {
                Some(def) => {
                    if depth == 0 {
                        return None;
                    }
                    self.subst(def, depth - 1)
                }
                None => Some(expr.clone()),
            },
            Expr::NAry { op, args } => {
                let args = args
                    .iter()
                    .map(|a| self.subst(a, depth))
                    .collect::<Option<Vec<_>>>()?;
                Some(Expr::NAry { op: *op, args })
            }
            Expr::Select { array, index } => Some(Expr::Select {
                array: array.clone(),
                index: Box::new(self.subst(index, depth)?),
            }),
        }
    }
}

fn collect_defs(
    stmts: &[Stmt],
    counts: &mut IndexMap<String, usize>,
    defs: &mut IndexMap<String, Expr>,
) {
    for stmt in stmts {
        match stmt {
            Stmt::Cmd(Cmd::Assign { targets, values }) => {
                for (target, value) in targets.iter().zip(values.iter()) {
                    if let AssignTarget::Simple(name) = target {
                        *counts.entry(name.clone()).or_insert(0) += 1;
                        defs.insert(name.clone(), value.clone());
                    }
                }
            }
            Stmt::Cmd(Cmd::Havoc { vars }) => {
                for v in vars {
                    *counts.entry(v.clone()).or_insert(0) += 1;
                }
            }
            Stmt::Cmd(Cmd::Call(call)) => {
                for out in &call.outs {
                    *counts.entry(out.clone()).or_insert(0) += 1;
                }
            }
            Stmt::Cmd(_) => {}
            Stmt::While(w) => collect_defs(&w.body, counts, defs),
            Stmt::If(i) => {
                collect_defs(&i.then_branch, counts, defs);
                collect_defs(&i.else_branch, counts, defs);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Constant, Attributes, Type};

    fn program_with_constants(names: &[&str]) -> Program {
        Program {
            constants: names
                .iter()
                .map(|n| Constant {
                    name: n.to_string(),
                    ty: Type::Bv(32),
                    attrs: Attributes::new(),
                })
                .collect(),
            ..Program::default()
        }
    }

    fn implementation_with_body(body: Vec<Stmt>) -> Implementation {
        Implementation {
            name: "k".into(),
            in_params: Vec::new(),
            out_params: Vec::new(),
            locals: Vec::new(),
            body,
            attrs: Attributes::new(),
        }
    }

    #[test]
    fn single_assignment_yields_definition() {
        let program = program_with_constants(&[]);
        let imp = implementation_with_body(vec![Stmt::Cmd(Cmd::assign(
            AssignTarget::Simple("base".into()),
            Expr::mul(Expr::ident(gpu::GROUP_ID_X), Expr::bv32(8)),
        ))]);
        let analysis = VarDefAnalysis::build(&program, &imp);

        let s = analysis
            .subst_definitions(&Expr::ident("base"))
            .expect("substitution terminates");
        assert_eq!(s.expr, Expr::mul(Expr::ident(gpu::GROUP_ID_X), Expr::bv32(8)));
        assert!(s.is_constant);
    }

    #[test]
    fn reassigned_variable_has_no_definition() {
        let program = program_with_constants(&[]);
        let imp = implementation_with_body(vec![
            Stmt::Cmd(Cmd::assign(AssignTarget::Simple("i".into()), Expr::bv32(0))),
            Stmt::Cmd(Cmd::assign(
                AssignTarget::Simple("i".into()),
                Expr::add(Expr::ident("i"), Expr::bv32(1)),
            )),
        ]);
        let analysis = VarDefAnalysis::build(&program, &imp);
        assert!(analysis.def_of("i").is_none());

        let s = analysis
            .subst_definitions(&Expr::ident("i"))
            .expect("open identifiers are left in place");
        assert_eq!(s.expr, Expr::ident("i"));
        assert!(!s.is_constant);
    }

    #[test]
    fn transitive_substitution_closes_over_constants() {
        let program = program_with_constants(&["stride"]);
        let imp = implementation_with_body(vec![
            Stmt::Cmd(Cmd::assign(
                AssignTarget::Simple("a".into()),
                Expr::mul(Expr::ident("stride"), Expr::ident(gpu::LOCAL_ID_X)),
            )),
            Stmt::Cmd(Cmd::assign(
                AssignTarget::Simple("b".into()),
                Expr::add(Expr::ident("a"), Expr::ident("stride")),
            )),
        ]);
        let analysis = VarDefAnalysis::build(&program, &imp);
        let s = analysis
            .subst_definitions(&Expr::ident("b"))
            .expect("substitution terminates");
        assert!(s.is_constant);
        assert_eq!(
            s.expr,
            Expr::add(
                Expr::mul(Expr::ident("stride"), Expr::ident(gpu::LOCAL_ID_X)),
                Expr::ident("stride"),
            )
        );
    }
}
