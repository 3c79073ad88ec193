//! Call-site literal specialization.
//!
//! A parameter that receives the same literal at every call site can be
//! constrained by a precondition, which lets downstream invariant inference
//! treat it as a constant.

use indexmap::IndexMap;

use kernrace_ivl::ast::{Cmd, Expr, Program, Requires};
use kernrace_ivl::region::flatten_commands;

pub struct CallSiteAnalyser;

impl CallSiteAnalyser {
    /// Add `param == literal` preconditions for every parameter position
    /// that is the same structural literal at all call sites.
    ///
    /// Single pass over the call sites visible in the input program:
    /// specialization-driven inlining may expose further call sites later,
    /// and those are not revisited.
    pub fn analyse(program: &mut Program) {
        let mut call_sites: IndexMap<String, Vec<Vec<Expr>>> = IndexMap::new();
        for imp in &program.implementations {
            for cmd in flatten_commands(&imp.body) {
                if let Cmd::Call(call) = cmd {
                    call_sites
                        .entry(call.callee.clone())
                        .or_default()
                        .push(call.ins.clone());
                }
            }
        }

        for (callee, sites) in &call_sites {
            let Some(proc) = program.procedure(callee) else {
                continue;
            };
            let params: Vec<String> = proc.in_params.iter().map(|p| p.name.clone()).collect();
            let mut specialized = Vec::new();
            for (position, param) in params.iter().enumerate() {
                if let Some(literal) = common_literal(sites, position) {
                    specialized.push(Requires::plain(Expr::eq(
                        Expr::ident(param.clone()),
                        literal,
                    )));
                }
            }
            if specialized.is_empty() {
                continue;
            }
            if let Some(proc) = program.procedure_mut(callee) {
                proc.requires.extend(specialized);
            }
        }
    }
}

/// The literal every site passes at `position`, if they all agree.
fn common_literal(sites: &[Vec<Expr>], position: usize) -> Option<Expr> {
    let mut common: Option<&Expr> = None;
    for site in sites {
        let arg = site.get(position)?;
        if !arg.is_literal() {
            return None;
        }
        match common {
            None => common = Some(arg),
            Some(seen) if seen == arg => {}
            Some(_) => return None,
        }
    }
    common.cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernrace_ivl::ast::{
        Attributes, CallCmd, Implementation, Param, Procedure, Stmt, Type,
    };

    fn call(callee: &str, ins: Vec<Expr>) -> Stmt {
        Stmt::Cmd(Cmd::Call(CallCmd {
            callee: callee.into(),
            ins,
            outs: vec![],
            attrs: Attributes::new(),
        }))
    }

    fn program_with_calls(sites: Vec<Vec<Expr>>) -> Program {
        let mut program = Program::default();
        let mut callee = Procedure::new("f");
        callee.in_params = vec![
            Param {
                name: "n".into(),
                ty: Type::Bv(32),
            },
            Param {
                name: "x".into(),
                ty: Type::Bv(32),
            },
        ];
        program.procedures.push(callee);
        program.procedures.push(Procedure::new("k"));
        program.implementations.push(Implementation {
            name: "k".into(),
            in_params: vec![],
            out_params: vec![],
            locals: vec![],
            body: sites.into_iter().map(|ins| call("f", ins)).collect(),
            attrs: Attributes::new(),
        });
        program
    }

    #[test]
    fn uniform_literal_argument_becomes_a_precondition() {
        let mut program = program_with_calls(vec![
            vec![Expr::bv32(5), Expr::ident("a")],
            vec![Expr::bv32(5), Expr::ident("b")],
        ]);
        CallSiteAnalyser::analyse(&mut program);

        let proc = program.procedure("f").unwrap();
        assert_eq!(proc.requires.len(), 1);
        assert_eq!(
            proc.requires[0].expr,
            Expr::eq(Expr::ident("n"), Expr::bv32(5))
        );
    }

    #[test]
    fn a_single_non_literal_site_disables_specialization() {
        let mut program = program_with_calls(vec![
            vec![Expr::bv32(5), Expr::bv32(1)],
            vec![Expr::ident("m"), Expr::bv32(1)],
        ]);
        CallSiteAnalyser::analyse(&mut program);

        let proc = program.procedure("f").unwrap();
        // Position 0 is mixed; position 1 is uniformly literal 1.
        assert_eq!(proc.requires.len(), 1);
        assert_eq!(
            proc.requires[0].expr,
            Expr::eq(Expr::ident("x"), Expr::bv32(1))
        );
    }

    #[test]
    fn disagreeing_literals_disable_specialization() {
        let mut program = program_with_calls(vec![
            vec![Expr::bv32(5), Expr::ident("a")],
            vec![Expr::bv32(6), Expr::ident("b")],
        ]);
        CallSiteAnalyser::analyse(&mut program);
        assert!(program.procedure("f").unwrap().requires.is_empty());
    }
}
