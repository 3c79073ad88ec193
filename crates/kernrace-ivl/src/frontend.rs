//! Program ingestion and emission.
//!
//! Kernel front ends hand programs over as a JSON artifact; `JsonFrontend`
//! decodes it, runs name resolution checks, and writes transformed programs
//! back out in the same format.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexSet;
use thiserror::Error;

use crate::ast::{Cmd, Program, Stmt};

#[derive(Debug, Error)]
pub enum FrontendError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed program artifact: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("{count} name resolution error(s) in {path}")]
    Resolution { path: PathBuf, count: usize },
}

/// A program source the pipeline can read from and write back to.
pub trait Frontend {
    /// Decode the program artifact.
    fn parse(&self) -> Result<Program, FrontendError>;

    /// Check that every called procedure and every dereferenced array is
    /// declared, and that procedure names are unique.
    fn resolve(&self, program: &Program) -> Result<(), FrontendError>;

    /// Write the program back out, either to the original location or to
    /// `out` when given.
    fn emit(&self, program: &Program, out: Option<&Path>) -> Result<(), FrontendError>;
}

/// Frontend over a JSON program artifact on disk.
#[derive(Debug, Clone)]
pub struct JsonFrontend {
    path: PathBuf,
}

impl JsonFrontend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFrontend { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> FrontendError {
        FrontendError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl Frontend for JsonFrontend {
    fn parse(&self) -> Result<Program, FrontendError> {
        let text = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        Ok(serde_json::from_str(&text)?)
    }

    fn resolve(&self, program: &Program) -> Result<(), FrontendError> {
        let count = resolution_errors(program);
        if count == 0 {
            Ok(())
        } else {
            Err(FrontendError::Resolution {
                path: self.path.clone(),
                count,
            })
        }
    }

    fn emit(&self, program: &Program, out: Option<&Path>) -> Result<(), FrontendError> {
        let target = out.unwrap_or(&self.path);
        let text = serde_json::to_string_pretty(program)?;
        fs::write(target, text).map_err(|e| FrontendError::Io {
            path: target.to_path_buf(),
            source: e,
        })
    }
}

/// Count of unresolved names and duplicate declarations in the program.
pub fn resolution_errors(program: &Program) -> usize {
    let mut errors = 0;

    let mut proc_names = IndexSet::new();
    for proc in &program.procedures {
        if !proc_names.insert(proc.name.as_str()) {
            errors += 1;
        }
    }

    let known_vars: IndexSet<&str> = program
        .globals
        .iter()
        .map(|g| g.name.as_str())
        .chain(program.shared_arrays.iter().map(|a| a.name.as_str()))
        .collect();

    for imp in &program.implementations {
        if !proc_names.contains(imp.name.as_str()) {
            errors += 1;
        }
        errors += body_errors(&imp.body, &proc_names, &known_vars, program);
    }
    errors
}

fn body_errors(
    stmts: &[Stmt],
    procs: &IndexSet<&str>,
    vars: &IndexSet<&str>,
    program: &Program,
) -> usize {
    let mut errors = 0;
    for stmt in stmts {
        match stmt {
            Stmt::Cmd(Cmd::Call(call)) => {
                if !procs.contains(call.callee.as_str()) {
                    errors += 1;
                }
            }
            Stmt::Cmd(cmd) => {
                // Array dereferences must name a declared array.
                if let Cmd::Assign { targets, .. } = cmd {
                    for t in targets {
                        if let crate::ast::AssignTarget::MapStore { array, .. } = t {
                            if !vars.contains(array.as_str()) && !program.is_shared_array(array) {
                                errors += 1;
                            }
                        }
                    }
                }
            }
            Stmt::While(w) => errors += body_errors(&w.body, procs, vars, program),
            Stmt::If(i) => {
                errors += body_errors(&i.then_branch, procs, vars, program);
                errors += body_errors(&i.else_branch, procs, vars, program);
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{
        ArrayScope, AssignTarget, Attributes, CallCmd, Expr, Implementation, Procedure,
        SharedArray, Type,
    };

    fn sample_program() -> Program {
        let mut program = Program::default();
        program.shared_arrays.push(SharedArray {
            name: "a".into(),
            index_ty: Type::Bv(32),
            elem_ty: Type::Bv(32),
            scope: ArrayScope::Global,
            read_only: false,
        });
        let mut kernel = Procedure::new("k");
        kernel.attrs = Attributes::single("kernel");
        program.procedures.push(kernel);
        program.implementations.push(Implementation {
            name: "k".into(),
            in_params: vec![],
            out_params: vec![],
            locals: vec![],
            body: vec![Stmt::Cmd(Cmd::assign(
                AssignTarget::MapStore {
                    array: "a".into(),
                    index: Expr::bv32(0),
                },
                Expr::bv32(1),
            ))],
            attrs: Attributes::new(),
        });
        program
    }

    #[test]
    fn json_round_trip_preserves_the_program() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kernel.json");
        let program = sample_program();

        let frontend = JsonFrontend::new(&path);
        frontend.emit(&program, None).unwrap();
        let reread = frontend.parse().unwrap();
        assert_eq!(reread, program);
    }

    #[test]
    fn emit_redirects_to_an_explicit_output_path() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.json");
        let output = dir.path().join("out.json");
        let frontend = JsonFrontend::new(&input);
        frontend.emit(&sample_program(), Some(&output)).unwrap();
        assert!(output.exists());
        assert!(!input.exists());
    }

    #[test]
    fn unresolved_callee_is_a_resolution_error() {
        let mut program = sample_program();
        program.implementations[0]
            .body
            .push(Stmt::Cmd(Cmd::Call(CallCmd {
                callee: "missing".into(),
                ins: vec![],
                outs: vec![],
                attrs: Attributes::new(),
            })));
        assert_eq!(resolution_errors(&program), 1);

        let dir = tempfile::tempdir().unwrap();
        let frontend = JsonFrontend::new(dir.path().join("p.json"));
        match frontend.resolve(&program) {
            Err(FrontendError::Resolution { count, .. }) => assert_eq!(count, 1),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn duplicate_procedures_are_resolution_errors() {
        let mut program = sample_program();
        program.procedures.push(Procedure::new("k"));
        assert_eq!(resolution_errors(&program), 1);
    }
}
