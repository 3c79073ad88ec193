//! IVL program model: types, expressions, commands, structured statements,
//! and top-level declarations.
//!
//! The expression representation is a small tagged-variant tree; the
//! pattern matchers in the instrumenter rely on being able to destructure
//! it without visitors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A type in the IVL: booleans, fixed-width bit-vectors, and single-index
/// map types (the representation of shared arrays).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Type {
    Bool,
    Bv(u32),
    Map { index: Box<Type>, result: Box<Type> },
}

impl Type {
    pub fn map(index: Type, result: Type) -> Self {
        Type::Map {
            index: Box::new(index),
            result: Box::new(result),
        }
    }

    /// Index type of a map type.
    pub fn index_type(&self) -> Option<&Type> {
        match self {
            Type::Map { index, .. } => Some(index),
            _ => None,
        }
    }

    /// Result type of a map type.
    pub fn result_type(&self) -> Option<&Type> {
        match self {
            Type::Map { result, .. } => Some(result),
            _ => None,
        }
    }
}

/// A literal value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Literal {
    Bool(bool),
    Bv { value: u64, width: u32 },
}

/// Operators over bit-vector and boolean expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ugt,
    And,
    Or,
    Imp,
    Not,
    IfThenElse,
}

/// An IVL expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),
    Ident(String),
    NAry { op: Op, args: Vec<Expr> },
    /// A dereference of a map-typed variable at an index.
    Select { array: String, index: Box<Expr> },
}

impl Expr {
    pub fn tru() -> Self {
        Expr::Literal(Literal::Bool(true))
    }

    pub fn fls() -> Self {
        Expr::Literal(Literal::Bool(false))
    }

    pub fn bv32(value: u64) -> Self {
        Expr::Literal(Literal::Bv { value, width: 32 })
    }

    pub fn ident(name: impl Into<String>) -> Self {
        Expr::Ident(name.into())
    }

    pub fn select(array: impl Into<String>, index: Expr) -> Self {
        Expr::Select {
            array: array.into(),
            index: Box::new(index),
        }
    }

    fn nary(op: Op, args: Vec<Expr>) -> Self {
        Expr::NAry { op, args }
    }

    pub fn not(e: Expr) -> Self {
        Expr::nary(Op::Not, vec![e])
    }

    pub fn and(a: Expr, b: Expr) -> Self {
        Expr::nary(Op::And, vec![a, b])
    }

    pub fn or(a: Expr, b: Expr) -> Self {
        Expr::nary(Op::Or, vec![a, b])
    }

    pub fn imp(a: Expr, b: Expr) -> Self {
        Expr::nary(Op::Imp, vec![a, b])
    }

    pub fn eq(a: Expr, b: Expr) -> Self {
        Expr::nary(Op::Eq, vec![a, b])
    }

    pub fn ne(a: Expr, b: Expr) -> Self {
        Expr::nary(Op::Ne, vec![a, b])
    }

    pub fn add(a: Expr, b: Expr) -> Self {
        Expr::nary(Op::Add, vec![a, b])
    }

    pub fn sub(a: Expr, b: Expr) -> Self {
        Expr::nary(Op::Sub, vec![a, b])
    }

    pub fn mul(a: Expr, b: Expr) -> Self {
        Expr::nary(Op::Mul, vec![a, b])
    }

    pub fn modulo(a: Expr, b: Expr) -> Self {
        Expr::nary(Op::Mod, vec![a, b])
    }

    pub fn slt(a: Expr, b: Expr) -> Self {
        Expr::nary(Op::Slt, vec![a, b])
    }

    pub fn sle(a: Expr, b: Expr) -> Self {
        Expr::nary(Op::Sle, vec![a, b])
    }

    pub fn sgt(a: Expr, b: Expr) -> Self {
        Expr::nary(Op::Sgt, vec![a, b])
    }

    pub fn ite(cond: Expr, then: Expr, els: Expr) -> Self {
        Expr::nary(Op::IfThenElse, vec![cond, then, els])
    }

    /// Conjunction of all expressions; `true` when empty.
    pub fn and_all(exprs: impl IntoIterator<Item = Expr>) -> Self {
        let mut it = exprs.into_iter();
        match it.next() {
            None => Expr::tru(),
            Some(first) => it.fold(first, Expr::and),
        }
    }

    /// Disjunction of all expressions; `false` when empty.
    pub fn or_all(exprs: impl IntoIterator<Item = Expr>) -> Self {
        let mut it = exprs.into_iter();
        match it.next() {
            None => Expr::fls(),
            Some(first) => it.fold(first, Expr::or),
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Expr::Literal(_))
    }

    /// Substitute every occurrence of identifier `name` with `replacement`.
    pub fn substitute(&self, name: &str, replacement: &Expr) -> Expr {
        match self {
            Expr::Literal(_) => self.clone(),
            Expr::Ident(n) => {
                if n == name {
                    replacement.clone()
                } else {
                    self.clone()
                }
            }
            Expr::NAry { op, args } => Expr::NAry {
                op: *op,
                args: args.iter().map(|a| a.substitute(name, replacement)).collect(),
            },
            Expr::Select { array, index } => Expr::Select {
                array: array.clone(),
                index: Box::new(index.substitute(name, replacement)),
            },
        }
    }

    /// Collect every identifier referenced by the expression, including
    /// array names in dereferences.
    pub fn collect_idents(&self, out: &mut indexmap::IndexSet<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Ident(n) => {
                out.insert(n.clone());
            }
            Expr::NAry { args, .. } => {
                for a in args {
                    a.collect_idents(out);
                }
            }
            Expr::Select { array, index } => {
                out.insert(array.clone());
                index.collect_idents(out);
            }
        }
    }

    pub fn idents(&self) -> indexmap::IndexSet<String> {
        let mut out = indexmap::IndexSet::new();
        self.collect_idents(&mut out);
        out
    }
}

/// An attribute value: a string or an integer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrValue {
    String(String),
    Int(u64),
}

/// A key/value attribute attached to commands and declarations, e.g.
/// `{:sourceloc ...}`, `{:atomic}`, `{:state_id "check_state_0"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub values: Vec<AttrValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attributes(pub Vec<Attribute>);

impl Attributes {
    pub fn new() -> Self {
        Attributes(Vec::new())
    }

    pub fn single(key: impl Into<String>) -> Self {
        let mut attrs = Attributes::new();
        attrs.add(key, Vec::new());
        attrs
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.iter().any(|a| a.key == key)
    }

    pub fn add(&mut self, key: impl Into<String>, values: Vec<AttrValue>) {
        self.0.push(Attribute {
            key: key.into(),
            values,
        });
    }

    pub fn add_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.add(key, vec![AttrValue::String(value.into())]);
    }

    pub fn find_string(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|a| a.key == key).and_then(|a| {
            a.values.iter().find_map(|v| match v {
                AttrValue::String(s) => Some(s.as_str()),
                AttrValue::Int(_) => None,
            })
        })
    }

    pub fn set_string(&mut self, key: &str, value: impl Into<String>) {
        self.0.retain(|a| a.key != key);
        self.add_string(key.to_string(), value);
    }

    pub fn extend_from(&mut self, other: &Attributes) {
        self.0.extend(other.0.iter().cloned());
    }
}

/// Target of one position in a parallel assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignTarget {
    /// Assignment to a scalar variable.
    Simple(String),
    /// Store into a map-typed variable at an index.
    MapStore { array: String, index: Expr },
}

/// A procedure call command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallCmd {
    pub callee: String,
    pub ins: Vec<Expr>,
    pub outs: Vec<String>,
    pub attrs: Attributes,
}

/// A basic command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cmd {
    Assign {
        targets: Vec<AssignTarget>,
        values: Vec<Expr>,
    },
    Call(CallCmd),
    Assert {
        expr: Expr,
        attrs: Attributes,
    },
    Assume {
        expr: Expr,
        attrs: Attributes,
    },
    Havoc {
        vars: Vec<String>,
    },
}

impl Cmd {
    pub fn assign(target: AssignTarget, value: Expr) -> Self {
        Cmd::Assign {
            targets: vec![target],
            values: vec![value],
        }
    }

    pub fn assume(expr: Expr) -> Self {
        Cmd::Assume {
            expr,
            attrs: Attributes::new(),
        }
    }

    pub fn assert(expr: Expr) -> Self {
        Cmd::Assert {
            expr,
            attrs: Attributes::new(),
        }
    }

    pub fn attrs(&self) -> Option<&Attributes> {
        match self {
            Cmd::Call(call) => Some(&call.attrs),
            Cmd::Assert { attrs, .. } | Cmd::Assume { attrs, .. } => Some(attrs),
            _ => None,
        }
    }
}

/// Inference stages order cheap, generally-useful candidates before
/// speculative ones so the external refinement loop can schedule pruning
/// rounds accordingly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum InferenceStage {
    /// No-access candidates.
    Basic,
    /// Offset-range and predicate-set candidates.
    AccessPattern,
}

/// Identity of a candidate invariant: a fresh name the external inference
/// engine resolves to a boolean, a human-readable tag, and a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    pub tag: String,
    pub stage: InferenceStage,
}

/// A loop invariant; candidate invariants carry a `Candidate` marker until
/// the inference assignment resolves them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invariant {
    pub expr: Expr,
    pub candidate: Option<Candidate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhileStmt {
    pub guard: Expr,
    pub invariants: Vec<Invariant>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IfStmt {
    pub guard: Expr,
    pub then_branch: Vec<Stmt>,
    pub else_branch: Vec<Stmt>,
}

/// A structured statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stmt {
    Cmd(Cmd),
    While(WhileStmt),
    If(IfStmt),
}

/// Memory scope of a shared array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArrayScope {
    /// Visible to one work-group; races matter only within a group.
    GroupShared,
    /// Visible to all work-groups.
    Global,
}

/// A map-typed variable addressable by all modeled threads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedArray {
    pub name: String,
    pub index_ty: Type,
    pub elem_ty: Type,
    pub scope: ArrayScope,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

/// A precondition; candidate preconditions carry a `Candidate` marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requires {
    pub expr: Expr,
    pub candidate: Option<Candidate>,
    pub attrs: Attributes,
}

impl Requires {
    pub fn plain(expr: Expr) -> Self {
        Requires {
            expr,
            candidate: None,
            attrs: Attributes::new(),
        }
    }
}

/// A postcondition; candidate postconditions carry a `Candidate` marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ensures {
    pub expr: Expr,
    pub candidate: Option<Candidate>,
    pub attrs: Attributes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Procedure {
    pub name: String,
    pub in_params: Vec<Param>,
    pub out_params: Vec<Param>,
    pub requires: Vec<Requires>,
    pub ensures: Vec<Ensures>,
    pub modifies: Vec<String>,
    pub attrs: Attributes,
}

impl Procedure {
    pub fn new(name: impl Into<String>) -> Self {
        Procedure {
            name: name.into(),
            in_params: Vec::new(),
            out_params: Vec::new(),
            requires: Vec::new(),
            ensures: Vec::new(),
            modifies: Vec::new(),
            attrs: Attributes::new(),
        }
    }
}

/// A scalar or map-typed variable declaration (global or local).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub ty: Type,
}

/// A symbolic constant (thread/group identifiers, tuning parameters).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constant {
    pub name: String,
    pub ty: Type,
    pub attrs: Attributes,
}

/// An implementation: the body of basic statements behind a procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    pub name: String,
    pub in_params: Vec<Param>,
    pub out_params: Vec<Param>,
    pub locals: Vec<Variable>,
    pub body: Vec<Stmt>,
    pub attrs: Attributes,
}

/// A whole IVL program.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub shared_arrays: Vec<SharedArray>,
    pub globals: Vec<Variable>,
    pub constants: Vec<Constant>,
    pub procedures: Vec<Procedure>,
    pub implementations: Vec<Implementation>,
}

impl Program {
    pub fn shared_array(&self, name: &str) -> Option<&SharedArray> {
        self.shared_arrays.iter().find(|a| a.name == name)
    }

    pub fn is_shared_array(&self, name: &str) -> bool {
        self.shared_array(name).is_some()
    }

    pub fn procedure(&self, name: &str) -> Option<&Procedure> {
        self.procedures.iter().find(|p| p.name == name)
    }

    pub fn procedure_mut(&mut self, name: &str) -> Option<&mut Procedure> {
        self.procedures.iter_mut().find(|p| p.name == name)
    }

    pub fn implementation(&self, name: &str) -> Option<&Implementation> {
        self.implementations.iter().find(|i| i.name == name)
    }

    pub fn add_global_if_absent(&mut self, var: Variable) {
        if !self.globals.iter().any(|g| g.name == var.name) {
            self.globals.push(var);
        }
    }

    /// Kernel entry procedures, marked with the `kernel` attribute.
    pub fn kernel_procedures(&self) -> impl Iterator<Item = &Procedure> {
        self.procedures.iter().filter(|p| p.attrs.has("kernel"))
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Bv { value, width } => write!(f, "{value}bv{width}"),
        }
    }
}
