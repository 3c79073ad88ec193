//! Well-known GPU thread-hierarchy symbols.
//!
//! Kernel programs refer to their coordinates through distinguished constant
//! names. Offset-pattern matchers recognize these symbols after definition
//! substitution; the race checks compare the dualised group identifiers of
//! the two modeled threads.

use crate::analysis::VarDefAnalysis;
use crate::ast::Expr;

pub const LOCAL_ID_X: &str = "local_id_x";
pub const GROUP_ID_X: &str = "group_id_x";
pub const GROUP_SIZE_X: &str = "group_size_x";
pub const NUM_GROUPS_X: &str = "num_groups_x";

/// Group identifier of the first modeled thread.
pub const GROUP_ID_X_THREAD_1: &str = "group_id_x$1";
/// Group identifier of the second modeled thread.
pub const GROUP_ID_X_THREAD_2: &str = "group_id_x$2";

/// Predicate stating that the two modeled threads belong to the same
/// work-group.
pub fn threads_in_same_group() -> Expr {
    Expr::eq(
        Expr::ident(GROUP_ID_X_THREAD_1),
        Expr::ident(GROUP_ID_X_THREAD_2),
    )
}

/// The global thread identifier, expressed over the base symbols.
pub fn global_id_expr() -> Expr {
    Expr::add(
        Expr::mul(Expr::ident(GROUP_ID_X), Expr::ident(GROUP_SIZE_X)),
        Expr::ident(LOCAL_ID_X),
    )
}

/// Strip a `$1`/`$2` thread suffix, if present.
pub fn strip_thread_suffix(name: &str) -> &str {
    name.strip_suffix("$1")
        .or_else(|| name.strip_suffix("$2"))
        .unwrap_or(name)
}

/// Whether the (possibly dualised) name is a group identifier.
pub fn is_group_id(name: &str) -> bool {
    strip_thread_suffix(name).starts_with("group_id_")
}

/// Whether the name is one of the distinguished thread-hierarchy constants.
pub fn is_thread_hierarchy_symbol(name: &str) -> bool {
    let base = strip_thread_suffix(name);
    base.starts_with("local_id_")
        || base.starts_with("group_id_")
        || base.starts_with("group_size_")
        || base.starts_with("num_groups_")
}

/// Whether the expression denotes the local thread identifier, possibly
/// through a variable definition.
pub fn is_local_id(expr: &Expr, analysis: &VarDefAnalysis) -> bool {
    let resolved = match analysis.subst_definitions(expr) {
        Some(s) => s.expr,
        None => expr.clone(),
    };
    matches!(&resolved, Expr::Ident(n) if strip_thread_suffix(n) == LOCAL_ID_X)
}

/// Whether the expression denotes the global thread identifier
/// (`group_id * group_size + local_id` in either operand order), possibly
/// through variable definitions.
pub fn is_global_id(expr: &Expr, analysis: &VarDefAnalysis) -> bool {
    let resolved = match analysis.subst_definitions(expr) {
        Some(s) => s.expr,
        None => expr.clone(),
    };
    let (a, b) = match &resolved {
        Expr::NAry { op: crate::ast::Op::Add, args } if args.len() == 2 => (&args[0], &args[1]),
        _ => return false,
    };
    (is_group_times_size(a) && is_local(b)) || (is_group_times_size(b) && is_local(a))
}

fn is_local(e: &Expr) -> bool {
    matches!(e, Expr::Ident(n) if strip_thread_suffix(n) == LOCAL_ID_X)
}

fn is_group_times_size(e: &Expr) -> bool {
    let (a, b) = match e {
        Expr::NAry { op: crate::ast::Op::Mul, args } if args.len() == 2 => (&args[0], &args[1]),
        _ => return false,
    };
    let group = |x: &Expr| matches!(x, Expr::Ident(n) if strip_thread_suffix(n) == GROUP_ID_X);
    let size = |x: &Expr| matches!(x, Expr::Ident(n) if strip_thread_suffix(n) == GROUP_SIZE_X);
    (group(a) && size(b)) || (group(b) && size(a))
}
