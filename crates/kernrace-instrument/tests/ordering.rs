//! Property test: across arbitrary straight-line kernels, every check call
//! is preceded by the matching log call (and, for writes, the benign-flag
//! update) for the same array and kind.

use proptest::prelude::*;

use kernrace_ivl::ast::{
    ArrayScope, AssignTarget, Attributes, Cmd, Expr, Implementation, Procedure, Program,
    SharedArray, Stmt, Type,
};
use kernrace_ivl::region::flatten_commands;

use kernrace_instrument::context::{InstrumentationOptions, RaceCheckContext};
use kernrace_instrument::shadow::{ShadowStateInstrumenter, StandardStrategy};

const ARRAYS: [&str; 2] = ["a", "b"];

#[derive(Debug, Clone)]
enum Access {
    Write { array: usize, offset: u64, value: u64 },
    Read { array: usize, offset: u64 },
}

fn access_strategy() -> impl Strategy<Value = Access> {
    prop_oneof![
        (0..ARRAYS.len(), 0u64..64, 0u64..64)
            .prop_map(|(array, offset, value)| Access::Write { array, offset, value }),
        (0..ARRAYS.len(), 0u64..64).prop_map(|(array, offset)| Access::Read { array, offset }),
    ]
}

fn build_program(accesses: &[Access]) -> Program {
    let mut program = Program::default();
    for name in ARRAYS {
        program.shared_arrays.push(SharedArray {
            name: name.into(),
            index_ty: Type::Bv(32),
            elem_ty: Type::Bv(32),
            scope: ArrayScope::Global,
            read_only: false,
        });
    }
    let mut kernel = Procedure::new("k");
    kernel.attrs = Attributes::single("kernel");
    program.procedures.push(kernel);

    let body = accesses
        .iter()
        .enumerate()
        .map(|(i, access)| match access {
            Access::Write { array, offset, value } => Stmt::Cmd(Cmd::assign(
                AssignTarget::MapStore {
                    array: ARRAYS[*array].into(),
                    index: Expr::bv32(*offset),
                },
                Expr::bv32(*value),
            )),
            Access::Read { array, offset } => Stmt::Cmd(Cmd::assign(
                AssignTarget::Simple(format!("x{i}")),
                Expr::select(ARRAYS[*array], Expr::bv32(*offset)),
            )),
        })
        .collect();
    program.implementations.push(Implementation {
        name: "k".into(),
        in_params: vec![],
        out_params: vec![],
        locals: vec![],
        body,
        attrs: Attributes::new(),
    });
    program
}

proptest! {
    #[test]
    fn every_check_is_preceded_by_its_log(accesses in prop::collection::vec(access_strategy(), 1..12)) {
        let mut program = build_program(&accesses);
        let mut ctx = RaceCheckContext::new(InstrumentationOptions::default());
        let strategy = StandardStrategy;
        ShadowStateInstrumenter::new(&strategy)
            .instrument(&mut program, &mut ctx)
            .unwrap();

        let cmds = flatten_commands(&program.implementation("k").unwrap().body);
        let mut pending_logs: Vec<String> = Vec::new();
        let mut pending_updates: Vec<String> = Vec::new();
        for cmd in cmds {
            if let Cmd::Call(call) = cmd {
                if let Some(rest) = call.callee.strip_prefix("_LOG_") {
                    pending_logs.push(rest.to_string());
                } else if call.callee.starts_with("_UPDATE_WRITE_READ_BENIGN_FLAG_") {
                    let array = call
                        .callee
                        .strip_prefix("_UPDATE_WRITE_READ_BENIGN_FLAG_")
                        .unwrap();
                    pending_updates.push(array.to_string());
                } else if let Some(rest) = call.callee.strip_prefix("_CHECK_") {
                    prop_assert!(
                        pending_logs.iter().any(|l| l == rest),
                        "check of {rest} with no earlier log"
                    );
                    if let Some(array) = rest.strip_prefix("WRITE_") {
                        prop_assert!(
                            pending_updates.iter().any(|u| u == array),
                            "write check of {array} with no earlier benign update"
                        );
                    }
                }
            }
        }
    }
}
