// Integration tests: channel legalization across strictnesses and pipelines.
//
// Each scenario is an IR template with `$S` standing for the strictness of
// its shared channels. For every strictness and pass variant we check the
// build outcome, then execute the legalized package in the serial runtime
// and compare its outputs with the unlegalized reference.

use plc::diag::{codes, DiagCode};
use plc::interp::{RuntimeError, RuntimeErrorKind, SerialProcRuntime};
use plc::ir::{Package, Value};
use plc::parser::parse_package;
use plc::pass::{standard_pipeline, PassId, PassOptions};
use plc::pipeline::{run_pipeline, PipelineError};
use plc::strictness::Strictness;
use plc::verify::verify_package;

use Strictness::{
    ArbitraryStaticOrder, ProvenMutuallyExclusive, RuntimeMutuallyExclusive, RuntimeOrdered,
    TotalOrder,
};

// ── Scenarios ───────────────────────────────────────────────────────────────

const BACK_TO_BACK: &str = r#"package test
chan in(bits[32], id=0, kind=streaming, ops=receive_only, flow_control=ready_valid, strictness=$S, metadata="")
chan out(bits[32], id=1, kind=streaming, ops=send_only, flow_control=ready_valid, strictness=$S, metadata="")

top proc my_proc(tok: token, init={}) {
  recv0: (token, bits[32]) = receive(tok, channel=in)
  recv0_tok: token = tuple_index(recv0, index=0)
  recv0_data: bits[32] = tuple_index(recv0, index=1)
  recv1: (token, bits[32]) = receive(recv0_tok, channel=in)
  recv1_tok: token = tuple_index(recv1, index=0)
  recv1_data: bits[32] = tuple_index(recv1, index=1)
  send0: token = send(recv1_tok, recv1_data, channel=out)
  send1: token = send(send0, recv0_data, channel=out)
  next(send1)
}
"#;

const TWO_PROCS_EXCLUSIVE: &str = r#"package test
chan in(bits[32], id=0, kind=streaming, ops=receive_only, flow_control=ready_valid, strictness=$S, metadata="")
chan out(bits[32], id=1, kind=streaming, ops=send_only, flow_control=ready_valid, strictness=$S, metadata="")

top proc proc_a(tok: token, pred: bits[1], init={1}) {
  rx: (token, bits[32]) = receive(tok, predicate=pred, channel=in)
  rx_tok: token = tuple_index(rx, index=0)
  rx_data: bits[32] = tuple_index(rx, index=1)
  tx: token = send(rx_tok, rx_data, predicate=pred, channel=out)
  next_pred: bits[1] = not(pred)
  next(tx, next_pred)
}

proc proc_b(tok: token, pred: bits[1], init={0}) {
  rx: (token, bits[32]) = receive(tok, predicate=pred, channel=in)
  rx_tok: token = tuple_index(rx, index=0)
  rx_data: bits[32] = tuple_index(rx, index=1)
  tx: token = send(rx_tok, rx_data, predicate=pred, channel=out)
  next_pred: bits[1] = not(pred)
  next(tx, next_pred)
}
"#;

const TWO_PROCS_ALWAYS_FIRING: &str = r#"package test
chan in(bits[32], id=0, kind=streaming, ops=receive_only, flow_control=ready_valid, strictness=$S, metadata="")
chan out(bits[32], id=1, kind=streaming, ops=send_only, flow_control=ready_valid, strictness=$S, metadata="")

top proc proc_a(tok: token, init={}) {
  rx: (token, bits[32]) = receive(tok, channel=in)
  rx_tok: token = tuple_index(rx, index=0)
  rx_data: bits[32] = tuple_index(rx, index=1)
  tx: token = send(rx_tok, rx_data, channel=out)
  next(tx)
}

proc proc_b(tok: token, init={}) {
  rx: (token, bits[32]) = receive(tok, channel=in)
  rx_tok: token = tuple_index(rx, index=0)
  rx_data: bits[32] = tuple_index(rx, index=1)
  tx: token = send(rx_tok, rx_data, channel=out)
  next(tx)
}
"#;

const PARTIAL_ORDER: &str = r#"package test
chan in(bits[32], id=0, kind=streaming, ops=receive_only, flow_control=ready_valid, strictness=$S, metadata="")
chan out(bits[32], id=1, kind=streaming, ops=send_only, flow_control=ready_valid, strictness=$S, metadata="")
chan pred(bits[2], id=2, kind=streaming, ops=receive_only, flow_control=ready_valid, strictness=$S, metadata="")

top proc my_proc(tok: token, init={}) {
  pred_recv: (token, bits[2]) = receive(tok, channel=pred)
  pred_token: token = tuple_index(pred_recv, index=0)
  pred_data: bits[2] = tuple_index(pred_recv, index=1)
  pred0: bits[1] = bit_slice(pred_data, start=0, width=1)
  pred1: bits[1] = bit_slice(pred_data, start=1, width=1)
  recv0: (token, bits[32]) = receive(pred_token, channel=in)
  recv0_tok: token = tuple_index(recv0, index=0)
  recv0_data: bits[32] = tuple_index(recv0, index=1)
  recv1: (token, bits[32]) = receive(recv0_tok, predicate=pred0, channel=in)
  recv1_tok: token = tuple_index(recv1, index=0)
  recv1_data: bits[32] = tuple_index(recv1, index=1)
  recv2: (token, bits[32]) = receive(recv0_tok, predicate=pred1, channel=in)
  recv2_tok: token = tuple_index(recv2, index=0)
  recv2_data: bits[32] = tuple_index(recv2, index=1)
  all_recv_tok: token = after_all(recv0_tok, recv1_tok, recv2_tok)
  send0: token = send(all_recv_tok, recv0_data, channel=out)
  send1: token = send(send0, recv1_data, predicate=pred0, channel=out)
  send2: token = send(send0, recv2_data, predicate=pred1, channel=out)
  all_send_tok: token = after_all(send0, send1, send2)
  next(all_send_tok)
}
"#;

const RESPECTS_TOKEN_ORDER: &str = r#"package test
chan pred_recv(bits[1], id=0, kind=streaming, ops=receive_only, flow_control=ready_valid, metadata="")
chan in(bits[32], id=1, kind=streaming, ops=receive_only, flow_control=ready_valid, strictness=$S, metadata="")
chan out(bits[32], id=2, kind=streaming, ops=send_only, flow_control=ready_valid, strictness=$S, metadata="")

top proc test_proc(tkn: token, init={}) {
  data_to_send: bits[32] = literal(value=5)
  pred_rx: (token, bits[1]) = receive(tkn, channel=pred_recv)
  pred_rx_token: token = tuple_index(pred_rx, index=0)
  pred_rx_data: bits[1] = tuple_index(pred_rx, index=1)
  in_recv0: (token, bits[32]) = receive(pred_rx_token, predicate=pred_rx_data, channel=in)
  in_recv0_token: token = tuple_index(in_recv0, index=0)
  in_recv1: (token, bits[32]) = receive(in_recv0_token, predicate=pred_rx_data, channel=in)
  in_recv1_token: token = tuple_index(in_recv1, index=0)
  out_send0: token = send(in_recv1_token, data_to_send, channel=out)
  out_send1: token = send(out_send0, data_to_send, channel=out)
  next(out_send1)
}
"#;

const DATA_DEPENDENT_RECEIVE: &str = r#"package test
chan in(bits[32], id=1, kind=streaming, ops=receive_only, flow_control=ready_valid, strictness=$S, metadata="")
chan out(bits[32], id=2, kind=streaming, ops=send_only, flow_control=ready_valid, strictness=$S, metadata="")

top proc test_proc(tkn: token, init={}) {
  in_recv0: (token, bits[32]) = receive(tkn, channel=in)
  in_recv0_token: token = tuple_index(in_recv0, index=0)
  in_recv0_data: bits[32] = tuple_index(in_recv0, index=1)
  comp_data: bits[32] = literal(value=5)
  in_recv1_pred: bits[1] = ugt(in_recv0_data, comp_data)
  in_recv1: (token, bits[32]) = receive(in_recv0_token, predicate=in_recv1_pred, channel=in)
  in_recv1_token: token = tuple_index(in_recv1, index=0)
  in_recv1_data: bits[32] = tuple_index(in_recv1, index=1)
  data_to_send: bits[32] = add(in_recv0_data, in_recv1_data)
  out_send0: token = send(in_recv1_token, data_to_send, channel=out)
  out_send1: token = send(out_send0, data_to_send, predicate=in_recv1_pred, channel=out)
  next(out_send1)
}
"#;

const PREDICATE_OUT_OF_ORDER: &str = r#"package test
chan pred0(bits[1], id=0, kind=streaming, ops=receive_only, flow_control=ready_valid, strictness=$S, metadata="")
chan pred1(bits[1], id=1, kind=streaming, ops=receive_only, flow_control=ready_valid, strictness=$S, metadata="")
chan out(bits[32], id=2, kind=streaming, ops=send_only, flow_control=ready_valid, strictness=$S, metadata="")

top proc test_proc(tkn: token, init={}) {
  pred1_recv: (token, bits[1]) = receive(tkn, channel=pred1)
  pred1_recv_token: token = tuple_index(pred1_recv, index=0)
  pred1_recv_data: bits[1] = tuple_index(pred1_recv, index=1)
  pred0_recv: (token, bits[1]) = receive(pred1_recv_token, channel=pred0)
  pred0_recv_token: token = tuple_index(pred0_recv, index=0)
  pred0_recv_data: bits[1] = tuple_index(pred0_recv, index=1)
  literal0: bits[32] = literal(value=0)
  literal1: bits[32] = literal(value=1)
  out_send0: token = send(pred0_recv_token, literal0, predicate=pred0_recv_data, channel=out)
  after_all_tok: token = after_all(out_send0, pred1_recv_token)
  out_send1: token = send(after_all_tok, literal1, predicate=pred1_recv_data, channel=out)
  next(out_send1)
}
"#;

const COMPLEMENTARY: &str = r#"package test
chan out(bits[32], id=0, kind=streaming, ops=send_only, flow_control=ready_valid, strictness=proven_mutually_exclusive, metadata="")

top proc m(tok: token, p: bits[1], init={0}) {
  np: bits[1] = not(p)
  x: bits[32] = literal(value=7)
  a: token = send(tok, x, predicate=p, channel=out)
  b: token = send(tok, x, predicate=np, channel=out)
  j: token = after_all(a, b)
  next(j, np)
}
"#;

const COMPLEMENTARY_RECEIVES: &str = r#"package test
chan in(bits[32], id=0, kind=streaming, ops=receive_only, flow_control=ready_valid, strictness=proven_mutually_exclusive, metadata="")
chan out(bits[32], id=1, kind=streaming, ops=send_only, flow_control=ready_valid, strictness=proven_mutually_exclusive, metadata="")

top proc m(tok: token, p: bits[1], init={1}) {
  np: bits[1] = not(p)
  a: (token, bits[32]) = receive(tok, predicate=p, channel=in)
  a_tok: token = tuple_index(a, index=0)
  a_data: bits[32] = tuple_index(a, index=1)
  b: (token, bits[32]) = receive(tok, predicate=np, channel=in)
  b_tok: token = tuple_index(b, index=0)
  b_data: bits[32] = tuple_index(b, index=1)
  offset: bits[32] = literal(value=1000)
  b_shifted: bits[32] = add(b_data, offset)
  v: bits[32] = sel(p, cases=[b_shifted, a_data])
  j: token = after_all(a_tok, b_tok)
  s: token = send(j, v, channel=out)
  next(s, np)
}
"#;

// ── Helpers ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variant {
    PassOnly,
    StandardPipeline,
    StandardPipelineInlineProcs,
}

const VARIANTS: [Variant; 3] = [
    Variant::PassOnly,
    Variant::StandardPipeline,
    Variant::StandardPipelineInlineProcs,
];

fn instantiate(template: &str, strictness: Strictness) -> Package {
    parse_package(&template.replace("$S", strictness.as_str()))
        .unwrap_or_else(|d| panic!("template failed to parse: {d:?}"))
}

fn run_variant(package: &mut Package, variant: Variant) -> Result<bool, PipelineError> {
    let (passes, inline_procs) = match variant {
        Variant::PassOnly => (vec![PassId::ChannelLegalization], false),
        Variant::StandardPipeline => (standard_pipeline(), false),
        Variant::StandardPipelineInlineProcs => (standard_pipeline(), true),
    };
    run_pipeline(package, &passes, &PassOptions { inline_procs }).map(|o| o.changed)
}

/// Check the build outcome of every strictness under every variant.
fn check_builds(template: &str, expected_error: impl Fn(Strictness) -> Option<DiagCode>) {
    for strictness in Strictness::ALL {
        for variant in VARIANTS {
            let mut pkg = instantiate(template, strictness);
            let before = pkg.to_string();
            match (run_variant(&mut pkg, variant), expected_error(strictness)) {
                (Ok(changed), None) => {
                    assert!(changed, "{strictness} {variant:?}: expected a change");
                    let codegen = variant == Variant::StandardPipelineInlineProcs;
                    if let Err(d) = verify_package(&pkg, codegen) {
                        panic!("{strictness} {variant:?}: result does not verify: {d:?}");
                    }
                }
                (Err(e), Some(code)) => {
                    assert_eq!(
                        e.diagnostics()[0].code,
                        Some(code),
                        "{strictness} {variant:?}: {e}"
                    );
                    assert_eq!(pkg.to_string(), before, "{strictness} {variant:?}: mutated");
                }
                (got, want) => panic!("{strictness} {variant:?}: got {got:?}, expected error {want:?}"),
            }
        }
    }
}

/// Run `evaluate` on the unlegalized package, then on every strictness that
/// legalizes.
fn check_execution(template: &str, evaluate: impl Fn(&Package, Option<Strictness>)) {
    evaluate(&instantiate(template, ArbitraryStaticOrder), None);
    for strictness in Strictness::ALL {
        let mut pkg = instantiate(template, strictness);
        if run_variant(&mut pkg, Variant::PassOnly).is_ok() {
            evaluate(&pkg, Some(strictness));
        }
    }
}

fn write(rt: &mut SerialProcRuntime, channel: &str, width: u32, values: impl IntoIterator<Item = u64>) {
    let queue = rt.queues_mut().queue_by_name(channel).unwrap();
    for v in values {
        queue.write(Value::bits(width, v)).unwrap();
    }
}

fn drain(rt: &mut SerialProcRuntime, channel: &str) -> Vec<u64> {
    let queue = rt.queues_mut().queue_by_name(channel).unwrap();
    std::iter::from_fn(|| queue.read())
        .map(|v| v.as_u64().unwrap())
        .collect()
}

fn expect_abort(status: Result<usize, RuntimeError>, kind: RuntimeErrorKind, what: &str) {
    match status {
        Err(e) => assert_eq!(e.kind(), kind, "{what}: {e}"),
        Ok(ticks) => panic!("{what}: expected {kind:?}, finished after {ticks} tick(s)"),
    }
}

fn only_proven(strictness: Strictness) -> Option<DiagCode> {
    (strictness == ProvenMutuallyExclusive).then_some(codes::E0301)
}

fn proven_and_total(strictness: Strictness) -> Option<DiagCode> {
    match strictness {
        ProvenMutuallyExclusive => Some(codes::E0301),
        TotalOrder => Some(codes::E0302),
        _ => None,
    }
}

fn first_diagnostic(template: &str, strictness: Strictness) -> String {
    let mut pkg = instantiate(template, strictness);
    match run_variant(&mut pkg, Variant::PassOnly) {
        Ok(_) => panic!("expected legalization to fail"),
        Err(e) => e.diagnostics()[0].message.clone(),
    }
}

// ── Back-to-back operations in one proc ─────────────────────────────────────

#[test]
fn back_to_back_builds() {
    check_builds(BACK_TO_BACK, only_proven);
}

#[test]
fn back_to_back_executes() {
    check_execution(BACK_TO_BACK, |pkg, strictness| {
        let mut rt = SerialProcRuntime::new(pkg.clone());
        write(&mut rt, "in", 32, 0..32);
        let status = rt.tick_until_output(&[("out", 32)], 1000);
        if strictness == Some(RuntimeMutuallyExclusive) {
            let err = status.unwrap_err();
            assert_eq!(err.kind(), RuntimeErrorKind::ExclusivityViolation);
            assert!(err.to_string().contains("predicate was not mutually exclusive"));
            assert_eq!(rt.queues().len_of("in").unwrap(), 32, "aborted round consumed input");
            assert_eq!(rt.queues().len_of("out").unwrap(), 0);
            return;
        }
        status.unwrap();
        let flipped: Vec<u64> = (0..32).map(|i| if i % 2 == 0 { i + 1 } else { i - 1 }).collect();
        assert_eq!(drain(&mut rt, "out"), flipped, "{strictness:?}");
    });
}

#[test]
fn back_to_back_proven_diagnostic() {
    insta::assert_snapshot!(
        first_diagnostic(BACK_TO_BACK, ProvenMutuallyExclusive),
        @"channel `in` receive side is not proven mutually exclusive: `my_proc.recv0` and `my_proc.recv1` may fire in the same activation"
    );
}

// ── Two procs sharing channels ──────────────────────────────────────────────

#[test]
fn two_procs_exclusive_builds() {
    check_builds(TWO_PROCS_EXCLUSIVE, proven_and_total);
}

#[test]
fn two_procs_exclusive_executes() {
    check_execution(TWO_PROCS_EXCLUSIVE, |pkg, strictness| {
        let mut rt = SerialProcRuntime::new(pkg.clone());
        write(&mut rt, "in", 32, 0..32);
        rt.tick_until_output(&[("out", 32)], 1000)
            .unwrap_or_else(|e| panic!("{strictness:?}: {e}"));
        assert_eq!(drain(&mut rt, "out"), (0..32).collect::<Vec<_>>());
    });
}

#[test]
fn two_procs_total_order_diagnostic() {
    insta::assert_snapshot!(
        first_diagnostic(TWO_PROCS_EXCLUSIVE, TotalOrder),
        @"channel `in` receive side is not totally ordered: no token dependency orders `proc_a.rx` and `proc_b.rx`"
    );
}

#[test]
fn two_procs_always_firing_builds() {
    check_builds(TWO_PROCS_ALWAYS_FIRING, proven_and_total);
}

#[test]
fn two_procs_always_firing_executes() {
    check_execution(TWO_PROCS_ALWAYS_FIRING, |pkg, strictness| {
        let mut rt = SerialProcRuntime::new(pkg.clone());
        write(&mut rt, "in", 32, 0..32);
        let status = rt.tick_until_output(&[("out", 32)], 1000);
        match strictness {
            Some(RuntimeMutuallyExclusive) => {
                expect_abort(status, RuntimeErrorKind::ExclusivityViolation, "runtime exclusive")
            }
            Some(RuntimeOrdered) => {
                expect_abort(status, RuntimeErrorKind::OrderingViolation, "runtime ordered")
            }
            _ => {
                status.unwrap();
                assert_eq!(drain(&mut rt, "out"), (0..32).collect::<Vec<_>>());
            }
        }
    });
}

// ── Partially ordered operations ────────────────────────────────────────────

#[test]
fn partial_order_builds() {
    check_builds(PARTIAL_ORDER, proven_and_total);
}

#[test]
fn partial_order_executes() {
    check_execution(PARTIAL_ORDER, |pkg, strictness| {
        for (fire0, fire1) in [(false, false), (true, false), (false, true), (true, true)] {
            let what = format!("{strictness:?} pred0={fire0} pred1={fire1}");
            let mut rt = SerialProcRuntime::new(pkg.clone());
            write(&mut rt, "in", 32, 0..3);
            write(&mut rt, "pred", 2, [u64::from(fire0) | u64::from(fire1) << 1]);
            let outputs = 1 + usize::from(fire0) + usize::from(fire1);
            let status = rt.tick_until_output(&[("out", outputs)], 20);

            let abort = match (strictness, fire0, fire1) {
                (Some(RuntimeMutuallyExclusive), false, false) => None,
                (Some(RuntimeMutuallyExclusive), _, _) => Some(RuntimeErrorKind::ExclusivityViolation),
                (Some(RuntimeOrdered), true, true) => Some(RuntimeErrorKind::OrderingViolation),
                _ => None,
            };
            if let Some(kind) = abort {
                expect_abort(status, kind, &what);
                continue;
            }
            status.unwrap_or_else(|e| panic!("{what}: {e}"));
            let expected: Vec<u64> = (0..outputs as u64).collect();
            assert_eq!(drain(&mut rt, "out"), expected, "{what}");
        }
    });
}

#[test]
fn partial_order_total_order_diagnostic() {
    insta::assert_snapshot!(
        first_diagnostic(PARTIAL_ORDER, TotalOrder),
        @"channel `in` receive side is not totally ordered: no token dependency orders `my_proc.recv1` and `my_proc.recv2`"
    );
}

// ── Token order between predicated operations ───────────────────────────────

#[test]
fn respects_token_order_builds() {
    check_builds(RESPECTS_TOKEN_ORDER, only_proven);
}

#[test]
fn respects_token_order_executes() {
    check_execution(RESPECTS_TOKEN_ORDER, |pkg, strictness| {
        let mut rt = SerialProcRuntime::new(pkg.clone());
        write(&mut rt, "in", 32, 0..100);
        // Nothing can happen until a predicate arrives.
        rt.tick().unwrap();
        assert_eq!(rt.queues().len_of("out").unwrap(), 0);

        for round in 0..2 {
            write(&mut rt, "pred_recv", 1, [1]);
            let status = rt.tick_until_output(&[("out", 2)], 10);
            if strictness == Some(RuntimeMutuallyExclusive) {
                expect_abort(status, RuntimeErrorKind::ExclusivityViolation, "runtime exclusive");
                return;
            }
            status.unwrap_or_else(|e| panic!("{strictness:?} round {round}: {e}"));
            assert_eq!(drain(&mut rt, "out"), vec![5, 5]);
        }
    });
}

// ── Receive whose predicate depends on received data ────────────────────────

#[test]
fn data_dependent_receive_builds() {
    check_builds(DATA_DEPENDENT_RECEIVE, only_proven);
}

#[test]
fn data_dependent_receive_executes() {
    check_execution(DATA_DEPENDENT_RECEIVE, |pkg, strictness| {
        let mut rt = SerialProcRuntime::new(pkg.clone());
        write(&mut rt, "in", 32, 0..100);
        let status = rt.tick_until_output(&[("out", 100)], 200);
        let out = drain(&mut rt, "out");
        // Inputs up to 5 pass straight through.
        assert_eq!(out[..6], [0, 1, 2, 3, 4, 5], "{strictness:?}");
        if strictness == Some(RuntimeMutuallyExclusive) {
            expect_abort(status, RuntimeErrorKind::ExclusivityViolation, "runtime exclusive");
            assert_eq!(out.len(), 6);
            return;
        }
        status.unwrap_or_else(|e| panic!("{strictness:?}: {e}"));
        let pairs: Vec<u64> = (6..100u64)
            .step_by(2)
            .flat_map(|i| [2 * i + 1, 2 * i + 1])
            .collect();
        assert_eq!(out[6..], pairs[..], "{strictness:?}");
    });
}

// ── Predicates arriving out of order ────────────────────────────────────────

#[test]
fn predicate_out_of_order_builds() {
    check_builds(PREDICATE_OUT_OF_ORDER, only_proven);
}

fn expect_blocked_on_pred0(status: Result<usize, RuntimeError>) {
    match status {
        Err(RuntimeError::DeadlineExceeded { blocked, .. }) => {
            assert!(blocked.iter().any(|c| c == "pred0"), "blocked on {blocked:?}")
        }
        other => panic!("expected a deadline, got {other:?}"),
    }
}

#[test]
fn predicate_out_of_order_executes() {
    check_execution(PREDICATE_OUT_OF_ORDER, |pkg, strictness| {
        let mut rt = SerialProcRuntime::new(pkg.clone());
        rt.tick().unwrap();
        assert_eq!(rt.queues().len_of("out").unwrap(), 0);

        // The second send is ordered after the first, so pred1 alone is not enough.
        write(&mut rt, "pred1", 1, [1]);
        expect_blocked_on_pred0(rt.tick_until_output(&[("out", 1)], 10));
        assert_eq!(rt.queues().len_of("out").unwrap(), 0);

        write(&mut rt, "pred0", 1, [0]);
        rt.tick_until_output(&[("out", 1)], 10)
            .unwrap_or_else(|e| panic!("{strictness:?}: {e}"));
        assert_eq!(drain(&mut rt, "out"), vec![1]);

        write(&mut rt, "pred1", 1, [1]);
        expect_blocked_on_pred0(rt.tick_until_output(&[("out", 1)], 10));

        write(&mut rt, "pred0", 1, [1]);
        let status = rt.tick_until_output(&[("out", 2)], 10);
        if strictness == Some(RuntimeMutuallyExclusive) {
            expect_abort(status, RuntimeErrorKind::ExclusivityViolation, "runtime exclusive");
            return;
        }
        status.unwrap_or_else(|e| panic!("{strictness:?}: {e}"));
        assert_eq!(drain(&mut rt, "out"), vec![0, 1]);
    });
}

// ── Cross-cutting properties ────────────────────────────────────────────────

#[test]
fn complementary_predicates_need_no_adapter() {
    for variant in VARIANTS {
        let mut pkg = parse_package(COMPLEMENTARY).unwrap();
        let before = pkg.to_string();
        let outcome = run_variant(&mut pkg, variant).unwrap();
        assert!(!outcome, "{variant:?}");
        assert_eq!(pkg.to_string(), before);
        assert_eq!(pkg.procs.len(), 1);
    }

    let mut rt = SerialProcRuntime::new(parse_package(COMPLEMENTARY).unwrap());
    rt.tick_until_output(&[("out", 4)], 10).unwrap();
    assert_eq!(drain(&mut rt, "out"), vec![7, 7, 7, 7]);
}

#[test]
fn complementary_receives_alternate_branches() {
    for variant in VARIANTS {
        let mut pkg = parse_package(COMPLEMENTARY_RECEIVES).unwrap();
        let before = pkg.to_string();
        assert!(!run_variant(&mut pkg, variant).unwrap(), "{variant:?}");
        assert_eq!(pkg.to_string(), before);
        assert!(verify_package(&pkg, true).is_ok());
    }

    let mut rt = SerialProcRuntime::new(parse_package(COMPLEMENTARY_RECEIVES).unwrap());
    write(&mut rt, "in", 32, 0..6);
    rt.tick_until_output(&[("out", 6)], 10).unwrap();
    assert_eq!(drain(&mut rt, "out"), vec![0, 1001, 2, 1003, 4, 1005]);
    assert_eq!(rt.activations("m"), Some(6));
}

#[test]
fn legalization_is_idempotent() {
    for strictness in [TotalOrder, RuntimeOrdered, RuntimeMutuallyExclusive, ArbitraryStaticOrder] {
        let mut pkg = instantiate(BACK_TO_BACK, strictness);
        assert!(run_variant(&mut pkg, Variant::PassOnly).unwrap());
        let once = pkg.to_string();
        assert!(!run_variant(&mut pkg, Variant::PassOnly).unwrap(), "{strictness}");
        assert_eq!(pkg.to_string(), once);
    }
}

#[test]
fn legalized_text_reparses_identically() {
    for strictness in [RuntimeOrdered, RuntimeMutuallyExclusive] {
        let mut pkg = instantiate(PARTIAL_ORDER, strictness);
        run_variant(&mut pkg, Variant::StandardPipelineInlineProcs).unwrap();
        let text = pkg.to_string();
        let reparsed = parse_package(&text).unwrap_or_else(|d| panic!("{d:?}\n{text}"));
        assert_eq!(reparsed.to_string(), text);
    }
}

#[test]
fn adapters_are_named_after_their_channels() {
    let mut pkg = instantiate(BACK_TO_BACK, RuntimeOrdered);
    run_variant(&mut pkg, Variant::PassOnly).unwrap();
    let procs: Vec<&str> = pkg.procs.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(procs, vec!["my_proc", "in__adapter", "out__adapter"]);
    for name in ["in__req_0", "in__resp_0", "in__req_1", "in__resp_1", "out__req_0", "out__data_0"] {
        let channel = pkg
            .channel_by_name(name)
            .unwrap_or_else(|| panic!("missing {name}"));
        assert_eq!(channel.strictness, ProvenMutuallyExclusive);
    }
}
