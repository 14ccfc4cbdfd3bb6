//! Property-based tests for the rule engine and value comparator.

use chembase::value::{compare, equals};
use chembase::{ConditionMap, EvalContext, Rule, TriState, Value};
use proptest::prelude::*;
use serde_json::json;
use std::cmp::Ordering;

// Strategy for integer values of either width
fn integer_value() -> impl Strategy<Value = (i64, Value)> {
    prop_oneof![
        any::<i32>().prop_map(|n| (n as i64, Value::Int32(n))),
        any::<i64>().prop_map(|n| (n, Value::Int64(n))),
    ]
}

fn comparison() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("<"), Just("<="), Just(">"), Just(">="), Just("=="), Just("!=")]
}

fn record_context(n: i64) -> EvalContext {
    EvalContext::new().with_variable("compound", Value::from_json(json!({ "n": n })))
}

fn concrete(rule: &Rule, n: i64) -> bool {
    rule.evaluate(&record_context(n)).unwrap()
}

fn symbolic(rule: &Rule, conditions: serde_json::Value) -> TriState {
    let conditions = ConditionMap::from_json(conditions).unwrap();
    rule.evaluate_query(&EvalContext::new(), &conditions).unwrap()
}

proptest! {
    #[test]
    fn evaluation_is_deterministic(n in -1000i64..1000, k in -1000i64..1000, op in comparison()) {
        let rule = Rule::parse(&format!("compound.n {op} {k} && request == null")).unwrap();
        let ctx = record_context(n);
        let first = rule.evaluate(&ctx).unwrap();
        for _ in 0..3 {
            prop_assert_eq!(rule.evaluate(&ctx).unwrap(), first);
        }
    }

    #[test]
    fn integer_compare_is_a_total_order((a, va) in integer_value(), (b, vb) in integer_value()) {
        prop_assert_eq!(compare(&va, &vb).unwrap(), a.cmp(&b));
        prop_assert_eq!(compare(&vb, &va).unwrap(), b.cmp(&a));
        prop_assert_eq!(equals(&va, &vb), a == b);
    }

    #[test]
    fn mixed_numeric_kinds_agree(n in -1_000_000i32..1_000_000) {
        let double = Value::Double(n as f64);
        prop_assert_eq!(compare(&Value::Int32(n), &double).unwrap(), Ordering::Equal);
        prop_assert_eq!(compare(&Value::Int64(n as i64 + 1), &double).unwrap(), Ordering::Greater);
    }

    #[test]
    fn pinned_query_matches_concrete(v in -100i64..100, k in -100i64..100, op in comparison()) {
        let rule = Rule::parse(&format!("compound.n {op} {k}")).unwrap();
        let outcome = symbolic(&rule, json!({ "n": v }));
        prop_assert_eq!(outcome, TriState::from_bool(concrete(&rule, v)));
    }

    // A query bounded in the rule's direction never denies a record the
    // rule would admit.
    #[test]
    fn bounded_query_is_never_stricter(
        lo in -100i64..100,
        span in 0i64..100,
        offset in 0i64..100,
        k in -200i64..200,
        above in any::<bool>(),
        strict in any::<bool>(),
    ) {
        let hi = lo + span;
        let n = lo + offset.min(span);
        let op = match (above, strict) {
            (true, true) => ">",
            (true, false) => ">=",
            (false, true) => "<",
            (false, false) => "<=",
        };
        let rule = Rule::parse(&format!("compound.n {op} {k}")).unwrap();
        let outcome = symbolic(&rule, json!({ "n": { "$gte": lo, "$lte": hi } }));
        if concrete(&rule, n) {
            prop_assert!(outcome.passes(), "{} {} {} in [{}, {}]", n, op, k, lo, hi);
        }
    }
}

#[test]
fn null_equals_undefined() {
    assert!(equals(&Value::Null, &Value::Undefined));
    assert!(equals(&Value::Undefined, &Value::Null));
    assert!(!equals(&Value::Null, &Value::Int32(0)));

    let rule = Rule::parse("request.missing == null && null == request.missing").unwrap();
    let ctx = EvalContext::new().with_variable("request", Value::from_json(json!({})));
    assert!(rule.evaluate(&ctx).unwrap());
}

#[test]
fn decimal_is_not_comparable() {
    let decimal = Value::Decimal(chembase::value::Decimal128("1.5".into()));
    assert!(compare(&decimal, &Value::Int32(1)).is_err());
    assert!(compare(&decimal, &decimal).is_err());
}
