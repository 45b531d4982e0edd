#![expect(clippy::unwrap_used)] // test code OK

use lispcore::Value;
use lispcore::ast::ValueMap;
use lispcore::evaluator::{create_global_env, eval};
use lispcore::reader::{Reader, read_all, read_str};
use proptest::prelude::*;

proptest! {
    #[test]
    fn reader_never_panics(input in "\\PC*") {
        // Any arbitrary string should produce Ok or Err, never panic
        let _ = read_str(&input);
    }

    #[test]
    fn reader_all_never_panics(input in "\\PC*") {
        let _ = read_all(&input);
    }

    #[test]
    fn delimiter_soup_never_panics(input in r#"[()\[\]{}"\\; a1:,\n-]{0,40}"#) {
        let _ = read_all(&input);
    }

    #[test]
    fn reading_past_errors_always_advances(input in r#"[()\[\]{}"\\; a1:,\n~-]{0,40}"#) {
        let mut reader = Reader::new(&input);
        let mut offset = reader.offset();
        while !matches!(reader.read(), Ok(None)) {
            prop_assert!(reader.offset() > offset, "stuck at {} in {:?}", offset, input);
            offset = reader.offset();
        }
        prop_assert_eq!(reader.offset(), input.len());
    }
}

/// Self-evaluating scalars.
fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9f64..1.0e9).prop_map(Value::Float),
        "\\PC{0,20}".prop_map(Value::String),
        any::<bool>().prop_map(Value::Bool),
        Just(Value::Nil),
        "[a-z][a-z0-9-]{0,10}".prop_map(Value::Keyword),
    ]
}

fn leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        4 => scalar(),
        1 => "[a-z][a-z0-9?!*-]{0,10}"
            .prop_filter("reserved token", |s| !matches!(s.as_str(), "nil" | "true" | "false"))
            .prop_map(Value::Symbol),
    ]
}

/// Literal data: no call forms, so evaluating it only rebuilds it.
fn literal() -> impl Strategy<Value = Value> {
    scalar().prop_recursive(3, 32, 5, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..5).prop_map(Value::Vector),
            prop::collection::vec((inner.clone(), inner), 0..4).prop_map(|pairs| {
                let mut map = ValueMap::new();
                for (k, v) in pairs {
                    map.insert(k, v);
                }
                Value::Map(map)
            }),
        ]
    })
}

/// Like `literal`, but lists are allowed since the result is only read, never evaluated.
fn datum() -> impl Strategy<Value = Value> {
    leaf().prop_recursive(3, 32, 5, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..5).prop_map(Value::List),
            prop::collection::vec(inner, 0..5).prop_map(Value::Vector),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn printed_data_reads_back_equal(value in datum()) {
        let printed = value.to_string();
        let read = read_str(&printed).unwrap_or_else(|e| {
            panic!("Failed to read printed value: {printed:?}\nError: {e}")
        });
        prop_assert_eq!(read, value);
    }

    #[test]
    fn literals_evaluate_to_themselves(value in literal()) {
        let read = read_str(&value.to_string()).unwrap();
        let result = eval(&read, &create_global_env()).unwrap();
        prop_assert_eq!(result, value);
    }

    #[test]
    fn forms_separated_by_whitespace_read_in_order(values in prop::collection::vec(datum(), 1..5)) {
        let source = values
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        let read = read_all(&source).unwrap();
        prop_assert_eq!(read, values);
    }
}
