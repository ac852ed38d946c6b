use pretty_assertions::assert_eq;

use runic::{Engine, Value};

#[test]
fn s1_arithmetic_precedence() {
    let mut engine = Engine::new();
    let out = engine.capture("print(1 + 2 * 3)").unwrap();
    assert_eq!(out.lines, vec!["7".to_string()]);
}

#[test]
fn s2_while_loop_block_form() {
    let mut engine = Engine::new();
    let out = engine
        .capture("x = 0\nwhile x < 3\n x = x + 1\nend\nprint(x)\n")
        .unwrap();
    assert_eq!(out.lines, vec!["3".to_string()]);
}

#[test]
fn s3_function_call_and_arity_mismatch() {
    let mut engine = Engine::new();
    let out = engine
        .capture("def f(a,b)\n return a+b\nend\nprint(f(2,5))\n")
        .unwrap();
    assert_eq!(out.lines, vec!["7".to_string()]);

    let err = engine.run("f(1)").unwrap_err();
    let message = err.to_string();
    assert!(message.contains('1'), "message was: {message}");
    assert!(message.contains('2'), "message was: {message}");
}

#[test]
fn s4_list_append_and_index() {
    let mut engine = Engine::new();
    let out = engine
        .capture("l = [1,2,3]\nappend(l,4)\nprint(len(l))\nprint(l[3])\n")
        .unwrap();
    assert_eq!(out.lines, vec!["4".to_string(), "4".to_string()]);
}

#[test]
fn s5_dictionary_literal_and_element_assignment() {
    let mut engine = Engine::new();
    let out = engine
        .capture("d = {\"a\":1}\nd[\"b\"] = 2\nprint(d[\"a\"]+d[\"b\"])\n")
        .unwrap();
    assert_eq!(out.lines, vec!["3".to_string()]);
}

#[test]
fn s6_for_loop_with_continue() {
    let mut engine = Engine::new();
    let out = engine
        .capture(
            "for i=0; i<3; i=i+1\n if i==1\n  continue\n end\n print(i)\nend\n",
        )
        .unwrap();
    assert_eq!(out.lines, vec!["0".to_string(), "2".to_string()]);
}

#[test]
fn s7_assertion_failure_message() {
    let mut engine = Engine::new();
    let err = engine.run("assert(1==2, \"nope\")").unwrap_err();
    assert_eq!(err.to_string(), "user assertion failed: nope.");
}

#[test]
fn break_unwinds_the_value_stack_to_the_loop_entry_size() {
    let mut engine = Engine::new();
    let out = engine
        .capture(
            "i = 0\nwhile true\n if i == 2\n  break\n end\n i = i + 1\nend\nprint(i)\n",
        )
        .unwrap();
    assert_eq!(out.lines, vec!["2".to_string()]);
}

#[test]
fn string_concatenation_and_type_mismatch() {
    let mut engine = Engine::new();
    let out = engine.capture("print(\"a\" + \"b\")").unwrap();
    assert_eq!(out.lines, vec!["ab".to_string()]);

    let err = engine.run("print(\"a\" + 1)").unwrap_err();
    assert!(err.to_string().len() > 0);
}

#[test]
fn division_by_a_literal_zero_is_a_runtime_error_not_a_compile_error() {
    let mut engine = Engine::new();
    let err = engine.run("print(1 / 0)").unwrap_err();
    assert!(err.to_string().len() > 0);
}

#[test]
fn host_functions_can_be_registered_and_called_from_script() {
    let mut engine = Engine::new();
    engine.register_fn("triple", 1, 1, |args, _ctx| {
        Ok(Value::Number(args[0].as_number().unwrap_or(0.0) * 3.0))
    });
    let out = engine.capture("print(triple(4))").unwrap();
    assert_eq!(out.lines, vec!["12".to_string()]);
}

#[test]
fn limits_cap_a_runaway_loop() {
    let mut engine = Engine::new();
    engine.set_limits(runic::Limits {
        max_instructions: Some(1000),
        max_recursion_depth: None,
    });
    let err = engine.run("x = 0\nwhile true\n x = x + 1\nend\n").unwrap_err();
    assert!(err.to_string().to_lowercase().contains("instruction"));
}

#[test]
fn undefined_global_lookup_fails() {
    let mut engine = Engine::new();
    let err = engine.run("print(get(\"nope\"))").unwrap_err();
    assert!(err.to_string().len() > 0);
    assert!(!engine.has("nope"));
}
