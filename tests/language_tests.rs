// End-to-end behaviour of Droy programs: lex, parse and evaluate through
// the public library API.

use droy::lexer::{tokenize, TokenType};
use droy::parser::parse;
use droy::runner::{self, EXIT_DATA_ERROR, EXIT_RUNTIME_ERROR};
use droy::{DroyError, Evaluator, EvaluatorConfig, Program, RuntimeErrorKind, Value};
use pretty_assertions::assert_eq;

fn program(source: &str) -> Program {
    let (tokens, lex_errors) = tokenize(source);
    assert!(lex_errors.is_empty(), "lex errors: {:?}", lex_errors);
    let (program, parse_errors) = parse(tokens);
    assert!(parse_errors.is_empty(), "parse errors: {:?}", parse_errors);
    program
}

fn evaluate(source: &str) -> (Evaluator, Result<Value, DroyError>) {
    let mut evaluator = Evaluator::new().capture_output();
    let result = evaluator.evaluate_program(&program(source));
    (evaluator, result)
}

fn evaluate_ok(source: &str) -> Evaluator {
    let (evaluator, result) = evaluate(source);
    if let Err(error) = result {
        panic!("unexpected error in {:?}: {}", source, error);
    }
    evaluator
}

fn runtime_error(source: &str) -> Option<RuntimeErrorKind> {
    evaluate(source).1.err().and_then(|e| e.runtime_kind())
}

fn output_of(source: &str) -> String {
    evaluate_ok(source).take_output()
}

#[test]
fn set_then_ret_yields_the_bound_value() {
    let (evaluator, result) = evaluate("set x = 5\nret x");
    assert_eq!(result.ok(), Some(Value::Number(5.0)));
    assert_eq!(evaluator.lookup("x"), Some(Value::Number(5.0)));
}

#[test]
fn strings_bind_as_strings() {
    let evaluator = evaluate_ok("set name = \"Droy\"");
    assert_eq!(evaluator.lookup("name"), Some(Value::string("Droy")));
}

#[test]
fn special_variable_slot_updates() {
    let evaluator = evaluate_ok("@si = 100\nset seen = @si");
    assert_eq!(evaluator.special("si"), Some(Value::Number(100.0)));
    assert_eq!(evaluator.lookup("seen"), Some(Value::Number(100.0)));
}

#[test]
fn arithmetic_on_bound_values() {
    let cases = [
        ("set a = 10; set b = 20; set r = a + b", 30.0),
        ("set a = 50; set b = 20; set r = a - b", 30.0),
        ("set a = 5; set b = 6; set r = a * b", 30.0),
        ("set a = 100; set b = 4; set r = a / b", 25.0),
        ("set x = 5; set y = 3; set r = (x + y) * 2", 16.0),
        ("set r = 2 ** 3 ** 2", 512.0),
        ("set r = 7 % 3 + -1", 0.0),
        ("set r = 6 & 3 | 8", 10.0),
    ];
    for (source, expected) in cases {
        let evaluator = evaluate_ok(source);
        assert_eq!(evaluator.lookup("r"), Some(Value::Number(expected)), "{}", source);
    }
}

#[test]
fn string_concatenation() {
    let evaluator = evaluate_ok("set first = \"Hello\"; set second = \"World\"; set result = first + \" \" + second");
    assert_eq!(evaluator.lookup("result"), Some(Value::string("Hello World")));
}

#[test]
fn const_bindings_reject_later_set() {
    for name in ["limit", "pi", "greeting"] {
        let source = format!("const {name} = 1\nset {name} = 2");
        assert_eq!(runtime_error(&source), Some(RuntimeErrorKind::ConstReassignment), "{}", source);

        let nested = format!("set const {name} = 1\nf change() {{ set {name} = 3 }}\nchange()");
        assert_eq!(runtime_error(&nested), Some(RuntimeErrorKind::ConstReassignment), "{}", nested);
    }
}

#[test]
fn block_bindings_do_not_escape() {
    let evaluator = evaluate_ok("set x = 1\n{ const x = 2\n set inner = x }\nfe (true) { set other = 3 }");
    assert_eq!(evaluator.lookup("x"), Some(Value::Number(1.0)));
    assert_eq!(evaluator.lookup("inner"), None);
    assert_eq!(evaluator.lookup("other"), None);
    assert_eq!(
        runtime_error("while (true) { set temp = 1\n break }\nem temp"),
        Some(RuntimeErrorKind::UndefinedVariable)
    );
}

#[test]
fn token_kinds_survive_reserialization() {
    let source = "f add(a, b) { ret a + b }\n\
                  ~s total = add(0xFF, 2.5) ** 2\n\
                  fe (total >= 10 && !false) { ~e \"big total\" } else { em @si }\n\
                  set items = [1, \"two\", {three: 3}]\n\
                  items[0] += 1; items.length\n\
                  a-link id: \"x\" api: \"y\"\n\
                  sty theme { font-size: 12 }\n\
                  import \"lib/math\" as math\n\
                  */lock";
    let (tokens, errors) = tokenize(source);
    assert!(errors.is_empty(), "{:?}", errors);

    let reserialized = tokens
        .iter()
        .filter(|token| token.token_type != TokenType::Eof)
        .map(|token| token.lexeme.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let (again, errors) = tokenize(&reserialized);
    assert!(errors.is_empty(), "{:?}", errors);

    let kinds = |tokens: &[droy::Token]| tokens.iter().map(|t| t.token_type).collect::<Vec<_>>();
    assert_eq!(kinds(&tokens), kinds(&again));
}

#[test]
fn recursive_factorial_emits_result() {
    let output = output_of(
        "f factorial(n){ fe (n<=1){ret 1} ret n*factorial(n-1) }; set result = factorial(5); em result",
    );
    assert_eq!(output, "120\n");
}

#[test]
fn natives_mutate_every_alias() {
    let evaluator = evaluate_ok(
        "set a = [1]\nset b = a\npush(b, 2)\nb.push(3)\nset o = {}\nset p = o\np.k = 1\nset sorted = sort([3, 1, 2])",
    );
    assert_eq!(evaluator.lookup("a").map(|v| v.to_string()), Some("[1, 2, 3]".to_string()));
    assert_eq!(evaluator.lookup("o").map(|v| v.to_string()), Some("{k: 1}".to_string()));
    assert_eq!(evaluator.lookup("sorted").map(|v| v.to_string()), Some("[1, 2, 3]".to_string()));
}

#[test]
fn shorthand_forms_match_keywords() {
    let long = output_of("set x = 2\nf sq(n) { ret n * n }\nem sq(x)");
    let short = output_of("~s x = 2\nf sq(n) { ~r n * n }\n~e sq(x)");
    assert_eq!(long, short);
    assert_eq!(short, "4\n");
}

#[test]
fn loops_and_higher_order_functions() {
    let output = output_of(
        "f apply(fnc, v) { ret fnc(v) }\n\
         set double = f (x) { ret x * 2 }\n\
         for (set i = 0; i < 3; i++) { em apply(double, i) }\n\
         for n in range(3) { fe (n == 1) { continue } em n }",
    );
    assert_eq!(output, "0\n2\n4\n0\n2\n");
}

#[test]
fn ternary_and_logical_short_circuit() {
    let output = output_of(
        "set calls = 0\nf touch() { calls += 1\n ret true }\n\
         set a = false && touch()\nset b = true || touch()\n\
         em calls\nem calls == 0 ? \"lazy\" : \"eager\"",
    );
    assert_eq!(output, "0\nlazy\n");
}

#[test]
fn runtime_failures_carry_their_kind() {
    assert_eq!(runtime_error("em nowhere"), Some(RuntimeErrorKind::UndefinedVariable));
    assert_eq!(runtime_error("em 1 / 0"), Some(RuntimeErrorKind::DivisionByZero));
    assert_eq!(runtime_error("em true * 2"), Some(RuntimeErrorKind::TypeMismatch));
    assert_eq!(runtime_error("set n = 1\nn()"), Some(RuntimeErrorKind::InvalidCallTarget));
    assert_eq!(runtime_error("continue"), Some(RuntimeErrorKind::BreakOrContinueOutsideLoop));
    assert_eq!(runtime_error("len(1, 2)"), Some(RuntimeErrorKind::InvalidArgument));
}

#[test]
fn deep_recursion_is_limited_not_fatal() {
    let config = EvaluatorConfig {
        recursion_limit: 200,
        ..EvaluatorConfig::default()
    };
    let mut evaluator = Evaluator::with_config(config).capture_output();
    let result = evaluator.evaluate_program(&program("f forever(n) { ret forever(n + 1) }\nforever(0)"));
    assert_eq!(
        result.err().and_then(|e| e.runtime_kind()),
        Some(RuntimeErrorKind::RecursionLimitExceeded)
    );

    let deep = evaluate_ok("f count(n) { fe (n == 0) { ret 0 } ret 1 + count(n - 1) }\nset r = count(900)");
    assert_eq!(deep.lookup("r"), Some(Value::Number(900.0)));
}

#[test]
fn commands_and_markup_tables() {
    let evaluator = evaluate_ok(
        "*/employment\n*/Running\nlink id: \"docs\" api: \"https://droy.dev/docs\"\n\
         pkg \"ui\"\nmedia \"banner.png\"\nsty { color: \"blue\" }",
    );
    let flags = evaluator.flags();
    assert!(flags.employment && flags.running);
    assert!(!flags.locked && !flags.pressure);
    assert_eq!(evaluator.links()[0].id, "docs");
    assert_eq!(evaluator.links()[0].api, "https://droy.dev/docs");
    assert!(!evaluator.links()[0].extended);
    assert_eq!(evaluator.packages(), &["ui".to_string()]);
    assert_eq!(evaluator.styles().len(), 1);
    assert_eq!(evaluator.styles()[0].name, None);
}

#[test]
fn input_reads_scripted_lines() {
    let mut evaluator = Evaluator::new().capture_output().with_input(["Ada", "Lovelace"]);
    evaluator
        .evaluate_program(&program("set first = input(\"name? \")\nset last = input()\nset none = input()"))
        .unwrap();
    assert_eq!(evaluator.lookup("first"), Some(Value::string("Ada")));
    assert_eq!(evaluator.lookup("last"), Some(Value::string("Lovelace")));
    assert_eq!(evaluator.lookup("none"), Some(Value::Null));
}

#[test]
fn runner_maps_outcomes_to_exit_codes() {
    let mut ok = Evaluator::new().capture_output();
    assert_eq!(runner::run_with(&mut ok, "em \"fine\"", None), 0);
    assert_eq!(ok.output(), "fine\n");

    let mut broken = Evaluator::new().capture_output();
    assert_eq!(runner::run_with(&mut broken, "set = 1\nem (", None), EXIT_DATA_ERROR);

    let mut failing = Evaluator::new().capture_output();
    assert_eq!(runner::run_with(&mut failing, "em 1\nem missing", None), EXIT_RUNTIME_ERROR);
    assert_eq!(failing.output(), "1\n");

    let mut exiting = Evaluator::new().capture_output();
    assert_eq!(runner::run_with(&mut exiting, "f quit() { exit(9) }\nquit()\nem 1", None), 9);
    assert_eq!(exiting.output(), "");
}

#[test]
fn scalar_values_take_method_sugar() {
    let (_, result) = evaluate("set n = 5\nret n.toString()");
    assert_eq!(result.ok(), Some(Value::string("5")));
    assert_eq!(output_of("set flag = false\nem flag.toString() + \"!\""), "false!\n");
    assert_eq!(
        runtime_error("set n = 5\nn.shout()"),
        Some(RuntimeErrorKind::InvalidCallTarget)
    );
}

#[test]
fn deeply_nested_expressions_evaluate() {
    let parens = format!("ret {}1{}", "(".repeat(1500), ")".repeat(1500));
    assert_eq!(evaluate(&parens).1.ok(), Some(Value::Number(1.0)));

    let chain = format!("ret 0{}", "+1".repeat(1499));
    assert_eq!(evaluate(&chain).1.ok(), Some(Value::Number(1499.0)));

    let negations = format!("ret {}true", "!".repeat(1001));
    assert_eq!(evaluate(&negations).1.ok(), Some(Value::Boolean(false)));
}

#[test]
fn overly_deep_source_is_a_data_error() {
    let parens = format!("em {}1{}", "(".repeat(5000), ")".repeat(5000));
    let mut evaluator = Evaluator::new().capture_output();
    assert_eq!(runner::run_with(&mut evaluator, &parens, None), EXIT_DATA_ERROR);

    let chain = format!("em 0{}", "+1".repeat(19_999));
    let mut evaluator = Evaluator::new().capture_output();
    assert_eq!(runner::run_with(&mut evaluator, &chain, None), EXIT_DATA_ERROR);
    assert_eq!(evaluator.output(), "");
}
