use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use sessionq_filter::{EvalError, Filter, FilterError};

fn run(expr: &str, input: Value) -> Vec<Value> {
    let filter = Filter::compile(expr).unwrap_or_else(|err| panic!("{expr:?}: {err}"));
    filter
        .run(&input)
        .into_iter()
        .map(|r| r.unwrap_or_else(|err| panic!("{expr:?} failed: {err}")))
        .collect()
}

fn run_one(expr: &str, input: Value) -> Value {
    let mut outputs = run(expr, input);
    assert_eq!(outputs.len(), 1, "{expr:?} produced {outputs:?}");
    outputs.remove(0)
}

fn error_of(expr: &str, input: Value) -> EvalError {
    let filter = Filter::compile(expr).expect("compile");
    match filter.run(&input).pop() {
        Some(Err(err)) => err,
        other => panic!("{expr:?} expected error, got {other:?}"),
    }
}

fn session_record() -> Value {
    json!({
        "type": "assistant",
        "timestamp": "2025-01-02T03:04:05Z",
        "message": {
            "role": "assistant",
            "content": [
                {"type": "text", "text": "Reading the file"},
                {"type": "tool_use", "name": "Read", "input": {"file_path": "/src/main.rs"}},
                {"type": "tool_use", "name": "Bash", "input": {"command": "ls"}}
            ],
            "usage": {"input_tokens": 120, "output_tokens": 30}
        }
    })
}

#[test]
fn paths_and_iteration() {
    let record = session_record();
    assert_eq!(run_one(".message.role", record.clone()), json!("assistant"));
    assert_eq!(run_one(".missing.deeper", record.clone()), json!(null));
    assert_eq!(
        run(".message.content[] | select(.type == \"tool_use\") | .name", record.clone()),
        vec![json!("Read"), json!("Bash")]
    );
    assert_eq!(run_one(".message.content[-1].input.command", record.clone()), json!("ls"));
    assert_eq!(run_one(r#"."message"["usage"].input_tokens"#, record.clone()), json!(120));
    assert_eq!(run_one(".message.content[1:] | length", record), json!(2));
}

#[test]
fn comma_and_binary_operators_fan_out() {
    assert_eq!(run("1, 2", json!(null)), vec![json!(1), json!(2)]);
    assert_eq!(
        run("(1,2) + (10,20)", json!(null)),
        vec![json!(11), json!(12), json!(21), json!(22)]
    );
    assert_eq!(run_one("[.[] * 2]", json!([1, 2, 3])), json!([2, 4, 6]));
    assert_eq!(run_one("10 / 4", json!(null)), json!(2.5));
    assert_eq!(run_one("-(1 + 2) * 2", json!(null)), json!(-6));
}

#[test]
fn optional_access_suppresses_errors() {
    assert_eq!(run(".[]?", json!(3)), Vec::<Value>::new());
    assert_eq!(run("[.[] | .a?]", json!([1, {"a": 2}])), vec![json!([2])]);
    assert!(Filter::compile(".a.b")
        .expect("compile")
        .run(&json!({"a": 5}))
        .pop()
        .expect("output")
        .is_err());
}

#[test]
fn runtime_error_keeps_earlier_outputs() {
    let filter = Filter::compile(".[] | .a").expect("compile");
    let outputs = filter.run(&json!([{"a": 1}, 2, {"a": 3}]));
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0], Ok(json!(1)));
    assert_eq!(
        outputs[1],
        Err(EvalError::Type("Cannot index number with \"a\"".into()))
    );
}

#[test]
fn conditionals_and_logic() {
    let expr = r#"if .n > 10 then "big" elif .n > 5 then "medium" else "small" end"#;
    assert_eq!(run_one(expr, json!({"n": 11})), json!("big"));
    assert_eq!(run_one(expr, json!({"n": 6})), json!("medium"));
    assert_eq!(run_one(expr, json!({"n": 1})), json!("small"));
    assert_eq!(run_one("if . then 1 end", json!(false)), json!(false));
    assert_eq!(run_one(".a and .b", json!({"a": true, "b": 0})), json!(true));
    assert_eq!(run_one(".a or error", json!({"a": 1})), json!(true));
    assert_eq!(run_one("(.x // \"default\")", json!({"x": false})), json!("default"));
    assert_eq!(run("(false, 1, null, 2) // 3", json!(null)), vec![json!(1), json!(2)]);
    assert_eq!(run_one(". == 1.0", json!(1)), json!(true));
    assert_eq!(run_one("[null, true, 1, \"a\"] | sort", json!(null)), json!([null, true, 1, "a"]));
}

#[test]
fn try_catch_and_error() {
    assert_eq!(run_one(r#"try error("boom") catch ."#, json!(null)), json!("boom"));
    assert_eq!(
        run_one("try (1/0) catch \"div\"", json!(null)),
        json!("div")
    );
    assert_eq!(run("try error(\"x\")", json!(null)), Vec::<Value>::new());
    assert_eq!(
        error_of("error({code: 1})", json!(null)),
        EvalError::User(json!({"code": 1}))
    );
}

#[test]
fn reduce_foreach_and_bindings() {
    assert_eq!(run_one("reduce .[] as $x (0; . + $x)", json!([1, 2, 3])), json!(6));
    assert_eq!(
        run("foreach .[] as $x (0; . + $x)", json!([1, 2, 3])),
        vec![json!(1), json!(3), json!(6)]
    );
    assert_eq!(
        run("foreach .[] as $x (0; . + $x; [$x, .])", json!([1, 2])),
        vec![json!([1, 1]), json!([2, 3])]
    );
    assert_eq!(
        run_one(".name as $n | .items | map({name: $n, item: .})", json!({"name": "a", "items": [1, 2]})),
        json!([{"name": "a", "item": 1}, {"name": "a", "item": 2}])
    );
}

#[test]
fn constructors_and_interpolation() {
    assert_eq!(
        run_one(r#"{type, id: .uuid, "k": 1, (.key): 2}"#, json!({"type": "user", "uuid": "u1", "key": "dyn"})),
        json!({"type": "user", "id": "u1", "k": 1, "dyn": 2})
    );
    assert_eq!(
        run(r#"{a: (1, 2)}"#, json!(null)),
        vec![json!({"a": 1}), json!({"a": 2})]
    );
    assert_eq!(
        run_one(r#""\(.type): \(.n + 1)""#, json!({"type": "user", "n": 1})),
        json!("user: 2")
    );
    assert_eq!(run_one("[]", json!(null)), json!([]));
    assert_eq!(run_one("{}", json!(null)), json!({}));
}

#[test]
fn collection_builtins() {
    let rows = json!([{"k": "b", "v": 2}, {"k": "a", "v": 1}, {"k": "b", "v": 3}]);
    assert_eq!(run_one("map(.v) | add", rows.clone()), json!(6));
    assert_eq!(run_one("sort_by(.k) | map(.v)", rows.clone()), json!([1, 2, 3]));
    assert_eq!(
        run_one("group_by(.k) | map(length)", rows.clone()),
        json!([1, 2])
    );
    assert_eq!(run_one("unique_by(.k) | map(.v)", rows.clone()), json!([1, 2]));
    assert_eq!(run_one("max_by(.v).v", rows.clone()), json!(3));
    assert_eq!(run_one("min_by(.v).v", rows.clone()), json!(1));
    assert_eq!(run_one("[.[] | .k] | unique", rows.clone()), json!(["a", "b"]));
    assert_eq!(run_one("any(.v > 2)", rows.clone()), json!(true));
    assert_eq!(run_one("all(.v > 2)", rows), json!(false));
    assert_eq!(run("[3, 1, 2] | min, max", json!(null)), vec![json!(1), json!(3)]);
    assert_eq!(run_one("[[1, [2]], 3] | flatten", json!(null)), json!([1, 2, 3]));
    assert_eq!(run_one("[[1, [2]], 3] | flatten(1)", json!(null)), json!([1, [2], 3]));
    assert_eq!(run_one("[range(3)]", json!(null)), json!([0, 1, 2]));
    assert_eq!(run_one("[range(2; 5)]", json!(null)), json!([2, 3, 4]));
    assert_eq!(run_one("[limit(2; .[])]", json!([5, 6, 7])), json!([5, 6]));
    assert_eq!(run_one("first(.[] | select(. > 5))", json!([5, 6, 7])), json!(6));
    assert_eq!(run_one("[.[] | numbers]", json!([1, "a", null, 2])), json!([1, 2]));
    assert_eq!(run_one("reverse", json!([1, 2])), json!([2, 1]));
    assert_eq!(run_one("isempty(.[])", json!([])), json!(true));
}

#[test]
fn object_builtins() {
    let obj = json!({"b": 2, "a": 1});
    assert_eq!(run_one("keys", obj.clone()), json!(["a", "b"]));
    assert_eq!(run_one("has(\"a\")", obj.clone()), json!(true));
    assert_eq!(run_one("to_entries | map(.key) | sort", obj.clone()), json!(["a", "b"]));
    assert_eq!(
        run_one("with_entries(select(.value > 1))", obj.clone()),
        json!({"b": 2})
    );
    assert_eq!(run_one("map_values(. * 10)", obj), json!({"a": 10, "b": 20}));
    assert_eq!(
        run_one(r#"[{"name": "x", "v": 1}] | from_entries"#, json!(null)),
        json!({"x": 1})
    );
}

#[test]
fn string_builtins() {
    assert_eq!(run_one("split(\",\") | join(\"-\")", json!("a,b,c")), json!("a-b-c"));
    assert_eq!(run_one("ascii_upcase", json!("abc")), json!("ABC"));
    assert_eq!(run_one("ltrimstr(\"/src/\")", json!("/src/main.rs")), json!("main.rs"));
    assert_eq!(run_one("rtrimstr(\".rs\")", json!("main.rs")), json!("main"));
    assert_eq!(run_one("startswith(\"ma\")", json!("main")), json!(true));
    assert_eq!(run_one("tostring", json!({"a": 1})), json!(r#"{"a":1}"#));
    assert_eq!(run_one("tonumber", json!(" 42 ")), json!(42));
    assert_eq!(run_one("fromjson.a", json!(r#"{"a": [1]}"#)), json!([1]));
    assert_eq!(run_one("length", json!("héllo")), json!(5));
    assert_eq!(run_one("utf8bytelength", json!("héllo")), json!(6));
    assert_eq!(run_one("contains(\"ell\")", json!("hello")), json!(true));
    assert_eq!(run_one("[.[] | tostring] | join(\",\")", json!([1, null, "x"])), json!("1,null,x"));
}

#[test]
fn regex_builtins() {
    assert_eq!(run_one(r#"test("ERROR"; "i")"#, json!("an error occurred")), json!(true));
    assert_eq!(run_one(r#"test("^x")"#, json!("an error")), json!(false));
    assert_eq!(run_one(r#"sub("o"; "0")"#, json!("foo")), json!("f0o"));
    assert_eq!(run_one(r#"gsub("o"; "0")"#, json!("foo")), json!("f00"));
    assert_eq!(run_one(r#"sub("o"; "0"; "g")"#, json!("foo")), json!("f00"));
    assert_eq!(
        run_one(r#"gsub("(?<d>[0-9])"; "<\(.d)>")"#, json!("a1b2")),
        json!("a<1>b<2>")
    );
}

#[test]
fn dynamic_regex_errors_at_runtime() {
    let filter = Filter::compile(".text | test(.pattern)").expect("compile");
    assert!(filter.run(&json!({"text": "a"})).pop().expect("output").is_err());
    let filter = Filter::compile(". as $r | \"abc\" | test($r)").expect("compile");
    assert_eq!(filter.run(&json!("b")), vec![Ok(json!(true))]);
    assert!(filter.run(&json!("(")).pop().expect("output").is_err());
}

#[test]
fn recursion() {
    assert_eq!(
        run("[.. | numbers]", json!({"a": 1, "b": [2, {"c": 3}]})),
        vec![json!([1, 2, 3])]
    );
    assert_eq!(
        run_one("[recurse(.children[]?) | .id]", json!({"id": 1, "children": [{"id": 2, "children": []}]})),
        json!([1, 2])
    );
}

#[test]
fn compile_errors_are_typed() {
    assert!(matches!(Filter::compile(".a |"), Err(FilterError::Syntax { .. })));
    assert!(matches!(
        Filter::compile("nosuchfn"),
        Err(FilterError::UnknownFunction { .. })
    ));
    assert!(matches!(
        Filter::compile("$undefined"),
        Err(FilterError::UndefinedVariable(_))
    ));
    assert!(matches!(
        Filter::compile(r#"test("[")"#),
        Err(FilterError::InvalidRegex { .. })
    ));
    assert!(matches!(
        Filter::compile("@nope"),
        Err(FilterError::UnknownFormat(_))
    ));
}

#[test]
fn assignment_operators() {
    assert_eq!(run_one(".a.b |= .+1", json!({"a": {"b": 1}})), json!({"a": {"b": 2}}));
    assert_eq!(run_one(".a += 1", json!({"a": 1})), json!({"a": 2}));
    assert_eq!(run_one(".a = .b", json!({"b": 3})), json!({"a": 3, "b": 3}));
    assert_eq!(run_one(".a //= 5", json!({})), json!({"a": 5}));
    assert_eq!(run_one(".items[] *= 2", json!({"items": [1, 2]})), json!({"items": [2, 4]}));
    assert_eq!(run_one(".[1:3] = [\"x\"]", json!([1, 2, 3, 4])), json!([1, "x", 4]));
    assert_eq!(
        run(".a = (1, 2)", json!({})),
        vec![json!({"a": 1}), json!({"a": 2})]
    );
    error_of("(.a | tostring) |= 1", json!({"a": 1}));
}

#[test]
fn path_builtins() {
    assert_eq!(run_one("del(.a)", json!({"a": 1})), json!({}));
    assert_eq!(run_one("del(.[1, 2])", json!([1, 2, 3, 4])), json!([1, 4]));
    assert_eq!(run_one("del(.. | nulls)", json!([1, null, {"a": null}])), json!([1, {}]));
    assert_eq!(run_one("[paths]", json!({"a": [1]})), json!([["a"], ["a", 0]]));
    assert_eq!(
        run_one("[paths(type == \"number\")]", json!({"a": 1, "b": {"c": 2}})),
        json!([["a"], ["b", "c"]])
    );
    assert_eq!(
        run_one("[leaf_paths]", json!({"a": {"b": 1}, "c": 2})),
        json!([["a", "b"], ["c"]])
    );
    assert_eq!(run_one("getpath([\"a\", \"b\"])", json!({"a": {"b": 5}})), json!(5));
    assert_eq!(run_one("getpath([\"a\", 0, \"b\"])", json!(null)), json!(null));
    assert_eq!(run_one("setpath([\"a\", 1]; 9)", json!(null)), json!({"a": [null, 9]}));
    assert_eq!(
        run_one("[path(.a[].b)]", json!({"a": [{"b": 1}, {"b": 2}]})),
        json!([["a", 0, "b"], ["a", 1, "b"]])
    );
    assert_eq!(
        run_one("pick(.a.b)", json!({"a": {"b": 1, "c": 2}, "d": 3})),
        json!({"a": {"b": 1}})
    );
    assert_eq!(
        run_one("walk(if type == \"number\" then . + 1 else . end)", json!([1, {"a": 2}])),
        json!([2, {"a": 3}])
    );
}

#[test]
fn entries_of_objects_and_arrays() {
    assert_eq!(
        run_one("to_entries", json!([10, 20])),
        json!([{"key": 0, "value": 10}, {"key": 1, "value": 20}])
    );
    assert_eq!(
        run_one("with_entries(.value += 1)", json!({"a": 1, "b": 2})),
        json!({"a": 2, "b": 3})
    );
    assert_eq!(run_one("with_entries(.)", json!(["x"])), json!({"0": "x"}));
    assert_eq!(
        run_one("from_entries", json!([{"name": "a", "value": 1}, {"k": "b", "v": 2}])),
        json!({"a": 1, "b": 2})
    );
}

#[test]
fn generators_stop_early() {
    assert_eq!(run_one("[limit(2; range(100000000000))]", json!(1)), json!([0, 1]));
    assert_eq!(run_one("first(range(100000000000))", json!(null)), json!(0));
    assert_eq!(run_one("nth(2; range(100000000000))", json!(null)), json!(2));
    assert_eq!(run_one("isempty(range(100000000000))", json!(null)), json!(false));
    assert_eq!(run_one("[limit(3; repeat(1))]", json!(null)), json!([1, 1, 1]));
    assert_eq!(run_one("[limit(0; 1, 2)]", json!(null)), json!([]));
    assert_eq!(run_one("[limit(-1; 1, 2)]", json!(null)), json!([1, 2]));
    assert_eq!(run_one("[range(0; 10; 3)]", json!(null)), json!([0, 3, 6, 9]));
    assert_eq!(run_one("[range(5; 0; -2)]", json!(null)), json!([5, 3, 1]));
    assert_eq!(run_one("[range(0; 3; 0)]", json!(null)), json!([]));
    assert_eq!(run_one("until(. >= 5; . + 2)", json!(0)), json!(6));
    assert_eq!(run_one("[while(. < 8; . * 2)]", json!(1)), json!([1, 2, 4]));
}

#[test]
fn definitions_and_closures() {
    assert_eq!(run_one("def inc(f): f + 1; [.[] | inc(.)]", json!([1, 2])), json!([2, 3]));
    assert_eq!(
        run_one("def fac: if . <= 1 then 1 else . * (. - 1 | fac) end; fac", json!(5)),
        json!(120)
    );
    assert_eq!(run_one("def f($a; $b): $a + $b; f(1; 2)", json!(null)), json!(3));
    assert_eq!(run_one("def g: def h: . * 2; h + 1; g", json!(3)), json!(7));
    assert_eq!(run_one("def f(x): x | x; f(. * 3)", json!(2)), json!(18));
    assert_eq!(
        run_one("1 as $x | def f: $x; 2 as $x | [f, $x]", json!(null)),
        json!([1, 2])
    );
}

#[test]
fn destructuring_labels_and_env() {
    assert_eq!(
        run_one(". as [$a, {b: $c}] | [$a, $c]", json!([1, {"b": 2}])),
        json!([1, 2])
    );
    assert_eq!(
        run_one(". as {$a, b: [$x, $y]} | $a + $x + $y", json!({"a": 1, "b": [2, 3]})),
        json!(6)
    );
    assert_eq!(
        run_one("[label $out | .[] | if . > 2 then ., break $out else . end]", json!([1, 2, 3, 4])),
        json!([1, 2, 3])
    );
    assert_eq!(run_one("$ENV | type", json!(null)), json!("object"));
    assert_eq!(run_one("$ENV == env", json!(null)), json!(true));
    assert_eq!(run_one("$ENV.SESSIONQ_FILTER_TEST_UNSET", json!(null)), json!(null));
}

#[test]
fn output_formats() {
    assert_eq!(run_one("@csv", json!([1, "a\"b", null])), json!("1,\"a\"\"b\","));
    assert_eq!(run_one("@tsv", json!(["a\tb", 2])), json!("a\\tb\t2"));
    assert_eq!(run_one("@json", json!({"a": [1]})), json!("{\"a\":[1]}"));
    assert_eq!(run_one(".a | @base64", json!({"a": "x"})), json!("eA=="));
    assert_eq!(run_one("@base64d", json!("eA==")), json!("x"));
    assert_eq!(run_one("@html \"v=\\(.)\"", json!("<")), json!("v=&lt;"));
    assert_eq!(run_one("@json \"v: \\(.)\"", json!({"a": 1})), json!("v: {\"a\":1}"));
    error_of("@csv", json!({"a": 1}));
}

#[test]
fn dates() {
    assert_eq!(run_one("fromdateiso8601", json!("2024-01-01T00:00:00Z")), json!(1704067200));
    assert_eq!(run_one("fromdate", json!("2024-01-01T00:00:00Z")), json!(1704067200));
    assert_eq!(run_one("todate", json!(1704067200)), json!("2024-01-01T00:00:00Z"));
    assert_eq!(
        run_one("strptime(\"%Y-%m-%dT%H:%M:%SZ\") | mktime", json!("2015-03-05T23:51:47Z")),
        json!(1425599507)
    );
    assert_eq!(
        run_one("gmtime | todate", json!(1425599507)),
        json!("2015-03-05T23:51:47Z")
    );
    assert_eq!(run_one("now | type", json!(null)), json!("number"));
    error_of("fromdateiso8601", json!("yesterday"));
}

#[test]
fn regex_matching_builtins() {
    assert_eq!(
        run_one("[match(\"foo\"; \"g\") | .offset]", json!("foo bar foo")),
        json!([0, 8])
    );
    assert_eq!(
        run_one("[match(\"(?<x>z)?t\"; \"g\") | .captures[0].offset]", json!("test")),
        json!([-1, -1])
    );
    assert_eq!(
        run_one("capture(\"(?<a>[a-z]+)-(?<n>\\\\d+)\")", json!("xyz-1")),
        json!({"a": "xyz", "n": "1"})
    );
    assert_eq!(run_one("[scan(\"\\\\d+\")]", json!("a1b22")), json!(["1", "22"]));
    assert_eq!(
        run_one("[scan(\"([a-z])(\\\\d)\")]", json!("a1b2")),
        json!([["a", "1"], ["b", "2"]])
    );
    assert_eq!(run_one("[splits(\", *\")]", json!("a, b,c")), json!(["a", "b", "c"]));
    assert_eq!(run_one("split(\"\\\\d\"; null)", json!("a1b2c")), json!(["a", "b", "c"]));
    assert_eq!(run_one("gsub(\"(?<x>a)\"; \"<\\(.x)>\")", json!("aba")), json!("<a>b<a>"));
    assert_eq!(run_one("test(\"A\"; \"i\")", json!("a")), json!(true));
    assert!(matches!(
        Filter::compile("test(\"a\"; \"q\")"),
        Err(FilterError::InvalidRegex { .. })
    ));
    error_of("test(\"a\"; \"q\" | ascii_downcase)", json!("a"));
}

#[test]
fn positions_and_codepoints() {
    assert_eq!(run_one("index(\", \")", json!("a,b, cd, efg")), json!(3));
    assert_eq!(run_one("rindex(\", \")", json!("a,b, cd, efg")), json!(7));
    assert_eq!(run_one("indices([1, 2])", json!([0, 1, 2, 1, 3, 1, 2])), json!([1, 5]));
    assert_eq!(run_one("indices(1)", json!([1, 2, 1])), json!([0, 2]));
    assert_eq!(run_one("explode", json!("abc")), json!([97, 98, 99]));
    assert_eq!(run_one("implode", json!([65, 66])), json!("AB"));
    assert_eq!(run_one("explode | implode", json!("żółw")), json!("żółw"));
}

