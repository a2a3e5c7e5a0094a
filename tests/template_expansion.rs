//! Template expansion properties over realistic scopes.

use datamap_runtime::projector::bind_response;
use datamap_runtime::template::{self, Scopes, Template};
use serde_json::json;

fn scopes() -> Scopes<'static> {
    Scopes::for_invocation(
        json!({"city": "San Francisco", "count": 3, "flags": {"vip": true}, "empty": ""}),
        json!({"api_key": "k&1", "caller": {"name": "Ada"}}),
    )
}

#[test]
fn test_plain_text_is_identity() {
    let s = scopes();
    for text in ["", "no markers", "price: $5 {braces}", "half $ {open"] {
        assert_eq!(template::expand(text, &s), text);
    }
}

#[test]
fn test_scalars_render_as_text() {
    let s = scopes();
    assert_eq!(
        template::expand("${args.city} x${args.count} vip=${args.flags.vip}", &s),
        "San Francisco x3 vip=true"
    );
    assert_eq!(template::expand("Hi ${global.caller.name}", &s), "Hi Ada");
    assert_eq!(template::expand("Hi ${global_data.caller.name}", &s), "Hi Ada");
}

#[test]
fn test_unresolved_references_and_defaults() {
    let s = scopes();
    assert_eq!(template::expand("[${args.nope}]", &s), "[]");
    assert_eq!(template::expand("[${args.nope || \"London\"}]", &s), "[London]");
    assert_eq!(template::expand("[${args.city || \"London\"}]", &s), "[San Francisco]");
    assert_eq!(template::expand("[${nowhere.at.all}]", &s), "[]");
}

#[test]
fn test_substituted_values_are_not_expanded_again() {
    let s = Scopes::for_invocation(json!({"name": "${global.api_key}"}), json!({"api_key": "secret"}));
    assert_eq!(template::expand("Hello ${args.name}", &s), "Hello ${global.api_key}");
}

#[test]
fn test_url_query_values_are_encoded() {
    let s = scopes();
    assert_eq!(
        template::expand_url("https://api.example/${args.count}/w?q=${args.city}&k=${global.api_key}", &s)
            .unwrap(),
        "https://api.example/3/w?q=San+Francisco&k=k%261"
    );
}

#[test]
fn test_response_paths_and_length() {
    let mut s = scopes();
    bind_response(
        &mut s,
        &json!([{"category": "Math", "tags": ["a", "b"]}, {"category": "Art"}]),
    );
    assert_eq!(
        template::expand("${response[1].category} ${response[0].tags.length} ${array.length}", &s),
        "Art 2 2"
    );
}

#[test]
fn test_expand_value_keeps_structure() {
    let s = scopes();
    let expanded = template::expand_value(
        &json!({"q": "${args.city}", "n": 7, "nested": ["${args.count}", null]}),
        &s,
    );
    assert_eq!(
        expanded,
        json!({"q": "San Francisco", "n": 7, "nested": ["3", null]})
    );
}

#[test]
fn test_strict_parse_rejects_malformed_markers() {
    assert!(Template::parse("ok ${args.city}").is_ok());
    assert!(Template::parse("open ${args.city").is_err());
    assert!(Template::parse("${args.city + 1}").is_err());
    assert!(Template::parse("${args.city || \"unterminated}").is_err());
    assert_eq!(
        Template::references("${args.a} and ${response.b || \"x\"}"),
        vec!["args.a", "response.b"]
    );
}
