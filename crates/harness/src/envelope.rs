//! Canonical response envelopes and expected-response parsing

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

use restcheck_common::{ApiResponse, Error, Result};

use crate::call::{ClientCall, Verb};
use crate::text::{fence_language, strip_code_fence};

/// Status reported for every error response; the suite does not assert on
/// fine-grained error codes.
pub const ERROR_STATUS: u16 = 400;

static TYPE_ANNOTATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)(^\s*(export\s+)?(type|interface)\s+\w+)|(:\s*(string|number|boolean|Json|Database|unknown|any)\b)|(\bDatabase\[)",
    )
    .expect("static regex")
});

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        206 => "Partial Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        406 => "Not Acceptable",
        409 => "Conflict",
        _ => "",
    }
}

/// Status implied by the verb of a successful call
pub fn infer_status(call: &ClientCall) -> u16 {
    match call.verb() {
        Verb::Insert | Verb::Upsert => 201,
        Verb::Update | Verb::Delete => {
            if call.requests_projection() {
                200
            } else {
                204
            }
        }
        Verb::Select | Verb::Rpc => 200,
    }
}

/// Normalise a call result into `{data|error, status, statusText, count?}`
pub fn build_envelope(call: &ClientCall, response: &ApiResponse) -> Value {
    let mut envelope = Map::new();

    if let Some(error) = &response.error {
        envelope.insert("error".into(), error.to_envelope_value());
        envelope.insert("status".into(), json!(ERROR_STATUS));
        envelope.insert("statusText".into(), json!(status_text(ERROR_STATUS)));
        return Value::Object(envelope);
    }

    let data = response.data.as_ref().filter(|d| !d.is_null());
    let mutation = matches!(
        call.verb(),
        Verb::Insert | Verb::Upsert | Verb::Update | Verb::Delete
    );

    // A bare count outranks the verb: `{count, status: 200}`
    let status = if response.count.is_some() && data.is_none() {
        200
    } else if mutation {
        infer_status(call)
    } else if data.is_some() {
        200
    } else {
        response.status.unwrap_or(200)
    };

    if let Some(count) = response.count {
        envelope.insert("count".into(), json!(count));
    }
    if let Some(data) = data {
        envelope.insert("data".into(), data.clone());
    }
    envelope.insert("status".into(), json!(status));
    envelope.insert("statusText".into(), json!(status_text(status)));
    Value::Object(envelope)
}

/// What a fixture says its call should return
#[derive(Debug, Clone, PartialEq)]
pub enum ExpectedResponse {
    /// Compared structurally against the envelope
    Json(Value),
    /// Compile-time type assertion; passes without comparison
    TypeCheck(String),
    /// Free text such as a query plan; passes without comparison
    RawText(String),
}

impl ExpectedResponse {
    pub fn parse(text: &str) -> Result<Self> {
        let language = fence_language(text);
        let body = strip_code_fence(text);

        if looks_like_query_plan(&body) {
            return Ok(ExpectedResponse::RawText(body));
        }
        if matches!(language.as_deref(), Some("ts") | Some("typescript")) {
            return Ok(ExpectedResponse::TypeCheck(body));
        }
        match serde_json::from_str::<Value>(&body) {
            Ok(value) => Ok(ExpectedResponse::Json(value)),
            Err(json_err) => {
                if TYPE_ANNOTATION.is_match(&body) {
                    Ok(ExpectedResponse::TypeCheck(body))
                } else {
                    Err(Error::ExpectedResponse(json_err.to_string()))
                }
            }
        }
    }

    /// Passes without comparing against the actual response
    pub fn is_auto_pass(&self) -> bool {
        !matches!(self, ExpectedResponse::Json(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ExpectedResponse::Json(_) => "json",
            ExpectedResponse::TypeCheck(_) => "type-check",
            ExpectedResponse::RawText(_) => "raw-text",
        }
    }

    pub fn as_value(&self) -> Value {
        match self {
            ExpectedResponse::Json(v) => v.clone(),
            ExpectedResponse::TypeCheck(s) | ExpectedResponse::RawText(s) => Value::String(s.clone()),
        }
    }
}

fn looks_like_query_plan(body: &str) -> bool {
    body.contains("cost=") && (body.contains("rows=") || body.contains("width="))
}

#[cfg(test)]
mod tests {
    use super::*;
    use restcheck_common::ApiError;
    use test_case::test_case;

    fn call(code: &str) -> ClientCall {
        ClientCall::parse(code).unwrap()
    }

    #[test_case("await supabase.from('t').insert({ id: 1 })", 201 ; "insert without select")]
    #[test_case("await supabase.from('t').insert({ id: 1 }).select()", 201 ; "insert with select")]
    #[test_case("await supabase.from('t').upsert({ id: 1 })", 201 ; "upsert")]
    #[test_case("await supabase.from('t').update({ a: 1 }).eq('id', 1).select()", 200 ; "update with select")]
    #[test_case("await supabase.from('t').update({ a: 1 }).eq('id', 1)", 204 ; "update without select")]
    #[test_case("await supabase.from('t').delete().eq('id', 1).select()", 200 ; "delete with select")]
    #[test_case("await supabase.from('t').delete().eq('id', 1)", 204 ; "delete without select")]
    #[test_case("await supabase.from('t').select()", 200 ; "select")]
    #[test_case("await supabase.rpc('f')", 200 ; "rpc")]
    fn status_follows_verb(code: &str, expected: u16) {
        let envelope = build_envelope(&call(code), &ApiResponse::empty());
        assert_eq!(envelope["status"], json!(expected));
    }

    #[test]
    fn error_envelope_is_bad_request() {
        let response = ApiResponse::err(ApiError::with_code("23505", "duplicate key"));
        let envelope = build_envelope(&call("await supabase.from('t').insert({ id: 1 })"), &response);
        assert_eq!(
            envelope,
            json!({
                "error": {"code": "23505", "details": null, "hint": null, "message": "duplicate key"},
                "status": 400,
                "statusText": "Bad Request"
            })
        );
    }

    #[test_case("await supabase.from('t').select('*', { count: 'exact', head: true })" ; "head select")]
    #[test_case("await supabase.from('t').delete({ count: 'exact' }).eq('id', 1)" ; "delete")]
    #[test_case("await supabase.from('t').update({ a: 1 }, { count: 'exact' }).eq('id', 1)" ; "update")]
    fn count_only_envelope(code: &str) {
        let response = ApiResponse {
            count: Some(3),
            ..Default::default()
        };
        let envelope = build_envelope(&call(code), &response);
        assert_eq!(envelope, json!({"count": 3, "status": 200, "statusText": "OK"}));
    }

    #[test]
    fn select_envelope_carries_data() {
        let response = ApiResponse::ok(json!([{"id": 1}]));
        let envelope = build_envelope(&call("await supabase.from('t').select()"), &response);
        assert_eq!(
            envelope,
            json!({"data": [{"id": 1}], "status": 200, "statusText": "OK"})
        );
    }

    #[test]
    fn null_data_still_matches_wildcard_expectation() {
        let response = ApiResponse {
            data: Some(Value::Null),
            ..Default::default()
        };
        let envelope = build_envelope(&call("await supabase.from('t').select()"), &response);
        assert_eq!(envelope, json!({"status": 200, "statusText": "OK"}));

        let expected = json!({"data": "*", "status": 200, "statusText": "OK"});
        assert!(restcheck_common::compare(&envelope, &expected).matches);
    }

    #[test]
    fn empty_result_falls_back_to_backend_status() {
        let response = ApiResponse {
            status: Some(206),
            ..Default::default()
        };
        let envelope = build_envelope(&call("await supabase.from('t').select()"), &response);
        assert_eq!(envelope["status"], json!(206));
    }

    #[test]
    fn parses_json_expectation() {
        let parsed = ExpectedResponse::parse("```json\n{\"status\": 201}\n```").unwrap();
        assert_eq!(parsed, ExpectedResponse::Json(json!({"status": 201})));
        assert!(!parsed.is_auto_pass());
    }

    #[test]
    fn query_plan_is_raw_text() {
        let plan = "```\nAggregate  (cost=33.34..33.36 rows=1 width=112)\n  ->  Limit  (cost=0.00..18.33 rows=1000 width=40)\n```";
        let parsed = ExpectedResponse::parse(plan).unwrap();
        assert_eq!(parsed.kind(), "raw-text");
        assert!(parsed.is_auto_pass());
    }

    #[test]
    fn type_annotations_are_type_checks() {
        let types = "```\nconst data: {\n  id: number\n  name: string\n}[]\n```";
        assert_eq!(ExpectedResponse::parse(types).unwrap().kind(), "type-check");
        let tagged = "```ts\nlet x = 1\n```";
        assert_eq!(ExpectedResponse::parse(tagged).unwrap().kind(), "type-check");
    }

    #[test]
    fn garbage_expectation_is_an_error() {
        assert!(matches!(
            ExpectedResponse::parse("not json at all"),
            Err(Error::ExpectedResponse(_))
        ));
    }
}
