//! HTTP backend speaking PostgREST and GoTrue conventions

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_RANGE};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use restcheck_common::{ApiError, ApiResponse, AuthResponse, AuthSession, AuthUser, Error, Result};

use crate::call::{CallAction, CallTarget, ClientCall, Filter, FilterOp};
use crate::client::{Credential, RestBackend};
use crate::config::BackendConfig;

const OBJECT_MEDIA_TYPE: &str = "application/vnd.pgrst.object+json";
const PLAN_MEDIA_TYPE: &str = "application/vnd.pgrst.plan+text";

/// [`RestBackend`] over HTTP
pub struct HttpBackend {
    config: BackendConfig,
    http: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: BackendConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self { config, http })
    }

    fn keys(&self, credential: &Credential) -> (String, String) {
        match credential {
            Credential::Anon => (self.config.anon_key.clone(), self.config.anon_key.clone()),
            Credential::User { access_token } => {
                (self.config.anon_key.clone(), access_token.clone())
            }
            Credential::ServiceRole => (
                self.config.service_role_key.clone(),
                self.config.service_role_key.clone(),
            ),
        }
    }

    fn request(&self, method: Method, url: &str, credential: &Credential) -> RequestBuilder {
        let (apikey, bearer) = self.keys(credential);
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&apikey) {
            headers.insert("apikey", value);
        }
        if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", bearer)) {
            headers.insert(AUTHORIZATION, value);
        }
        self.http.request(method, url).headers(headers)
    }

    fn rest_request(&self, credential: &Credential, call: &ClientCall) -> RequestBuilder {
        let base = self.config.rest_url.trim_end_matches('/');
        let (method, url, body) = match (&call.target, &call.action) {
            (CallTarget::Rpc { function, params }, action) => {
                let method = match action {
                    CallAction::Select { head: true, .. } => Method::HEAD,
                    _ => Method::POST,
                };
                (method, format!("{}/rpc/{}", base, function), Some(params.clone()))
            }
            (CallTarget::Table { name }, CallAction::Select { head, .. }) => {
                let method = if *head { Method::HEAD } else { Method::GET };
                (method, format!("{}/{}", base, name), None)
            }
            (CallTarget::Table { name }, CallAction::Insert { payload, .. }) => {
                (Method::POST, format!("{}/{}", base, name), Some(payload.clone()))
            }
            (CallTarget::Table { name }, CallAction::Update { payload, .. }) => {
                (Method::PATCH, format!("{}/{}", base, name), Some(payload.clone()))
            }
            (CallTarget::Table { name }, CallAction::Delete { .. }) => {
                (Method::DELETE, format!("{}/{}", base, name), None)
            }
        };

        let mut request = self
            .request(method.clone(), &url, credential)
            .query(&query_params(call));

        let mut prefer = Vec::new();
        if let Some(count) = call.action.count() {
            prefer.push(format!("count={}", count.as_str()));
        }
        match &call.action {
            CallAction::Insert {
                upsert,
                ignore_duplicates,
                ..
            } => {
                if *upsert {
                    prefer.push(
                        if *ignore_duplicates {
                            "resolution=ignore-duplicates"
                        } else {
                            "resolution=merge-duplicates"
                        }
                        .to_string(),
                    );
                }
                prefer.push(return_preference(call).to_string());
            }
            CallAction::Update { .. } | CallAction::Delete { .. } => {
                prefer.push(return_preference(call).to_string())
            }
            CallAction::Select { .. } => {}
        }
        if !prefer.is_empty() {
            request = request.header("Prefer", prefer.join(","));
        }

        if let Some(schema) = &call.schema {
            let profile = if method == Method::GET || method == Method::HEAD {
                "Accept-Profile"
            } else {
                "Content-Profile"
            };
            request = request.header(profile, schema.as_str());
        }

        if call.modifiers.explain {
            request = request.header(ACCEPT, PLAN_MEDIA_TYPE);
        } else if call.modifiers.single {
            request = request.header(ACCEPT, OBJECT_MEDIA_TYPE);
        }

        match body {
            Some(body) => request.json(&body),
            None => request,
        }
    }

    async fn auth_call(
        &self,
        method: Method,
        path: &str,
        credential: &Credential,
        body: Option<Value>,
    ) -> AuthResponse {
        let url = format!("{}{}", self.config.auth_url.trim_end_matches('/'), path);
        let mut request = self.request(method, &url, credential);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return AuthResponse::err(ApiError::new(e.to_string())),
        };
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return AuthResponse::err(auth_error(&body, status));
        }
        parse_auth_body(&body)
    }
}

#[async_trait]
impl RestBackend for HttpBackend {
    async fn query(&self, credential: &Credential, call: &ClientCall) -> ApiResponse {
        debug!(table = call.target_name(), verb = ?call.verb(), "rest call");
        let response = match self.rest_request(credential, call).send().await {
            Ok(response) => response,
            Err(e) => return ApiResponse::err(ApiError::new(e.to_string())),
        };
        read_rest_response(call, response).await
    }

    async fn sign_up(&self, email: &str, password: &str, data: &Value) -> AuthResponse {
        let mut body = json!({"email": email, "password": password});
        if !data.is_null() {
            body["data"] = data.clone();
        }
        self.auth_call(Method::POST, "/signup", &Credential::Anon, Some(body))
            .await
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResponse {
        self.auth_call(
            Method::POST,
            "/token?grant_type=password",
            &Credential::Anon,
            Some(json!({"email": email, "password": password})),
        )
        .await
    }

    async fn sign_out(&self, credential: &Credential) -> Option<ApiError> {
        self.auth_call(Method::POST, "/logout", credential, None)
            .await
            .error
    }

    async fn update_user(&self, credential: &Credential, data: &Value) -> AuthResponse {
        self.auth_call(Method::PUT, "/user", credential, Some(json!({"data": data})))
            .await
    }

    async fn get_user(&self, credential: &Credential) -> AuthResponse {
        self.auth_call(Method::GET, "/user", credential, None).await
    }

    async fn execute_sql(
        &self,
        credential: &Credential,
        sql: &str,
    ) -> std::result::Result<Vec<Value>, String> {
        let response = self
            .request(Method::POST, &self.config.sql_endpoint, credential)
            .json(&json!({"sql": sql}))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if !status.is_success() || body.get("error").map_or(false, |e| !e.is_null()) {
            return Err(match body.get("error") {
                Some(Value::String(message)) => message.clone(),
                Some(other) if !other.is_null() => other.to_string(),
                _ => format!("SQL endpoint returned {}", status),
            });
        }
        Ok(match body.get("data") {
            Some(Value::Array(rows)) => rows.clone(),
            _ => Vec::new(),
        })
    }
}

fn return_preference(call: &ClientCall) -> &'static str {
    if call.modifiers.returning.is_some() {
        "return=representation"
    } else {
        "return=minimal"
    }
}

/// Query-string parameters for a call, in PostgREST syntax
pub fn query_params(call: &ClientCall) -> Vec<(String, String)> {
    let mut params = Vec::new();

    let projection = match &call.action {
        CallAction::Select { columns, .. } if !matches!(call.target, CallTarget::Rpc { .. }) => {
            Some(columns.clone().unwrap_or_else(|| "*".to_string()))
        }
        CallAction::Select { columns, .. } => columns.clone(),
        _ => call.modifiers.returning.clone(),
    };
    if let Some(columns) = projection {
        params.push(("select".to_string(), strip_whitespace(&columns)));
    }

    if let CallAction::Insert {
        on_conflict: Some(on_conflict),
        ..
    } = &call.action
    {
        params.push(("on_conflict".to_string(), on_conflict.clone()));
    }

    for filter in &call.filters {
        params.push(filter_param(filter));
    }

    if !call.modifiers.order.is_empty() {
        let mut by_table: Vec<(Option<String>, Vec<String>)> = Vec::new();
        for order in &call.modifiers.order {
            let mut term = format!(
                "{}.{}",
                order.column,
                if order.ascending { "asc" } else { "desc" }
            );
            match order.nulls_first {
                Some(true) => term.push_str(".nullsfirst"),
                Some(false) => term.push_str(".nullslast"),
                None => {}
            }
            match by_table.iter_mut().find(|(t, _)| *t == order.foreign_table) {
                Some((_, terms)) => terms.push(term),
                None => by_table.push((order.foreign_table.clone(), vec![term])),
            }
        }
        for (table, terms) in by_table {
            let key = match table {
                Some(t) => format!("{}.order", t),
                None => "order".to_string(),
            };
            params.push((key, terms.join(",")));
        }
    }

    if let Some((from, to)) = call.modifiers.range {
        params.push(("offset".to_string(), from.to_string()));
        params.push(("limit".to_string(), (to.saturating_sub(from) + 1).to_string()));
    } else if let Some(limit) = call.modifiers.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }

    params
}

fn filter_param(filter: &Filter) -> (String, String) {
    match filter {
        Filter::Compare {
            column,
            op,
            value,
            negated,
        } => {
            let prefix = if *negated { "not." } else { "" };
            (
                column.clone(),
                format!("{}{}.{}", prefix, op.postgrest_name(), filter_value(op, value)),
            )
        }
        Filter::Or {
            expression,
            foreign_table,
        } => {
            let key = match foreign_table {
                Some(t) => format!("{}.or", t),
                None => "or".to_string(),
            };
            (key, format!("({})", expression))
        }
    }
}

/// Render a filter operand the way PostgREST expects it
pub fn filter_value(op: &FilterOp, value: &Value) -> String {
    match (op, value) {
        (FilterOp::In, Value::Array(items)) => {
            let items: Vec<String> = items.iter().map(quote_list_item).collect();
            format!("({})", items.join(","))
        }
        (FilterOp::Contains | FilterOp::ContainedBy | FilterOp::Overlaps, Value::Array(items)) => {
            let items: Vec<String> = items.iter().map(quote_list_item).collect();
            format!("{{{}}}", items.join(","))
        }
        (_, Value::Object(_)) => value.to_string(),
        (_, other) => scalar(other),
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn quote_list_item(value: &Value) -> String {
    let text = scalar(value);
    if text.contains([',', '(', ')', '"', ' ']) {
        format!("\"{}\"", text.replace('"', "\\\""))
    } else {
        text
    }
}

fn strip_whitespace(columns: &str) -> String {
    let mut quoted = false;
    columns
        .chars()
        .filter(|c| {
            if *c == '"' {
                quoted = !quoted;
            }
            quoted || !c.is_whitespace()
        })
        .collect()
}

async fn read_rest_response(call: &ClientCall, response: Response) -> ApiResponse {
    let status = response.status();
    let count = response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range);
    let text = response.text().await.unwrap_or_default();

    if !status.is_success() {
        return ApiResponse {
            error: Some(rest_error(&text, status)),
            count,
            status: Some(status.as_u16()),
            ..Default::default()
        };
    }

    let data = if text.trim().is_empty() {
        None
    } else if call.modifiers.explain {
        Some(Value::String(text))
    } else {
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                return ApiResponse::err(ApiError::new(format!("invalid response body: {}", e)))
            }
        }
    };

    let data = if call.modifiers.maybe_single {
        match data {
            Some(Value::Array(mut rows)) if rows.len() <= 1 => Some(rows.pop().unwrap_or(Value::Null)),
            Some(Value::Array(rows)) => {
                return ApiResponse::err(ApiError::with_code(
                    "PGRST116",
                    format!("JSON object requested, multiple ({}) rows returned", rows.len()),
                ))
            }
            other => other,
        }
    } else {
        data
    };

    ApiResponse {
        data,
        error: None,
        count,
        status: Some(status.as_u16()),
    }
}

/// Total from `Content-Range: 0-9/42` or `*/42`
pub fn parse_content_range(header: &str) -> Option<u64> {
    header.rsplit('/').next().and_then(|total| total.parse().ok())
}

fn rest_error(body: &str, status: StatusCode) -> ApiError {
    match serde_json::from_str::<ApiError>(body) {
        Ok(error) if !error.message.is_empty() => error,
        _ => ApiError {
            code: Some(status.as_u16().to_string()),
            message: if body.is_empty() {
                status.to_string()
            } else {
                body.to_string()
            },
            ..Default::default()
        },
    }
}

fn auth_error(body: &Value, status: StatusCode) -> ApiError {
    let text = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);
    let message = text("msg")
        .or_else(|| text("error_description"))
        .or_else(|| text("message"))
        .or_else(|| text("error"))
        .unwrap_or_else(|| status.to_string());
    let code = text("error_code").or_else(|| text("code")).or_else(|| text("error"));
    ApiError {
        code,
        message,
        ..Default::default()
    }
}

/// A GoTrue body is either a session (`access_token` + `user`) or a bare user
fn parse_auth_body(body: &Value) -> AuthResponse {
    let parse_user = |value: &Value| serde_json::from_value::<AuthUser>(value.clone()).ok();

    if let Some(token) = body.get("access_token").and_then(Value::as_str) {
        return AuthResponse {
            user: body.get("user").and_then(parse_user),
            session: Some(AuthSession {
                access_token: token.to_string(),
                refresh_token: body
                    .get("refresh_token")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }),
            error: None,
        };
    }

    AuthResponse {
        user: parse_user(body),
        session: None,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn params(code: &str) -> Vec<(String, String)> {
        query_params(&ClientCall::parse(code).unwrap())
    }

    fn param<'a>(params: &'a [(String, String)], key: &str) -> Option<&'a str> {
        params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn select_defaults_to_star() {
        let p = params("await supabase.from('countries').select()");
        assert_eq!(param(&p, "select"), Some("*"));
    }

    #[test]
    fn filters_and_modifiers_render() {
        let p = params(
            "await supabase.from('countries').select('id, name').eq('name', 'Albania').in('id', [1, 2]).order('id', { ascending: false }).range(0, 4)",
        );
        assert_eq!(param(&p, "select"), Some("id,name"));
        assert_eq!(param(&p, "name"), Some("eq.Albania"));
        assert_eq!(param(&p, "id"), Some("in.(1,2)"));
        assert_eq!(param(&p, "order"), Some("id.desc"));
        assert_eq!(param(&p, "offset"), Some("0"));
        assert_eq!(param(&p, "limit"), Some("5"));
    }

    #[test]
    fn mutation_without_select_has_no_projection() {
        let p = params("await supabase.from('t').delete().eq('id', 1)");
        assert_eq!(param(&p, "select"), None);
        assert_eq!(param(&p, "id"), Some("eq.1"));
    }

    #[test_case(FilterOp::Contains, json!(["a", "b c"]), "{a,\"b c\"}" ; "array contains")]
    #[test_case(FilterOp::Is, json!(null), "null" ; "is null")]
    #[test_case(FilterOp::Contains, json!({"k": 1}), "{\"k\":1}" ; "json contains")]
    #[test_case(FilterOp::Gt, json!(2.5), "2.5" ; "number")]
    fn renders_operands(op: FilterOp, value: Value, expected: &str) {
        assert_eq!(filter_value(&op, &value), expected);
    }

    #[test_case("0-9/42", Some(42) ; "range with total")]
    #[test_case("*/3", Some(3) ; "head count")]
    #[test_case("0-9/*", None ; "unknown total")]
    fn reads_content_range(header: &str, expected: Option<u64>) {
        assert_eq!(parse_content_range(header), expected);
    }

    #[test]
    fn parses_session_and_bare_user_bodies() {
        let session = parse_auth_body(&json!({
            "access_token": "tok",
            "refresh_token": "ref",
            "user": {"id": "u-1", "email": "a@b.c"}
        }));
        assert_eq!(session.session.unwrap().access_token, "tok");
        assert_eq!(session.user.unwrap().id, "u-1");

        let bare = parse_auth_body(&json!({"id": "u-2", "email": "b@c.d"}));
        assert!(bare.session.is_none());
        assert_eq!(bare.user.unwrap().id, "u-2");
    }

    #[test]
    fn auth_errors_prefer_msg() {
        let err = auth_error(
            &json!({"code": 400, "error_code": "invalid_credentials", "msg": "Invalid login credentials"}),
            StatusCode::BAD_REQUEST,
        );
        assert_eq!(err.code.as_deref(), Some("invalid_credentials"));
        assert_eq!(err.message, "Invalid login credentials");
    }
}
