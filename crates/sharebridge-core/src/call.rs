//! Call descriptors and the pure call builder.
//!
//! [`build_call`] turns a target plus an [`Operation`] into an immutable
//! [`ApiCall`]: dialect, method, resolved URL, headers and optional JSON
//! body. It never performs I/O.

use crate::entity::{self, CollectionRef, EntityRef, Navigation};
use crate::error::{BridgeError, BridgeErrorKind, BridgeResult};
use crate::materializer;
use crate::metadata::{resolve_template, NavigationDef, TemplateScope};
use crate::types::{BridgeConfig, Dialect, TransportRequest};
use log::{debug, warn};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::Method;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::PoisonError;

/// Characters percent-encoded inside quoted action arguments. Quotes stay
/// literal so the doubled-quote escape remains visible.
const ACTION_ARG: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'\'');

// ═══════════════════════════════════════════════════════════════════════
//  Targets and operations
// ═══════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub enum CallTarget {
    Entity(EntityRef),
    Collection(CollectionRef),
}

impl fmt::Debug for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallTarget::Entity(e) => write!(f, "Entity({})", entity::read(e).type_name()),
            CallTarget::Collection(c) => write!(
                f,
                "Collection({})",
                c.read().unwrap_or_else(PoisonError::into_inner).item_meta().type_name()
            ),
        }
    }
}

/// One action argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionArg {
    Text(String),
    Int(i64),
    Bool(bool),
}

/// A custom action such as `checkout` or `publish(comment='..')`.
#[derive(Debug, Clone)]
pub struct ActionCall {
    name: String,
    method: Method,
    args: Vec<(String, ActionArg)>,
    required: Vec<String>,
    body: Option<Value>,
    dialect: Option<Dialect>,
}

impl ActionCall {
    pub fn post(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method: Method::POST,
            args: Vec::new(),
            required: Vec::new(),
            body: None,
            dialect: None,
        }
    }

    pub fn get(name: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            ..Self::post(name)
        }
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.push((name.into(), ActionArg::Text(value.into())));
        self
    }

    /// Text argument that must not be empty.
    pub fn required_text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.required.push(name.clone());
        self.text(name, value)
    }

    pub fn int(mut self, name: impl Into<String>, value: i64) -> Self {
        self.args.push((name.into(), ActionArg::Int(value)));
        self
    }

    /// Enum argument, embedded by its wire-numeric value.
    pub fn enumeration(self, name: impl Into<String>, value: impl Into<i64>) -> Self {
        self.int(name, value.into())
    }

    pub fn boolean(mut self, name: impl Into<String>, value: bool) -> Self {
        self.args.push((name.into(), ActionArg::Bool(value)));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Only valid in this dialect.
    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> BridgeResult<()> {
        if self.name.is_empty() || !self.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
            return Err(BridgeError::invalid_argument(format!(
                "invalid action name '{}'",
                self.name
            )));
        }
        for req in &self.required {
            let empty = self.args.iter().any(|(n, v)| {
                n == req && matches!(v, ActionArg::Text(t) if t.trim().is_empty())
            });
            if empty {
                return Err(BridgeError::invalid_argument(format!(
                    "{}: argument '{}' must not be empty",
                    self.name, req
                )));
            }
        }
        Ok(())
    }

    /// `name` or `name(a='text',b=3)`.
    pub fn segment(&self) -> String {
        if self.args.is_empty() {
            return self.name.clone();
        }
        let args: Vec<String> = self
            .args
            .iter()
            .map(|(name, arg)| match arg {
                ActionArg::Text(t) => format!("{}='{}'", name, encode_text_arg(t)),
                ActionArg::Int(n) => format!("{}={}", name, n),
                ActionArg::Bool(b) => format!("{}={}", name, b),
            })
            .collect();
        format!("{}({})", self.name, args.join(","))
    }
}

/// OData-escape quotes, then percent-encode.
pub fn encode_text_arg(text: &str) -> String {
    utf8_percent_encode(&text.replace('\'', "''"), ACTION_ARG).to_string()
}

/// Parse `name(a='..',b=3)` back into its name and decoded arguments.
pub fn parse_action_segment(segment: &str) -> BridgeResult<(String, Vec<(String, String)>)> {
    let bad = || BridgeError::invalid_argument(format!("malformed action segment '{}'", segment));
    let Some(open) = segment.find('(') else {
        return Ok((segment.to_string(), Vec::new()));
    };
    let name = segment[..open].to_string();
    let inner = segment[open + 1..].strip_suffix(')').ok_or_else(bad)?;

    let mut args = Vec::new();
    let mut chars = inner.chars().peekable();
    while chars.peek().is_some() {
        let arg_name: String = chars.by_ref().take_while(|c| *c != '=').collect();
        let mut raw = String::new();
        if chars.peek() == Some(&'\'') {
            chars.next();
            loop {
                match chars.next() {
                    Some('\'') if chars.peek() == Some(&'\'') => {
                        chars.next();
                        raw.push('\'');
                    }
                    Some('\'') => break,
                    Some(c) => raw.push(c),
                    None => return Err(bad()),
                }
            }
            let decoded = percent_decode_str(&raw)
                .decode_utf8()
                .map_err(|_| bad())?
                .into_owned();
            args.push((arg_name, decoded));
            match chars.next() {
                None | Some(',') => {}
                Some(_) => return Err(bad()),
            }
        } else {
            raw = chars.by_ref().take_while(|c| *c != ',').collect();
            args.push((arg_name, raw));
        }
    }
    Ok((name, args))
}

/// A logical operation against a target.
#[derive(Debug, Clone)]
pub enum Operation {
    Get,
    Add,
    Update,
    Delete,
    Action(ActionCall),
}

impl Operation {
    fn label(&self) -> String {
        match self {
            Operation::Get => "get".into(),
            Operation::Add => "add".into(),
            Operation::Update => "update".into(),
            Operation::Delete => "delete".into(),
            Operation::Action(a) => a.name.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Call descriptor
// ═══════════════════════════════════════════════════════════════════════

/// An immutable description of one remote operation.
#[derive(Clone)]
pub struct ApiCall {
    dialect: Dialect,
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<Value>,
    target: Option<CallTarget>,
    label: String,
}

impl ApiCall {
    /// A call not tied to any entity.
    pub fn raw(dialect: Dialect, method: Method, url: impl Into<String>) -> Self {
        Self {
            dialect,
            method,
            url: url.into(),
            headers: vec![("Accept".into(), dialect.accept().into())],
            body: None,
            target: None,
            label: "request".into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        if !self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
            let ct = self.dialect.content_type();
            self.headers.push(("Content-Type".into(), ct.into()));
        }
        self
    }

    fn with_target(mut self, target: CallTarget, label: String) -> Self {
        self.target = Some(target);
        self.label = label;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// URL relative to the dialect base, or absolute.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    pub fn target(&self) -> Option<&CallTarget> {
        self.target.as_ref()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn absolute_url(&self, config: &BridgeConfig) -> String {
        config.absolute_url(self.dialect, &self.url)
    }

    /// Physical request for the single-call path.
    pub fn to_transport(&self, config: &BridgeConfig) -> BridgeResult<TransportRequest> {
        let mut req = TransportRequest::new(self.method.clone(), self.absolute_url(config));
        req.headers = self.headers.clone();
        if let Some(body) = &self.body {
            req.body = Some(serde_json::to_vec(body)?);
        }
        Ok(req)
    }
}

impl fmt::Debug for ApiCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCall")
            .field("dialect", &self.dialect)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("label", &self.label)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Builder
// ═══════════════════════════════════════════════════════════════════════

/// Build the descriptor for `operation` on `target`.
///
/// Tries the preferred dialect first and falls back to the other one when
/// the preferred templates are missing or cannot be resolved.
pub fn build_call(target: &CallTarget, operation: Operation, config: &BridgeConfig) -> BridgeResult<ApiCall> {
    if let Operation::Action(action) = &operation {
        action.validate()?;
    }
    let dialects = match &operation {
        Operation::Action(ActionCall { dialect: Some(d), .. }) => vec![*d],
        _ => vec![config.preferred_dialect, config.preferred_dialect.other()],
    };
    let tokens = config.context_tokens();

    let mut failure: Option<BridgeError> = None;
    for (attempt, dialect) in dialects.iter().enumerate() {
        match build_for(target, &operation, *dialect, &tokens) {
            Ok(call) => {
                if attempt > 0 {
                    warn!("{}: falling back to {}", call.label, dialect);
                }
                debug!("built {} {} {} ({})", dialect, call.method, call.url, call.label);
                return Ok(call);
            }
            Err(e) if matches!(e.kind, BridgeErrorKind::NotRegistered | BridgeErrorKind::MissingContext) => {
                failure = match failure {
                    Some(prev) if prev.kind == BridgeErrorKind::MissingContext => Some(prev),
                    _ => Some(e),
                };
            }
            Err(e) => return Err(e),
        }
    }
    Err(failure.unwrap_or_else(|| BridgeError::not_registered("no dialect available")))
}

/// Descriptor that loads the navigation property `name` of `owner`.
///
/// The URL is resolved before the child is instantiated, so a failed build
/// leaves the navigation cache untouched. The child becomes the call target.
pub fn build_navigation_get(owner: &EntityRef, name: &str, config: &BridgeConfig) -> BridgeResult<(ApiCall, Navigation)> {
    let def = entity::read(owner)
        .meta()
        .navigation_def(name)
        .cloned()
        .ok_or_else(|| BridgeError::not_registered(format!("no navigation {}", name)))?;

    let tokens = config.context_tokens();
    let dialects = [config.preferred_dialect, config.preferred_dialect.other()];
    let mut failure: Option<BridgeError> = None;
    for (attempt, dialect) in dialects.into_iter().enumerate() {
        match navigation_url(owner, &def, dialect, &tokens) {
            Ok(url) => {
                let nav = materializer::instantiate_navigation(owner, name)?;
                let target = match &nav {
                    Navigation::Entity(child) => CallTarget::Entity(child.clone()),
                    Navigation::Collection(coll) => CallTarget::Collection(coll.clone()),
                };
                let call = ApiCall::raw(dialect, Method::GET, url).with_target(target, format!("load {}", name));
                if attempt > 0 {
                    warn!("{}: falling back to {}", call.label, dialect);
                }
                debug!("built {} GET {} ({})", dialect, call.url, call.label);
                return Ok((call, nav));
            }
            Err(e) if matches!(e.kind, BridgeErrorKind::NotRegistered | BridgeErrorKind::MissingContext) => {
                failure = match failure {
                    Some(prev) if prev.kind == BridgeErrorKind::MissingContext => Some(prev),
                    _ => Some(e),
                };
            }
            Err(e) => return Err(e),
        }
    }
    Err(failure.unwrap_or_else(|| BridgeError::not_registered(format!("no template for {}", name))))
}

/// Load URL of a navigation in one dialect, without touching the cache.
///
/// The navigation's own template resolves against the owner. Otherwise the
/// target type's template is used: `get` for collections, `uri` for single
/// children. A child not instantiated yet has no fields, so only `{Parent..}`
/// and context tokens can resolve.
fn navigation_url(
    owner: &EntityRef,
    def: &NavigationDef,
    dialect: Dialect,
    tokens: &HashMap<String, String>,
) -> BridgeResult<String> {
    if let Some(template) = def.get_template(dialect) {
        let guard = entity::read(owner);
        return resolve_template(template, &TemplateScope::Entity(&guard), tokens);
    }

    if !def.collection && (def.rest_get.is_some() || def.graph_get.is_some()) {
        return Err(BridgeError::not_registered(format!(
            "navigation {} has no {} template",
            def.name, dialect
        )));
    }

    let target = (def.target)();
    let templates = target.templates(dialect);
    let template = if def.collection { &templates.get } else { &templates.uri };
    let template = template.as_ref().ok_or_else(|| {
        BridgeError::not_registered(format!(
            "{} has no {} template for navigation {}",
            target.type_name(),
            dialect,
            def.name
        ))
    })?;

    let existing = entity::read(owner).navigation(def.name);
    match existing {
        Some(Navigation::Entity(child)) => {
            let guard = entity::read(&child);
            resolve_template(template, &TemplateScope::Entity(&guard), tokens)
        }
        _ => resolve_template(
            template,
            &TemplateScope::Collection { parent: Some(owner.clone()) },
            tokens,
        ),
    }
}

fn build_for(
    target: &CallTarget,
    operation: &Operation,
    dialect: Dialect,
    tokens: &HashMap<String, String>,
) -> BridgeResult<ApiCall> {
    let base = base_url(target, operation, dialect, tokens)?;
    let label = operation.label();

    let call = match operation {
        Operation::Get => ApiCall::raw(dialect, Method::GET, base),
        Operation::Add => {
            let body = write_body(target, dialect, true)?;
            ApiCall::raw(dialect, Method::POST, base).with_body(body)
        }
        Operation::Update => {
            let body = write_body(target, dialect, false)?;
            match dialect {
                Dialect::Rest => ApiCall::raw(dialect, Method::POST, base)
                    .with_header("X-HTTP-Method", "MERGE")
                    .with_header("IF-MATCH", "*")
                    .with_body(body),
                Dialect::Graph => ApiCall::raw(dialect, Method::PATCH, base).with_body(body),
            }
        }
        Operation::Delete => match dialect {
            Dialect::Rest => ApiCall::raw(dialect, Method::POST, base)
                .with_header("X-HTTP-Method", "DELETE")
                .with_header("IF-MATCH", "*"),
            Dialect::Graph => ApiCall::raw(dialect, Method::DELETE, base),
        },
        Operation::Action(action) => {
            let url = format!("{}/{}", base.trim_end_matches('/'), action.segment());
            let call = ApiCall::raw(dialect, action.method.clone(), url);
            match &action.body {
                Some(body) => call.with_body(body.clone()),
                None => call,
            }
        }
    };
    Ok(call.with_target(target.clone(), label))
}

fn base_url(
    target: &CallTarget,
    operation: &Operation,
    dialect: Dialect,
    tokens: &HashMap<String, String>,
) -> BridgeResult<String> {
    match target {
        CallTarget::Entity(entity) => {
            let guard = entity::read(entity);
            let meta = guard.meta().clone();
            let templates = meta.templates(dialect);
            let template = match operation {
                Operation::Add => templates.add.as_ref().or(templates.get.as_ref()),
                _ => templates.uri.as_ref(),
            }
            .ok_or_else(|| {
                BridgeError::not_registered(format!(
                    "{} has no {} template for {}",
                    meta.type_name(),
                    dialect,
                    operation.label()
                ))
            })?;
            resolve_template(template, &TemplateScope::Entity(&guard), tokens)
        }
        CallTarget::Collection(coll) => {
            if matches!(operation, Operation::Add | Operation::Update | Operation::Delete) {
                return Err(BridgeError::invalid_argument(format!(
                    "{} needs an entity target",
                    operation.label()
                )));
            }
            let guard = coll.read().unwrap_or_else(PoisonError::into_inner);
            let parent = guard.parent();
            let meta = guard.item_meta().clone();
            let property = guard.property();
            drop(guard);

            let nav_template = match (&parent, property) {
                (Some(owner), Some(prop)) => entity::read(owner)
                    .meta()
                    .navigation_def(prop)
                    .and_then(|d| d.get_template(dialect).map(String::from)),
                _ => None,
            };
            if let (Some(template), Some(owner)) = (nav_template, &parent) {
                let owner_guard = entity::read(owner);
                return resolve_template(&template, &TemplateScope::Entity(&owner_guard), tokens);
            }
            let template = meta.templates(dialect).get.as_ref().ok_or_else(|| {
                BridgeError::not_registered(format!(
                    "{} has no {} collection template",
                    meta.type_name(),
                    dialect
                ))
            })?;
            resolve_template(template, &TemplateScope::Collection { parent }, tokens)
        }
    }
}

/// JSON body with the changed fields in wire names.
fn write_body(target: &CallTarget, dialect: Dialect, creating: bool) -> BridgeResult<Value> {
    let CallTarget::Entity(entity) = target else {
        return Err(BridgeError::invalid_argument("write operations need an entity target"));
    };
    let guard = entity::read(entity);
    let meta = guard.meta();
    let mut body = Map::new();
    if creating && dialect == Dialect::Rest {
        if let Some(ty) = meta.rest_type() {
            body.insert("__metadata".into(), serde_json::json!({ "type": ty }));
        }
    }
    for (def, value) in guard.changed_fields() {
        match def.wire_name(dialect) {
            Some(wire) => {
                body.insert(wire.to_string(), value.to_wire());
            }
            None => {
                return Err(BridgeError::not_registered(format!(
                    "{}.{} is not writable in {}",
                    meta.type_name(),
                    def.name,
                    dialect
                )))
            }
        }
    }
    Ok(Value::Object(body))
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{write, EntityModel};
    use crate::testing::{config, TestItem, TestList};
    use crate::value::FieldValue;
    use serde_json::json;

    /// Item 5 of a list with a nil id; the list must outlive the item.
    fn loaded_item() -> (TestList, TestItem) {
        let list = TestList::new_detached();
        write(list.entity()).set("Id", FieldValue::Guid(uuid::Uuid::nil())).unwrap();
        let nav = materializer::instantiate_navigation(list.entity(), "Items").unwrap();
        let item = materializer::create_in_collection(nav.as_collection().unwrap());
        write(&item).set("Id", 5i64).unwrap();
        write(&item).clear_changes();
        (list, TestItem::from_ref(item))
    }

    #[test]
    fn test_quote_escape_round_trip() {
        let comment = "it's done, (finally) 100% o'clock";
        let action = ActionCall::post("publish").text("comment", comment);
        let segment = action.segment();
        assert!(segment.contains("it''s"));
        assert!(!segment.contains(' '));
        let (name, args) = parse_action_segment(&segment).unwrap();
        assert_eq!(name, "publish");
        assert_eq!(args, vec![("comment".to_string(), comment.to_string())]);
    }

    #[test]
    fn test_mixed_arguments_round_trip() {
        let action = ActionCall::post("checkin")
            .text("comment", "a'b")
            .enumeration("checkintype", 1i64)
            .boolean("bOverWrite", true);
        assert_eq!(action.segment(), "checkin(comment='a''b',checkintype=1,bOverWrite=true)");
        let (_, args) = parse_action_segment(&action.segment()).unwrap();
        assert_eq!(args[0].1, "a'b");
        assert_eq!(args[1], ("checkintype".into(), "1".into()));
    }

    #[test]
    fn test_action_without_params_has_no_parentheses() {
        let (_list, item) = loaded_item();
        let call = build_call(
            &CallTarget::Entity(item.entity().clone()),
            Operation::Action(ActionCall::post("checkout").dialect(Dialect::Rest)),
            &config(),
        )
        .unwrap();
        assert_eq!(
            call.url(),
            "_api/web/lists(guid'00000000-0000-0000-0000-000000000000')/items(5)/checkout"
        );
        assert_eq!(call.method(), &Method::POST);
    }

    #[test]
    fn test_empty_required_text_is_invalid_argument() {
        let (_list, item) = loaded_item();
        let err = build_call(
            &CallTarget::Entity(item.entity().clone()),
            Operation::Action(ActionCall::post("rename").required_text("name", "  ")),
            &config(),
        )
        .unwrap_err();
        assert_eq!(err.kind, BridgeErrorKind::InvalidArgument);
    }

    #[test]
    fn test_preferred_dialect_is_graph() {
        let (_list, item) = loaded_item();
        let call = build_call(&CallTarget::Entity(item.entity().clone()), Operation::Get, &config()).unwrap();
        assert_eq!(call.dialect(), Dialect::Graph);
        assert_eq!(call.url(), "lists/00000000-0000-0000-0000-000000000000/items/5");
        assert_eq!(call.header("accept"), Some("application/json"));
    }

    #[test]
    fn test_fallback_when_graph_template_missing() {
        let list = TestList::new_detached();
        let mut cfg = config();
        cfg.preferred_dialect = Dialect::Graph;
        let call = build_call(&CallTarget::Entity(list.entity().clone()), Operation::Get, &cfg);
        // TestList only has REST templates, but its Id is not loaded.
        assert_eq!(call.unwrap_err().kind, BridgeErrorKind::MissingContext);

        write(list.entity()).set("Id", FieldValue::Guid(uuid::Uuid::nil())).unwrap();
        let call = build_call(&CallTarget::Entity(list.entity().clone()), Operation::Get, &cfg).unwrap();
        assert_eq!(call.dialect(), Dialect::Rest);
    }

    #[test]
    fn test_update_rest_uses_merge() {
        let (_list, item) = loaded_item();
        write(item.entity()).set("Title", "renamed").unwrap();
        let mut cfg = config();
        cfg.preferred_dialect = Dialect::Rest;
        let call = build_call(&CallTarget::Entity(item.entity().clone()), Operation::Update, &cfg).unwrap();
        assert_eq!(call.method(), &Method::POST);
        assert_eq!(call.header("X-HTTP-Method"), Some("MERGE"));
        assert_eq!(call.header("IF-MATCH"), Some("*"));
        assert_eq!(call.body(), Some(&json!({"Title": "renamed"})));
    }

    #[test]
    fn test_update_graph_uses_patch_and_wire_names() {
        let (_list, item) = loaded_item();
        write(item.entity()).set("Title", "renamed").unwrap();
        let call = build_call(&CallTarget::Entity(item.entity().clone()), Operation::Update, &config()).unwrap();
        assert_eq!(call.method(), &Method::PATCH);
        assert_eq!(call.body(), Some(&json!({"displayName": "renamed"})));
    }

    #[test]
    fn test_delete_per_dialect() {
        let (_list, item) = loaded_item();
        let graph = build_call(&CallTarget::Entity(item.entity().clone()), Operation::Delete, &config()).unwrap();
        assert_eq!(graph.method(), &Method::DELETE);
        let mut cfg = config();
        cfg.preferred_dialect = Dialect::Rest;
        let rest = build_call(&CallTarget::Entity(item.entity().clone()), Operation::Delete, &cfg).unwrap();
        assert_eq!(rest.header("X-HTTP-Method"), Some("DELETE"));
    }

    #[test]
    fn test_add_uses_collection_template_and_rest_type() {
        let list = TestList::new_detached();
        write(list.entity()).set("Id", FieldValue::Guid(uuid::Uuid::nil())).unwrap();
        let nav = materializer::instantiate_navigation(list.entity(), "Items").unwrap();
        let item = materializer::create_in_collection(nav.as_collection().unwrap());
        write(&item).set("Title", "fresh").unwrap();
        let mut cfg = config();
        cfg.preferred_dialect = Dialect::Rest;
        let call = build_call(&CallTarget::Entity(item), Operation::Add, &cfg).unwrap();
        assert_eq!(
            call.url(),
            "_api/web/lists(guid'00000000-0000-0000-0000-000000000000')/items"
        );
        assert_eq!(
            call.body(),
            Some(&json!({"__metadata": {"type": "SP.ListItem"}, "Title": "fresh"}))
        );
        assert_eq!(call.header("content-type"), Some("application/json;odata=verbose"));
    }

    #[test]
    fn test_collection_get_and_write_rejected() {
        let list = TestList::new_detached();
        write(list.entity()).set("Id", FieldValue::Guid(uuid::Uuid::nil())).unwrap();
        let nav = materializer::instantiate_navigation(list.entity(), "Items").unwrap();
        let coll = CallTarget::Collection(nav.as_collection().unwrap().clone());
        let get = build_call(&coll, Operation::Get, &config()).unwrap();
        assert_eq!(get.url(), "lists/00000000-0000-0000-0000-000000000000/items");
        let err = build_call(&coll, Operation::Delete, &config()).unwrap_err();
        assert_eq!(err.kind, BridgeErrorKind::InvalidArgument);
    }

    #[test]
    fn test_navigation_get_with_own_template() {
        let list = TestList::new_detached();
        write(list.entity()).set("Id", FieldValue::Guid(uuid::Uuid::nil())).unwrap();
        let (call, nav) = build_navigation_get(list.entity(), "Owner", &config()).unwrap();
        assert_eq!(
            call.url(),
            "_api/web/lists(guid'00000000-0000-0000-0000-000000000000')/Author"
        );
        assert!(nav.as_entity().is_some());
        let (_, again) = build_navigation_get(list.entity(), "Owner", &config()).unwrap();
        assert!(nav.same_as(&again));
    }

    #[test]
    fn test_unresolvable_navigation_leaves_cache_untouched() {
        let list = TestList::new_detached();
        for name in ["Owner", "Items"] {
            let err = build_navigation_get(list.entity(), name, &config()).unwrap_err();
            assert_eq!(err.kind, BridgeErrorKind::MissingContext);
            assert_eq!(
                entity::read(list.entity()).navigation_state(name),
                crate::entity::NavigationState::Uninstantiated
            );
        }
    }

    #[test]
    fn test_parse_segment_without_args() {
        assert_eq!(parse_action_segment("recycle").unwrap(), ("recycle".into(), vec![]));
        assert!(parse_action_segment("x(a='unterminated)").is_err());
    }
}
