//! Logical operations and their known spellings.

use std::collections::HashMap;

use gatelink_core::GatewayError;
use serde_json::{Map, Value};

use super::{ParamShape, RpcCaller, call_with_fallback};

/// Candidate method names and parameter-key aliases for one operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompatOp {
    /// Method names, preferred first.
    pub methods: Vec<String>,
    /// Spellings of the operation's key parameter, preferred first.
    pub param_keys: Vec<String>,
}

impl CompatOp {
    /// Parameter shapes for `value` merged into `base`.
    ///
    /// One shape per alias when the operation has aliases and a value is
    /// given; otherwise just `base`.
    pub fn shapes(&self, value: Option<&Value>, base: Option<&Value>) -> Vec<ParamShape> {
        let base_map = match base {
            Some(Value::Object(map)) => map.clone(),
            Some(other) => return vec![Some(other.clone())],
            None => Map::new(),
        };
        match value {
            Some(value) if !self.param_keys.is_empty() => self
                .param_keys
                .iter()
                .map(|key| {
                    let mut params = base_map.clone();
                    let _ = params.insert(key.clone(), value.clone());
                    Some(Value::Object(params))
                })
                .collect(),
            _ => vec![base.cloned()],
        }
    }
}

const SESSION_KEYS: &[&str] = &["sessionKey", "key", "session"];

/// Operation name → [`CompatOp`].
#[derive(Clone, Debug)]
pub struct CompatTable {
    ops: HashMap<String, CompatOp>,
}

impl CompatTable {
    /// Table with no operations.
    pub fn empty() -> Self {
        Self {
            ops: HashMap::new(),
        }
    }

    /// Add or replace an operation.
    #[must_use]
    pub fn with(mut self, op: &str, methods: &[&str], param_keys: &[&str]) -> Self {
        self.insert(op, methods, param_keys);
        self
    }

    /// Add or replace an operation in place.
    pub fn insert(&mut self, op: &str, methods: &[&str], param_keys: &[&str]) {
        let _ = self.ops.insert(
            op.to_owned(),
            CompatOp {
                methods: methods.iter().map(|m| (*m).to_owned()).collect(),
                param_keys: param_keys.iter().map(|k| (*k).to_owned()).collect(),
            },
        );
    }

    /// Look up an operation.
    pub fn get(&self, op: &str) -> Option<&CompatOp> {
        self.ops.get(op)
    }

    /// Run `op` through the fallback dispatcher.
    pub async fn call<C>(
        &self,
        caller: &C,
        op: &str,
        value: Option<Value>,
        base: Option<Value>,
    ) -> Result<Value, GatewayError>
    where
        C: RpcCaller + ?Sized,
    {
        let entry = self.get(op).ok_or_else(|| GatewayError::NoCandidates {
            operation: op.to_owned(),
        })?;
        let methods: Vec<&str> = entry.methods.iter().map(String::as_str).collect();
        let shapes = entry.shapes(value.as_ref(), base.as_ref());
        call_with_fallback(caller, &methods, &shapes, None).await
    }
}

impl Default for CompatTable {
    /// Spellings seen across gateway versions.
    fn default() -> Self {
        Self::empty()
            .with("sessions.list", &["sessions.list", "session.list"], &[])
            .with("sessions.get", &["sessions.get", "session.get"], SESSION_KEYS)
            .with("sessions.history", &["chat.history", "sessions.history"], SESSION_KEYS)
            .with("sessions.reset", &["sessions.reset", "session.reset"], SESSION_KEYS)
            .with("sessions.delete", &["sessions.delete", "session.delete"], SESSION_KEYS)
            .with("chat.abort", &["chat.abort", "agent.abort"], SESSION_KEYS)
            .with("cron.list", &["cron.list", "crons.list"], &[])
            .with("cron.run", &["cron.run", "crons.run"], &["jobId", "id"])
            .with("channels.status", &["channels.status", "channel.status"], &[])
            .with("agents.list", &["agents.list", "agent.list"], &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compat::tests::ScriptedCaller;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn shapes_one_per_alias_over_base() {
        let table = CompatTable::default();
        let op = table.get("sessions.get").unwrap();
        let shapes = op.shapes(Some(&json!("main")), Some(&json!({"limit": 10})));
        assert_eq!(
            shapes,
            vec![
                Some(json!({"limit": 10, "sessionKey": "main"})),
                Some(json!({"limit": 10, "key": "main"})),
                Some(json!({"limit": 10, "session": "main"})),
            ]
        );
    }

    #[test]
    fn shapes_without_value_use_base() {
        let table = CompatTable::default();
        let op = table.get("sessions.get").unwrap();
        assert_eq!(op.shapes(None, None), vec![None]);
        assert_eq!(op.shapes(None, Some(&json!({"a": 1}))), vec![Some(json!({"a": 1}))]);
    }

    #[test]
    fn shapes_without_aliases() {
        let table = CompatTable::default();
        let op = table.get("cron.list").unwrap();
        assert_eq!(op.shapes(Some(&json!("x")), None), vec![None]);
    }

    #[tokio::test]
    async fn call_uses_table_spellings() {
        let caller = ScriptedCaller {
            answers: vec![("crons.list", Ok(json!({"jobs": []})))],
            ..Default::default()
        };
        let out = CompatTable::default()
            .call(&caller, "cron.list", None, Some(json!({})))
            .await
            .unwrap();
        assert_eq!(out["jobs"], json!([]));
        assert_eq!(caller.methods_called(), ["cron.list", "crons.list"]);
    }

    #[tokio::test]
    async fn call_tries_key_aliases() {
        let caller = ScriptedCaller {
            answers: vec![("sessions.reset", Ok(json!({"reset": true})))],
            accepts_key: Some("key"),
            ..Default::default()
        };
        let out = CompatTable::default()
            .call(&caller, "sessions.reset", Some(json!("main")), None)
            .await
            .unwrap();
        assert_eq!(out["reset"], true);
        let calls = caller.calls.lock();
        let last = calls.last().unwrap();
        assert_eq!(last.0, "sessions.reset");
        assert_eq!(last.1, Some(json!({"key": "main"})));
    }

    #[tokio::test]
    async fn unknown_operation() {
        let caller = ScriptedCaller::default();
        assert_matches!(
            CompatTable::empty().call(&caller, "nope", None, None).await,
            Err(GatewayError::NoCandidates { operation }) if operation == "nope"
        );
    }

    #[test]
    fn custom_entries_override() {
        let table = CompatTable::default().with("cron.list", &["schedules.list"], &[]);
        assert_eq!(table.get("cron.list").unwrap().methods, ["schedules.list"]);
    }
}
