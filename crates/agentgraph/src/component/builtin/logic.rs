use async_trait::async_trait;
use serde_json::{json, Value};

use crate::component::{Component, ComponentError, ComponentInput, ProcessContext};

/// Gate operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
    /// Exactly one input is truthy
    Xor,
    AtLeast(usize),
    AtMost(usize),
}

impl LogicOp {
    /// Parse `op` (and `n` for the counting operators) from a config
    pub fn from_config(config: &Value) -> Result<Self, ComponentError> {
        let op = config.get("op").and_then(Value::as_str).unwrap_or("and");
        let n = || {
            config
                .get("n")
                .and_then(Value::as_u64)
                .map(|n| n as usize)
                .ok_or_else(|| ComponentError::invalid_config(format!("'{}' requires an integer 'n'", op)))
        };
        match op {
            "and" => Ok(Self::And),
            "or" => Ok(Self::Or),
            "xor" => Ok(Self::Xor),
            "at_least" => Ok(Self::AtLeast(n()?)),
            "at_most" => Ok(Self::AtMost(n()?)),
            other => Err(ComponentError::invalid_config(format!("unknown logic op '{}'", other))),
        }
    }

    /// Evaluate over `truthy` of `total` inputs
    pub fn holds(&self, truthy: usize, total: usize) -> bool {
        match *self {
            Self::And => total > 0 && truthy == total,
            Self::Or => truthy > 0,
            Self::Xor => truthy == 1,
            Self::AtLeast(n) => truthy >= n,
            Self::AtMost(n) => truthy <= n,
        }
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty() && s != "false" && s != "0",
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Stateless logic gate over the declared input ports.
///
/// Emits `{"result": true, "inputs": ..}` when the condition holds and
/// nothing otherwise. Absent ports count as falsy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Logic;

#[async_trait]
impl Component for Logic {
    fn validate_config(&self, config: &Value) -> Result<(), ComponentError> {
        LogicOp::from_config(config).map(|_| ())
    }

    async fn process(
        &self,
        input: ComponentInput,
        ctx: &mut ProcessContext,
    ) -> Result<Value, ComponentError> {
        let op = LogicOp::from_config(ctx.config())?;
        let ports = &ctx.instance().inputs;
        let total = ports.len();
        let truthy = ports
            .iter()
            .filter(|port| input.get(&port.name).map(is_truthy).unwrap_or(false))
            .count();

        if op.holds(truthy, total) {
            Ok(json!({ "result": true, "inputs": input }))
        } else {
            Ok(Value::Null)
        }
    }
}
