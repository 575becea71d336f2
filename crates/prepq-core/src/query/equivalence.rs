//! Exact-match check between two normalized queries.

use tracing::error;

use crate::errors::PrepqError;
use crate::models::Value;
use crate::query::normalize::Prepared;

/// How two normalized queries differ.
#[derive(Clone, Debug, PartialEq)]
pub enum MappingFailure {
    Command {
        expected: String,
        actual: String,
    },
    Parameters {
        command: String,
        expected: Vec<Value>,
        actual: Vec<Value>,
    },
}

impl From<MappingFailure> for PrepqError {
    fn from(failure: MappingFailure) -> Self {
        match failure {
            MappingFailure::Command { expected, actual } => {
                PrepqError::CommandMappingFailed { expected, actual }
            }
            MappingFailure::Parameters {
                command,
                expected,
                actual,
            } => PrepqError::ParameterMappingFailed {
                command,
                expected,
                actual,
            },
        }
    }
}

/// Value identity: reals compare by bit pattern, so a NaN matches itself.
fn same_value(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Real(a), Value::Real(b)) => a.to_bits() == b.to_bits(),
        (Value::List(a), Value::List(b)) => same_params(a, b),
        _ => left == right,
    }
}

fn same_params(left: &[Value], right: &[Value]) -> bool {
    left.len() == right.len() && left.iter().zip(right).all(|(a, b)| same_value(a, b))
}

/// Check that `actual` is identical to `expected`.
///
/// Command text is compared first; parameters only when the commands match.
/// A mismatch is logged at error level with `message` and both sides.
pub fn assert_equivalent(
    expected: &Prepared,
    actual: &Prepared,
    message: &str,
) -> Result<(), MappingFailure> {
    if expected.command != actual.command {
        error!(
            "[PQ] {message}:\n{}\n{}",
            expected.command, actual.command
        );
        return Err(MappingFailure::Command {
            expected: expected.command.clone(),
            actual: actual.command.clone(),
        });
    }
    if !same_params(&expected.params, &actual.params) {
        error!(
            "[PQ] {message}:\n{}\n{:?}\n{:?}",
            expected.command, expected.params, actual.params
        );
        return Err(MappingFailure::Parameters {
            command: expected.command.clone(),
            expected: expected.params.clone(),
            actual: actual.params.clone(),
        });
    }
    Ok(())
}
