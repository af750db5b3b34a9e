use crate::control::effect::EffectResult;
use anyhow::Result;
use serde_json::Value;

/// The settled value of an effect, as seen by a confirmation.
///
/// An effect that resolves to `null` is [`Maybe::Absent`], so a lookup that
/// found nothing needs no error of its own.
#[derive(Debug)]
pub enum Maybe<T> {
    Present(T),
    Absent,
    Fault(anyhow::Error),
}

impl<T> Maybe<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Maybe<U> {
        match self {
            Maybe::Present(value) => Maybe::Present(f(value)),
            Maybe::Absent => Maybe::Absent,
            Maybe::Fault(e) => Maybe::Fault(e),
        }
    }

    /// The present value, or `default` when absent. A fault is returned as
    /// the error.
    pub fn otherwise(self, default: T) -> Result<T> {
        match self {
            Maybe::Present(value) => Ok(value),
            Maybe::Absent => Ok(default),
            Maybe::Fault(e) => Err(e),
        }
    }

    /// Call `f` with the present value. A fault is returned as the error.
    pub fn invoke(self, f: impl FnOnce(T)) -> Result<()> {
        match self {
            Maybe::Present(value) => {
                f(value);
                Ok(())
            }
            Maybe::Absent => Ok(()),
            Maybe::Fault(e) => Err(e),
        }
    }

    pub fn present(&self) -> Option<&T> {
        match self {
            Maybe::Present(value) => Some(value),
            _ => None,
        }
    }

    pub fn fault(&self) -> Option<&anyhow::Error> {
        match self {
            Maybe::Fault(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Maybe::Fault(_))
    }

    pub fn into_result(self) -> Result<Option<T>> {
        match self {
            Maybe::Present(value) => Ok(Some(value)),
            Maybe::Absent => Ok(None),
            Maybe::Fault(e) => Err(e),
        }
    }
}

impl Maybe<Value> {
    /// Deserialize the present value.
    pub fn parse<T: serde::de::DeserializeOwned>(self) -> Maybe<T> {
        match self {
            Maybe::Present(value) => match serde_json::from_value(value) {
                Ok(parsed) => Maybe::Present(parsed),
                Err(e) => Maybe::Fault(e.into()),
            },
            Maybe::Absent => Maybe::Absent,
            Maybe::Fault(e) => Maybe::Fault(e),
        }
    }
}

impl From<&EffectResult> for Maybe<Value> {
    fn from(outcome: &EffectResult) -> Self {
        match outcome {
            Ok(Value::Null) => Maybe::Absent,
            Ok(value) => Maybe::Present(value.clone()),
            Err(fault) => Maybe::Fault(anyhow::Error::new(fault.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::effect::Fault;
    use serde_json::json;

    #[test]
    fn from_outcome() {
        let null: EffectResult = Ok(Value::Null);
        let one: EffectResult = Ok(json!(1));
        assert!(matches!(Maybe::from(&null), Maybe::Absent));
        assert!(matches!(Maybe::from(&one), Maybe::Present(_)));
        let fault: EffectResult = Err(Fault::new(anyhow::anyhow!("gone")));
        let maybe = Maybe::from(&fault);
        assert_eq!(maybe.fault().unwrap().to_string(), "gone");
    }

    #[test]
    fn otherwise() {
        assert_eq!(Maybe::Present(1).otherwise(0).unwrap(), 1);
        assert_eq!(Maybe::<i32>::Absent.otherwise(0).unwrap(), 0);
        assert!(Maybe::<i32>::Fault(anyhow::anyhow!("x")).otherwise(0).is_err());
    }

    #[test]
    fn map_and_parse() {
        #[derive(serde::Deserialize)]
        struct Task {
            id: u64,
        }
        let id = Maybe::Present(json!({"id": 7}))
            .parse::<Task>()
            .map(|t| t.id)
            .otherwise(0)
            .unwrap();
        assert_eq!(id, 7);
        assert!(Maybe::Present(json!("x")).parse::<Task>().is_fault());
    }
}
