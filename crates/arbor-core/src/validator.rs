//! Payload validation capability.

/// Pure predicate run on a payload before any storage mutation.
pub trait Validator: Send + Sync {
    fn validate(&self, payload: &[u8]) -> bool;
}

impl<F> Validator for F
where
    F: Fn(&[u8]) -> bool + Send + Sync,
{
    fn validate(&self, payload: &[u8]) -> bool {
        self(payload)
    }
}

/// Accepts every payload.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptAll;

impl Validator for AcceptAll {
    fn validate(&self, _payload: &[u8]) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_validator() {
        let utf8 = |payload: &[u8]| std::str::from_utf8(payload).is_ok();
        assert!(utf8.validate(b"plain"));
        assert!(!utf8.validate(&[0xff, 0xfe]));
        assert!(AcceptAll.validate(&[0xff]));
    }
}
