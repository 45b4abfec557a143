use serde::{Deserialize, Serialize};

/// Purchasable call-credit blocks shown on the upsell screen. Checkout
/// happens outside this service; fulfillment lands through the admin
/// grant endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Bundle {
    Starter,
    Value,
}

impl Bundle {
    pub const ALL: [Bundle; 2] = [Bundle::Starter, Bundle::Value];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bundle::Starter => "starter",
            Bundle::Value => "value",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "starter" => Some(Bundle::Starter),
            "value" => Some(Bundle::Value),
            _ => None,
        }
    }

    pub fn credits(&self) -> i64 {
        match self {
            Bundle::Starter => 20,
            Bundle::Value => 50,
        }
    }

    pub fn price_cents(&self) -> i64 {
        match self {
            Bundle::Starter => 999,
            Bundle::Value => 1999,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog() {
        assert_eq!(Bundle::Starter.credits(), 20);
        assert_eq!(Bundle::Value.credits(), 50);
        assert!(Bundle::Value.price_cents() > Bundle::Starter.price_cents());
    }

    #[test]
    fn test_parse() {
        assert_eq!(Bundle::parse("starter"), Some(Bundle::Starter));
        assert_eq!(Bundle::parse("value"), Some(Bundle::Value));
        assert_eq!(Bundle::parse("mega"), None);
    }
}
