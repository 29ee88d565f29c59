//! JSON rendering; the shapes match what the cache files store.

use crate::error::ReconcileError;
use serde::Serialize;

pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, ReconcileError> {
    serde_json::to_string_pretty(value).map_err(|e| ReconcileError::Json {
        path: "<stdout>".to_string(),
        at: ".".to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceKey;
    use crate::validate::{Rule, Violation};

    #[test]
    fn test_violation_json_shape() {
        let json = to_json(&[Violation::warning(
            Rule::VpnAuthentication,
            vec![ResourceKey::new(crate::models::ResourceKind::VpnGateway, "vpngw-hub")],
            "gateway subnet smaller than /27",
        )])
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["rule"], "vpn-authentication");
        assert_eq!(value[0]["severity"], "warning");
        assert_eq!(value[0]["entities"][0]["kind"], "vpnGateway");
    }
}
