//! Tauri IPC command handlers, grouped by domain.

pub mod barcode;
pub mod orders;
pub mod print;
pub mod settings;

/// Extract a string argument from the loose invoke shapes the frontend
/// bridge produces: a bare string, an object carrying one of `keys`, or a
/// plain second positional argument.
pub(crate) fn payload_string(
    arg0: Option<serde_json::Value>,
    arg1: Option<String>,
    keys: &[&str],
) -> Option<String> {
    match arg0 {
        Some(serde_json::Value::String(s)) => {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        Some(serde_json::Value::Object(obj)) => {
            for key in keys {
                if let Some(s) = obj.get(*key).and_then(|v| v.as_str()) {
                    let trimmed = s.trim();
                    if !trimmed.is_empty() {
                        return Some(trimmed.to_string());
                    }
                }
            }
        }
        _ => {}
    }
    arg1.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_string_shapes() {
        assert_eq!(
            payload_string(Some(serde_json::json!("O-1")), None, &["orderId"]),
            Some("O-1".to_string())
        );
        assert_eq!(
            payload_string(
                Some(serde_json::json!({"orderId": " O-2 "})),
                None,
                &["orderId", "id"]
            ),
            Some("O-2".to_string())
        );
        assert_eq!(
            payload_string(None, Some("O-3".into()), &["orderId"]),
            Some("O-3".to_string())
        );
        assert_eq!(payload_string(None, None, &["orderId"]), None);
        assert_eq!(
            payload_string(Some(serde_json::json!({"other": 1})), None, &["orderId"]),
            None
        );
    }
}
