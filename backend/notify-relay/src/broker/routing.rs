/// Routing keys address a delivery to one user: `user.<uid>`
use crate::websocket::Uid;

pub const ROUTING_KEY_PREFIX: &str = "user.";

/// Extract the uid from a routing key
///
/// Only `user.` followed by one or more ASCII digits is accepted; anything
/// else, including values that overflow a uid, is unroutable.
pub fn parse_routing_key(routing_key: &str) -> Option<Uid> {
    let digits = routing_key.strip_prefix(ROUTING_KEY_PREFIX)?;

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    digits.parse().ok()
}

/// Routing key publishers use for `uid`
pub fn routing_key_for(uid: Uid) -> String {
    format!("{}{}", ROUTING_KEY_PREFIX, uid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_user_keys() {
        assert_eq!(parse_routing_key("user.7"), Some(7));
        assert_eq!(parse_routing_key("user.0042"), Some(42));
        assert_eq!(parse_routing_key(&routing_key_for(123456)), Some(123456));
    }

    #[test]
    fn test_rejects_other_keys() {
        for key in [
            "",
            "user.",
            "user",
            "user.abc",
            "user.7.extra",
            "user.-7",
            "user.+7",
            "userX7",
            "admin.7",
            "xuser.7",
            "user.99999999999999999999",
        ] {
            assert_eq!(parse_routing_key(key), None, "key {:?} should not route", key);
        }
    }
}
