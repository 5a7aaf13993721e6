use crate::domain::UserId;

pub const UNAUTHORIZED_MESSAGE: &str = "⛔ You are not allowed to use this bot.";

// ============== Authorization ==============

/// Admin allow-list check. An empty list means no restriction; a sender we
/// cannot identify is only let through in that case.
pub fn is_authorized(user_id: Option<UserId>, admin_user_ids: &[i64]) -> bool {
    if admin_user_ids.is_empty() {
        return true;
    }
    let Some(user_id) = user_id else {
        return false;
    };
    admin_user_ids.contains(&user_id.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allow_list_admits_everyone() {
        assert!(is_authorized(Some(UserId(7)), &[]));
        assert!(is_authorized(None, &[]));
    }

    #[test]
    fn allow_list_restricts_senders() {
        let admins = [1, 2];
        assert!(is_authorized(Some(UserId(2)), &admins));
        assert!(!is_authorized(Some(UserId(3)), &admins));
        assert!(!is_authorized(None, &admins));
    }
}
