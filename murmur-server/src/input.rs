//! Input DTOs with garde validation.
//!
//! Every write entering the store goes through one of these before any SQL runs.

use garde::Validate;

use crate::error::StoreError;

pub const MAX_USER_ID_LENGTH: usize = 128;
pub const MAX_ROOM_NAME_LENGTH: usize = 100;
pub const MAX_MESSAGE_LENGTH: usize = 10000;
pub const MAX_CLIENT_MSG_ID_LENGTH: usize = 64;

/// Content must contain something other than whitespace
fn not_blank(value: &str, _ctx: &()) -> garde::Result {
    if value.trim().is_empty() {
        return Err(garde::Error::new("must not be empty or whitespace"));
    }
    Ok(())
}

#[derive(Debug, Validate)]
#[garde(context(()))]
pub struct AppendInput {
    #[garde(length(min = 1, max = MAX_USER_ID_LENGTH))]
    pub sender_id: String,
    #[garde(custom(not_blank), length(chars, max = MAX_MESSAGE_LENGTH))]
    pub content: String,
    #[garde(length(min = 1, max = MAX_CLIENT_MSG_ID_LENGTH))]
    pub client_msg_id: Option<String>,
}

#[derive(Debug, Validate)]
#[garde(context(()))]
pub struct CreateRoomInput {
    #[garde(length(min = 1, max = MAX_USER_ID_LENGTH))]
    pub owner_id: String,
    #[garde(custom(not_blank), length(chars, max = MAX_ROOM_NAME_LENGTH))]
    pub name: String,
}

#[derive(Debug, Validate)]
#[garde(context(()))]
pub struct AddMemberInput {
    #[garde(length(min = 1, max = MAX_USER_ID_LENGTH))]
    pub room_id: String,
    #[garde(length(min = 1, max = MAX_USER_ID_LENGTH))]
    pub user_id: String,
}

/// Helper trait to convert garde reports into store errors
pub trait ValidateExt {
    fn validate_input(&self) -> Result<(), StoreError>;
}

impl<T: Validate<Context = ()>> ValidateExt for T {
    fn validate_input(&self) -> Result<(), StoreError> {
        self.validate().map_err(StoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_content_rejected() {
        for content in ["", "   ", "\n\t"] {
            let input = AppendInput {
                sender_id: "alice".into(),
                content: content.into(),
                client_msg_id: None,
            };
            assert!(matches!(
                input.validate_input(),
                Err(StoreError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_oversized_content_rejected() {
        let long = "a".repeat(MAX_MESSAGE_LENGTH + 1);
        let input = AppendInput {
            sender_id: "alice".into(),
            content: long,
            client_msg_id: None,
        };
        assert!(input.validate_input().is_err());
    }

    #[test]
    fn test_missing_sender_rejected() {
        let input = AppendInput {
            sender_id: String::new(),
            content: "hi".into(),
            client_msg_id: Some("c1".into()),
        };
        assert!(input.validate_input().is_err());
    }

    #[test]
    fn test_valid_append() {
        let input = AppendInput {
            sender_id: "alice".into(),
            content: "hi".into(),
            client_msg_id: Some("c1".into()),
        };
        assert!(input.validate_input().is_ok());
    }

    #[test]
    fn test_room_name_rules() {
        let ok = CreateRoomInput {
            owner_id: "alice".into(),
            name: "Study group".into(),
        };
        assert!(ok.validate_input().is_ok());
        let blank = CreateRoomInput {
            owner_id: "alice".into(),
            name: "  ".into(),
        };
        assert!(blank.validate_input().is_err());
    }
}
