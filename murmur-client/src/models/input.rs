//! Input DTOs with garde validation.
//!
//! Checked before anything goes on the wire, so an invalid send never leaves
//! the client.

use garde::Validate;

use crate::error::ChatError;

/// Validation constants (kept in step with the server)
pub const MAX_MESSAGE_LENGTH: usize = 10000;
const MAX_ROOM_NAME_LENGTH: usize = 100;
const MAX_USER_ID_LENGTH: usize = 128;

fn not_blank(value: &str, _ctx: &()) -> garde::Result {
    if value.trim().is_empty() {
        return Err(garde::Error::new("Message cannot be empty"));
    }
    Ok(())
}

/// Input for sending a message
#[derive(Debug, Validate)]
#[garde(context(()))]
pub struct SendMessageInput {
    #[garde(custom(not_blank), length(chars, max = MAX_MESSAGE_LENGTH))]
    pub content: String,
}

/// Input for creating a room
#[derive(Debug, Validate)]
#[garde(context(()))]
pub struct CreateRoomInput {
    #[garde(custom(not_blank), length(chars, max = MAX_ROOM_NAME_LENGTH))]
    pub name: String,
}

/// Input for adding a room member
#[derive(Debug, Validate)]
#[garde(context(()))]
pub struct AddMemberInput {
    #[garde(length(min = 1, max = MAX_USER_ID_LENGTH))]
    pub room_id: String,
    #[garde(length(min = 1, max = MAX_USER_ID_LENGTH))]
    pub user_id: String,
}

/// Helper trait to convert garde validation errors to ChatError
pub trait ValidateExt {
    fn validate_input(&self) -> Result<(), ChatError>;
}

impl<T: Validate<Context = ()>> ValidateExt for T {
    fn validate_input(&self) -> Result<(), ChatError> {
        self.validate().map_err(ChatError::from)
    }
}
