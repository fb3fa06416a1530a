mod gate;
mod participants;

pub use gate::{presented_credential, AuthGate, CredentialQuery};
pub use participants::ConversationAuthorizer;
