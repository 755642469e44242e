pub mod auth;
pub mod config;
pub mod email;
pub mod error;
pub mod inbox;
pub mod llm;
pub mod mailer;
pub mod models;
pub mod retry;

pub use auth::{AuthContext, AuthError, AuthProvider, DomainAuthProviders};
pub use config::DigestConfig;
pub use email::{parse_email, ParsedEmail};
pub use error::DigestError;
pub use inbox::{InboxError, InboxSource, SpoolDirInbox};
pub use llm::{LanguageModel, LlmConfig, LlmError, OpenAiChatClient};
pub use mailer::{DeliveryError, EmailSender, SmtpEmailSender};
pub use retry::RetryPolicy;
